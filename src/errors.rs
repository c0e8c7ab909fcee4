//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Error enumeration covering every gateway lifecycle failure mode.
#[derive(Debug)]
pub enum GatewayError {
    /// A required host path or setting could not be resolved.
    Config(String),
    /// The gateway process failed to start or never became reachable.
    Launch(String),
    /// The channel connected but the engine did not answer the liveness probe.
    Startup(String),
    /// Graceful shutdown signalling failed. Logged, never surfaced by `stop`.
    Teardown(String),
    /// Control channel framing or protocol failure.
    Channel(String),
    /// Another session already holds the process-wide gateway slot.
    SessionActive(String),
    /// Operation requires a live session.
    NotLive(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for GatewayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::Startup(msg) => write!(f, "startup: {msg}"),
            Self::Teardown(msg) => write!(f, "teardown: {msg}"),
            Self::Channel(msg) => write!(f, "channel: {msg}"),
            Self::SessionActive(msg) => write!(f, "session active: {msg}"),
            Self::NotLive(msg) => write!(f, "not live: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<toml::de::Error> for GatewayError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
