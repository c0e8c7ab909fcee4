#![forbid(unsafe_code)]

//! Lifecycle manager for an embedded Spark gateway process.
//!
//! Resolves the engine configuration against host defaults, launches the
//! gateway with a prepared environment, connects its control channel and
//! guarantees that stopping the session kills the whole process tree.

pub mod config;
pub mod environment;
pub mod errors;
pub mod gateway;
pub mod models;
pub mod orchestrator;
pub mod process_tree;
pub mod resolver;

pub use config::ManagerConfig;
pub use errors::{GatewayError, Result};
pub use models::conf::{ConfValue, EngineConf};
pub use orchestrator::session::{EngineHandle, Session, SessionOptions};
