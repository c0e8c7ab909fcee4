//! Connection-info file written by the gateway at startup.
//!
//! The launcher names a path in `_PYSPARK_DRIVER_CONN_INFO_PATH`; once its
//! server socket is bound, the gateway writes:
//!
//! ```text
//! i32 (big-endian)  port
//! i32 (big-endian)  secret length in bytes
//! [u8; len]         UTF-8 secret
//! ```
//!
//! The gateway renames a temp file into place, but a partially written file
//! is still treated as "not ready yet" rather than as an error.

use std::fmt::{Debug, Formatter};
use std::io::ErrorKind;
use std::path::Path;

use crate::{GatewayError, Result};

/// Environment variable carrying the connection-info path to the child.
pub const CONN_INFO_PATH_ENV: &str = "_PYSPARK_DRIVER_CONN_INFO_PATH";

/// Upper bound on the advertised secret; anything larger is corrupt.
const MAX_SECRET_BYTES: usize = 64 * 1024;

/// Loopback port and authentication secret advertised by the gateway.
#[derive(Clone, PartialEq, Eq)]
pub struct GatewayEndpoint {
    /// TCP port on the loopback interface.
    pub port: u16,
    /// Shared secret presented when the channel authenticates.
    pub secret: String,
}

impl Debug for GatewayEndpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayEndpoint")
            .field("port", &self.port)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl GatewayEndpoint {
    /// Serialize in the gateway's on-disk layout.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let secret = self.secret.as_bytes();
        let mut out = Vec::with_capacity(8 + secret.len());
        out.extend_from_slice(&i32::from(self.port).to_be_bytes());
        // Secrets are bounded well below i32::MAX by MAX_SECRET_BYTES.
        let len = i32::try_from(secret.len()).unwrap_or(i32::MAX);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(secret);
        out
    }
}

/// Parse connection info. Returns `Ok(None)` while the file is incomplete.
///
/// # Errors
///
/// Returns `GatewayError::Launch` if the port is out of range, the secret
/// length is negative or implausible, or the secret is not UTF-8.
pub fn parse(bytes: &[u8]) -> Result<Option<GatewayEndpoint>> {
    let Some((port, rest)) = read_i32(bytes) else {
        return Ok(None);
    };
    let Some((len, rest)) = read_i32(rest) else {
        return Ok(None);
    };

    let port = u16::try_from(port)
        .ok()
        .filter(|&p| p != 0)
        .ok_or_else(|| GatewayError::Launch(format!("gateway advertised invalid port {port}")))?;
    let len = usize::try_from(len)
        .ok()
        .filter(|&l| l <= MAX_SECRET_BYTES)
        .ok_or_else(|| {
            GatewayError::Launch(format!("gateway advertised invalid secret length {len}"))
        })?;

    if rest.len() < len {
        return Ok(None);
    }
    let secret = std::str::from_utf8(&rest[..len])
        .map_err(|err| GatewayError::Launch(format!("gateway secret is not utf-8: {err}")))?;

    Ok(Some(GatewayEndpoint {
        port,
        secret: secret.to_owned(),
    }))
}

/// Read and parse the connection-info file at `path`.
///
/// A missing file is reported as `Ok(None)`.
///
/// # Errors
///
/// Returns `GatewayError::Launch` for unreadable or malformed files.
pub async fn read(path: &Path) -> Result<Option<GatewayEndpoint>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => parse(&bytes),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(GatewayError::Launch(format!(
            "cannot read connection info {}: {err}",
            path.display()
        ))),
    }
}

fn read_i32(bytes: &[u8]) -> Option<(i32, &[u8])> {
    let (head, rest) = bytes.split_first_chunk::<4>()?;
    Some((i32::from_be_bytes(*head), rest))
}
