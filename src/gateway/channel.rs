//! Control channel to a running gateway.
//!
//! [`ControlChannel`] is the seam between session lifecycle logic and the
//! gateway protocol. The default [`Py4jConnector`] speaks just enough of the
//! Py4J text protocol to authenticate, run a trivial probe call and ask the
//! gateway to shut down; object marshalling is left to the engine client.

use std::future::Future;
use std::net::Ipv4Addr;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::gateway::codec::GatewayCodec;
use crate::gateway::conn_info::GatewayEndpoint;
use crate::{GatewayError, Result};

/// Authenticate with the shared secret.
pub const AUTH_COMMAND: &str = "A";
/// Call `getClass` on the gateway entry point; answers with a reference.
pub const PROBE_COMMAND: &str = "c\nt\ngetClass\ne";
/// Ask the gateway server to shut down.
pub const SHUTDOWN_COMMAND: &str = "s\ne";

/// Boxed future returned by channel trait methods.
pub type ChannelFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A connected, authenticated control channel.
pub trait ControlChannel: Send + Sync {
    /// Issue one trivial round-trip to confirm the engine is answering.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Channel` if the gateway answers with an error
    /// or the connection fails.
    fn probe(&mut self) -> ChannelFuture<'_, ()>;

    /// Ask the gateway to shut down and close the connection.
    ///
    /// Calling on an already closed channel returns `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Teardown` if the shutdown request cannot be
    /// delivered.
    fn shutdown(&mut self) -> ChannelFuture<'_, ()>;
}

/// Opens control channels to freshly launched gateways.
pub trait ChannelConnector: Send + Sync {
    /// Connect and authenticate against `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Channel` if the connection or authentication
    /// fails.
    fn connect<'a>(
        &'a self,
        endpoint: &'a GatewayEndpoint,
    ) -> ChannelFuture<'a, Box<dyn ControlChannel>>;
}

/// Connector for Py4J-framed gateways on the loopback interface.
#[derive(Debug, Clone)]
pub struct Py4jConnector {
    connect_timeout: Duration,
}

impl Py4jConnector {
    /// Create a connector that gives up connecting after `connect_timeout`.
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for Py4jConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl ChannelConnector for Py4jConnector {
    fn connect<'a>(
        &'a self,
        endpoint: &'a GatewayEndpoint,
    ) -> ChannelFuture<'a, Box<dyn ControlChannel>> {
        Box::pin(async move {
            let channel = Py4jChannel::connect(endpoint, self.connect_timeout).await?;
            Ok(Box::new(channel) as Box<dyn ControlChannel>)
        })
    }
}

/// Py4J-framed TCP channel.
#[derive(Debug)]
pub struct Py4jChannel {
    framed: Option<Framed<TcpStream, GatewayCodec>>,
}

impl Py4jChannel {
    /// Connect to `127.0.0.1:<port>` and authenticate with the secret.
    ///
    /// `timeout` bounds the TCP connect and the authentication round-trip
    /// together.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Channel` on timeout, I/O failure or a rejected
    /// secret.
    pub async fn connect(endpoint: &GatewayEndpoint, timeout: Duration) -> Result<Self> {
        tokio::time::timeout(timeout, Self::open(endpoint))
            .await
            .map_err(|_| {
                GatewayError::Channel(format!(
                    "connect to port {} timed out after {timeout:?}",
                    endpoint.port
                ))
            })?
    }

    async fn open(endpoint: &GatewayEndpoint) -> Result<Self> {
        let addr = (Ipv4Addr::LOCALHOST, endpoint.port);
        let stream = TcpStream::connect(addr).await.map_err(|err| {
            GatewayError::Channel(format!("connect to port {} failed: {err}", endpoint.port))
        })?;
        stream.set_nodelay(true).ok();

        let mut channel = Self {
            framed: Some(Framed::new(stream, GatewayCodec::new())),
        };
        channel
            .call(&format!("{AUTH_COMMAND}\n{}", endpoint.secret))
            .await
            .map_err(|err| GatewayError::Channel(format!("authentication rejected: {err}")))?;
        debug!(port = endpoint.port, "gateway channel authenticated");
        Ok(channel)
    }

    /// Send one command and return the success payload of its answer.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Channel` if the channel is closed, the
    /// connection drops, or the gateway answers with an error.
    pub async fn call(&mut self, command: &str) -> Result<String> {
        let framed = self
            .framed
            .as_mut()
            .ok_or_else(|| GatewayError::Channel("channel is closed".into()))?;

        framed.send(command.to_owned()).await?;
        let answer = framed
            .next()
            .await
            .ok_or_else(|| GatewayError::Channel("gateway closed the connection".into()))??;
        parse_answer(&answer)
    }

    /// Whether the channel has been shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.framed.is_none()
    }
}

impl ControlChannel for Py4jChannel {
    fn probe(&mut self) -> ChannelFuture<'_, ()> {
        Box::pin(async move {
            self.call(PROBE_COMMAND).await?;
            Ok(())
        })
    }

    fn shutdown(&mut self) -> ChannelFuture<'_, ()> {
        Box::pin(async move {
            let Some(mut framed) = self.framed.take() else {
                return Ok(());
            };

            // The gateway tears the socket down without answering.
            let sent = framed.send(SHUTDOWN_COMMAND.to_owned()).await;
            let mut stream = framed.into_inner();
            if let Err(err) = stream.shutdown().await {
                warn!(%err, "failed to close gateway socket");
            }
            sent.map_err(|err| GatewayError::Teardown(format!("shutdown not delivered: {err}")))
        })
    }
}

/// Interpret a gateway answer line.
///
/// # Errors
///
/// Returns `GatewayError::Channel` for error answers and unknown framing.
pub fn parse_answer(answer: &str) -> Result<String> {
    let body = answer.strip_prefix('!').unwrap_or(answer);
    match body.chars().next() {
        Some('y') => Ok(body[1..].to_owned()),
        Some('x') => Err(GatewayError::Channel(format!(
            "gateway returned error: {}",
            &body[1..]
        ))),
        _ => Err(GatewayError::Channel(format!(
            "unexpected gateway answer: {answer:?}"
        ))),
    }
}
