//! Raw upgrade bridge.
//!
//! Upgrade requests for any path other than the reserved WebSocket path are
//! not handled here at all. The connection is handed to a gateway process:
//! the buffered request head is replayed verbatim, then bytes are copied in
//! both directions until either side finishes.

pub mod head;
pub mod prefixed;

use std::io;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{BRIDGE_CONNECTIONS_ACTIVE, BRIDGE_CONNECTIONS_TOTAL, BRIDGE_ERRORS_TOTAL};

/// Failure before the splice starts. The client connection is closed.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The gateway did not accept within the connect timeout.
    #[error("gateway {addr} did not accept within {timeout:?}")]
    ConnectTimeout {
        /// Gateway address.
        addr: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },
    /// The gateway refused or the address did not resolve.
    #[error("gateway {addr} unreachable: {source}")]
    Connect {
        /// Gateway address.
        addr: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Writing the buffered request head to the gateway failed.
    #[error("replaying request head to gateway failed: {0}")]
    Replay(#[source] io::Error),
}

impl BridgeError {
    /// Metric label for the failing stage.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::ConnectTimeout { .. } => "connect_timeout",
            Self::Connect { .. } => "connect",
            Self::Replay(_) => "replay",
        }
    }
}

/// Which side ended a splice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpliceEnd {
    /// The client stopped sending or failed.
    Client,
    /// The gateway stopped sending or failed.
    Gateway,
    /// Server shutdown.
    Shutdown,
}

/// How a splice ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceSummary {
    /// The side that finished first.
    pub ended_by: SpliceEnd,
    /// Bytes copied in the finishing direction.
    pub bytes: u64,
}

/// Copy bytes both ways until either direction ends, then drop both
/// streams.
///
/// EOF or an error in one direction tears down the other; half-open
/// connections are not kept.
pub async fn splice<C, G>(client: C, gateway: G, cancel: &CancellationToken) -> SpliceSummary
where
    C: AsyncRead + AsyncWrite + Unpin,
    G: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_rx, mut client_tx) = tokio::io::split(client);
    let (mut gateway_rx, mut gateway_tx) = tokio::io::split(gateway);

    let (ended_by, copied) = tokio::select! {
        r = tokio::io::copy(&mut client_rx, &mut gateway_tx) => (SpliceEnd::Client, r),
        r = tokio::io::copy(&mut gateway_rx, &mut client_tx) => (SpliceEnd::Gateway, r),
        () = cancel.cancelled() => (SpliceEnd::Shutdown, Ok(0)),
    };
    let bytes = copied.unwrap_or_else(|error| {
        debug!(?ended_by, %error, "splice direction failed");
        0
    });
    SpliceSummary { ended_by, bytes }
}

/// Forwards foreign upgrade connections to the gateway.
#[derive(Debug, Clone)]
pub struct UpgradeBridge {
    addr: String,
    connect_timeout: Duration,
}

impl UpgradeBridge {
    /// Bridge to `addr`, giving up on connect after `connect_timeout`.
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
        }
    }

    /// Gateway address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Hand `client` to the gateway.
    ///
    /// `buffered` holds every byte already read from the client and is
    /// written to the gateway before any copying starts. On a pre-splice
    /// failure the client is shut down and the error returned.
    pub async fn forward<C>(
        &self,
        mut client: C,
        buffered: &[u8],
        cancel: &CancellationToken,
    ) -> Result<SpliceSummary, BridgeError>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        counter!(BRIDGE_CONNECTIONS_TOTAL).increment(1);
        let gateway = match self.open(buffered).await {
            Ok(gateway) => gateway,
            Err(error) => {
                counter!(BRIDGE_ERRORS_TOTAL, "stage" => error.stage()).increment(1);
                warn!(gateway = %self.addr, %error, "bridge setup failed");
                let _ = client.shutdown().await;
                return Err(error);
            }
        };

        gauge!(BRIDGE_CONNECTIONS_ACTIVE).increment(1.0);
        let summary = splice(client, gateway, cancel).await;
        gauge!(BRIDGE_CONNECTIONS_ACTIVE).decrement(1.0);
        info!(
            gateway = %self.addr,
            ended_by = ?summary.ended_by,
            bytes = summary.bytes,
            "bridged connection closed"
        );
        Ok(summary)
    }

    async fn open(&self, buffered: &[u8]) -> Result<TcpStream, BridgeError> {
        let mut gateway = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| BridgeError::ConnectTimeout {
                addr: self.addr.clone(),
                timeout: self.connect_timeout,
            })?
            .map_err(|source| BridgeError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        let _ = gateway.set_nodelay(true);
        gateway
            .write_all(buffered)
            .await
            .map_err(BridgeError::Replay)?;
        Ok(gateway)
    }
}
