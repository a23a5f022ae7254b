//! TCP transport for a local development bridge.
//!
//! Frames travel over a plain TCP stream using the [`FrameCodec`] layout.
//! There is no TLS here; servers and secure endpoints are reached through
//! [`WsTransport`](crate::WsTransport).
//!
//! # Architecture
//!
//! ```text
//! SessionManager
//!     │
//!     └─> TcpTransport ───(TCP)───> Server / bridge
//!            │
//!            └─> FrameCodec (automatic framing)
//! ```
//!
//! # Design Principles
//!
//! - **No automatic retry**: the session decides when to reconnect
//! - **Single connection**: `connect` replaces any previous stream
//! - **Bounded I/O**: connect and send are bounded by timeouts, receive is
//!   not (the session idles on it between messages)

use crate::error::{NetworkError, Result};
use crate::transport::{Transport, TransportConfig};
use attractap_protocol::{Frame, FrameCodec};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

/// Flush and shutdown limit when closing.
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Configuration for the TCP transport.
///
/// # Example
///
/// ```
/// use attractap_network::TcpTransportConfig;
/// use std::time::Duration;
///
/// let config = TcpTransportConfig::default().with_write_timeout(Duration::from_secs(1));
/// assert_eq!(config.max_frame_size, 64 * 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpTransportConfig {
    /// Timeout for a single send
    pub write_timeout: Duration,

    /// Largest frame accepted from the server
    pub max_frame_size: usize,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_millis(3000),
            max_frame_size: FrameCodec::new().max_frame_size(),
        }
    }
}

impl TcpTransportConfig {
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

/// TCP transport carrying [`Frame`]s.
#[derive(Debug, Default)]
pub struct TcpTransport {
    config: TcpTransportConfig,

    /// Framed TCP stream (None if not connected)
    framed: Option<Framed<TcpStream, FrameCodec>>,

    /// Endpoint of the current connection, for logs
    peer: Option<String>,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig) -> Self {
        Self {
            config,
            framed: None,
            peer: None,
        }
    }
}

impl Transport for TcpTransport {
    async fn connect(&mut self, config: &TransportConfig) -> Result<()> {
        if self.framed.is_some() {
            self.close().await;
        }

        let host = config.server.hostname.trim().to_string();
        let port = config.server.port;
        if host.is_empty() || port == 0 {
            return Err(NetworkError::InvalidEndpoint(config.server.to_string()));
        }

        info!(url = %config.url, "Connecting to server");
        if config.trust_anchor.is_some() {
            warn!("TCP transport has no TLS, ignoring trust anchor");
        }

        let timeout = config.connect_timeout;
        let stream =
            match tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port))).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    error!(error = %e, "Connection failed");
                    return Err(e.into());
                }
                Err(_) => {
                    warn!("Connection timeout after {}ms", timeout.as_millis());
                    return Err(NetworkError::ConnectionTimeout(timeout.as_millis() as u64));
                }
            };

        // Small JSON frames; do not wait for Nagle coalescing
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        let codec = FrameCodec::with_max_frame_size(self.config.max_frame_size);
        self.framed = Some(Framed::new(stream, codec));
        self.peer = Some(format!("{host}:{port}"));
        info!(peer = %format!("{host}:{port}"), "Connected");
        Ok(())
    }

    async fn send(&mut self, frame: Frame) -> Result<()> {
        let framed = self.framed.as_mut().ok_or(NetworkError::NotConnected)?;
        trace!(len = frame.len(), text = frame.is_text(), "Sending frame");

        let timeout = self.config.write_timeout;
        match tokio::time::timeout(timeout, framed.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("Failed to send frame: {}", e);
                self.framed = None;
                Err(NetworkError::Protocol(e))
            }
            Err(_) => {
                warn!("Send timeout after {}ms", timeout.as_millis());
                Err(NetworkError::WriteTimeout(timeout.as_millis() as u64))
            }
        }
    }

    async fn recv(&mut self) -> Option<Frame> {
        let framed = self.framed.as_mut()?;
        match framed.next().await {
            Some(Ok(frame)) => {
                trace!(len = frame.len(), text = frame.is_text(), "Received frame");
                Some(frame)
            }
            Some(Err(e)) => {
                error!("Failed to decode frame: {}", e);
                self.framed = None;
                None
            }
            None => {
                warn!("Connection closed by server");
                self.framed = None;
                None
            }
        }
    }

    async fn close(&mut self) {
        let Some(mut framed) = self.framed.take() else {
            return;
        };
        info!(peer = ?self.peer.take(), "Closing connection");

        match tokio::time::timeout(CLOSE_TIMEOUT, framed.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Error flushing during close: {}", e),
            Err(_) => warn!("Flush timeout during close ({}ms)", CLOSE_TIMEOUT.as_millis()),
        }

        let mut stream = framed.into_inner();
        match tokio::time::timeout(CLOSE_TIMEOUT, stream.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Error during shutdown: {}", e),
            Err(_) => warn!(
                "Shutdown timeout during close ({}ms)",
                CLOSE_TIMEOUT.as_millis()
            ),
        }

        debug!("Connection closed");
    }

    fn is_connected(&self) -> bool {
        self.framed.is_some()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if self.framed.is_some() {
            debug!("TcpTransport dropped while connected - connection will be closed");
        }
    }
}
