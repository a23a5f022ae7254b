//! Transport abstraction between the session and the server.
//!
//! The trait uses native `async fn` (Edition 2024 RPITIT), so the session is
//! generic over its transport rather than holding a trait object.

#![allow(async_fn_in_trait)]

use crate::certs::CertificateCandidate;
use crate::error::Result;
use attractap_core::ServerConfig;
use attractap_core::constants::CONNECTION_TIMEOUT_MS;
use attractap_protocol::Frame;
use std::time::Duration;

/// Everything a transport needs to open one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub server: ServerConfig,
    /// Full endpoint URL, `ws://` or `wss://`.
    pub url: String,
    /// Trust anchor for secure endpoints. `None` for plain ones.
    pub trust_anchor: Option<CertificateCandidate>,
    pub connect_timeout: Duration,
}

impl TransportConfig {
    pub fn new(server: ServerConfig) -> Self {
        let url = server.websocket_url();
        Self {
            server,
            url,
            trust_anchor: None,
            connect_timeout: Duration::from_millis(CONNECTION_TIMEOUT_MS),
        }
    }

    pub fn with_trust_anchor(mut self, anchor: CertificateCandidate) -> Self {
        self.trust_anchor = Some(anchor);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn is_secure(&self) -> bool {
        self.server.is_secure()
    }
}

/// Bidirectional frame channel to the server.
///
/// `recv` must be cancel safe: the session polls it inside `tokio::select!`.
///
/// # Examples
///
/// ```no_run
/// use attractap_core::ServerConfig;
/// use attractap_network::{TcpTransport, Transport, TransportConfig};
/// use attractap_protocol::Frame;
///
/// # async fn example() -> attractap_network::Result<()> {
/// let mut transport = TcpTransport::default();
/// transport
///     .connect(&TransportConfig::new(ServerConfig::new("127.0.0.1", 3000)))
///     .await?;
/// transport.send(Frame::text(r#"{"event":"HEARTBEAT","data":{}}"#)).await?;
/// while let Some(frame) = transport.recv().await {
///     println!("{frame:?}");
/// }
/// # Ok(())
/// # }
/// ```
pub trait Transport: Send {
    /// Open a connection, replacing any previous one.
    async fn connect(&mut self, config: &TransportConfig) -> Result<()>;

    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Next inbound frame. `None` means the connection is gone.
    async fn recv(&mut self) -> Option<Frame>;

    /// Close the connection. Idempotent.
    async fn close(&mut self);

    fn is_connected(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builds_url() {
        let config = TransportConfig::new(ServerConfig::new("reader.example.org", 443));
        assert_eq!(
            config.url,
            "wss://reader.example.org:443/api/attractap/websocket"
        );
        assert!(config.is_secure());
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_plain_endpoint() {
        let config = TransportConfig::new(ServerConfig::new("10.0.0.2", 3000));
        assert_eq!(config.url, "ws://10.0.0.2:3000/api/attractap/websocket");
        assert!(!config.is_secure());
        assert!(config.trust_anchor.is_none());
    }
}
