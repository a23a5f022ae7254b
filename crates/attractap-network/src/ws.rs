//! WebSocket transport for the Attraccess reader endpoint.
//!
//! `ws://` endpoints use a plain TCP stream. `wss://` endpoints run TLS with
//! exactly one trust anchor, the one the [`CertificateSelector`] put into the
//! [`TransportConfig`]; a handshake that rejects the server certificate
//! surfaces as [`NetworkError::Certificate`] so the selector can move on.
//!
//! Text messages carry JSON envelopes, binary messages firmware chunks.
//! Ping/pong is answered inside tungstenite and never reaches the session.
//!
//! [`CertificateSelector`]: crate::CertificateSelector

use crate::certs::CertificateCandidate;
use crate::error::{NetworkError, Result};
use crate::transport::{Transport, TransportConfig};
use attractap_protocol::Frame;
use futures::{SinkExt, StreamExt};
use rustls::{AlertDescription, ClientConfig, RootCertStore};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};
use tracing::{debug, error, info, trace, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close handshake limit.
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsTransportConfig {
    /// Timeout for a single send
    pub write_timeout: Duration,

    /// Larger inbound messages are dropped
    pub max_message_size: usize,
}

impl Default for WsTransportConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_millis(3000),
            max_message_size: 64 * 1024,
        }
    }
}

impl WsTransportConfig {
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}

/// WebSocket transport carrying [`Frame`]s.
#[derive(Default)]
pub struct WsTransport {
    config: WsTransportConfig,
    socket: Option<Socket>,
    /// Endpoint of the current connection, for logs
    url: Option<String>,
}

impl fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsTransport")
            .field("config", &self.config)
            .field("connected", &self.socket.is_some())
            .field("url", &self.url)
            .finish()
    }
}

impl WsTransport {
    pub fn new(config: WsTransportConfig) -> Self {
        Self {
            config,
            socket: None,
            url: None,
        }
    }
}

impl Transport for WsTransport {
    async fn connect(&mut self, config: &TransportConfig) -> Result<()> {
        if self.socket.is_some() {
            self.close().await;
        }
        config
            .server
            .validate()
            .map_err(|e| NetworkError::InvalidEndpoint(e.to_string()))?;

        let connector = if config.is_secure() {
            let anchor = config.trust_anchor.as_ref();
            if let Some(anchor) = anchor {
                debug!(certificate = %anchor.name, "Using trust anchor");
            }
            Connector::Rustls(Arc::new(client_config(anchor)?))
        } else {
            Connector::Plain
        };

        info!(url = %config.url, "Connecting to server");
        let handshake = connect_async_tls_with_config(config.url.as_str(), None, true, Some(connector));
        let timeout = config.connect_timeout;
        let (socket, response) = match tokio::time::timeout(timeout, handshake).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => {
                let e = connect_error(e);
                error!(error = %e, "Connection failed");
                return Err(e);
            }
            Err(_) => {
                warn!("Connection timeout after {}ms", timeout.as_millis());
                return Err(NetworkError::ConnectionTimeout(timeout.as_millis() as u64));
            }
        };

        debug!(status = %response.status(), "WebSocket handshake complete");
        self.socket = Some(socket);
        self.url = Some(config.url.clone());
        info!(url = %config.url, "Connected");
        Ok(())
    }

    async fn send(&mut self, frame: Frame) -> Result<()> {
        let socket = self.socket.as_mut().ok_or(NetworkError::NotConnected)?;
        trace!(len = frame.len(), text = frame.is_text(), "Sending frame");

        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data.to_vec()),
        };
        let timeout = self.config.write_timeout;
        match tokio::time::timeout(timeout, socket.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("Failed to send frame: {}", e);
                self.socket = None;
                Err(NetworkError::ConnectionLost(e.to_string()))
            }
            Err(_) => {
                warn!("Send timeout after {}ms", timeout.as_millis());
                Err(NetworkError::WriteTimeout(timeout.as_millis() as u64))
            }
        }
    }

    async fn recv(&mut self) -> Option<Frame> {
        loop {
            let socket = self.socket.as_mut()?;
            let message = match socket.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    error!("WebSocket read failed: {}", e);
                    self.socket = None;
                    return None;
                }
                None => {
                    warn!("Connection closed by server");
                    self.socket = None;
                    return None;
                }
            };

            let frame = match message {
                Message::Text(text) => Frame::Text(text),
                Message::Binary(data) => Frame::binary(data),
                Message::Close(close) => {
                    info!(?close, "Server closed the connection");
                    self.socket = None;
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };
            if frame.len() > self.config.max_message_size {
                warn!(
                    len = frame.len(),
                    max = self.config.max_message_size,
                    "Dropping oversized message"
                );
                continue;
            }
            trace!(len = frame.len(), text = frame.is_text(), "Received frame");
            return Some(frame);
        }
    }

    async fn close(&mut self) {
        let Some(mut socket) = self.socket.take() else {
            return;
        };
        info!(url = ?self.url.take(), "Closing connection");
        match tokio::time::timeout(CLOSE_TIMEOUT, socket.close(None)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Close handshake failed: {}", e),
            Err(_) => warn!("Close timeout ({}ms)", CLOSE_TIMEOUT.as_millis()),
        }
        debug!("Connection closed");
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }
}

/// TLS client configuration trusting only `anchor`.
///
/// An anchor without PEM (or no anchor at all) trusts the bundled Mozilla
/// root set.
///
/// # Errors
/// `Certificate` when the anchor holds no usable certificate.
pub fn client_config(anchor: Option<&CertificateCandidate>) -> Result<ClientConfig> {
    let roots = root_store(anchor)?;
    let config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| NetworkError::certificate(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();
    Ok(config)
}

fn root_store(anchor: Option<&CertificateCandidate>) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    let Some((name, pem)) =
        anchor.and_then(|anchor| anchor.pem.as_deref().map(|pem| (anchor.name.as_str(), pem)))
    else {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        return Ok(roots);
    };

    for cert in rustls_pemfile::certs(&mut pem.as_bytes()) {
        let cert = cert.map_err(|e| NetworkError::certificate(format!("{name}: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| NetworkError::certificate(format!("{name}: {e}")))?;
    }
    if roots.is_empty() {
        return Err(NetworkError::certificate(format!(
            "{name}: no certificate in trust anchor"
        )));
    }
    Ok(roots)
}

/// Map a failed WebSocket connect, singling out rejected server certificates.
fn connect_error(error: tungstenite::Error) -> NetworkError {
    match error {
        tungstenite::Error::Io(io) if rejected_certificate(&io) => {
            NetworkError::certificate(io.to_string())
        }
        tungstenite::Error::Io(io) => NetworkError::Io(io),
        tungstenite::Error::Tls(tls) => NetworkError::certificate(tls.to_string()),
        tungstenite::Error::Url(url) => NetworkError::InvalidEndpoint(url.to_string()),
        other => NetworkError::WebSocket(other.to_string()),
    }
}

/// tokio-rustls reports handshake failures as `InvalidData` I/O errors
/// wrapping the `rustls::Error`.
fn rejected_certificate(error: &std::io::Error) -> bool {
    error
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(|tls| {
            matches!(
                tls,
                rustls::Error::InvalidCertificate(_)
                    | rustls::Error::NoCertificatesPresented
                    | rustls::Error::AlertReceived(
                        AlertDescription::BadCertificate
                            | AlertDescription::UnknownCA
                            | AlertDescription::CertificateExpired
                    )
            )
        })
}
