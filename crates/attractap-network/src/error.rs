//! Error types for the transport layer.

use attractap_protocol::ProtocolError;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Errors that can occur while connecting to or talking with the server.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Transport is not connected to the server
    #[error("Not connected to server")]
    NotConnected,

    /// Connection attempt timed out
    #[error("Connection timeout after {0}ms")]
    ConnectionTimeout(u64),

    /// Write operation timed out
    #[error("Write timeout after {0}ms")]
    WriteTimeout(u64),

    /// Connection was lost during operation
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Secure handshake rejected with the configured trust anchor
    #[error("Certificate rejected: {message}")]
    Certificate { message: String },

    /// No trust anchor left to try for a secure endpoint
    #[error("No certificate candidates left")]
    CertificatesExhausted,

    /// Server endpoint cannot be used
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// WebSocket handshake or protocol failure
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Framing or encoding error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Low-level I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetworkError {
    pub fn certificate(message: impl Into<String>) -> Self {
        Self::Certificate {
            message: message.into(),
        }
    }

    /// Failures that should make the session try the next trust anchor.
    pub fn is_certificate_error(&self) -> bool {
        matches!(self, Self::Certificate { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certificate_classification() {
        assert!(NetworkError::certificate("unknown issuer").is_certificate_error());
        assert!(!NetworkError::ConnectionTimeout(10_000).is_certificate_error());
        assert!(!NetworkError::NotConnected.is_certificate_error());
    }

    #[test]
    fn test_timeout_display() {
        assert_eq!(
            NetworkError::ConnectionTimeout(10_000).to_string(),
            "Connection timeout after 10000ms"
        );
    }
}
