//! Error types for the wire protocol.

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialized message exceeds the outbound size limit.
    #[error("Message too large: {size} bytes (max {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    /// Frame on the byte stream exceeds the codec limit.
    #[error("Frame too large: {size} bytes (max {max_size})")]
    FrameTooLarge { size: usize, max_size: usize },

    /// Frame header carries an unknown kind tag.
    #[error("Unknown frame kind: 0x{0:02x}")]
    UnknownFrameKind(u8),

    /// Text frame is not valid UTF-8.
    #[error("Text frame is not valid UTF-8")]
    InvalidUtf8,

    /// Message has no payload where one is required.
    #[error("Missing payload for {message_type}")]
    MissingPayload { message_type: String },

    /// Payload is present but does not have the expected shape.
    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String },

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Domain value inside a payload failed validation.
    #[error("Invalid value: {0}")]
    Domain(#[from] attractap_core::Error),

    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub fn missing_payload(message_type: impl Into<String>) -> Self {
        Self::MissingPayload {
            message_type: message_type.into(),
        }
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_too_large_display() {
        let error = ProtocolError::MessageTooLarge {
            size: 2048,
            max_size: 1024,
        };
        assert_eq!(error.to_string(), "Message too large: 2048 bytes (max 1024)");
    }

    #[test]
    fn test_unknown_frame_kind_display() {
        assert_eq!(
            ProtocolError::UnknownFrameKind(0x7f).to_string(),
            "Unknown frame kind: 0x7f"
        );
    }
}
