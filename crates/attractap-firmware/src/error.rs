//! Error types for firmware installation.

/// Result type alias for firmware operations.
pub type Result<T> = std::result::Result<T, FirmwareError>;

#[derive(Debug, thiserror::Error)]
pub enum FirmwareError {
    /// No writable image slot could be opened
    #[error("Image slot unavailable: {message}")]
    SlotUnavailable { message: String },

    /// Writing a chunk to the slot failed
    #[error("Write failed: {message}")]
    Write { message: String },

    /// The written image could not be finalized or activated
    #[error("Finalize failed: {message}")]
    Finalize { message: String },

    /// An update is already being transferred
    #[error("Firmware transfer already in progress")]
    TransferInProgress,

    /// The announced image has no chunks
    #[error("Firmware image has no chunks")]
    NoChunks,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FirmwareError {
    pub fn slot_unavailable(message: impl Into<String>) -> Self {
        Self::SlotUnavailable {
            message: message.into(),
        }
    }

    pub fn write(message: impl Into<String>) -> Self {
        Self::Write {
            message: message.into(),
        }
    }

    pub fn finalize(message: impl Into<String>) -> Self {
        Self::Finalize {
            message: message.into(),
        }
    }
}
