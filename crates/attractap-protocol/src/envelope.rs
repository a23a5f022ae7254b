//! JSON message envelope.
//!
//! Every text frame carries one object:
//!
//! ```text
//! { "event": "EVENT" | "RESPONSE" | "HEARTBEAT",
//!   "data": { "type": "<TYPE>", "payload": { ... } } }
//! ```
//!
//! Outbound envelopes are size-checked by [`Envelope::to_json`]; anything
//! above [`MAX_MESSAGE_SIZE`] is rejected before it reaches a transport.
//!
//! # Examples
//!
//! ```
//! use attractap_protocol::{Envelope, EventKind, MessageType};
//! use attractap_protocol::payloads::ChunkRequest;
//!
//! let envelope = Envelope::event(
//!     MessageType::FirmwareStreamChunk,
//!     &ChunkRequest { chunk_index: 4 },
//! )?;
//! let json = envelope.to_json()?;
//! assert_eq!(
//!     json,
//!     r#"{"event":"EVENT","data":{"type":"READER_FIRMWARE_STREAM_CHUNK","payload":{"chunkIndex":4}}}"#
//! );
//!
//! let parsed = Envelope::from_json(&json)?;
//! assert_eq!(parsed.event, EventKind::Event);
//! assert_eq!(parsed.message_type(), Some(MessageType::FirmwareStreamChunk));
//! # Ok::<(), attractap_protocol::ProtocolError>(())
//! ```

use crate::error::{ProtocolError, Result};
use crate::message_type::MessageType;
use attractap_core::constants::MAX_MESSAGE_SIZE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Top-level `event` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Event,
    Response,
    Heartbeat,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Event => "EVENT",
            EventKind::Response => "RESPONSE",
            EventKind::Heartbeat => "HEARTBEAT",
        };
        f.write_str(name)
    }
}

/// The `data` object of an envelope.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnvelopeData {
    /// Raw type name; kept as a string so unknown types can be logged.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Human-readable error text some server responses carry next to the
    /// payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: EventKind,
    #[serde(default)]
    pub data: EnvelopeData,
}

impl Envelope {
    fn with_payload<P: Serialize>(
        event: EventKind,
        message_type: MessageType,
        payload: &P,
    ) -> Result<Self> {
        Ok(Self {
            event,
            data: EnvelopeData {
                message_type: Some(message_type.as_str().to_string()),
                payload: Some(serde_json::to_value(payload)?),
                message: None,
            },
        })
    }

    /// `EVENT` envelope with a payload.
    pub fn event<P: Serialize>(message_type: MessageType, payload: &P) -> Result<Self> {
        Self::with_payload(EventKind::Event, message_type, payload)
    }

    /// `RESPONSE` envelope with a payload.
    pub fn response<P: Serialize>(message_type: MessageType, payload: &P) -> Result<Self> {
        Self::with_payload(EventKind::Response, message_type, payload)
    }

    /// Heartbeat with an empty `data` object.
    pub fn heartbeat() -> Self {
        Self {
            event: EventKind::Heartbeat,
            data: EnvelopeData::default(),
        }
    }

    /// Parsed message type, `None` when absent or unknown.
    pub fn message_type(&self) -> Option<MessageType> {
        self.data
            .message_type
            .as_deref()
            .and_then(MessageType::from_wire)
    }

    /// Raw type name as received.
    pub fn raw_type(&self) -> &str {
        self.data.message_type.as_deref().unwrap_or("")
    }

    /// Whether the envelope carries a non-null payload.
    pub fn has_payload(&self) -> bool {
        matches!(&self.data.payload, Some(value) if !value.is_null())
    }

    /// Deserialize the payload into a typed structure.
    ///
    /// # Errors
    /// `MissingPayload` when there is no payload, `Json` when it does not
    /// match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.data.payload {
            Some(value) if !value.is_null() => Ok(T::deserialize(value)?),
            _ => Err(ProtocolError::missing_payload(self.raw_type())),
        }
    }

    /// Serialize for sending, enforcing [`MAX_MESSAGE_SIZE`].
    ///
    /// # Errors
    /// `MessageTooLarge` when the serialized form exceeds the limit.
    pub fn to_json(&self) -> Result<String> {
        self.to_json_with_limit(MAX_MESSAGE_SIZE)
    }

    /// Serialize with a custom size limit.
    pub fn to_json_with_limit(&self, max_size: usize) -> Result<String> {
        let json = serde_json::to_string(self)?;
        if json.len() > max_size {
            return Err(ProtocolError::MessageTooLarge {
                size: json.len(),
                max_size,
            });
        }
        Ok(json)
    }

    /// Parse an inbound text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
