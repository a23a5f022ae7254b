//! Wire protocol between an Attractap reader and the Attraccess server.
//!
//! This crate provides:
//! - [`Envelope`]: the JSON message envelope with its outbound size limit
//! - [`MessageType`]: known `data.type` names and their aliases
//! - [`payloads`]: typed request and response payloads
//! - [`FrameCodec`]: Tokio codec for text and binary frames on a byte stream

pub mod codec;
pub mod envelope;
pub mod error;
pub mod message_type;
pub mod payloads;

pub use codec::{Frame, FrameCodec};
pub use envelope::{Envelope, EnvelopeData, EventKind};
pub use error::{ProtocolError, Result};
pub use message_type::{MessageType, UnknownMessageType};
