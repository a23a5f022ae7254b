//! Decoding of inbound envelopes into typed server requests.
//!
//! Decoding is kept apart from handling so malformed messages are rejected
//! in one place and the session only ever sees well-formed requests.

use attractap_protocol::payloads::{
    AuthenticatedPayload, CardCheckingPayload, ChangeKeysRequest, FirmwareUpdateRequired,
    MessagePayload, NfcAuthenticateRequest, RegisterResponse, SelectItemPayload,
};
use attractap_protocol::{Envelope, EventKind, MessageType, ProtocolError};
use tracing::{debug, warn};

/// A decoded server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Heartbeat,
    /// Answer to a registration request. `message` is the server's error
    /// text when the registration was refused.
    Registered {
        response: RegisterResponse,
        message: Option<String>,
    },
    Authenticated(AuthenticatedPayload),
    /// The server asks the reader to authenticate again.
    AuthenticateRequested,
    Unauthorized,
    DisplayError(String),
    DisplaySuccess(String),
    ClearError,
    ClearSuccess,
    ShowText(String),
    EnableCardChecking(CardCheckingPayload),
    DisableCardChecking,
    SelectItem(SelectItemPayload),
    FirmwareUpdateRequired(FirmwareUpdateRequired),
    FirmwareInfoRequested,
    ChangeKeys(ChangeKeysRequest),
    NfcAuthenticate(NfcAuthenticateRequest),
}

impl Inbound {
    /// Decode an envelope.
    ///
    /// Returns `Ok(None)` for messages the reader does not act on (unknown
    /// types, echoes of its own events, display intents without a message).
    ///
    /// # Errors
    /// `MissingPayload` or `Json` when a known request carries a payload of
    /// the wrong shape.
    pub fn decode(envelope: &Envelope) -> Result<Option<Inbound>, ProtocolError> {
        if envelope.event == EventKind::Heartbeat {
            return Ok(Some(Inbound::Heartbeat));
        }

        let Some(message_type) = envelope.message_type() else {
            debug!(message_type = envelope.raw_type(), "Ignoring unknown message type");
            return Ok(None);
        };

        let inbound = match message_type {
            MessageType::Register => Inbound::Registered {
                response: if envelope.has_payload() {
                    envelope.payload_as()?
                } else {
                    RegisterResponse::default()
                },
                message: envelope.data.message.clone(),
            },
            MessageType::ReaderAuthenticated => Inbound::Authenticated(if envelope.has_payload() {
                envelope.payload_as()?
            } else {
                AuthenticatedPayload::default()
            }),
            MessageType::ReaderAuthenticate => Inbound::AuthenticateRequested,
            MessageType::Unauthorized => Inbound::Unauthorized,
            MessageType::DisplayError => match message_text(envelope) {
                Some(text) => Inbound::DisplayError(text),
                None => return Ok(None),
            },
            MessageType::DisplaySuccess => match message_text(envelope) {
                Some(text) => Inbound::DisplaySuccess(text),
                None => return Ok(None),
            },
            MessageType::ShowText => match message_text(envelope) {
                Some(text) => Inbound::ShowText(text),
                None => return Ok(None),
            },
            MessageType::ClearError => Inbound::ClearError,
            MessageType::ClearSuccess => Inbound::ClearSuccess,
            MessageType::EnableCardChecking => {
                Inbound::EnableCardChecking(envelope.payload_as()?)
            }
            MessageType::DisableCardChecking => Inbound::DisableCardChecking,
            MessageType::SelectItem => Inbound::SelectItem(envelope.payload_as()?),
            MessageType::FirmwareUpdateRequired => {
                Inbound::FirmwareUpdateRequired(envelope.payload_as()?)
            }
            MessageType::FirmwareInfo => Inbound::FirmwareInfoRequested,
            MessageType::ChangeKeys => Inbound::ChangeKeys(envelope.payload_as()?),
            MessageType::NfcAuthenticate => Inbound::NfcAuthenticate(envelope.payload_as()?),
            MessageType::FirmwareStreamChunk | MessageType::NfcTap | MessageType::Cancel => {
                debug!(%message_type, "Ignoring reader-originated message type");
                return Ok(None);
            }
        };
        Ok(Some(inbound))
    }
}

/// `payload.message` of a display intent.
fn message_text(envelope: &Envelope) -> Option<String> {
    let text = envelope
        .payload_as::<MessagePayload>()
        .ok()
        .and_then(|payload| payload.message);
    if text.is_none() {
        warn!(message_type = envelope.raw_type(), "Display intent without message");
    }
    text
}
