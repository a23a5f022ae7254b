//! Message type names used in `data.type`.
//!
//! The server speaks the reader dialect (`READER_*`, `NFC_*`). Short names
//! such as `CHANGE_KEYS` or `FIRMWARE_INFO` are accepted on input as
//! aliases. [`MessageType::as_str`] always returns the name this firmware
//! sends.

use std::fmt;
use std::str::FromStr;

/// Known message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Registration request (outbound) and its response (inbound).
    Register,
    /// Credential request. Inbound it is a server-initiated re-auth request.
    ReaderAuthenticate,
    /// Successful authentication response.
    ReaderAuthenticated,
    /// Server rejected the stored identity.
    Unauthorized,
    DisplayError,
    DisplaySuccess,
    ClearError,
    ClearSuccess,
    ShowText,
    EnableCardChecking,
    DisableCardChecking,
    SelectItem,
    FirmwareUpdateRequired,
    FirmwareInfo,
    FirmwareStreamChunk,
    ChangeKeys,
    NfcAuthenticate,
    NfcTap,
    Cancel,
}

impl MessageType {
    /// Every known type, in declaration order.
    pub const ALL: [MessageType; 19] = [
        MessageType::Register,
        MessageType::ReaderAuthenticate,
        MessageType::ReaderAuthenticated,
        MessageType::Unauthorized,
        MessageType::DisplayError,
        MessageType::DisplaySuccess,
        MessageType::ClearError,
        MessageType::ClearSuccess,
        MessageType::ShowText,
        MessageType::EnableCardChecking,
        MessageType::DisableCardChecking,
        MessageType::SelectItem,
        MessageType::FirmwareUpdateRequired,
        MessageType::FirmwareInfo,
        MessageType::FirmwareStreamChunk,
        MessageType::ChangeKeys,
        MessageType::NfcAuthenticate,
        MessageType::NfcTap,
        MessageType::Cancel,
    ];

    /// Name written on the wire by this firmware.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Register => "READER_REGISTER",
            MessageType::ReaderAuthenticate => "READER_AUTHENTICATE",
            MessageType::ReaderAuthenticated => "READER_AUTHENTICATED",
            MessageType::Unauthorized => "READER_UNAUTHORIZED",
            MessageType::DisplayError => "DISPLAY_ERROR",
            MessageType::DisplaySuccess => "DISPLAY_SUCCESS",
            MessageType::ClearError => "CLEAR_ERROR",
            MessageType::ClearSuccess => "CLEAR_SUCCESS",
            MessageType::ShowText => "SHOW_TEXT",
            MessageType::EnableCardChecking => "NFC_ENABLE_CARD_CHECKING",
            MessageType::DisableCardChecking => "NFC_DISABLE_CARD_CHECKING",
            MessageType::SelectItem => "SELECT_ITEM",
            MessageType::FirmwareUpdateRequired => "READER_FIRMWARE_UPDATE_REQUIRED",
            MessageType::FirmwareInfo => "READER_FIRMWARE_INFO",
            MessageType::FirmwareStreamChunk => "READER_FIRMWARE_STREAM_CHUNK",
            // Responses to NFC_CHANGE_KEYS go out under the short name.
            MessageType::ChangeKeys => "CHANGE_KEYS",
            MessageType::NfcAuthenticate => "NFC_AUTHENTICATE",
            MessageType::NfcTap => "NFC_TAP",
            MessageType::Cancel => "CANCEL",
        }
    }

    /// Parse a wire name, accepting aliases.
    pub fn from_wire(name: &str) -> Option<MessageType> {
        let message_type = match name {
            "READER_REGISTER" | "REGISTER" => MessageType::Register,
            "READER_AUTHENTICATE" => MessageType::ReaderAuthenticate,
            "READER_AUTHENTICATED" => MessageType::ReaderAuthenticated,
            "READER_UNAUTHORIZED" | "UNAUTHORIZED" => MessageType::Unauthorized,
            "DISPLAY_ERROR" => MessageType::DisplayError,
            "DISPLAY_SUCCESS" => MessageType::DisplaySuccess,
            "CLEAR_ERROR" => MessageType::ClearError,
            "CLEAR_SUCCESS" => MessageType::ClearSuccess,
            "SHOW_TEXT" => MessageType::ShowText,
            "NFC_ENABLE_CARD_CHECKING" | "ENABLE_CARD_CHECKING" => MessageType::EnableCardChecking,
            "NFC_DISABLE_CARD_CHECKING" | "DISABLE_CARD_CHECKING" => {
                MessageType::DisableCardChecking
            }
            "SELECT_ITEM" => MessageType::SelectItem,
            "READER_FIRMWARE_UPDATE_REQUIRED" | "FIRMWARE_UPDATE_REQUIRED" => {
                MessageType::FirmwareUpdateRequired
            }
            "READER_FIRMWARE_INFO" | "FIRMWARE_INFO" => MessageType::FirmwareInfo,
            "READER_FIRMWARE_STREAM_CHUNK" => MessageType::FirmwareStreamChunk,
            "NFC_CHANGE_KEYS" | "CHANGE_KEYS" => MessageType::ChangeKeys,
            "NFC_AUTHENTICATE" | "AUTHENTICATE" => MessageType::NfcAuthenticate,
            "NFC_TAP" => MessageType::NfcTap,
            "CANCEL" => MessageType::Cancel,
            _ => return None,
        };
        Some(message_type)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for names outside the known set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMessageType(pub String);

impl fmt::Display for UnknownMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown message type: {}", self.0)
    }
}

impl std::error::Error for UnknownMessageType {}

impl FromStr for MessageType {
    type Err = UnknownMessageType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::from_wire(s).ok_or_else(|| UnknownMessageType(s.to_string()))
    }
}
