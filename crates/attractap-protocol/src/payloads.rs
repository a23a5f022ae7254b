//! Typed payloads for the messages the terminal sends and understands.
//!
//! Field names follow the server's camelCase JSON. Identifiers the server may
//! send as either numbers or strings are normalized to strings.

use crate::error::{ProtocolError, Result};
use attractap_core::{AesKey, KeyNumber, SelectItemPrompt, SelectOption};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Accept `"42"` and `42` alike.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn optional_string_or_number<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// `READER_AUTHENTICATE` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatePayload {
    pub id: String,
    pub token: String,
}

/// `READER_REGISTER` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub device_type: String,
}

/// `NFC_TAP` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NfcTapPayload {
    #[serde(rename = "cardUID")]
    pub card_uid: String,
}

/// `READER_FIRMWARE_STREAM_CHUNK` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRequest {
    pub chunk_index: u32,
}

/// `CHANGE_KEYS` response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeKeysResponse {
    pub failed_keys: Vec<u8>,
    pub successful_keys: Vec<u8>,
    pub authentication_key: String,
}

/// `NFC_AUTHENTICATE` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NfcAuthenticateResponse {
    pub authentication_successful: bool,
}

/// `SELECT_ITEM` answer carrying the user's choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectItemResponse {
    pub selected_id: String,
}

/// Empty object payload, used by `CANCEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmptyPayload {}

// ============================================================================
// Inbound
// ============================================================================

/// Response to a registration request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct RegisterResponse {
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

/// `READER_AUTHENTICATED` payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct AuthenticatedPayload {
    #[serde(default)]
    pub name: Option<String>,
}

/// Payload of the display intents.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct MessagePayload {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct UserRef {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ResourceRef {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct UsageSessionRef {
    #[serde(default)]
    pub user: Option<UserRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct CardRef {
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub id: Option<String>,
}

/// `NFC_ENABLE_CARD_CHECKING` payload, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CardCheckingPayload {
    #[serde(rename_all = "camelCase")]
    ToggleResourceUsage {
        #[serde(default)]
        resource: Option<ResourceRef>,
        #[serde(default)]
        is_active: bool,
        #[serde(default)]
        active_usage_session: Option<UsageSessionRef>,
        #[serde(default)]
        has_active_maintenance: bool,
    },
    EnrollNfcCard {
        #[serde(default)]
        user: Option<UserRef>,
    },
    ResetNfcCard {
        #[serde(default)]
        user: Option<UserRef>,
        #[serde(default)]
        card: Option<CardRef>,
    },
    /// A mode this firmware does not know about.
    #[serde(other)]
    Unknown,
}

impl CardCheckingPayload {
    /// Username of the user the pending action concerns.
    pub fn username(&self) -> Option<&str> {
        match self {
            CardCheckingPayload::ToggleResourceUsage {
                active_usage_session,
                ..
            } => active_usage_session
                .as_ref()
                .and_then(|session| session.user.as_ref())
                .and_then(|user| user.username.as_deref()),
            CardCheckingPayload::EnrollNfcCard { user }
            | CardCheckingPayload::ResetNfcCard { user, .. } => {
                user.as_ref().and_then(|user| user.username.as_deref())
            }
            CardCheckingPayload::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SelectOptionPayload {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub label: String,
}

/// `SELECT_ITEM` request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct SelectItemPayload {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub options: Vec<SelectOptionPayload>,
}

impl From<SelectItemPayload> for SelectItemPrompt {
    fn from(payload: SelectItemPayload) -> Self {
        SelectItemPrompt {
            label: payload.label,
            options: payload
                .options
                .into_iter()
                .map(|option| SelectOption {
                    id: option.id,
                    label: option.label,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FirmwareChunks {
    pub chunks: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AvailableVersion {
    pub version: String,
}

/// `READER_FIRMWARE_UPDATE_REQUIRED` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FirmwareUpdateRequired {
    pub firmware: FirmwareChunks,
    pub available: AvailableVersion,
}

/// `NFC_AUTHENTICATE` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NfcAuthenticateRequest {
    pub authentication_key: AesKey,
    pub key_number: KeyNumber,
}

/// `NFC_CHANGE_KEYS` request as received.
///
/// Keys stay raw here so the response can echo the authentication key and
/// report key numbers even when a value fails to parse.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeKeysRequest {
    pub authentication_key: String,
    #[serde(default)]
    pub keys: BTreeMap<String, String>,
}

/// Validated change-keys request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeKeysPlan {
    pub authentication_key: AesKey,
    /// Keys to change, master key first, then ascending key number.
    pub keys: Vec<(KeyNumber, AesKey)>,
}

impl ChangeKeysRequest {
    /// Validate key numbers and hex values.
    ///
    /// # Errors
    /// `InvalidPayload` or `Domain` when the authentication key or any entry
    /// is malformed.
    pub fn plan(&self) -> Result<ChangeKeysPlan> {
        let authentication_key = AesKey::from_hex(&self.authentication_key)?;
        let mut keys = self
            .keys
            .iter()
            .map(|(number, value)| {
                let number: KeyNumber = number.parse()?;
                let key = AesKey::from_hex(value)?;
                Ok((number, key))
            })
            .collect::<Result<Vec<_>>>()?;
        if keys.is_empty() {
            return Err(ProtocolError::invalid_payload("no keys to change"));
        }
        // KeyNumber orders 0 first, so the master key leads.
        keys.sort_by_key(|(number, _)| *number);
        Ok(ChangeKeysPlan {
            authentication_key,
            keys,
        })
    }

    /// Key numbers named in the request that parse as integers, for error
    /// responses.
    pub fn requested_key_numbers(&self) -> Vec<u8> {
        self.keys
            .keys()
            .filter_map(|number| number.trim().parse::<u8>().ok())
            .collect()
    }
}
