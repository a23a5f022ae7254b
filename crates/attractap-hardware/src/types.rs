//! Common types shared by the chip drivers and the card controller.

use attractap_core::CardUid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// SAK bit announcing ISO 14443-4 (ISO-DEP) support.
const SAK_ISO_DEP: u8 = 0x20;

/// Reader chip identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipVersion {
    pub ic: u8,
    pub major: u8,
    pub minor: u8,
}

impl ChipVersion {
    /// Decode the packed `GetFirmwareVersion` response (`IC.VER.REV.SUPPORT`).
    pub fn from_packed(packed: u32) -> Self {
        Self {
            ic: (packed >> 24) as u8,
            major: (packed >> 16) as u8,
            minor: (packed >> 8) as u8,
        }
    }
}

impl fmt::Display for ChipVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PN5{:02X} v{}.{}", self.ic, self.major, self.minor)
    }
}

/// A card found in the reader field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedCard {
    pub uid: CardUid,
    /// Select acknowledge byte.
    pub sak: u8,
    /// Answer to request, type A.
    pub atqa: u16,
}

impl DetectedCard {
    pub fn new(uid: CardUid, sak: u8, atqa: u16) -> Self {
        Self { uid, sak, atqa }
    }

    /// Supported cards (NTAG 424 DNA) are ISO-DEP capable with a 7-byte UID.
    pub fn is_supported(&self) -> bool {
        self.sak & SAK_ISO_DEP != 0 && self.uid.as_bytes().len() == 7
    }
}

/// Outward-facing controller status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ControllerStatus {
    /// Disabled after too many consecutive errors.
    Disabled { remaining_secs: u64 },
    /// Working, but recent operations failed.
    Errors { count: u32 },
    Initializing,
    Ready,
    /// Scanning or running a card operation.
    Active,
}

impl ControllerStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, ControllerStatus::Ready)
    }
}

impl fmt::Display for ControllerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerStatus::Disabled { remaining_secs } => {
                write!(f, "NFC Disabled ({remaining_secs}s remaining)")
            }
            ControllerStatus::Errors { count } => write!(f, "NFC Errors: {count}"),
            ControllerStatus::Initializing => f.write_str("NFC Initializing"),
            ControllerStatus::Ready => f.write_str("NFC Ready"),
            ControllerStatus::Active => f.write_str("NFC Active"),
        }
    }
}
