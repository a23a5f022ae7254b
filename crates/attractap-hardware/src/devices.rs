//! Enum wrapper for reader chip dispatch.
//!
//! Native `async fn` in traits is not object-safe, so `Box<dyn
//! CardReaderChip>` is not available. [`AnyCardReader`] gives the
//! controller task one concrete type to run with, whatever chip is fitted.
//!
//! # Examples
//!
//! ```
//! use attractap_hardware::devices::AnyCardReader;
//! use attractap_hardware::mock::MockChip;
//! use attractap_hardware::traits::CardReaderChip;
//!
//! let (chip, _handle) = MockChip::new();
//! let reader = AnyCardReader::Mock(chip);
//! assert_eq!(reader.name(), "Mock PN532");
//! ```

use crate::mock::MockChip;
use crate::traits::CardReaderChip;
use crate::types::DetectedCard;
use crate::Result;
use attractap_core::{AesKey, KeyNumber};
use std::time::Duration;

/// Enum wrapper for reader chip dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyCardReader {
    /// Mock chip for development and testing.
    Mock(MockChip),
}

impl From<MockChip> for AnyCardReader {
    fn from(chip: MockChip) -> Self {
        Self::Mock(chip)
    }
}

impl CardReaderChip for AnyCardReader {
    fn name(&self) -> &str {
        match self {
            Self::Mock(chip) => chip.name(),
        }
    }

    async fn firmware_version(&mut self) -> Result<u32> {
        match self {
            Self::Mock(chip) => chip.firmware_version().await,
        }
    }

    async fn configure_sam(&mut self) -> Result<()> {
        match self {
            Self::Mock(chip) => chip.configure_sam().await,
        }
    }

    async fn detect_card(&mut self, timeout: Duration) -> Result<Option<DetectedCard>> {
        match self {
            Self::Mock(chip) => chip.detect_card(timeout).await,
        }
    }

    async fn authenticate(&mut self, key_number: KeyNumber, key: &AesKey) -> Result<()> {
        match self {
            Self::Mock(chip) => chip.authenticate(key_number, key).await,
        }
    }

    async fn write_data(&mut self, file: u8, data: &[u8], key_number: KeyNumber) -> Result<()> {
        match self {
            Self::Mock(chip) => chip.write_data(file, data, key_number).await,
        }
    }

    async fn change_key(
        &mut self,
        key_number: KeyNumber,
        old_key: &AesKey,
        new_key: &AesKey,
    ) -> Result<()> {
        match self {
            Self::Mock(chip) => chip.change_key(key_number, old_key, new_key).await,
        }
    }
}
