//! Reader chip trait definition.
//!
//! The chip trait uses native `async fn` methods (Rust 1.90 + Edition 2024
//! RPITIT). It is therefore not object-safe; use generics, or the enum
//! wrapper in [`devices`](crate::devices) where a concrete type is needed
//! (for example to spawn the controller task).

#![allow(async_fn_in_trait)]

use crate::error::Result;
use crate::types::DetectedCard;
use attractap_core::{AesKey, KeyNumber};
use std::time::Duration;

/// Contactless reader chip with NTAG 424 DNA support.
///
/// Implementations perform exactly one bus transaction sequence per call
/// and never retry internally; retry and backoff policy belongs to the
/// [`CardController`](crate::controller::CardController).
///
/// # Examples
///
/// ```no_run
/// use attractap_hardware::traits::CardReaderChip;
/// use attractap_hardware::Result;
/// use std::time::Duration;
///
/// async fn poll_once<C: CardReaderChip>(chip: &mut C) -> Result<Option<String>> {
///     let card = chip.detect_card(Duration::from_millis(200)).await?;
///     Ok(card.map(|card| card.uid.to_hex()))
/// }
/// ```
pub trait CardReaderChip: Send + Sync {
    /// Human-readable chip name for logs.
    fn name(&self) -> &str;

    /// Query the packed firmware version. Fails when the chip does not
    /// answer.
    async fn firmware_version(&mut self) -> Result<u32>;

    /// Configure the secure access module for ISO 14443A polling.
    async fn configure_sam(&mut self) -> Result<()>;

    /// Wait up to `timeout` for a card to enter the field.
    ///
    /// `Ok(None)` means no card was found; that is not an error.
    async fn detect_card(&mut self, timeout: Duration) -> Result<Option<DetectedCard>>;

    /// Authenticate against the card in the field with `key` in slot
    /// `key_number`.
    async fn authenticate(&mut self, key_number: KeyNumber, key: &AesKey) -> Result<()>;

    /// Write `data` at offset 0 of `file`. Requires a preceding successful
    /// authentication with `key_number`.
    async fn write_data(&mut self, file: u8, data: &[u8], key_number: KeyNumber) -> Result<()>;

    /// Replace key `key_number`. Requires a preceding master key
    /// authentication.
    async fn change_key(
        &mut self,
        key_number: KeyNumber,
        old_key: &AesKey,
        new_key: &AesKey,
    ) -> Result<()>;
}
