//! Mock reader chip for testing and development.
//!
//! The chip and its handle share one simulated reader: the handle places
//! cards in the field, injects faults and inspects what the chip did.

use crate::{
    HardwareError, Result,
    traits::CardReaderChip,
    types::DetectedCard,
};
use attractap_core::{AesKey, CardUid, KeyNumber, constants::MAX_KEY_NUMBER};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Packed version reported by a PN532 (IC 0x32, firmware 1.6).
pub const MOCK_FIRMWARE_VERSION: u32 = 0x3201_0607;

const KEY_SLOTS: usize = MAX_KEY_NUMBER as usize + 1;

/// Chip operations faults can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    FirmwareVersion,
    ConfigureSam,
    Detect,
    Authenticate,
    WriteData,
    ChangeKey,
}

/// Call recorded by the mock, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Authenticate { key_number: u8 },
    WriteData { file: u8, len: usize },
    ChangeKey { key_number: u8 },
}

/// Simulated card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCard {
    pub uid: CardUid,
    pub sak: u8,
    pub atqa: u16,
    pub keys: [AesKey; KEY_SLOTS],
    pub files: HashMap<u8, Vec<u8>>,
}

impl MockCard {
    /// Factory-fresh NTAG 424 DNA: all keys zero.
    pub fn ntag424(uid: [u8; 7]) -> Self {
        Self {
            uid: CardUid::from(uid),
            sak: 0x20,
            atqa: 0x0344,
            keys: [AesKey::ZERO; KEY_SLOTS],
            files: HashMap::new(),
        }
    }

    /// A MIFARE Classic 1K, which the reader does not support.
    pub fn mifare_classic(uid: [u8; 4]) -> Self {
        Self {
            uid: CardUid::from(uid),
            sak: 0x08,
            atqa: 0x0004,
            keys: [AesKey::ZERO; KEY_SLOTS],
            files: HashMap::new(),
        }
    }

    pub fn with_key(mut self, key_number: KeyNumber, key: AesKey) -> Self {
        self.keys[usize::from(key_number.as_u8())] = key;
        self
    }
}

#[derive(Debug)]
struct FieldCard {
    card: MockCard,
    /// Leaves the field after the first detection.
    single_tap: bool,
}

#[derive(Debug)]
struct MockChipState {
    responding: bool,
    field: Option<FieldCard>,
    failures: HashMap<MockOperation, u32>,
    detect_delay: Option<Duration>,
    authenticated: Option<KeyNumber>,
    calls: Vec<MockCall>,
    detect_count: u32,
}

impl Default for MockChipState {
    fn default() -> Self {
        Self {
            responding: true,
            field: None,
            failures: HashMap::new(),
            detect_delay: None,
            authenticated: None,
            calls: Vec::new(),
            detect_count: 0,
        }
    }
}

impl MockChipState {
    /// Consume one injected failure for `operation`, if any.
    fn take_failure(&mut self, operation: MockOperation) -> Result<()> {
        if let Some(remaining) = self.failures.get_mut(&operation)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(HardwareError::communication(format!(
                "injected {operation:?} failure"
            )));
        }
        Ok(())
    }

    fn card_mut(&mut self) -> Result<&mut MockCard> {
        self.field
            .as_mut()
            .map(|field| &mut field.card)
            .ok_or(HardwareError::NoCard)
    }
}

fn lock(state: &Mutex<MockChipState>) -> Result<MutexGuard<'_, MockChipState>> {
    state
        .lock()
        .map_err(|_| HardwareError::communication("mock chip state poisoned"))
}

/// Mock reader chip.
///
/// # Examples
///
/// ```
/// use attractap_hardware::mock::{MockCard, MockChip};
/// use attractap_hardware::traits::CardReaderChip;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> attractap_hardware::Result<()> {
///     let (mut chip, handle) = MockChip::new();
///     handle.tap_card(MockCard::ntag424([0x04, 1, 2, 3, 4, 5, 6]));
///
///     let card = chip.detect_card(Duration::from_millis(200)).await?;
///     assert_eq!(card.unwrap().uid.to_hex(), "04010203040506");
///
///     // A tapped card leaves the field after one detection.
///     assert!(chip.detect_card(Duration::from_millis(200)).await?.is_none());
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockChip {
    state: Arc<Mutex<MockChipState>>,
    name: String,
}

impl MockChip {
    pub fn new() -> (Self, MockChipHandle) {
        Self::with_name("Mock PN532")
    }

    pub fn with_name(name: impl Into<String>) -> (Self, MockChipHandle) {
        let state = Arc::new(Mutex::new(MockChipState::default()));
        let chip = Self {
            state: state.clone(),
            name: name.into(),
        };
        (chip, MockChipHandle { state })
    }
}

impl CardReaderChip for MockChip {
    fn name(&self) -> &str {
        &self.name
    }

    async fn firmware_version(&mut self) -> Result<u32> {
        let mut state = lock(&self.state)?;
        state.take_failure(MockOperation::FirmwareVersion)?;
        if !state.responding {
            return Err(HardwareError::initialization_failed(
                "no response to GetFirmwareVersion",
            ));
        }
        Ok(MOCK_FIRMWARE_VERSION)
    }

    async fn configure_sam(&mut self) -> Result<()> {
        let mut state = lock(&self.state)?;
        state.take_failure(MockOperation::ConfigureSam)?;
        if !state.responding {
            return Err(HardwareError::initialization_failed("SAMConfig failed"));
        }
        Ok(())
    }

    async fn detect_card(&mut self, _timeout: Duration) -> Result<Option<DetectedCard>> {
        let delay = lock(&self.state)?.detect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state)?;
        state.take_failure(MockOperation::Detect)?;
        if !state.responding {
            return Err(HardwareError::disconnected(self.name.clone()));
        }
        state.detect_count += 1;
        state.authenticated = None;

        let Some(field) = state.field.as_ref() else {
            return Ok(None);
        };
        let detected = DetectedCard::new(field.card.uid.clone(), field.card.sak, field.card.atqa);
        let single_tap = field.single_tap;
        if single_tap {
            state.field = None;
        }
        Ok(Some(detected))
    }

    async fn authenticate(&mut self, key_number: KeyNumber, key: &AesKey) -> Result<()> {
        let mut state = lock(&self.state)?;
        state.take_failure(MockOperation::Authenticate)?;
        state.calls.push(MockCall::Authenticate {
            key_number: key_number.as_u8(),
        });
        state.authenticated = None;

        let card = state.card_mut()?;
        if card.keys[usize::from(key_number.as_u8())] != *key {
            return Err(HardwareError::AuthenticationFailed {
                key_number: key_number.as_u8(),
            });
        }
        state.authenticated = Some(key_number);
        Ok(())
    }

    async fn write_data(&mut self, file: u8, data: &[u8], key_number: KeyNumber) -> Result<()> {
        let mut state = lock(&self.state)?;
        state.take_failure(MockOperation::WriteData)?;
        state.calls.push(MockCall::WriteData {
            file,
            len: data.len(),
        });
        if state.authenticated != Some(key_number) {
            return Err(HardwareError::command_failed("not authenticated"));
        }
        state.card_mut()?.files.insert(file, data.to_vec());
        Ok(())
    }

    async fn change_key(
        &mut self,
        key_number: KeyNumber,
        _old_key: &AesKey,
        new_key: &AesKey,
    ) -> Result<()> {
        let mut state = lock(&self.state)?;
        state.take_failure(MockOperation::ChangeKey)?;
        state.calls.push(MockCall::ChangeKey {
            key_number: key_number.as_u8(),
        });
        if state.authenticated != Some(KeyNumber::MASTER) {
            return Err(HardwareError::command_failed(
                "master key authentication required",
            ));
        }
        state.card_mut()?.keys[usize::from(key_number.as_u8())] = *new_key;
        // Changing the key in use ends the session.
        if key_number.is_master() {
            state.authenticated = None;
        }
        Ok(())
    }
}

/// Handle for controlling a mock chip.
///
/// Clones share the same simulated reader.
#[derive(Debug, Clone)]
pub struct MockChipHandle {
    state: Arc<Mutex<MockChipState>>,
}

impl MockChipHandle {
    fn with_state<R>(&self, f: impl FnOnce(&mut MockChipState) -> R) -> R {
        // A poisoned lock only happens after a panicking test thread.
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }

    /// Place a card in the field until [`remove_card`](Self::remove_card).
    pub fn present_card(&self, card: MockCard) {
        self.with_state(|state| {
            state.field = Some(FieldCard {
                card,
                single_tap: false,
            })
        });
    }

    /// Place a card in the field for a single detection.
    pub fn tap_card(&self, card: MockCard) {
        self.with_state(|state| {
            state.field = Some(FieldCard {
                card,
                single_tap: true,
            })
        });
    }

    /// Take the card out of the field and return its current contents.
    pub fn remove_card(&self) -> Option<MockCard> {
        self.with_state(|state| state.field.take().map(|field| field.card))
    }

    /// Current contents of the card in the field.
    pub fn card(&self) -> Option<MockCard> {
        self.with_state(|state| state.field.as_ref().map(|field| field.card.clone()))
    }

    /// Make the chip answer (or stop answering) every command.
    pub fn set_responding(&self, responding: bool) {
        self.with_state(|state| state.responding = responding);
    }

    /// Fail the next `count` calls of `operation` with a communication error.
    pub fn fail_next(&self, operation: MockOperation, count: u32) {
        self.with_state(|state| {
            state.failures.insert(operation, count);
        });
    }

    /// Delay every detection by `delay`, simulating a hung bus.
    pub fn set_detect_delay(&self, delay: Option<Duration>) {
        self.with_state(|state| state.detect_delay = delay);
    }

    /// Card commands received so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.with_state(|state| state.calls.clone())
    }

    /// Number of completed detection polls.
    pub fn detect_count(&self) -> u32 {
        self.with_state(|state| state.detect_count)
    }
}
