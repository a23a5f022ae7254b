//! Card controller state machine.
//!
//! The controller owns the reader chip and drives it one step per
//! [`tick`](CardController::tick). Every step performs at most one bounded
//! hardware transaction, so a slow or hung chip never stalls the caller for
//! longer than the configured timeouts.
//!
//! # States
//!
//! - `Init`: detect and configure the chip
//! - `Ready`: idle; moves to `Scanning` when card checking is enabled
//! - `Scanning`: one bounded passive-detect poll, then back to `Ready`
//! - `AuthStart`, `WriteStart`, `ChangeKeyStart`: run one card operation,
//!   complete its request, then back to `Ready`
//!
//! # Fault isolation
//!
//! Each chip fault increments a consecutive error counter. While errors are
//! pending, `Init` and `Scanning` only run once the exponential backoff has
//! elapsed. When the counter reaches the limit the controller is disabled
//! for a cooldown period, after which it restarts from `Init` with a clean
//! counter. Any success resets the counter.
//!
//! # Examples
//!
//! ```
//! use attractap_hardware::controller::{CardController, CardControllerConfig, CardPhase};
//! use attractap_hardware::mock::MockChip;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (chip, _handle) = MockChip::new();
//!     let mut controller = CardController::new(chip, CardControllerConfig::default());
//!
//!     assert_eq!(controller.phase(), CardPhase::Init);
//!     controller.tick().await;
//!     assert_eq!(controller.phase(), CardPhase::Ready);
//! }
//! ```

use crate::error::{HardwareError, Result};
use crate::traits::CardReaderChip;
use crate::types::{ChipVersion, ControllerStatus};
use attractap_core::constants::{
    CUSTOM_DATA_FILE, MAX_CONSECUTIVE_ERRORS, MAX_WRITE_DATA_LENGTH, NFC_BASE_BACKOFF_MS,
    NFC_DISABLE_DURATION_MS, NFC_INIT_TIMEOUT_MS, NFC_MAX_BACKOFF_MS, NFC_SCAN_DWELL_MS,
    NFC_SCAN_SAFETY_TIMEOUT_MS, NFC_SCAN_TIMEOUT_MS,
};
use attractap_core::{AesKey, CardUid, KeyNumber};
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout};
use tracing::{debug, error, info, trace, warn};

/// Card controller timing and fault-isolation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardControllerConfig {
    /// Period of the controller task's tick.
    pub tick_interval: Duration,
    /// Minimum time in `Ready` before the next scan.
    pub scan_dwell: Duration,
    /// Detection window handed to the chip.
    pub scan_timeout: Duration,
    /// Hard limit on one detection poll.
    pub scan_safety_timeout: Duration,
    /// Hard limit on chip detection and configuration.
    pub init_timeout: Duration,
    /// Hard limit on one card operation.
    pub operation_timeout: Duration,
    /// How long a caller waits for a request to complete.
    pub request_timeout: Duration,
    pub max_consecutive_errors: u32,
    pub disable_duration: Duration,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for CardControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
            scan_dwell: Duration::from_millis(NFC_SCAN_DWELL_MS),
            scan_timeout: Duration::from_millis(NFC_SCAN_TIMEOUT_MS),
            scan_safety_timeout: Duration::from_millis(NFC_SCAN_SAFETY_TIMEOUT_MS),
            init_timeout: Duration::from_millis(NFC_INIT_TIMEOUT_MS),
            operation_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            max_consecutive_errors: MAX_CONSECUTIVE_ERRORS,
            disable_duration: Duration::from_millis(NFC_DISABLE_DURATION_MS),
            base_backoff: Duration::from_millis(NFC_BASE_BACKOFF_MS),
            max_backoff: Duration::from_millis(NFC_MAX_BACKOFF_MS),
        }
    }
}

impl CardControllerConfig {
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_scan_dwell(mut self, dwell: Duration) -> Self {
        self.scan_dwell = dwell;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max;
        self
    }

    pub fn with_disable_duration(mut self, duration: Duration) -> Self {
        self.disable_duration = duration;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }
}

/// Delay before the next attempt after `errors` consecutive errors.
///
/// `base * 2^(errors - 1)`, with the exponent capped at 5 and the result
/// capped at `max`. Zero errors means no delay.
///
/// ```
/// use attractap_hardware::controller::backoff_delay;
/// use std::time::Duration;
///
/// let base = Duration::from_secs(1);
/// let max = Duration::from_secs(30);
/// assert_eq!(backoff_delay(1, base, max), Duration::from_secs(1));
/// assert_eq!(backoff_delay(4, base, max), Duration::from_secs(8));
/// assert_eq!(backoff_delay(9, base, max), Duration::from_secs(30));
/// ```
pub fn backoff_delay(errors: u32, base: Duration, max: Duration) -> Duration {
    if errors == 0 {
        return Duration::ZERO;
    }
    let exponent = (errors - 1).min(5);
    base.saturating_mul(1 << exponent).min(max)
}

/// Card operation requested by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardOperation {
    /// Authenticate with `key` in slot `key_number`.
    Authenticate { key_number: KeyNumber, key: AesKey },
    /// Authenticate, then write `data` to the custom data file.
    WriteData {
        key_number: KeyNumber,
        key: AesKey,
        data: Vec<u8>,
    },
    /// Authenticate with the master key, then replace key `key_number`.
    ChangeKey {
        key_number: KeyNumber,
        auth_key: AesKey,
        new_key: AesKey,
    },
}

impl CardOperation {
    pub fn name(&self) -> &'static str {
        match self {
            CardOperation::Authenticate { .. } => "authenticate",
            CardOperation::WriteData { .. } => "write_data",
            CardOperation::ChangeKey { .. } => "change_key",
        }
    }

    /// Reject requests that can never succeed before touching hardware.
    pub fn validate(&self) -> Result<()> {
        if let CardOperation::WriteData { data, .. } = self
            && data.len() > MAX_WRITE_DATA_LENGTH
        {
            return Err(HardwareError::PayloadTooLarge {
                size: data.len(),
                max: MAX_WRITE_DATA_LENGTH,
            });
        }
        Ok(())
    }
}

/// Completion channel of a card request.
pub type Reply = oneshot::Sender<Result<()>>;

/// Card operation together with the channel its result goes to.
#[derive(Debug)]
pub struct CardRequest {
    pub operation: CardOperation,
    pub reply: Reply,
}

impl CardRequest {
    pub fn new(operation: CardOperation) -> (Self, oneshot::Receiver<Result<()>>) {
        let (reply, rx) = oneshot::channel();
        (Self { operation, reply }, rx)
    }
}

/// Controller state. Pending operations carry their parameters and reply.
#[derive(Debug)]
pub enum CardState {
    Init,
    Ready {
        since: Instant,
    },
    Scanning {
        started_at: Instant,
    },
    AuthStart {
        key_number: KeyNumber,
        key: AesKey,
        reply: Reply,
    },
    WriteStart {
        key_number: KeyNumber,
        key: AesKey,
        data: Vec<u8>,
        reply: Reply,
    },
    ChangeKeyStart {
        key_number: KeyNumber,
        auth_key: AesKey,
        new_key: AesKey,
        reply: Reply,
    },
}

impl CardState {
    pub fn phase(&self) -> CardPhase {
        match self {
            CardState::Init => CardPhase::Init,
            CardState::Ready { .. } => CardPhase::Ready,
            CardState::Scanning { .. } => CardPhase::Scanning,
            CardState::AuthStart { .. } => CardPhase::AuthStart,
            CardState::WriteStart { .. } => CardPhase::WriteStart,
            CardState::ChangeKeyStart { .. } => CardPhase::ChangeKeyStart,
        }
    }

    fn from_operation(operation: CardOperation, reply: Reply) -> Self {
        match operation {
            CardOperation::Authenticate { key_number, key } => CardState::AuthStart {
                key_number,
                key,
                reply,
            },
            CardOperation::WriteData {
                key_number,
                key,
                data,
            } => CardState::WriteStart {
                key_number,
                key,
                data,
                reply,
            },
            CardOperation::ChangeKey {
                key_number,
                auth_key,
                new_key,
            } => CardState::ChangeKeyStart {
                key_number,
                auth_key,
                new_key,
                reply,
            },
        }
    }
}

/// Data-free view of [`CardState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardPhase {
    Init,
    Ready,
    Scanning,
    AuthStart,
    WriteStart,
    ChangeKeyStart,
}

impl CardPhase {
    /// Whether the controller may move from `self` to `target`.
    ///
    /// ```
    /// use attractap_hardware::controller::CardPhase;
    ///
    /// assert!(CardPhase::Ready.can_transition_to(&CardPhase::Scanning));
    /// assert!(!CardPhase::Init.can_transition_to(&CardPhase::AuthStart));
    /// ```
    pub fn can_transition_to(&self, target: &CardPhase) -> bool {
        matches!(
            (self, target),
            // Cooldown recovery restarts from Init
            (_, CardPhase::Init)
            | (CardPhase::Init, CardPhase::Ready)
            | (CardPhase::Ready, CardPhase::Scanning)
            | (CardPhase::Scanning, CardPhase::Ready)
            // A pending scan has not touched the chip yet and can be preempted
            | (
                CardPhase::Ready | CardPhase::Scanning,
                CardPhase::AuthStart | CardPhase::WriteStart | CardPhase::ChangeKeyStart
            )
            | (
                CardPhase::AuthStart | CardPhase::WriteStart | CardPhase::ChangeKeyStart,
                CardPhase::Ready
            )
        )
    }
}

impl fmt::Display for CardPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CardPhase::Init => "Init",
            CardPhase::Ready => "Ready",
            CardPhase::Scanning => "Scanning",
            CardPhase::AuthStart => "AuthStart",
            CardPhase::WriteStart => "WriteStart",
            CardPhase::ChangeKeyStart => "ChangeKeyStart",
        };
        f.write_str(name)
    }
}

/// Non-blocking card reader state machine.
#[derive(Debug)]
pub struct CardController<C: CardReaderChip> {
    chip: C,
    config: CardControllerConfig,
    state: CardState,
    consecutive_errors: u32,
    last_error_at: Option<Instant>,
    disabled_until: Option<Instant>,
    card_checking: bool,
}

impl<C: CardReaderChip> CardController<C> {
    pub fn new(chip: C, config: CardControllerConfig) -> Self {
        Self {
            chip,
            config,
            state: CardState::Init,
            consecutive_errors: 0,
            last_error_at: None,
            disabled_until: None,
            card_checking: false,
        }
    }

    pub fn config(&self) -> &CardControllerConfig {
        &self.config
    }

    pub fn phase(&self) -> CardPhase {
        self.state.phase()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn is_card_checking(&self) -> bool {
        self.card_checking
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_until
            .is_some_and(|until| Instant::now() < until)
    }

    /// Enable or disable scanning for card taps.
    pub fn set_card_checking(&mut self, enabled: bool) {
        if self.card_checking != enabled {
            debug!(enabled, "Card checking changed");
        }
        self.card_checking = enabled;
        if !enabled && let CardState::Scanning { .. } = self.state {
            self.transition(CardState::Ready {
                since: Instant::now(),
            });
        }
    }

    /// Status for display and the status watch channel.
    pub fn status(&self) -> ControllerStatus {
        if let Some(until) = self.disabled_until {
            return ControllerStatus::Disabled {
                remaining_secs: until.saturating_duration_since(Instant::now()).as_secs(),
            };
        }
        if self.consecutive_errors > 0 {
            return ControllerStatus::Errors {
                count: self.consecutive_errors,
            };
        }
        match self.state {
            CardState::Init => ControllerStatus::Initializing,
            CardState::Ready { .. } => ControllerStatus::Ready,
            _ => ControllerStatus::Active,
        }
    }

    /// Accept a card request, or complete it immediately with an error when
    /// the controller cannot run it.
    pub fn submit(&mut self, request: CardRequest) {
        let CardRequest { operation, reply } = request;
        self.check_recovery(Instant::now());

        if let Err(e) = operation.validate() {
            Self::complete(reply, operation.name(), Err(e));
            return;
        }

        let next = CardState::from_operation(operation, reply);
        if self.disabled_until.is_some() || !self.phase().can_transition_to(&next.phase()) {
            let status = self.status();
            debug!(%status, phase = %self.phase(), "Rejecting card request");
            if let Some(reply) = Self::into_reply(next) {
                Self::complete(reply, "request", Err(HardwareError::not_ready(status)));
            }
            return;
        }
        self.transition(next);
    }

    /// Advance the state machine by one step.
    ///
    /// Returns the UID of a supported card detected during this step.
    pub async fn tick(&mut self) -> Option<CardUid> {
        let now = Instant::now();
        self.check_recovery(now);
        if self.disabled_until.is_some() {
            return None;
        }

        match std::mem::replace(&mut self.state, CardState::Init) {
            CardState::Init => {
                self.handle_init(now).await;
                None
            }
            CardState::Ready { since } => {
                self.state = CardState::Ready { since };
                if self.card_checking && now.duration_since(since) >= self.config.scan_dwell {
                    self.transition(CardState::Scanning { started_at: now });
                }
                None
            }
            CardState::Scanning { started_at } => self.handle_scanning(started_at).await,
            CardState::AuthStart {
                key_number,
                key,
                reply,
            } => {
                info!(key = %key_number, "Starting card authentication");
                let limit = self.config.operation_timeout;
                let result = bounded(limit, self.chip.authenticate(key_number, &key)).await;
                self.finish_operation(reply, "authenticate", result);
                None
            }
            CardState::WriteStart {
                key_number,
                key,
                data,
                reply,
            } => {
                info!(key = %key_number, len = data.len(), "Starting card write");
                let limit = self.config.operation_timeout;
                let chip = &mut self.chip;
                let result = bounded(limit, async {
                    chip.authenticate(key_number, &key).await?;
                    chip.write_data(CUSTOM_DATA_FILE, &data, key_number).await
                })
                .await;
                self.finish_operation(reply, "write_data", result);
                None
            }
            CardState::ChangeKeyStart {
                key_number,
                auth_key,
                new_key,
                reply,
            } => {
                info!(key = %key_number, "Starting key change");
                let limit = self.config.operation_timeout;
                let chip = &mut self.chip;
                let result = bounded(limit, async {
                    chip.authenticate(KeyNumber::MASTER, &auth_key).await?;
                    chip.change_key(key_number, &auth_key, &new_key).await
                })
                .await;
                self.finish_operation(reply, "change_key", result);
                None
            }
        }
    }

    async fn handle_init(&mut self, now: Instant) {
        if !self.should_retry(now) {
            return;
        }

        debug!(chip = self.chip.name(), "Attempting to detect reader chip");
        let outcome = timeout(self.config.init_timeout, async {
            let version = self.chip.firmware_version().await?;
            self.chip.configure_sam().await?;
            Ok::<_, HardwareError>(version)
        })
        .await;

        match outcome {
            Ok(Ok(version)) => {
                self.record_success();
                info!(
                    chip = self.chip.name(),
                    version = %ChipVersion::from_packed(version),
                    "Reader chip initialized"
                );
                self.transition(CardState::Ready {
                    since: Instant::now(),
                });
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Reader chip initialization failed");
                self.record_error();
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.init_timeout.as_millis() as u64,
                    "Reader chip initialization timed out"
                );
                self.record_error();
            }
        }
    }

    async fn handle_scanning(&mut self, started_at: Instant) -> Option<CardUid> {
        if !self.should_retry(Instant::now()) {
            self.transition(CardState::Ready {
                since: Instant::now(),
            });
            return None;
        }

        trace!(pending_ms = started_at.elapsed().as_millis() as u64, "Scanning for card");
        let outcome = timeout(
            self.config.scan_safety_timeout,
            self.chip.detect_card(self.config.scan_timeout),
        )
        .await;

        let tap = match outcome {
            Ok(Ok(Some(card))) => {
                self.record_success();
                if card.is_supported() {
                    info!(uid = %card.uid, "Card detected");
                    Some(card.uid)
                } else {
                    debug!(uid = %card.uid, sak = card.sak, "Ignoring unsupported card");
                    None
                }
            }
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                if e.is_fault() {
                    warn!(error = %e, "Card scan failed");
                    self.record_error();
                } else {
                    debug!(error = %e, "Card scan returned no card");
                }
                None
            }
            Err(_) => {
                warn!("Card scan operation timed out");
                self.record_error();
                None
            }
        };

        // Always return to Ready after a scan attempt
        self.transition(CardState::Ready {
            since: Instant::now(),
        });
        tap
    }

    fn finish_operation(&mut self, reply: Reply, name: &'static str, result: Result<()>) {
        match &result {
            Ok(()) => {
                info!(operation = name, "Card operation succeeded");
                self.record_success();
            }
            Err(e) if e.is_fault() => {
                warn!(operation = name, error = %e, "Card operation failed");
                self.record_error();
            }
            Err(e) => info!(operation = name, error = %e, "Card operation rejected"),
        }
        Self::complete(reply, name, result);
        if self.disabled_until.is_none() {
            self.transition(CardState::Ready {
                since: Instant::now(),
            });
        }
    }

    fn complete(reply: Reply, name: &'static str, result: Result<()>) {
        if reply.send(result).is_err() {
            debug!(operation = name, "Card request caller went away");
        }
    }

    fn into_reply(state: CardState) -> Option<Reply> {
        match state {
            CardState::AuthStart { reply, .. }
            | CardState::WriteStart { reply, .. }
            | CardState::ChangeKeyStart { reply, .. } => Some(reply),
            _ => None,
        }
    }

    fn transition(&mut self, next: CardState) {
        let from = self.phase();
        let to = next.phase();
        debug_assert!(
            from.can_transition_to(&to),
            "invalid card state transition {from} -> {to}"
        );
        if from != to {
            trace!(%from, %to, "Card state transition");
        }
        self.state = next;
    }

    fn should_retry(&self, now: Instant) -> bool {
        if self.consecutive_errors == 0 {
            return true;
        }
        let delay = backoff_delay(
            self.consecutive_errors,
            self.config.base_backoff,
            self.config.max_backoff,
        );
        self.last_error_at
            .is_none_or(|at| now.duration_since(at) >= delay)
    }

    fn record_error(&mut self) {
        let now = Instant::now();
        self.consecutive_errors += 1;
        self.last_error_at = Some(now);
        debug!(errors = self.consecutive_errors, "Card controller error recorded");

        if self.consecutive_errors >= self.config.max_consecutive_errors
            && self.disabled_until.is_none()
        {
            error!(
                errors = self.consecutive_errors,
                disable_secs = self.config.disable_duration.as_secs(),
                "Too many consecutive errors, disabling card reader"
            );
            self.disabled_until = Some(now + self.config.disable_duration);
            // A disabled controller holds no pending operation.
            self.state = CardState::Init;
        }
    }

    fn record_success(&mut self) {
        if self.consecutive_errors > 0 {
            info!(
                errors = self.consecutive_errors,
                "Success after errors, resetting error count"
            );
        }
        self.consecutive_errors = 0;
        self.last_error_at = None;
    }

    fn check_recovery(&mut self, now: Instant) {
        if let Some(until) = self.disabled_until
            && now >= until
        {
            info!("Recovery time elapsed, re-enabling card reader");
            self.disabled_until = None;
            self.consecutive_errors = 0;
            self.last_error_at = None;
            self.transition(CardState::Init);
        }
    }
}

/// Run a chip sequence under `limit`, mapping expiry to a timeout error.
async fn bounded(limit: Duration, operation: impl Future<Output = Result<()>>) -> Result<()> {
    match timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(HardwareError::timeout(limit.as_millis() as u64)),
    }
}
