//! Card controller task and its handle.
//!
//! The service owns the [`CardController`] inside one tokio task. The task
//! ticks the controller on a fixed interval and serves commands between
//! ticks, so chip access is never shared.
//!
//! ```text
//!                 commands (mpsc)            ┌──────────────┐
//! CardControllerHandle ────────────────────►│ controller   │──► taps (mpsc)
//!        ▲                                  │ task         │
//!        └──────── status (watch) ──────────│  tick/50ms   │
//!                  replies (oneshot)        └──────────────┘
//! ```
//!
//! # Examples
//!
//! ```no_run
//! use attractap_core::{AesKey, KeyNumber};
//! use attractap_hardware::controller::CardControllerConfig;
//! use attractap_hardware::mock::MockChip;
//! use attractap_hardware::service::CardControllerService;
//!
//! #[tokio::main]
//! async fn main() -> attractap_hardware::Result<()> {
//!     let (chip, _handle) = MockChip::new();
//!     let (service, mut taps) = CardControllerService::spawn(chip, CardControllerConfig::default());
//!     let controller = service.handle();
//!
//!     controller.set_card_checking(true).await?;
//!     if let Some(uid) = taps.recv().await {
//!         println!("Card tapped: {uid}");
//!         controller.authenticate(KeyNumber::MASTER, AesKey::ZERO).await?;
//!     }
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

use crate::controller::{CardController, CardControllerConfig, CardOperation, CardRequest};
use crate::devices::AnyCardReader;
use crate::error::{HardwareError, Result};
use crate::types::ControllerStatus;
use attractap_core::{AesKey, CardUid, KeyNumber};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 16;
const TAP_CHANNEL_CAPACITY: usize = 8;

/// Receiver of card tap UIDs.
pub type TapReceiver = mpsc::Receiver<CardUid>;

#[derive(Debug)]
enum ControllerCommand {
    Operation(CardRequest),
    SetCardChecking(bool),
    Shutdown,
}

/// Running card controller task.
#[derive(Debug)]
pub struct CardControllerService {
    handle: CardControllerHandle,
    task: JoinHandle<()>,
}

impl CardControllerService {
    /// Spawn the controller task for `reader`.
    ///
    /// Returns the service and the receiver of supported card taps.
    pub fn spawn(
        reader: impl Into<AnyCardReader>,
        config: CardControllerConfig,
    ) -> (Self, TapReceiver) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (tap_tx, tap_rx) = mpsc::channel(TAP_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(ControllerStatus::Initializing);

        let handle = CardControllerHandle {
            commands: command_tx,
            status: status_rx,
            request_timeout: config.request_timeout,
        };
        let controller = CardController::new(reader.into(), config);
        let task = tokio::spawn(run(controller, command_rx, status_tx, tap_tx));

        (Self { handle, task }, tap_rx)
    }

    pub fn handle(&self) -> CardControllerHandle {
        self.handle.clone()
    }

    /// Stop the controller task and wait for it to finish.
    pub async fn shutdown(self) {
        if self
            .handle
            .commands
            .send(ControllerCommand::Shutdown)
            .await
            .is_err()
        {
            debug!("Card controller task already stopped");
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "Card controller task ended abnormally");
        }
    }
}

async fn run(
    mut controller: CardController<AnyCardReader>,
    mut commands: mpsc::Receiver<ControllerCommand>,
    status_tx: watch::Sender<ControllerStatus>,
    tap_tx: mpsc::Sender<CardUid>,
) {
    let mut ticker = interval(controller.config().tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Card controller started");

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(ControllerCommand::Operation(request)) => {
                    controller.submit(request);
                    // Run an accepted operation without waiting for the next tick
                    step(&mut controller, &tap_tx).await;
                }
                Some(ControllerCommand::SetCardChecking(enabled)) => {
                    controller.set_card_checking(enabled);
                }
                Some(ControllerCommand::Shutdown) | None => break,
            },
            _ = ticker.tick() => step(&mut controller, &tap_tx).await,
        }

        let status = controller.status();
        status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            debug!(%status, "Card controller status changed");
            *current = status;
            true
        });
    }

    info!("Card controller stopped");
}

async fn step(controller: &mut CardController<AnyCardReader>, tap_tx: &mpsc::Sender<CardUid>) {
    let Some(uid) = controller.tick().await else {
        return;
    };
    match tap_tx.try_send(uid) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(uid)) => {
            warn!(%uid, "Tap channel full, dropping card tap");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("No tap listener, dropping card tap");
        }
    }
}

/// Cloneable handle for submitting card requests.
#[derive(Debug, Clone)]
pub struct CardControllerHandle {
    commands: mpsc::Sender<ControllerCommand>,
    status: watch::Receiver<ControllerStatus>,
    request_timeout: Duration,
}

impl CardControllerHandle {
    /// Authenticate the card in the field.
    pub async fn authenticate(&self, key_number: KeyNumber, key: AesKey) -> Result<()> {
        self.request(CardOperation::Authenticate { key_number, key })
            .await
    }

    /// Authenticate with `key`, then write `data` to the custom data file.
    pub async fn write_data(&self, key_number: KeyNumber, key: AesKey, data: Vec<u8>) -> Result<()> {
        self.request(CardOperation::WriteData {
            key_number,
            key,
            data,
        })
        .await
    }

    /// Replace key `key_number`, authenticating with the master key
    /// `auth_key` first.
    pub async fn change_key(
        &self,
        key_number: KeyNumber,
        auth_key: AesKey,
        new_key: AesKey,
    ) -> Result<()> {
        self.request(CardOperation::ChangeKey {
            key_number,
            auth_key,
            new_key,
        })
        .await
    }

    pub async fn set_card_checking(&self, enabled: bool) -> Result<()> {
        self.commands
            .send(ControllerCommand::SetCardChecking(enabled))
            .await
            .map_err(|_| HardwareError::ControllerStopped)
    }

    /// Latest published controller status.
    pub fn status(&self) -> ControllerStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerStatus> {
        self.status.clone()
    }

    async fn request(&self, operation: CardOperation) -> Result<()> {
        let name = operation.name();
        let (request, reply) = CardRequest::new(operation);

        let exchange = async {
            self.commands
                .send(ControllerCommand::Operation(request))
                .await
                .map_err(|_| HardwareError::ControllerStopped)?;
            reply.await.map_err(|_| HardwareError::ControllerStopped)?
        };

        match timeout(self.request_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation = name, "Card request timed out");
                Err(HardwareError::timeout(
                    self.request_timeout.as_millis() as u64
                ))
            }
        }
    }
}
