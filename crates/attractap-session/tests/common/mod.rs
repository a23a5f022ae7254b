//! Harness for session integration tests.
//!
//! Wires a [`SessionManager`] to a mock transport, a mock reader chip, a
//! memory store and recording collaborators, and runs it on its own task.
//! Tests use paused time, so waiting on virtual time is instant.

#![allow(dead_code)]

use attractap_core::{DeviceIdentity, ServerConfig};
use attractap_firmware::MemoryImageSlot;
use attractap_hardware::mock::{MockChip, MockChipHandle};
use attractap_hardware::{CardControllerConfig, CardControllerService, ControllerStatus};
use attractap_network::mock::{MockServerHandle, MockTransport};
use attractap_network::{CertificateBundle, CertificateCandidate};
use attractap_protocol::{Envelope, EventKind};
use attractap_session::testing::{RecordingDevice, RecordingDisplay, RecordingTaps, SwitchableNetwork};
use attractap_session::{SessionConfig, SessionHandle, SessionManager, SessionState};
use attractap_storage::{IdentityPrefs, MemoryStore, SharedStore};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const PLAIN_SERVER: (&str, u16) = ("attraccess.local", 3000);
pub const SECURE_SERVER: (&str, u16) = ("attraccess.example.org", 443);

pub struct Harness {
    pub handle: SessionHandle,
    pub server: MockServerHandle,
    pub chip: MockChipHandle,
    pub card: CardControllerService,
    pub display: Arc<RecordingDisplay>,
    pub device: Arc<RecordingDevice>,
    pub taps: Arc<RecordingTaps>,
    pub network: Arc<SwitchableNetwork>,
    pub slot: MemoryImageSlot,
    pub store: SharedStore,
    pub task: JoinHandle<attractap_session::Result<()>>,
}

pub struct HarnessBuilder {
    store: SharedStore,
    server: ServerConfig,
    config: SessionConfig,
    bundle: CertificateBundle,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            server: ServerConfig::new(PLAIN_SERVER.0, PLAIN_SERVER.1),
            config: SessionConfig::default(),
            bundle: bundle(3),
        }
    }

    pub fn secure(mut self) -> Self {
        self.server = ServerConfig::new(SECURE_SERVER.0, SECURE_SERVER.1);
        self
    }

    pub fn store(mut self, store: SharedStore) -> Self {
        self.store = store;
        self
    }

    pub fn identity(self, id: &str, token: &str) -> Self {
        IdentityPrefs::new(self.store.clone())
            .save(&DeviceIdentity::new(id, token))
            .unwrap();
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the session and spawn its loop. Must run inside a runtime.
    pub fn start(self) -> Harness {
        let (chip, chip_handle) = MockChip::new();
        let (card, taps) = CardControllerService::spawn(chip, CardControllerConfig::default());
        let (transport, server) = MockTransport::new();

        let display = Arc::new(RecordingDisplay::default());
        let device = Arc::new(RecordingDevice::default());
        let tap_listener = Arc::new(RecordingTaps::default());
        let network = Arc::new(SwitchableNetwork::new(true, true));
        let slot = MemoryImageSlot::new();

        let session = SessionManager::builder(transport, card.handle(), self.store.clone())
            .config(self.config)
            .server(self.server)
            .display(display.clone())
            .device_control(device.clone())
            .tap_listener(tap_listener.clone())
            .network(network.clone())
            .certificates(self.bundle)
            .image_slot(slot.clone())
            .build()
            .unwrap();
        let handle = session.handle();
        let task = tokio::spawn(session.run(taps));

        Harness {
            handle,
            server,
            chip: chip_handle,
            card,
            display,
            device,
            taps: tap_listener,
            network,
            slot,
            store: self.store,
            task,
        }
    }
}

pub fn bundle(count: usize) -> CertificateBundle {
    CertificateBundle::new(
        (0..count)
            .map(|i| CertificateCandidate::new(format!("CA {i}"), format!("pem-{i}")))
            .collect(),
    )
}

impl Harness {
    pub fn state(&self) -> SessionState {
        self.handle.status().state
    }

    /// Wait (in virtual time) until the session reaches `state`.
    pub async fn wait_for_state(&self, state: SessionState) {
        let mut status = self.handle.subscribe();
        tokio::time::timeout(Duration::from_secs(120), status.wait_for(|s| s.state == state))
            .await
            .unwrap_or_else(|_| panic!("session never reached {state}, stuck in {}", self.state()))
            .unwrap();
    }

    /// Connect and answer the registration request.
    pub async fn register(&self, id: &str, token: &str) {
        self.wait_for_state(SessionState::Authenticating).await;
        self.server.send_json(json!({
            "event": "RESPONSE",
            "data": {"type": "READER_REGISTER", "payload": {"id": id, "token": token}}
        }));
        self.wait_for_state(SessionState::Authenticated).await;
    }

    /// Connect and answer the credential request.
    pub async fn authenticate(&self, name: &str) {
        self.wait_for_state(SessionState::Authenticating).await;
        self.server.send_json(json!({
            "event": "RESPONSE",
            "data": {"type": "READER_AUTHENTICATED", "payload": {"name": name}}
        }));
        self.wait_for_state(SessionState::Authenticated).await;
    }

    /// Push a server `EVENT`.
    pub fn send_event(&self, message_type: &str, payload: Value) {
        self.server.send_json(json!({
            "event": "EVENT",
            "data": {"type": message_type, "payload": payload}
        }));
    }

    /// Sent envelopes of `message_type`, oldest first.
    pub fn sent_of_type(&self, message_type: &str) -> Vec<Value> {
        self.server
            .sent_json()
            .into_iter()
            .filter(|value| value["data"]["type"] == message_type)
            .collect()
    }

    pub fn heartbeats_sent(&self) -> usize {
        self.server
            .sent_envelopes()
            .iter()
            .filter(|envelope: &&Envelope| envelope.event == EventKind::Heartbeat)
            .count()
    }

    /// Wait until at least `count` messages of `message_type` were sent.
    pub async fn wait_for_sent(&self, message_type: &str, count: usize) -> Vec<Value> {
        for _ in 0..1_000 {
            let sent = self.sent_of_type(message_type);
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{message_type} was not sent {count} times");
    }

    pub async fn wait_for_card_ready(&self) {
        let mut status = self.card.handle().subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|status| *status == ControllerStatus::Ready),
        )
        .await
        .expect("card controller never became ready")
        .unwrap();
    }

    pub async fn shutdown(self) {
        self.handle.shutdown().await.unwrap();
        self.task.await.unwrap().unwrap();
        self.card.shutdown().await;
    }
}
