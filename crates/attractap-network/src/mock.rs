//! In-memory transport for tests and the offline emulator mode.
//!
//! [`MockTransport`] plays the terminal side; [`MockServerHandle`] plays the
//! server: it scripts connect outcomes, pushes frames and inspects what the
//! terminal sent.

use crate::error::{NetworkError, Result};
use crate::transport::{Transport, TransportConfig};
use attractap_protocol::{Envelope, Frame};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

/// Scripted result of one `connect` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Accept,
    /// Fails like a TLS handshake with an untrusted anchor.
    RejectCertificate,
    Refuse,
    /// Never completes; the caller's timeout has to fire.
    Hang,
}

#[derive(Debug)]
enum Inbound {
    Frame(Frame),
    Disconnect,
}

#[derive(Debug)]
struct LinkState {
    connected: bool,
    outcomes: VecDeque<ConnectOutcome>,
    default_outcome: ConnectOutcome,
    sent: Vec<Frame>,
    configs: Vec<TransportConfig>,
    fail_sends: bool,
}

fn lock(state: &Mutex<LinkState>) -> MutexGuard<'_, LinkState> {
    // Only a panicking test can poison the lock.
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Terminal side of an in-memory link.
#[derive(Debug)]
pub struct MockTransport {
    state: Arc<Mutex<LinkState>>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

impl MockTransport {
    pub fn new() -> (Self, MockServerHandle) {
        let state = Arc::new(Mutex::new(LinkState {
            connected: false,
            outcomes: VecDeque::new(),
            default_outcome: ConnectOutcome::Accept,
            sent: Vec::new(),
            configs: Vec::new(),
            fail_sends: false,
        }));
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                state: state.clone(),
                inbound: rx,
            },
            MockServerHandle { state, inbound: tx },
        )
    }
}

impl Transport for MockTransport {
    async fn connect(&mut self, config: &TransportConfig) -> Result<()> {
        let outcome = {
            let mut state = lock(&self.state);
            state.connected = false;
            state.configs.push(config.clone());
            let default = state.default_outcome;
            state.outcomes.pop_front().unwrap_or(default)
        };
        debug!(?outcome, url = %config.url, "Mock connect");

        match outcome {
            ConnectOutcome::Accept => {
                // Frames queued for an earlier connection are stale
                while self.inbound.try_recv().is_ok() {}
                lock(&self.state).connected = true;
                Ok(())
            }
            ConnectOutcome::RejectCertificate => Err(NetworkError::certificate(
                "peer certificate not trusted by anchor",
            )),
            ConnectOutcome::Refuse => Err(NetworkError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))),
            ConnectOutcome::Hang => {
                std::future::pending::<()>().await;
                Err(NetworkError::NotConnected)
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(NetworkError::NotConnected);
        }
        if state.fail_sends {
            return Err(NetworkError::ConnectionLost("mock send failure".to_string()));
        }
        state.sent.push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Frame> {
        if !lock(&self.state).connected {
            return None;
        }
        match self.inbound.recv().await {
            Some(Inbound::Frame(frame)) => Some(frame),
            Some(Inbound::Disconnect) | None => {
                lock(&self.state).connected = false;
                None
            }
        }
    }

    async fn close(&mut self) {
        lock(&self.state).connected = false;
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}

/// Server side of an in-memory link. Clones share the link.
#[derive(Debug, Clone)]
pub struct MockServerHandle {
    state: Arc<Mutex<LinkState>>,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl MockServerHandle {
    /// Outcome for the next `connect` call; queued outcomes are used in order.
    pub fn push_connect_outcome(&self, outcome: ConnectOutcome) {
        lock(&self.state).outcomes.push_back(outcome);
    }

    /// Outcome once the queue is empty.
    pub fn set_default_outcome(&self, outcome: ConnectOutcome) {
        lock(&self.state).default_outcome = outcome;
    }

    pub fn set_fail_sends(&self, fail: bool) {
        lock(&self.state).fail_sends = fail;
    }

    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.inbound.send(Inbound::Frame(Frame::text(text)));
    }

    pub fn send_json(&self, value: serde_json::Value) {
        self.send_text(value.to_string());
    }

    pub fn send_binary(&self, bytes: impl Into<Bytes>) {
        let _ = self.inbound.send(Inbound::Frame(Frame::binary(bytes)));
    }

    /// Drop the connection from the server side.
    pub fn disconnect(&self) {
        let _ = self.inbound.send(Inbound::Disconnect);
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    pub fn connect_count(&self) -> usize {
        lock(&self.state).configs.len()
    }

    /// Configs of all connect attempts, oldest first.
    pub fn connect_configs(&self) -> Vec<TransportConfig> {
        lock(&self.state).configs.clone()
    }

    pub fn sent(&self) -> Vec<Frame> {
        lock(&self.state).sent.clone()
    }

    /// Sent text frames parsed as envelopes.
    pub fn sent_envelopes(&self) -> Vec<Envelope> {
        self.sent()
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Text(text) => Envelope::from_json(&text).ok(),
                Frame::Binary(_) => None,
            })
            .collect()
    }

    /// Sent text frames as raw JSON values.
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent()
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Text(text) => serde_json::from_str(&text).ok(),
                Frame::Binary(_) => None,
            })
            .collect()
    }

    pub fn clear_sent(&self) {
        lock(&self.state).sent.clear();
    }
}
