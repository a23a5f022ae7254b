//! Session manager: connection lifecycle, dispatch and the send path.
//!
//! The manager owns the transport. It is driven either by [`run`]
//! (`tokio::select!` over local commands, inbound frames, card taps and a
//! housekeeping tick) or step by step through [`tick`], [`handle_frame`] and
//! [`handle_tap`].
//!
//! [`run`]: SessionManager::run
//! [`tick`]: SessionManager::tick
//! [`handle_frame`]: SessionManager::handle_frame
//! [`handle_tap`]: SessionManager::handle_tap

use crate::config::SessionConfig;
use crate::content;
use crate::error::{Result, SessionError};
use crate::handle::{SessionCommand, SessionHandle, SessionStatus};
use crate::inbound::Inbound;
use crate::state::{SessionState, StateMachine};
use attractap_core::{
    AlwaysReachable, CardUid, ConnectionStatus, DeviceControl, DeviceIdentity, DisplayContent,
    DisplaySink, LocalNetwork, SelectItemPrompt, ServerConfig, TapListener,
};
use attractap_firmware::{
    FirmwareAction, FirmwareUpdater, ImageSlot, MemoryImageSlot, TransferProgress,
    failure_content,
};
use attractap_hardware::{CardControllerHandle, TapReceiver};
use attractap_network::{CertificateBundle, CertificateSelector, Transport, TransportConfig};
use attractap_protocol::payloads::{
    AuthenticatePayload, ChangeKeysRequest, ChangeKeysResponse, ChunkRequest, EmptyPayload,
    FirmwareUpdateRequired, NfcAuthenticateRequest, NfcAuthenticateResponse, NfcTapPayload,
    RegisterPayload, RegisterResponse, SelectItemResponse,
};
use attractap_protocol::{Envelope, Frame, MessageType};
use attractap_storage::{CertificatePrefs, IdentityPrefs, ServerPrefs, SharedStore};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval, timeout};
use tracing::{debug, error, info, trace, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Display used when none is wired.
struct NoDisplay;

impl DisplaySink for NoDisplay {
    fn show_content(&self, _content: DisplayContent) {}

    fn show_connection_status(&self, _status: &ConnectionStatus) {}

    fn show_select_item(&self, _prompt: SelectItemPrompt) {}

    fn close_select_item(&self) {}
}

/// Device control used when none is wired; a restart only gets logged.
struct LogOnlyRestart;

impl DeviceControl for LogOnlyRestart {
    fn restart(&self) {
        warn!("Device restart requested, but no device control is wired");
    }
}

/// Builder for [`SessionManager`].
pub struct SessionBuilder<T: Transport> {
    transport: T,
    card: CardControllerHandle,
    store: SharedStore,
    config: SessionConfig,
    server: Option<ServerConfig>,
    display: Option<Arc<dyn DisplaySink>>,
    network: Option<Arc<dyn LocalNetwork>>,
    device: Option<Arc<dyn DeviceControl>>,
    tap_listener: Option<Arc<dyn TapListener>>,
    bundle: CertificateBundle,
    image_slot: Option<Box<dyn ImageSlot>>,
}

impl<T: Transport> SessionBuilder<T> {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Server to use instead of the persisted one. Not written to the store.
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.server = Some(server);
        self
    }

    pub fn display(mut self, display: Arc<dyn DisplaySink>) -> Self {
        self.display = Some(display);
        self
    }

    pub fn network(mut self, network: Arc<dyn LocalNetwork>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn device_control(mut self, device: Arc<dyn DeviceControl>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn tap_listener(mut self, listener: Arc<dyn TapListener>) -> Self {
        self.tap_listener = Some(listener);
        self
    }

    /// Trust anchors for secure servers, in trial order.
    pub fn certificates(mut self, bundle: CertificateBundle) -> Self {
        self.bundle = bundle;
        self
    }

    /// Where firmware images are written.
    pub fn image_slot(mut self, slot: impl ImageSlot + 'static) -> Self {
        self.image_slot = Some(Box::new(slot));
        self
    }

    /// Load the persisted identity and server and assemble the manager.
    ///
    /// # Errors
    /// `Storage` when the preference store cannot be read.
    pub fn build(self) -> Result<SessionManager<T>> {
        let identity_prefs = IdentityPrefs::new(self.store.clone());
        let server_prefs = ServerPrefs::new(self.store.clone());
        let selector =
            CertificateSelector::new(self.bundle, CertificatePrefs::new(self.store.clone()));

        let identity = identity_prefs
            .load()?
            .filter(DeviceIdentity::is_complete);
        let server = match self.server {
            Some(server) => Some(server),
            None => server_prefs.load()?,
        };
        match &identity {
            Some(identity) => info!(id = %identity.id, "Loaded device identity"),
            None => info!("No device identity stored, the reader will register"),
        }
        match &server {
            Some(server) => info!(%server, "Server configured"),
            None => warn!("No server configured"),
        }

        let firmware = FirmwareUpdater::new(
            self.config.firmware.clone(),
            self.config.firmware_info.version.clone(),
            self.image_slot
                .unwrap_or_else(|| Box::new(MemoryImageSlot::new())),
        );

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let handle = SessionHandle {
            commands: command_tx,
            status: status_rx,
        };

        Ok(SessionManager {
            config: self.config,
            transport: self.transport,
            machine: StateMachine::new(),
            server,
            identity,
            reader_name: None,
            selector,
            identity_prefs,
            server_prefs,
            card: self.card,
            firmware,
            display: self.display.unwrap_or_else(|| Arc::new(NoDisplay)),
            network: self.network.unwrap_or_else(|| Arc::new(AlwaysReachable)),
            device: self.device.unwrap_or_else(|| Arc::new(LogOnlyRestart)),
            tap_listener: self.tap_listener,
            last_attempt: None,
            last_auto_connect: None,
            last_heartbeat: Instant::now(),
            secure_connected_at: None,
            restart_at: None,
            select_pending: false,
            status_tx,
            commands: command_rx,
            handle,
        })
    }
}

/// Connection to the Attraccess server and everything that hangs off it.
///
/// # Examples
///
/// ```no_run
/// use attractap_core::ServerConfig;
/// use attractap_hardware::mock::MockChip;
/// use attractap_hardware::{CardControllerConfig, CardControllerService};
/// use attractap_network::mock::MockTransport;
/// use attractap_session::SessionManager;
/// use attractap_storage::MemoryStore;
/// use std::sync::Arc;
///
/// # async fn example() -> attractap_session::Result<()> {
/// let (chip, _chip_handle) = MockChip::new();
/// let (card, taps) = CardControllerService::spawn(chip, CardControllerConfig::default());
/// let (transport, _server) = MockTransport::new();
///
/// let session = SessionManager::builder(transport, card.handle(), Arc::new(MemoryStore::new()))
///     .server(ServerConfig::new("attraccess.local", 3000))
///     .build()?;
/// let handle = session.handle();
/// tokio::spawn(session.run(taps));
///
/// handle.cancel().await?;
/// # Ok(())
/// # }
/// ```
pub struct SessionManager<T: Transport> {
    config: SessionConfig,
    transport: T,
    machine: StateMachine,
    server: Option<ServerConfig>,
    identity: Option<DeviceIdentity>,
    reader_name: Option<String>,
    selector: CertificateSelector,
    identity_prefs: IdentityPrefs,
    server_prefs: ServerPrefs,
    card: CardControllerHandle,
    firmware: FirmwareUpdater,
    display: Arc<dyn DisplaySink>,
    network: Arc<dyn LocalNetwork>,
    device: Arc<dyn DeviceControl>,
    tap_listener: Option<Arc<dyn TapListener>>,
    last_attempt: Option<Instant>,
    last_auto_connect: Option<Instant>,
    last_heartbeat: Instant,
    /// Set while a secure connection is up. Drops before authentication
    /// count against the anchor in use.
    secure_connected_at: Option<Instant>,
    restart_at: Option<Instant>,
    select_pending: bool,
    status_tx: watch::Sender<SessionStatus>,
    commands: mpsc::Receiver<SessionCommand>,
    handle: SessionHandle,
}

impl<T: Transport> fmt::Debug for SessionManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.machine.current_state())
            .field("server", &self.server)
            .field("identity", &self.identity)
            .field("reader_name", &self.reader_name)
            .field("selector", &self.selector)
            .field("firmware", &self.firmware)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> SessionManager<T> {
    pub fn builder(
        transport: T,
        card: CardControllerHandle,
        store: SharedStore,
    ) -> SessionBuilder<T> {
        SessionBuilder {
            transport,
            card,
            store,
            config: SessionConfig::default(),
            server: None,
            display: None,
            network: None,
            device: None,
            tap_listener: None,
            bundle: CertificateBundle::default(),
            image_slot: None,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> SessionState {
        self.machine.current_state()
    }

    pub fn state_machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn status(&self) -> SessionStatus {
        self.status_tx.borrow().clone()
    }

    pub fn reader_name(&self) -> Option<&str> {
        self.reader_name.as_deref()
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    pub fn server(&self) -> Option<&ServerConfig> {
        self.server.as_ref()
    }

    pub fn certificates(&self) -> &CertificateSelector {
        &self.selector
    }

    pub fn firmware_progress(&self) -> Option<TransferProgress> {
        self.firmware.progress()
    }

    /// Serve commands, frames and taps until [`SessionHandle::shutdown`].
    pub async fn run(mut self, mut taps: TapReceiver) -> Result<()> {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut taps_open = true;
        info!("Session started");

        loop {
            // recv() on a closed transport returns at once; only poll it
            // while a connection is up.
            let connected = self.transport.is_connected();
            tokio::select! {
                Some(command) = self.commands.recv() => {
                    if matches!(command, SessionCommand::Shutdown) {
                        break;
                    }
                    self.handle_command(command).await;
                }
                frame = self.transport.recv(), if connected => match frame {
                    Some(frame) => self.handle_frame(frame).await,
                    None => self.handle_disconnect().await,
                },
                tap = taps.recv(), if taps_open => match tap {
                    Some(uid) => self.handle_tap(uid).await,
                    None => {
                        debug!("Card tap channel closed");
                        taps_open = false;
                    }
                },
                _ = ticker.tick() => self.tick().await,
            }
        }

        info!("Session stopping");
        if self.state().is_connected() {
            self.clear_interaction().await;
        }
        self.transport.close().await;
        self.machine.reset("Session stopped");
        self.publish_status();
        Ok(())
    }

    /// Housekeeping: scheduled restart, firmware timeouts, connection
    /// attempts, handshake, auth timeout, heartbeat and error recovery.
    pub async fn tick(&mut self) {
        let now = Instant::now();

        if let Some(at) = self.restart_at
            && now >= at
        {
            self.restart_at = None;
            info!("Restarting device");
            self.device.restart();
        }

        let actions = self.firmware.poll(now);
        self.apply_firmware_actions(actions).await;

        let state = self.machine.current_state();
        if state.is_connected() && !self.network.is_reachable() {
            warn!("Local network lost");
            self.drop_connection(SessionState::Disconnected, "Local network lost")
                .await;
            return;
        }

        match state {
            SessionState::Disconnected => self.maybe_connect(now).await,
            // The handshake is awaited inside maybe_connect.
            SessionState::Connecting => {}
            SessionState::Connected => {
                if self.machine.time_in_current_state() >= self.config.ready_delay {
                    self.begin_authentication().await;
                }
            }
            SessionState::Authenticating => {
                if self.machine.time_in_current_state() >= self.config.connect_timeout {
                    warn!(
                        timeout_ms = self.config.connect_timeout.as_millis() as u64,
                        "No answer to authentication request"
                    );
                    self.transport.close().await;
                    self.reader_name = None;
                    self.secure_connected_at = None;
                    self.clear_interaction().await;
                    self.transition(SessionState::ErrorTimedOut, "Authentication timed out");
                }
            }
            SessionState::Authenticated => {
                if now.duration_since(self.last_heartbeat) >= self.config.heartbeat_interval {
                    self.last_heartbeat = now;
                    trace!("Sending heartbeat");
                    report(self.send(Envelope::heartbeat()).await, "heartbeat");
                }
            }
            SessionState::ErrorFailed
            | SessionState::ErrorTimedOut
            | SessionState::ErrorInvalidConfig => {
                if self.machine.time_in_current_state() >= self.config.retry_interval {
                    self.transition(SessionState::Disconnected, "Retrying");
                }
            }
        }
    }

    async fn maybe_connect(&mut self, now: Instant) {
        if let Some(last) = self.last_attempt
            && now.duration_since(last) < self.config.retry_interval
        {
            return;
        }

        let Some(server) = self.server.clone() else {
            trace!("No server configured");
            return;
        };
        if let Err(e) = server.validate() {
            warn!(%server, error = %e, "Invalid server configuration");
            self.transition(SessionState::ErrorInvalidConfig, e.to_string());
            return;
        }

        if !self.network.is_reachable() {
            self.recover_local_network(now);
            return;
        }

        self.connect(server, now).await;
    }

    fn recover_local_network(&mut self, now: Instant) {
        if !self.network.has_saved_credentials() {
            trace!("Local network unreachable and no saved credentials");
            return;
        }
        if let Some(last) = self.last_auto_connect
            && now.duration_since(last) < self.config.connect_timeout
        {
            return;
        }
        self.last_auto_connect = Some(now);
        if self.network.try_auto_connect() {
            info!("Reconnecting local network with saved credentials");
        } else {
            debug!("Local network reconnect could not be started");
        }
    }

    async fn connect(&mut self, server: ServerConfig, now: Instant) {
        self.last_attempt = Some(now);
        self.transition(SessionState::Connecting, format!("Connecting to {server}"));

        let mut transport_config =
            TransportConfig::new(server).with_connect_timeout(self.config.connect_timeout);
        let secure = transport_config.is_secure();
        if secure && !self.selector.configure(&mut transport_config) {
            self.transition(SessionState::ErrorFailed, "No trust anchor available");
            return;
        }
        info!(url = %transport_config.url, "Connecting to server");

        match timeout(
            self.config.connect_timeout,
            self.transport.connect(&transport_config),
        )
        .await
        {
            Ok(Ok(())) => {
                if secure {
                    self.secure_connected_at = Some(Instant::now());
                }
                self.transition(SessionState::Connected, "Transport connected");
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Connection failed");
                if secure && e.is_certificate_error() && !self.selector.try_next() {
                    info!("All trust anchors tried, starting over on the next attempt");
                }
                self.transport.close().await;
                self.transition(SessionState::ErrorFailed, e.to_string());
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.connect_timeout.as_millis() as u64,
                    "Connection attempt timed out"
                );
                self.transport.close().await;
                self.transition(SessionState::ErrorTimedOut, "Connection timed out");
            }
        }
    }

    async fn begin_authentication(&mut self) {
        let reason = if self.identity.is_some() {
            "Sending credentials"
        } else {
            "Registering"
        };
        self.transition(SessionState::Authenticating, reason);
        report(self.send_credentials().await, "authentication request");
    }

    /// Credentials if an identity is known, a registration request otherwise.
    async fn send_credentials(&mut self) -> Result<()> {
        match self.identity.clone() {
            Some(identity) => {
                info!(id = %identity.id, "Authenticating");
                self.send_event(
                    MessageType::ReaderAuthenticate,
                    &AuthenticatePayload {
                        id: identity.id,
                        token: identity.token,
                    },
                )
                .await
            }
            None => {
                info!(device_type = %self.config.device_type, "Registering reader");
                let payload = RegisterPayload {
                    device_type: self.config.device_type.clone(),
                };
                self.send_event(MessageType::Register, &payload).await
            }
        }
    }

    /// Handle one inbound frame.
    pub async fn handle_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Text(text) => {
                let envelope = match Envelope::from_json(&text) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!(error = %e, "Dropping malformed message");
                        return;
                    }
                };
                match Inbound::decode(&envelope) {
                    Ok(Some(inbound)) => self.handle_inbound(inbound).await,
                    Ok(None) => {}
                    Err(e) => warn!(
                        message_type = envelope.raw_type(),
                        error = %e,
                        "Dropping message with invalid payload"
                    ),
                }
            }
            Frame::Binary(data) => {
                let actions = self.firmware.handle_chunk(&data, Instant::now());
                self.apply_firmware_actions(actions).await;
            }
        }
    }

    async fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Heartbeat => {
                self.last_heartbeat = Instant::now();
                report(self.send(Envelope::heartbeat()).await, "heartbeat answer");
            }
            Inbound::Registered { response, message } => {
                self.handle_registration(response, message).await;
            }
            Inbound::Authenticated(payload) => {
                if let Some(name) = payload.name {
                    self.reader_name = Some(name);
                }
                self.set_authenticated("Authenticated");
            }
            Inbound::AuthenticateRequested => {
                info!("Server requested authentication");
                self.restart_authentication("Server requested authentication")
                    .await;
            }
            Inbound::Unauthorized => {
                warn!("Server rejected the stored identity, registering again");
                self.identity = None;
                if let Err(e) = self.identity_prefs.clear() {
                    warn!(error = %e, "Failed to clear stored identity");
                }
                self.reader_name = None;
                self.restart_authentication("Unauthorized").await;
            }
            Inbound::DisplayError(message) => {
                self.display.show_content(DisplayContent::error(message));
            }
            Inbound::DisplaySuccess(message) => {
                self.display.show_content(DisplayContent::success(message));
            }
            Inbound::ShowText(message) => {
                self.display.show_content(DisplayContent::text(message));
            }
            Inbound::ClearError | Inbound::ClearSuccess => {
                self.display.show_content(DisplayContent::none());
            }
            Inbound::EnableCardChecking(payload) => match content::card_checking(&payload) {
                Some(prompt) => {
                    self.set_card_checking(true).await;
                    self.display.show_content(prompt);
                }
                None => warn!(?payload, "Unknown card checking mode"),
            },
            Inbound::DisableCardChecking => {
                self.set_card_checking(false).await;
                self.display.show_content(DisplayContent::none());
            }
            Inbound::SelectItem(payload) => {
                info!(label = %payload.label, options = payload.options.len(), "Select item requested");
                self.select_pending = true;
                self.display.show_select_item(payload.into());
            }
            Inbound::FirmwareUpdateRequired(update) => self.start_firmware_update(update).await,
            Inbound::FirmwareInfoRequested => {
                let info = self.config.firmware_info.clone();
                report(
                    self.send_response(MessageType::FirmwareInfo, &info).await,
                    "firmware info",
                );
            }
            Inbound::ChangeKeys(request) => self.change_keys(request).await,
            Inbound::NfcAuthenticate(request) => self.authenticate_card(request).await,
        }
    }

    async fn handle_registration(&mut self, response: RegisterResponse, message: Option<String>) {
        let identity = response
            .id
            .zip(response.token)
            .map(|(id, token)| DeviceIdentity::new(id, token))
            .filter(DeviceIdentity::is_complete);
        let Some(identity) = identity else {
            let error = SessionError::registration_failed(
                message.unwrap_or_else(|| "no credentials in response".to_string()),
            );
            error!(error = %error, "Registration rejected");
            self.drop_connection(SessionState::ErrorFailed, error.to_string())
                .await;
            return;
        };

        info!(id = %identity.id, "Registered");
        if let Err(e) = self.identity_prefs.save(&identity) {
            warn!(error = %e, "Failed to persist device identity");
        }
        self.identity = Some(identity);
        self.set_authenticated("Registered");
    }

    fn set_authenticated(&mut self, reason: &str) {
        if self.state() == SessionState::Authenticated {
            info!(reader = ?self.reader_name, "Reauthenticated");
            self.publish_status();
            return;
        }
        self.last_heartbeat = Instant::now();
        // A handshake alone can still end in an early drop; the anchor only
        // counts as working once the server accepted the reader.
        if self.secure_connected_at.is_some() {
            self.selector.mark_success();
        }
        self.transition(SessionState::Authenticated, reason);
        info!(reader = ?self.reader_name, "Reader authenticated");
    }

    async fn restart_authentication(&mut self, reason: &str) {
        match self.state() {
            SessionState::Authenticated => {
                self.transition(SessionState::Authenticating, reason);
            }
            SessionState::Authenticating => {}
            state => {
                debug!(%state, "Not connected, ignoring authentication request");
                return;
            }
        }
        report(self.send_credentials().await, "authentication request");
    }

    async fn start_firmware_update(&mut self, update: FirmwareUpdateRequired) {
        if self.firmware.is_active() {
            debug!("Firmware update already in progress");
            return;
        }
        info!(
            version = %update.available.version,
            chunks = update.firmware.chunks,
            "Firmware update required"
        );
        match self.firmware.start(
            &update.available.version,
            update.firmware.chunks,
            Instant::now(),
        ) {
            Ok(actions) => self.apply_firmware_actions(actions).await,
            Err(e) => {
                error!(error = %e, "Firmware update could not start");
                self.display.show_content(failure_content(&e.to_string()));
            }
        }
    }

    async fn apply_firmware_actions(&mut self, actions: Vec<FirmwareAction>) {
        for action in actions {
            match action {
                FirmwareAction::RequestChunk { index } => {
                    debug!(chunk = index, "Requesting firmware chunk");
                    let result = self
                        .send_event(
                            MessageType::FirmwareStreamChunk,
                            &ChunkRequest { chunk_index: index },
                        )
                        .await;
                    report(result, "chunk request");
                }
                FirmwareAction::Display(content) => self.display.show_content(content),
                FirmwareAction::Restart { delay, reason } => {
                    info!(%reason, delay_ms = delay.as_millis() as u64, "Restart scheduled");
                    self.restart_at = Some(Instant::now() + delay);
                }
            }
        }
    }

    /// Change the requested keys in order, master key first. Once key 0 has
    /// been replaced the new key authenticates the remaining changes. The
    /// first failure ends the run; keys not tried are reported as failed.
    async fn change_keys(&mut self, request: ChangeKeysRequest) {
        let mut response = ChangeKeysResponse {
            authentication_key: request.authentication_key.clone(),
            ..ChangeKeysResponse::default()
        };

        match request.plan() {
            Ok(plan) => {
                let mut auth_key = plan.authentication_key;
                let mut keys = plan.keys.into_iter();
                for (key_number, new_key) in keys.by_ref() {
                    match self.card.change_key(key_number, auth_key, new_key).await {
                        Ok(()) => {
                            info!(key = %key_number, "Key changed");
                            response.successful_keys.push(key_number.as_u8());
                            if key_number.is_master() {
                                auth_key = new_key;
                            }
                        }
                        Err(e) => {
                            warn!(key = %key_number, error = %e, "Key change failed");
                            response.failed_keys.push(key_number.as_u8());
                            break;
                        }
                    }
                }
                response
                    .failed_keys
                    .extend(keys.map(|(key_number, _)| key_number.as_u8()));
            }
            Err(e) => {
                warn!(error = %e, "Invalid change keys request");
                response.failed_keys = request.requested_key_numbers();
            }
        }

        report(
            self.send_response(MessageType::ChangeKeys, &response).await,
            "change keys response",
        );
    }

    async fn authenticate_card(&mut self, request: NfcAuthenticateRequest) {
        let result = self
            .card
            .authenticate(request.key_number, request.authentication_key)
            .await;
        if let Err(e) = &result {
            if e.is_fault() {
                warn!(error = %e, "Card reader fault during authentication");
            } else {
                info!(error = %e, "Card authentication failed");
            }
        }
        let response = NfcAuthenticateResponse {
            authentication_successful: result.is_ok(),
        };
        report(
            self.send_response(MessageType::NfcAuthenticate, &response).await,
            "authentication response",
        );
    }

    /// Forward a card tap to the server while authenticated. The tap
    /// listener sees every tap.
    pub async fn handle_tap(&mut self, uid: CardUid) {
        info!(%uid, "Card tapped");
        if let Some(listener) = &self.tap_listener {
            listener.on_card_tapped(&uid);
        }
        if self.state() != SessionState::Authenticated {
            debug!(%uid, "Not authenticated, tap not forwarded");
            return;
        }
        let payload = NfcTapPayload {
            card_uid: uid.to_hex(),
        };
        report(self.send_event(MessageType::NfcTap, &payload).await, "card tap");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Cancel => self.cancel().await,
            SessionCommand::SelectItem(id) => self.select_item(id).await,
            SessionCommand::SetServer(server) => self.set_server_config(server).await,
            SessionCommand::Shutdown => {}
        }
    }

    /// Drop the pending prompt and card checking, and tell the server.
    pub async fn cancel(&mut self) {
        info!("Cancel requested");
        self.clear_interaction().await;
        self.display.show_content(DisplayContent::none());
        if self.state() == SessionState::Authenticated {
            report(
                self.send_event(MessageType::Cancel, &EmptyPayload {}).await,
                "cancel",
            );
        }
    }

    /// Answer the open selection dialog.
    pub async fn select_item(&mut self, id: String) {
        if !self.select_pending {
            debug!(%id, "No selection pending");
        }
        self.select_pending = false;
        self.display.close_select_item();
        info!(%id, "Item selected");
        report(
            self.send_event(MessageType::SelectItem, &SelectItemResponse { selected_id: id })
                .await,
            "select item response",
        );
    }

    /// Switch to `server`, forgetting identity and certificate memory.
    pub async fn set_server_config(&mut self, server: ServerConfig) {
        if self.server.as_ref() == Some(&server) {
            debug!(%server, "Server configuration unchanged");
            return;
        }
        info!(%server, "Server configuration changed");

        if self.state().is_connected() {
            self.clear_interaction().await;
        }
        self.transport.close().await;
        self.machine.reset("Server configuration changed");
        self.reader_name = None;
        self.secure_connected_at = None;
        self.last_attempt = None;

        self.identity = None;
        if let Err(e) = self.identity_prefs.clear() {
            warn!(error = %e, "Failed to clear stored identity");
        }
        self.selector.reset_for_new_connection();
        if let Err(e) = self.server_prefs.save(&server) {
            warn!(error = %e, "Failed to persist server configuration");
        }
        self.server = Some(server);
        self.publish_status();
    }

    async fn handle_disconnect(&mut self) {
        let state = self.state();
        if !state.is_connected() {
            return;
        }
        if let Some(connected_at) = self.secure_connected_at
            && state != SessionState::Authenticated
            && connected_at.elapsed() < self.config.certificate_failure_window
        {
            warn!(
                certificate = %self.selector.current_name(),
                "Secure connection dropped before authentication, trying next certificate"
            );
            if !self.selector.try_next() {
                info!("All trust anchors tried, starting over on the next attempt");
            }
        }
        self.drop_connection(SessionState::Disconnected, "Connection closed")
            .await;
    }

    /// Close the transport and leave the connected states.
    async fn drop_connection(&mut self, target: SessionState, reason: impl Into<String>) {
        let was_connected = self.state().is_connected();
        self.transport.close().await;
        self.reader_name = None;
        self.secure_connected_at = None;
        if was_connected {
            self.clear_interaction().await;
            self.display.show_content(content::unavailable_notice());
        }
        self.transition(target, reason);
    }

    /// Close a pending selection and stop card checking.
    async fn clear_interaction(&mut self) {
        if self.select_pending {
            self.select_pending = false;
            self.display.close_select_item();
        }
        self.set_card_checking(false).await;
    }

    async fn set_card_checking(&mut self, enabled: bool) {
        if let Err(e) = self.card.set_card_checking(enabled).await {
            warn!(enabled, error = %e, "Failed to switch card checking");
        }
    }

    async fn send_event<P: Serialize>(&mut self, message_type: MessageType, payload: &P) -> Result<()> {
        self.send(Envelope::event(message_type, payload)?).await
    }

    async fn send_response<P: Serialize>(
        &mut self,
        message_type: MessageType,
        payload: &P,
    ) -> Result<()> {
        self.send(Envelope::response(message_type, payload)?).await
    }

    /// The single send path. Oversized messages are rejected before they
    /// reach the transport; a transport failure ends the connection.
    async fn send(&mut self, envelope: Envelope) -> Result<()> {
        if !self.transport.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let text = envelope.to_json_with_limit(self.config.max_message_size)?;
        trace!(event = %envelope.event, message_type = envelope.raw_type(), %text, "Sending");

        if let Err(e) = self.transport.send(Frame::text(text)).await {
            error!(error = %e, "Send failed");
            self.drop_connection(SessionState::ErrorFailed, format!("Send failed: {e}"))
                .await;
            return Err(e.into());
        }
        Ok(())
    }

    fn transition(&mut self, state: SessionState, reason: impl Into<String>) {
        match self.machine.transition_with_reason(state, reason) {
            Ok(transition) => {
                info!(
                    from = %transition.from,
                    to = %transition.to,
                    reason = %transition.reason,
                    "Session state changed"
                );
                self.publish_status();
            }
            Err(e) => warn!(error = %e, "Ignoring session state change"),
        }
    }

    fn publish_status(&self) {
        let certificate = self
            .server
            .as_ref()
            .filter(|server| server.is_secure())
            .map(|_| self.selector.current_name().to_string());
        let status = SessionStatus {
            state: self.state(),
            reader_name: self.reader_name.clone(),
            certificate,
        };
        self.display
            .show_connection_status(&ConnectionStatus::from(&status));
        self.status_tx.send_replace(status);
    }
}

fn report(result: Result<()>, what: &str) {
    match result {
        Ok(()) => {}
        Err(SessionError::NotConnected) => debug!(what, "Not connected, message dropped"),
        Err(e) => warn!(what, error = %e, "Failed to send message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingDevice, RecordingDisplay};
    use attractap_hardware::mock::MockChip;
    use attractap_hardware::{CardControllerConfig, CardControllerService};
    use attractap_network::mock::{ConnectOutcome, MockServerHandle, MockTransport};
    use attractap_protocol::EventKind;
    use attractap_storage::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        session: SessionManager<MockTransport>,
        server: MockServerHandle,
        display: Arc<RecordingDisplay>,
        store: SharedStore,
        _card: CardControllerService,
    }

    fn fixture(server_config: ServerConfig) -> Fixture {
        let (chip, _chip_handle) = MockChip::new();
        let (card, _taps) = CardControllerService::spawn(chip, CardControllerConfig::default());
        let (transport, server) = MockTransport::new();
        let store: SharedStore = Arc::new(MemoryStore::new());
        let display = Arc::new(RecordingDisplay::default());
        let session = SessionManager::builder(transport, card.handle(), store.clone())
            .server(server_config)
            .display(display.clone())
            .device_control(Arc::new(RecordingDevice::default()))
            .build()
            .unwrap();
        Fixture {
            session,
            server,
            display,
            store,
            _card: card,
        }
    }

    async fn connect(fixture: &mut Fixture) {
        fixture.session.tick().await;
        assert_eq!(fixture.session.state(), SessionState::Connected);
        tokio::time::advance(Duration::from_millis(100)).await;
        fixture.session.tick().await;
        assert_eq!(fixture.session.state(), SessionState::Authenticating);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_connects_and_registers() {
        let mut fixture = fixture(ServerConfig::new("localhost", 3000));
        connect(&mut fixture).await;

        let sent = fixture.server.sent_json();
        assert_eq!(
            sent,
            vec![json!({
                "event": "EVENT",
                "data": {"type": "READER_REGISTER", "payload": {"deviceType": "ESP32_CYD"}}
            })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_delay_holds_back_request() {
        let mut fixture = fixture(ServerConfig::new("localhost", 3000));
        fixture.session.tick().await;
        tokio::time::advance(Duration::from_millis(50)).await;
        fixture.session.tick().await;
        assert_eq!(fixture.session.state(), SessionState::Connected);
        assert!(fixture.server.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_does_not_consume_attempt() {
        let mut fixture = fixture(ServerConfig::new("", 3000));
        fixture.session.tick().await;
        assert_eq!(fixture.session.state(), SessionState::ErrorInvalidConfig);
        assert_eq!(fixture.server.connect_count(), 0);
        assert_eq!(fixture.session.status().state.to_string(), "Error Invalid Server");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let mut fixture = fixture(ServerConfig::new("localhost", 3000));
        fixture.server.push_connect_outcome(ConnectOutcome::Hang);
        fixture.session.tick().await;
        assert_eq!(fixture.session.state(), SessionState::ErrorTimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connection_recovers_after_retry_interval() {
        let mut fixture = fixture(ServerConfig::new("localhost", 3000));
        fixture.server.push_connect_outcome(ConnectOutcome::Refuse);
        fixture.session.tick().await;
        assert_eq!(fixture.session.state(), SessionState::ErrorFailed);

        tokio::time::advance(Duration::from_millis(999)).await;
        fixture.session.tick().await;
        assert_eq!(fixture.session.state(), SessionState::ErrorFailed);

        tokio::time::advance(Duration::from_millis(1)).await;
        fixture.session.tick().await;
        assert_eq!(fixture.session.state(), SessionState::Disconnected);
        fixture.session.tick().await;
        assert_eq!(fixture.session.state(), SessionState::Connected);
        assert_eq!(fixture.server.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_without_connection_is_an_error() {
        let mut fixture = fixture(ServerConfig::new("localhost", 3000));
        let result = fixture.session.send(Envelope::heartbeat()).await;
        assert!(matches!(result, Err(SessionError::NotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_message_is_rejected() {
        let mut fixture = fixture(ServerConfig::new("localhost", 3000));
        connect(&mut fixture).await;
        fixture.server.clear_sent();

        let payload = json!({"message": "x".repeat(2000)});
        let result = fixture.session.send_event(MessageType::ShowText, &payload).await;
        assert!(matches!(result, Err(SessionError::Protocol(_))));
        assert!(fixture.server.sent().is_empty());
        assert_eq!(fixture.session.state(), SessionState::Authenticating);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_ends_connection() {
        let mut fixture = fixture(ServerConfig::new("localhost", 3000));
        connect(&mut fixture).await;
        fixture.server.set_fail_sends(true);

        let result = fixture.session.send(Envelope::heartbeat()).await;
        assert!(matches!(result, Err(SessionError::Network(_))));
        assert_eq!(fixture.session.state(), SessionState::ErrorFailed);
        let notice = fixture.display.last_content().unwrap();
        assert_eq!(notice.message, "Sorry, this reader is currently not available");
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_heartbeat_is_answered() {
        let mut fixture = fixture(ServerConfig::new("localhost", 3000));
        connect(&mut fixture).await;
        fixture.server.clear_sent();

        fixture
            .session
            .handle_frame(Frame::text(r#"{"event":"HEARTBEAT","data":{}}"#))
            .await;
        let sent = fixture.server.sent_envelopes();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event, EventKind::Heartbeat);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_registration_fails_with_message() {
        let mut fixture = fixture(ServerConfig::new("localhost", 3000));
        connect(&mut fixture).await;

        fixture
            .session
            .handle_frame(Frame::text(
                json!({"event": "RESPONSE", "data": {"type": "READER_REGISTER", "message": "nope"}})
                    .to_string(),
            ))
            .await;
        assert_eq!(fixture.session.state(), SessionState::ErrorFailed);
        assert!(fixture.session.identity().is_none());
        assert_eq!(
            fixture.session.state_machine().history().back().unwrap().reason,
            "Registration failed: nope"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_answered_during_ready_delay() {
        let mut fixture = fixture(ServerConfig::new("localhost", 3000));
        fixture.session.tick().await;
        assert_eq!(fixture.session.state(), SessionState::Connected);

        fixture
            .session
            .handle_frame(Frame::text(
                json!({
                    "event": "RESPONSE",
                    "data": {"type": "READER_REGISTER", "payload": {"id": "42", "token": "secret"}}
                })
                .to_string(),
            ))
            .await;
        assert_eq!(fixture.session.state(), SessionState::Authenticated);
        assert_eq!(
            IdentityPrefs::new(fixture.store.clone()).load().unwrap(),
            Some(DeviceIdentity::new("42", "secret"))
        );

        tokio::time::advance(Duration::from_millis(100)).await;
        fixture.session.tick().await;
        assert_eq!(fixture.session.state(), SessionState::Authenticated);
        assert!(fixture.server.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reauthenticated_keeps_state() {
        let mut fixture = fixture(ServerConfig::new("localhost", 3000));
        connect(&mut fixture).await;
        let authenticated = json!({
            "event": "RESPONSE",
            "data": {"type": "READER_AUTHENTICATED", "payload": {"name": "Front Door"}}
        })
        .to_string();

        fixture.session.handle_frame(Frame::text(authenticated.clone())).await;
        assert_eq!(fixture.session.state(), SessionState::Authenticated);
        let transitions = fixture.session.state_machine().history().len();

        fixture.session.handle_frame(Frame::text(authenticated)).await;
        assert_eq!(fixture.session.state(), SessionState::Authenticated);
        assert_eq!(fixture.session.state_machine().history().len(), transitions);
        assert_eq!(fixture.session.reader_name(), Some("Front Door"));
        assert!(fixture.display.statuses().len() > transitions);
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_intents() {
        let mut fixture = fixture(ServerConfig::new("localhost", 3000));
        fixture
            .session
            .handle_frame(Frame::text(
                json!({"event": "EVENT", "data": {"type": "DISPLAY_SUCCESS", "payload": {"message": "Welcome"}}})
                    .to_string(),
            ))
            .await;
        assert_eq!(fixture.display.last_content().unwrap().message, "Welcome");

        fixture
            .session
            .handle_frame(Frame::text(
                json!({"event": "EVENT", "data": {"type": "CLEAR_SUCCESS"}}).to_string(),
            ))
            .await;
        assert!(fixture.display.last_content().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_server_config_is_kept() {
        let mut fixture = fixture(ServerConfig::new("localhost", 3000));
        connect(&mut fixture).await;
        fixture
            .session
            .set_server_config(ServerConfig::new("localhost", 3000))
            .await;
        assert_eq!(fixture.session.state(), SessionState::Authenticating);
        assert!(ServerPrefs::new(fixture.store.clone()).load().unwrap().is_none());
    }
}
