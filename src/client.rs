// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Connection coordinator.
//!
//! [`SppClient`] is a cheap handle. Every operation that changes state is
//! queued to a single coordination task, which owns the connection state,
//! the active session and the auto-reconnect policy, and is the only place
//! listeners are called from.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::bluetooth::frame::{self, DeviceProfile};
use crate::bluetooth::{
    AutoReconnect, DeviceTarget, LinkError, PeerAddress, PeerDescriptor, Session, SessionEvent,
    SessionMode, TaggedEvent, Transport,
};
use crate::events::{
    AutoConnectionListener, ConnectionListener, DataListener, Listeners, StateListener,
};
use crate::state::{ConnectionState, SharedStatus};

/// Requests queued to the coordination task.
enum Command {
    SetupService,
    StartService(DeviceTarget),
    StopService,
    SetDeviceTarget(DeviceTarget),
    Connect(PeerAddress),
    Disconnect,
    AutoConnect(String),
    StopAutoConnect,
    SetStateListener(Arc<dyn StateListener>),
    SetDataListener(Arc<dyn DataListener>),
    SetConnectionListener(Arc<dyn ConnectionListener>),
    SetAutoConnectionListener(Arc<dyn AutoConnectionListener>),
    Settle(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a serial port profile link.
///
/// Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct SppClient {
    commands: mpsc::UnboundedSender<Command>,
    status: Arc<SharedStatus>,
    transport: Arc<dyn Transport>,
    profile: DeviceProfile,
}

impl SppClient {
    /// Create a client and spawn its coordination task.
    pub fn new(transport: Arc<dyn Transport>, profile: DeviceProfile) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let status = Arc::new(SharedStatus::default());

        let coordinator = Coordinator {
            transport: transport.clone(),
            status: status.clone(),
            session_tx,
            session: None,
            next_generation: 0,
            configured: false,
            running: false,
            state: ConnectionState::None,
            target: DeviceTarget::default(),
            listeners: Listeners::default(),
            auto: None,
        };
        tokio::spawn(coordinator.run(command_rx, session_rx));

        info!("SPP client created ({})", profile.as_str());
        Self {
            commands,
            status,
            transport,
            profile,
        }
    }

    fn submit(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Coordinator has stopped, command dropped");
        }
    }

    pub fn profile(&self) -> DeviceProfile {
        self.profile
    }

    /// Prepare the service machinery. Until this runs, `service_state`
    /// reports `None`.
    pub fn setup_service(&self) {
        self.submit(Command::SetupService);
    }

    /// Start listening for incoming links. Ignored unless the state is `None`.
    pub fn start_service(&self, target: DeviceTarget) {
        self.submit(Command::StartService(target));
    }

    /// Stop the service and drop any link. Completes before the next
    /// command is processed.
    pub fn stop_service(&self) {
        self.submit(Command::StopService);
    }

    /// Restart the service for another kind of peer.
    pub fn set_device_target(&self, target: DeviceTarget) {
        self.submit(Command::SetDeviceTarget(target));
    }

    /// Connect to a peer, replacing any existing link.
    pub fn connect(&self, address: impl Into<PeerAddress>) {
        self.submit(Command::Connect(address.into()));
    }

    /// Drop the current link and go back to listening.
    pub fn disconnect(&self) {
        self.submit(Command::Disconnect);
    }

    /// Keep a link to any paired device whose name contains `keyword`.
    ///
    /// Ignored while auto-connect is already enabled.
    pub fn auto_connect(&self, keyword: &str) {
        self.submit(Command::AutoConnect(keyword.to_string()));
    }

    /// Disable auto-connect. An active link is kept.
    pub fn stop_auto_connect(&self) {
        self.submit(Command::StopAutoConnect);
    }

    pub fn set_state_listener(&self, listener: Arc<dyn StateListener>) {
        self.submit(Command::SetStateListener(listener));
    }

    pub fn set_data_listener(&self, listener: Arc<dyn DataListener>) {
        self.submit(Command::SetDataListener(listener));
    }

    /// Set the application's connection listener. It keeps receiving events
    /// while auto-connect is enabled.
    pub fn set_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.submit(Command::SetConnectionListener(listener));
    }

    pub fn set_auto_connection_listener(&self, listener: Arc<dyn AutoConnectionListener>) {
        self.submit(Command::SetAutoConnectionListener(listener));
    }

    /// Send a framed payload. Silently dropped unless connected.
    pub async fn send(&self, data: &[u8]) {
        self.write(frame::encode(self.profile, data)).await;
    }

    /// Send text as-is, without framing. Silently dropped unless connected.
    pub async fn send_text(&self, text: &str) {
        self.write(frame::encode_text(text)).await;
    }

    async fn write(&self, bytes: Vec<u8>) {
        let Some(writer) = self.status.connected_writer() else {
            debug!("Not connected, dropping {} bytes", bytes.len());
            return;
        };
        if let Err(e) = writer.write(&bytes).await {
            warn!("Write failed: {}", e);
        }
    }

    /// Current state, or `None` before `setup_service`.
    pub fn service_state(&self) -> Option<ConnectionState> {
        self.status.state()
    }

    pub fn is_service_available(&self) -> bool {
        self.status.state().is_some()
    }

    pub fn is_auto_connect_enabled(&self) -> bool {
        self.status.read().auto_enabled
    }

    /// Whether auto-connect is waiting on one of its own attempts.
    pub fn is_auto_connecting(&self) -> bool {
        self.status.read().auto_connecting
    }

    pub fn connected_device_name(&self) -> Option<String> {
        self.status.read().device.map(|d| d.name)
    }

    pub fn connected_device_address(&self) -> Option<PeerAddress> {
        self.status.read().device.map(|d| d.address)
    }

    pub async fn is_bluetooth_available(&self) -> bool {
        self.transport.is_available().await
    }

    pub async fn is_bluetooth_enabled(&self) -> bool {
        self.transport.is_enabled().await.unwrap_or(false)
    }

    /// Power on the adapter.
    pub async fn enable(&self) -> Result<(), LinkError> {
        self.transport.enable().await
    }

    pub async fn paired_devices(&self) -> Result<Vec<PeerDescriptor>, LinkError> {
        self.transport.paired_devices().await
    }

    pub async fn paired_device_names(&self) -> Result<Vec<String>, LinkError> {
        Ok(self.paired_devices().await?.into_iter().map(|d| d.name).collect())
    }

    pub async fn paired_device_addresses(&self) -> Result<Vec<PeerAddress>, LinkError> {
        Ok(self
            .paired_devices()
            .await?
            .into_iter()
            .map(|d| d.address)
            .collect())
    }

    /// Wait until every command submitted before this call has been handled.
    pub async fn settle(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Settle(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Stop the service and end the coordination task.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

/// What to do after a state transition has been dispatched.
enum FollowUp {
    Nothing,
    /// Auto-connect picked the next candidate after a failure.
    Retry(PeerDescriptor),
    /// The link was lost while auto-connect was enabled.
    Rearm,
}

/// State owned by the coordination task.
struct Coordinator {
    transport: Arc<dyn Transport>,
    status: Arc<SharedStatus>,
    session_tx: mpsc::UnboundedSender<TaggedEvent>,
    session: Option<Session>,
    next_generation: u64,
    configured: bool,
    running: bool,
    state: ConnectionState,
    target: DeviceTarget,
    listeners: Listeners,
    auto: Option<AutoReconnect>,
}

impl Coordinator {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut session_rx: mpsc::UnboundedReceiver<TaggedEvent>,
    ) {
        debug!("Coordinator started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(ack)) => {
                        self.stop_service().await;
                        let _ = ack.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.stop_service().await;
                        break;
                    }
                },
                Some((generation, event)) = session_rx.recv() => {
                    self.handle_session_event(generation, event).await;
                }
            }
        }

        info!("Coordinator stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetupService => {
                if !self.configured {
                    self.configured = true;
                    self.status.update(|s| s.state = Some(ConnectionState::None));
                    info!("Service set up");
                }
            }
            Command::StartService(target) => self.start_service(target),
            Command::StopService => self.stop_service().await,
            Command::SetDeviceTarget(target) => {
                self.stop_service().await;
                self.start_service(target);
            }
            Command::Connect(address) => self.connect_to(address).await,
            Command::Disconnect => self.disconnect().await,
            Command::AutoConnect(keyword) => {
                self.start_auto(&keyword, true).await;
            }
            Command::StopAutoConnect => {
                if self.auto.take().is_some() {
                    info!("Auto-connect stopped");
                    self.publish_auto();
                }
            }
            Command::SetStateListener(l) => self.listeners.state = Some(l),
            Command::SetDataListener(l) => self.listeners.data = Some(l),
            Command::SetConnectionListener(l) => self.listeners.connection = Some(l),
            Command::SetAutoConnectionListener(l) => self.listeners.auto_connection = Some(l),
            Command::Settle(ack) | Command::Shutdown(ack) => {
                let _ = ack.send(());
            }
        }
    }

    async fn handle_session_event(&mut self, generation: u64, event: SessionEvent) {
        if self.session.as_ref().map(Session::generation) != Some(generation) {
            debug!("Dropping event from stale session {}", generation);
            return;
        }

        match event {
            SessionEvent::Connected(peer) => {
                let writer = self.session.as_ref().map(Session::writer);
                let device = peer.clone();
                self.status.update(|s| {
                    s.device = Some(device);
                    s.writer = writer;
                });
                self.set_state(ConnectionState::Connected);
                info!("Device connected: {} ({})", peer.name, peer.address);

                if let Some(auto) = &mut self.auto {
                    auto.set_attempting(false);
                }
                self.publish_auto();
                self.listeners.connected(&peer.name, peer.address.as_str());
            }
            SessionEvent::Data(bytes) => {
                debug!("Forwarding {} bytes", bytes.len());
                self.listeners.data(&bytes);
            }
            SessionEvent::ConnectFailed(e) | SessionEvent::Lost(e) => {
                self.close_session().await;
                self.listeners.error(&e);
                let follow_up = self.set_state(ConnectionState::None);
                self.apply(follow_up).await;
            }
            SessionEvent::ListenFailed(e) => {
                self.close_session().await;
                self.listeners.error(&e);
                self.set_state(ConnectionState::None);
            }
        }
    }

    /// Record a new state and dispatch the notifications it implies.
    fn set_state(&mut self, new: ConnectionState) -> FollowUp {
        let prev = self.state;
        self.state = new;
        self.status.update(|s| s.state = Some(new));
        debug!("State {} -> {}", prev, new);
        self.listeners.state_changed(new);

        let mut follow_up = FollowUp::Nothing;

        if prev == ConnectionState::Connected && new != ConnectionState::Connected {
            info!("Device disconnected");
            self.status.update(|s| {
                s.device = None;
                s.writer = None;
            });
            self.listeners.disconnected();
            if self.auto.is_some() {
                follow_up = FollowUp::Rearm;
            }
        }

        if prev == ConnectionState::Connecting
            && new != ConnectionState::Connected
            && new != ConnectionState::Connecting
        {
            follow_up = self.connection_failed();
        }

        follow_up
    }

    fn connection_failed(&mut self) -> FollowUp {
        let running = self.running;
        let follow_up = match &mut self.auto {
            None => {
                self.listeners.connection_failed();
                FollowUp::Nothing
            }
            Some(auto) if running => {
                auto.set_attempting(true);
                FollowUp::Retry(auto.advance().clone())
            }
            Some(auto) => {
                auto.set_attempting(false);
                FollowUp::Nothing
            }
        };
        self.publish_auto();
        follow_up
    }

    async fn apply(&mut self, follow_up: FollowUp) {
        match follow_up {
            FollowUp::Retry(peer) => {
                info!("Auto-connect retrying with {} ({})", peer.name, peer.address);
                self.connect_to(peer.address.clone()).await;
                self.listeners
                    .new_connection(&peer.name, peer.address.as_str());
                self.listeners.connection_failed();
                return;
            }
            FollowUp::Rearm if self.running => {
                if self.rearm(true).await {
                    return;
                }
            }
            FollowUp::Rearm | FollowUp::Nothing => {}
        }

        if self.running && self.state == ConnectionState::None {
            self.start_listening();
        }
    }

    fn start_service(&mut self, target: DeviceTarget) {
        if !self.configured {
            warn!("start_service called before setup_service");
            return;
        }
        if self.state != ConnectionState::None {
            debug!("Service already active ({})", self.state);
            return;
        }
        info!("Starting service for {:?} peers", target);
        self.running = true;
        self.target = target;
        self.start_listening();
    }

    async fn stop_service(&mut self) {
        if !self.configured {
            return;
        }
        self.running = false;
        self.close_session().await;
        if self.state != ConnectionState::None {
            // Not running: a re-arm refreshes the candidates without connecting.
            if let FollowUp::Rearm = self.set_state(ConnectionState::None) {
                self.rearm(false).await;
            }
        }
        info!("Service stopped");
    }

    async fn disconnect(&mut self) {
        if !self.configured {
            return;
        }
        self.stop_service().await;
        self.running = true;
        self.start_listening();
    }

    fn start_listening(&mut self) {
        let generation = self.next_generation();
        self.session = Some(Session::spawn(
            self.transport.clone(),
            SessionMode::Accept,
            self.target,
            generation,
            self.session_tx.clone(),
        ));
        self.set_state(ConnectionState::Listening);
    }

    async fn connect_to(&mut self, address: PeerAddress) {
        if !self.configured {
            warn!("connect called before setup_service");
            return;
        }
        self.close_session().await;

        let generation = self.next_generation();
        self.session = Some(Session::spawn(
            self.transport.clone(),
            SessionMode::Connect(address),
            self.target,
            generation,
            self.session_tx.clone(),
        ));
        // A replaced link reports its disconnect here; the new attempt
        // supersedes any re-arm.
        self.set_state(ConnectionState::Connecting);
    }

    /// Enable auto-connect. Returns whether a connect attempt was issued.
    ///
    /// With `may_connect` unset the candidates are snapshotted but no
    /// attempt is made.
    async fn start_auto(&mut self, keyword: &str, may_connect: bool) -> bool {
        if !self.configured {
            warn!("auto_connect called before setup_service");
            return false;
        }
        if self.auto.is_some() {
            debug!("Auto-connect already enabled");
            return false;
        }

        let paired = match self.transport.paired_devices().await {
            Ok(paired) => paired,
            Err(e) => {
                error!("Failed to list paired devices: {}", e);
                self.listeners.error(&e);
                return false;
            }
        };

        let mut auto = match AutoReconnect::new(keyword, &paired) {
            Ok(auto) => auto,
            Err(e) => {
                warn!("{}", e);
                self.listeners.device_not_found(keyword);
                return false;
            }
        };

        info!(
            "Auto-connect enabled for '{}' ({} candidates)",
            keyword,
            auto.candidates().len()
        );
        self.listeners.auto_started();

        let first = auto.current().clone();
        let attempt = may_connect && self.state != ConnectionState::Connected;
        auto.set_attempting(attempt);
        self.auto = Some(auto);
        self.publish_auto();

        if attempt {
            self.listeners
                .new_connection(&first.name, first.address.as_str());
            self.connect_to(first.address).await;
        }
        attempt
    }

    /// Restart auto-connect with a fresh snapshot of paired devices.
    async fn rearm(&mut self, may_connect: bool) -> bool {
        let Some(auto) = self.auto.take() else {
            return false;
        };
        self.publish_auto();
        debug!("Re-arming auto-connect for '{}'", auto.keyword());
        self.start_auto(auto.keyword(), may_connect).await
    }

    fn publish_auto(&self) {
        let enabled = self.auto.is_some();
        let attempting = self.auto.as_ref().map_or(false, AutoReconnect::is_attempting);
        self.status.update(|s| {
            s.auto_enabled = enabled;
            s.auto_connecting = attempting;
        });
    }

    async fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        self.status.update(|s| s.writer = None);
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}
