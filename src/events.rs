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

//! Listener callbacks and event forwarding.
//!
//! Listeners are invoked from the coordination task only, one call at a
//! time. They must not block.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::bluetooth::LinkError;
use crate::state::ConnectionState;

/// Receives service state changes.
pub trait StateListener: Send + Sync {
    fn on_service_state_changed(&self, state: ConnectionState);

    /// Failure worth surfacing to the user.
    fn on_error(&self, _error: &LinkError) {}
}

/// Receives raw chunks read from the link.
pub trait DataListener: Send + Sync {
    fn on_data_received(&self, data: &[u8], length: usize);
}

/// Receives connection lifecycle events.
pub trait ConnectionListener: Send + Sync {
    fn on_device_connected(&self, name: &str, address: &str);
    fn on_device_disconnected(&self);
    fn on_device_connection_failed(&self);
}

/// Receives auto-reconnect progress.
pub trait AutoConnectionListener: Send + Sync {
    fn on_auto_connection_started(&self);
    fn on_new_connection(&self, name: &str, address: &str);

    /// No paired device matched the keyword.
    fn on_device_not_found(&self, _keyword: &str) {}
}

/// Listener slots held by the coordinator.
#[derive(Default, Clone)]
pub(crate) struct Listeners {
    pub state: Option<Arc<dyn StateListener>>,
    pub data: Option<Arc<dyn DataListener>>,
    pub connection: Option<Arc<dyn ConnectionListener>>,
    pub auto_connection: Option<Arc<dyn AutoConnectionListener>>,
}

impl Listeners {
    pub fn state_changed(&self, state: ConnectionState) {
        if let Some(l) = &self.state {
            l.on_service_state_changed(state);
        }
    }

    pub fn error(&self, error: &LinkError) {
        if let Some(l) = &self.state {
            l.on_error(error);
        }
    }

    pub fn data(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if let Some(l) = &self.data {
            l.on_data_received(data, data.len());
        }
    }

    pub fn connected(&self, name: &str, address: &str) {
        if let Some(l) = &self.connection {
            l.on_device_connected(name, address);
        }
    }

    pub fn disconnected(&self) {
        if let Some(l) = &self.connection {
            l.on_device_disconnected();
        }
    }

    pub fn connection_failed(&self) {
        if let Some(l) = &self.connection {
            l.on_device_connection_failed();
        }
    }

    pub fn auto_started(&self) {
        if let Some(l) = &self.auto_connection {
            l.on_auto_connection_started();
        }
    }

    pub fn new_connection(&self, name: &str, address: &str) {
        if let Some(l) = &self.auto_connection {
            l.on_new_connection(name, address);
        }
    }

    pub fn device_not_found(&self, keyword: &str) {
        if let Some(l) = &self.auto_connection {
            l.on_device_not_found(keyword);
        }
    }
}

/// Everything a listener can observe, as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    StateChanged(ConnectionState),
    Error(LinkError),
    DataReceived(Vec<u8>),
    DeviceConnected { name: String, address: String },
    DeviceDisconnected,
    DeviceConnectionFailed,
    AutoConnectionStarted,
    NewConnection { name: String, address: String },
    DeviceNotFound(String),
}

/// Listener that forwards every callback into a channel.
///
/// Register one instance for any combination of listener slots.
#[derive(Clone)]
pub struct EventForwarder {
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl EventForwarder {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn emit(&self, event: LinkEvent) {
        let _ = self.tx.send(event);
    }
}

impl StateListener for EventForwarder {
    fn on_service_state_changed(&self, state: ConnectionState) {
        self.emit(LinkEvent::StateChanged(state));
    }

    fn on_error(&self, error: &LinkError) {
        self.emit(LinkEvent::Error(error.clone()));
    }
}

impl DataListener for EventForwarder {
    fn on_data_received(&self, data: &[u8], length: usize) {
        self.emit(LinkEvent::DataReceived(data[..length].to_vec()));
    }
}

impl ConnectionListener for EventForwarder {
    fn on_device_connected(&self, name: &str, address: &str) {
        self.emit(LinkEvent::DeviceConnected {
            name: name.to_string(),
            address: address.to_string(),
        });
    }

    fn on_device_disconnected(&self) {
        self.emit(LinkEvent::DeviceDisconnected);
    }

    fn on_device_connection_failed(&self) {
        self.emit(LinkEvent::DeviceConnectionFailed);
    }
}

impl AutoConnectionListener for EventForwarder {
    fn on_auto_connection_started(&self) {
        self.emit(LinkEvent::AutoConnectionStarted);
    }

    fn on_new_connection(&self, name: &str, address: &str) {
        self.emit(LinkEvent::NewConnection {
            name: name.to_string(),
            address: address.to_string(),
        });
    }

    fn on_device_not_found(&self, keyword: &str) {
        self.emit(LinkEvent::DeviceNotFound(keyword.to_string()));
    }
}
