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

//! Connection state and the snapshot published to callers.

use parking_lot::RwLock;
use std::fmt;

use crate::bluetooth::{PeerDescriptor, SessionWriter};

/// Service connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing running.
    None,
    /// Waiting for an incoming link.
    Listening,
    /// Outgoing connect in progress.
    Connecting,
    /// Link established.
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::None => "None",
            ConnectionState::Listening => "Listening",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Connected => "Connected",
        }
    }

    /// Classic integer code (0 = none, 1 = listen, 2 = connecting, 3 = connected).
    pub fn as_code(&self) -> i32 {
        match self {
            ConnectionState::None => 0,
            ConnectionState::Listening => 1,
            ConnectionState::Connecting => 2,
            ConnectionState::Connected => 3,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values readable from any thread. Written only by the coordination task.
#[derive(Clone, Default)]
pub(crate) struct Status {
    /// `None` until the service has been set up.
    pub state: Option<ConnectionState>,
    pub device: Option<PeerDescriptor>,
    pub writer: Option<SessionWriter>,
    pub auto_enabled: bool,
    pub auto_connecting: bool,
}

/// Shared status snapshot.
#[derive(Default)]
pub(crate) struct SharedStatus {
    inner: RwLock<Status>,
}

impl SharedStatus {
    pub fn read(&self) -> Status {
        self.inner.read().clone()
    }

    pub fn state(&self) -> Option<ConnectionState> {
        self.inner.read().state
    }

    pub fn update(&self, f: impl FnOnce(&mut Status)) {
        let mut status = self.inner.write();
        f(&mut *status);
    }

    /// Writer of the active link, if the service is connected.
    pub fn connected_writer(&self) -> Option<SessionWriter> {
        let status = self.inner.read();
        match status.state {
            Some(ConnectionState::Connected) => status.writer.clone(),
            _ => None,
        }
    }
}
