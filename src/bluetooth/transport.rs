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

//! Transport trait over the platform Bluetooth stack.
//!
//! The BlueZ implementation lives in `bluez.rs`, the in-process one used by
//! tests in `simulated.rs`.

use async_trait::async_trait;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

use super::constants::DeviceTarget;
use super::error::LinkError;

/// Remote device address, e.g. `"00:11:22:33:44:55"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PeerAddress {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A paired device as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDescriptor {
    pub name: String,
    pub address: PeerAddress,
}

impl PeerDescriptor {
    pub fn new(name: impl Into<String>, address: impl Into<PeerAddress>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Bidirectional byte stream of an established link.
pub trait LinkStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> LinkStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Owned link stream.
pub type BoxedStream = Box<dyn LinkStream>;

/// Platform Bluetooth stack.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Whether a Bluetooth adapter exists at all.
    async fn is_available(&self) -> bool;

    /// Whether the adapter radio is powered.
    async fn is_enabled(&self) -> Result<bool, LinkError>;

    /// Power on the adapter radio.
    async fn enable(&self) -> Result<(), LinkError>;

    /// Snapshot of the devices currently paired with the adapter.
    async fn paired_devices(&self) -> Result<Vec<PeerDescriptor>, LinkError>;

    /// Open an outgoing link to `address`.
    ///
    /// Cancelled by dropping the returned future.
    async fn connect(
        &self,
        address: &PeerAddress,
        target: DeviceTarget,
    ) -> Result<(PeerDescriptor, BoxedStream), LinkError>;

    /// Wait for one incoming link.
    ///
    /// Cancelled by dropping the returned future.
    async fn accept(&self, target: DeviceTarget) -> Result<(PeerDescriptor, BoxedStream), LinkError>;
}
