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

//! Bluetooth link module.
//!
//! Transport abstraction, link sessions, outgoing framing and the
//! auto-reconnect candidate rotation.

mod auto_connect;
#[cfg(feature = "bluez")]
mod bluez;
mod constants;
mod error;
pub mod frame;
mod session;
pub mod simulated;
mod transport;

pub use auto_connect::AutoReconnect;
#[cfg(feature = "bluez")]
pub use bluez::BluezTransport;
pub use constants::{framing, DeviceTarget, ANDROID_UUID, READ_BUFFER_SIZE, SERVICE_NAME, SPP_UUID};
pub use error::LinkError;
pub use frame::DeviceProfile;
pub use session::{Session, SessionEvent, SessionMode, SessionWriter, TaggedEvent};
pub use simulated::{SimPeer, SimTransport};
pub use transport::{BoxedStream, LinkStream, PeerAddress, PeerDescriptor, Transport};
