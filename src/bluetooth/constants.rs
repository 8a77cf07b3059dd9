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

//! RFCOMM service UUIDs and link constants.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standard SPP UUID, used when talking to non-Android peers.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Service UUID used between two Android devices running the same app.
pub const ANDROID_UUID: Uuid = Uuid::from_u128(0xfa87c0d0_afac_11de_8a39_0800200c9a66);

/// Service name registered with SDP.
pub const SERVICE_NAME: &str = "Bluetooth Secure";

/// Size of the read buffer used by a session's read loop.
pub const READ_BUFFER_SIZE: usize = 1024;

/// Framing bytes for outgoing frames.
pub mod framing {
    /// Carriage return + line feed terminator.
    pub const CRLF: &[u8] = b"\r\n";
    /// Prefix expected by hand-held readers.
    pub const HAND_READER_PREFIX: &[u8] = b"$:";
}

/// Kind of peer the service listens for and connects to.
///
/// Selects the RFCOMM service UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceTarget {
    /// Another Android device running a compatible app.
    Android,
    /// Any other serial port profile device.
    #[default]
    Other,
}

impl DeviceTarget {
    /// RFCOMM service UUID for this target.
    pub fn service_uuid(&self) -> Uuid {
        match self {
            DeviceTarget::Android => ANDROID_UUID,
            DeviceTarget::Other => SPP_UUID,
        }
    }
}
