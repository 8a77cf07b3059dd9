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

//! Outgoing frame encoding.
//!
//! Only the send direction is framed. Received bytes are handed to the
//! application exactly as the transport delivers them.

use serde::{Deserialize, Serialize};

use super::constants::framing::{CRLF, HAND_READER_PREFIX};

/// Classification of the remote device, selecting the frame prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceProfile {
    /// Plain serial peer.
    #[default]
    Generic,
    /// Hand-held reader that expects a `$:` prefix on every command.
    HandReader,
}

impl DeviceProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceProfile::Generic => "generic",
            DeviceProfile::HandReader => "hand_reader",
        }
    }

    fn prefix(&self) -> &'static [u8] {
        match self {
            DeviceProfile::Generic => &[],
            DeviceProfile::HandReader => HAND_READER_PREFIX,
        }
    }
}

/// Build the frame written for a byte payload.
pub fn encode(profile: DeviceProfile, payload: &[u8]) -> Vec<u8> {
    let prefix = profile.prefix();
    let mut frame = Vec::with_capacity(prefix.len() + payload.len() + CRLF.len());
    frame.extend_from_slice(prefix);
    frame.extend_from_slice(payload);
    frame.extend_from_slice(CRLF);
    frame
}

/// Text sends are written unmodified: no prefix, no terminator.
pub fn encode_text(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}
