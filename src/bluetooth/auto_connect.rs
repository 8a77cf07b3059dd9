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

//! Keyword based auto-reconnect candidate rotation.

use tracing::debug;

use super::error::LinkError;
use super::transport::PeerDescriptor;

/// Active auto-reconnect session.
///
/// Never holds an empty candidate list, so `cursor` always indexes a
/// candidate.
#[derive(Debug, Clone)]
pub struct AutoReconnect {
    keyword: String,
    candidates: Vec<PeerDescriptor>,
    cursor: usize,
    attempting: bool,
}

impl AutoReconnect {
    /// Filter paired devices whose name contains `keyword`.
    ///
    /// Matching is a case-sensitive substring test.
    pub fn new(keyword: &str, paired: &[PeerDescriptor]) -> Result<Self, LinkError> {
        let candidates: Vec<PeerDescriptor> = paired
            .iter()
            .filter(|device| device.name.contains(keyword))
            .cloned()
            .collect();

        if candidates.is_empty() {
            return Err(LinkError::DeviceNotFound(keyword.to_string()));
        }

        debug!(
            "Auto-connect keyword '{}' matched {} of {} paired devices",
            keyword,
            candidates.len(),
            paired.len()
        );

        Ok(Self {
            keyword: keyword.to_string(),
            candidates,
            cursor: 0,
            attempting: false,
        })
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn candidates(&self) -> &[PeerDescriptor] {
        &self.candidates
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Candidate under the cursor.
    pub fn current(&self) -> &PeerDescriptor {
        &self.candidates[self.cursor]
    }

    /// Move to the next candidate, wrapping around, and return it.
    pub fn advance(&mut self) -> &PeerDescriptor {
        self.cursor = (self.cursor + 1) % self.candidates.len();
        &self.candidates[self.cursor]
    }

    pub fn is_attempting(&self) -> bool {
        self.attempting
    }

    pub fn set_attempting(&mut self, attempting: bool) {
        self.attempting = attempting;
    }
}
