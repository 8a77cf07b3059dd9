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

//! Link error taxonomy.

use thiserror::Error;

/// Errors reported by the transport and the link machinery.
///
/// Asynchronous failures reach the application through listener callbacks,
/// not through return values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Bluetooth is not available")]
    AdapterUnavailable,

    #[error("Bluetooth is disabled")]
    AdapterDisabled,

    #[error("Unable to connect device: {0}")]
    ConnectFailed(String),

    #[error("Device connection was lost: {0}")]
    StreamError(String),

    #[error("Device not found for keyword '{0}'")]
    DeviceNotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<std::io::Error> for LinkError {
    fn from(e: std::io::Error) -> Self {
        LinkError::StreamError(e.to_string())
    }
}
