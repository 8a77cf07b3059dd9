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

//! BlueZ transport using RFCOMM profiles.

use async_trait::async_trait;
use bluer::rfcomm::{Profile, ProfileHandle, ReqError, Role};
use bluer::{Adapter, Address, Session};
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::constants::{DeviceTarget, SERVICE_NAME};
use super::error::LinkError;
use super::transport::{BoxedStream, PeerAddress, PeerDescriptor, Transport};

fn transport_err(e: bluer::Error) -> LinkError {
    LinkError::Transport(e.to_string())
}

/// Transport backed by the system's default BlueZ adapter.
pub struct BluezTransport {
    session: Session,
    adapter: Adapter,
}

impl BluezTransport {
    /// Open a BlueZ session on the default adapter.
    pub async fn new() -> Result<Self, LinkError> {
        info!("Initializing BlueZ transport...");

        let session = Session::new().await.map_err(transport_err)?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|_| LinkError::AdapterUnavailable)?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        Ok(Self { session, adapter })
    }

    fn profile(target: DeviceTarget, role: Role) -> Profile {
        Profile {
            uuid: target.service_uuid(),
            name: Some(SERVICE_NAME.to_string()),
            role: Some(role),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        }
    }

    async fn register(&self, target: DeviceTarget, role: Role) -> Result<ProfileHandle, LinkError> {
        self.session
            .register_profile(Self::profile(target, role))
            .await
            .map_err(transport_err)
    }

    async fn descriptor(&self, address: Address) -> PeerDescriptor {
        let name = match self.adapter.device(address) {
            Ok(device) => device
                .alias()
                .await
                .unwrap_or_else(|_| address.to_string()),
            Err(_) => address.to_string(),
        };
        PeerDescriptor::new(name, address.to_string())
    }
}

#[async_trait]
impl Transport for BluezTransport {
    async fn is_available(&self) -> bool {
        self.adapter.address().await.is_ok()
    }

    async fn is_enabled(&self) -> Result<bool, LinkError> {
        self.adapter.is_powered().await.map_err(transport_err)
    }

    async fn enable(&self) -> Result<(), LinkError> {
        info!("Powering on Bluetooth adapter...");
        self.adapter.set_powered(true).await.map_err(transport_err)
    }

    async fn paired_devices(&self) -> Result<Vec<PeerDescriptor>, LinkError> {
        let mut devices = Vec::new();

        for addr in self.adapter.device_addresses().await.map_err(transport_err)? {
            let device = self.adapter.device(addr).map_err(transport_err)?;
            if device.is_paired().await.map_err(transport_err)? {
                let name = device.alias().await.unwrap_or_else(|_| addr.to_string());
                devices.push(PeerDescriptor::new(name, addr.to_string()));
            }
        }

        Ok(devices)
    }

    async fn connect(
        &self,
        address: &PeerAddress,
        target: DeviceTarget,
    ) -> Result<(PeerDescriptor, BoxedStream), LinkError> {
        if !self.is_enabled().await? {
            return Err(LinkError::AdapterDisabled);
        }

        let addr: Address = address
            .as_str()
            .parse()
            .map_err(|_| LinkError::ConnectFailed(format!("invalid address {}", address)))?;
        let device = self.adapter.device(addr).map_err(transport_err)?;
        let mut handle = self.register(target, Role::Client).await?;
        let uuid = target.service_uuid();

        debug!("Connecting profile {} on {}", uuid, addr);
        let connect = async {
            if !device.is_connected().await.unwrap_or(false) {
                device.connect().await?;
            }
            device.connect_profile(&uuid).await
        };
        tokio::pin!(connect);
        let mut connecting = true;

        loop {
            tokio::select! {
                result = &mut connect, if connecting => {
                    connecting = false;
                    if let Err(e) = result {
                        warn!("Profile connect to {} failed: {}", addr, e);
                        return Err(LinkError::ConnectFailed(e.to_string()));
                    }
                }
                request = handle.next() => {
                    let request = request
                        .ok_or_else(|| LinkError::ConnectFailed("profile unregistered".to_string()))?;
                    if request.device() != addr {
                        debug!("Rejecting unexpected link from {}", request.device());
                        request.reject(ReqError::Rejected);
                        continue;
                    }
                    let stream = request
                        .accept()
                        .map_err(|e| LinkError::ConnectFailed(e.to_string()))?;
                    return Ok((self.descriptor(addr).await, Box::new(stream)));
                }
            }
        }
    }

    async fn accept(&self, target: DeviceTarget) -> Result<(PeerDescriptor, BoxedStream), LinkError> {
        if !self.is_enabled().await? {
            return Err(LinkError::AdapterDisabled);
        }

        let mut handle = self.register(target, Role::Server).await?;
        info!("RFCOMM service {} registered", target.service_uuid());

        let request = handle
            .next()
            .await
            .ok_or_else(|| LinkError::Transport("profile unregistered".to_string()))?;
        let addr = request.device();
        info!("Connection from: {}", addr);

        let stream = request.accept().map_err(transport_err)?;
        Ok((self.descriptor(addr).await, Box::new(stream)))
    }
}
