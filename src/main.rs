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

//! SPP link command-line companion.
//!
//! Connects to a peer (or auto-connects by keyword), sends each stdin line
//! as a frame and logs what the peer sends back.

use anyhow::{bail, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spp_link::bluetooth::BluezTransport;
use spp_link::config::Config;
use spp_link::{EventForwarder, LinkEvent, SppClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("spp_link=info".parse()?),
        )
        .init();

    info!("Starting spp-link v{}...", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    info!("Configuration loaded");

    let transport = Arc::new(BluezTransport::new().await?);
    let client = SppClient::new(transport, config.bluetooth.device_profile);

    if !client.is_bluetooth_available().await {
        bail!("Bluetooth is not available");
    }
    if !client.is_bluetooth_enabled().await {
        client.enable().await?;
    }

    let (forwarder, mut events) = EventForwarder::new();
    client.set_state_listener(forwarder.clone());
    client.set_data_listener(forwarder.clone());
    client.set_connection_listener(forwarder.clone());
    client.set_auto_connection_listener(forwarder);

    client.setup_service();
    client.start_service(config.bluetooth.device_target);

    let peer = std::env::args().nth(1).or(config.bluetooth.peer_address.clone());
    match (&config.bluetooth.auto_connect_keyword, peer) {
        (Some(keyword), _) => client.auto_connect(keyword),
        (None, Some(address)) => client.connect(address),
        (None, None) => info!("No peer configured, waiting for incoming connections"),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            Some(event) = events.recv() => match event {
                LinkEvent::DataReceived(data) => {
                    info!("Received: {}", String::from_utf8_lossy(&data).trim_end());
                }
                LinkEvent::DeviceConnected { name, address } => {
                    info!("Connected to {} ({})", name, address);
                }
                LinkEvent::StateChanged(state) => {
                    info!("State: {} ({})", state, state.as_code());
                }
                LinkEvent::Error(e) => warn!("{}", e),
                LinkEvent::DeviceNotFound(keyword) => {
                    error!("No paired device matches '{}'", keyword);
                }
                other => info!("{:?}", other),
            },
            line = lines.next_line() => match line? {
                Some(line) => client.send(line.as_bytes()).await,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    client.shutdown().await;
    info!("spp-link stopped");
    Ok(())
}
