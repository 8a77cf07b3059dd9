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

//! In-process transport.
//!
//! Peers are backed by `tokio::io::duplex` pipes, so links can be driven
//! from tests without Bluetooth hardware. Every link handed to the
//! coordinator is counted while alive.

use async_trait::async_trait;
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;
use tracing::debug;

use super::constants::DeviceTarget;
use super::error::LinkError;
use super::transport::{BoxedStream, PeerAddress, PeerDescriptor, Transport};

const PIPE_CAPACITY: usize = 4096;

/// Open link counters shared between the transport and its links.
#[derive(Debug, Default)]
struct LinkCounters {
    open: AtomicUsize,
    max_open: AtomicUsize,
}

impl LinkCounters {
    fn opened(&self) {
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

pin_project! {
    /// Local end of a simulated link.
    pub struct SimLink {
        #[pin]
        inner: DuplexStream,
        counters: Arc<LinkCounters>,
    }

    impl PinnedDrop for SimLink {
        fn drop(this: Pin<&mut Self>) {
            this.counters.closed();
        }
    }
}

impl SimLink {
    fn new(inner: DuplexStream, counters: Arc<LinkCounters>) -> Self {
        counters.opened();
        Self { inner, counters }
    }
}

impl AsyncRead for SimLink {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().inner.poll_read(cx, buf)
    }
}

impl AsyncWrite for SimLink {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

/// Remote side of a simulated peer.
///
/// Receives the far end of every link the coordinator opens to this peer.
pub struct SimPeer {
    pub descriptor: PeerDescriptor,
    links: mpsc::UnboundedReceiver<DuplexStream>,
}

impl SimPeer {
    /// Wait for the next link opened to this peer.
    pub async fn next_link(&mut self) -> Option<DuplexStream> {
        self.links.recv().await
    }
}

#[derive(Default)]
struct SimState {
    paired: Vec<PeerDescriptor>,
    reachable: HashMap<PeerAddress, mpsc::UnboundedSender<DuplexStream>>,
    hanging: Vec<PeerAddress>,
    attempts: Vec<PeerAddress>,
}

/// Simulated Bluetooth stack.
pub struct SimTransport {
    state: Mutex<SimState>,
    available: AtomicBool,
    enabled: AtomicBool,
    counters: Arc<LinkCounters>,
    incoming_tx: mpsc::UnboundedSender<(PeerDescriptor, DuplexStream)>,
    incoming_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(PeerDescriptor, DuplexStream)>>,
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTransport {
    /// Create a powered simulated adapter with no paired devices.
    pub fn new() -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(SimState::default()),
            available: AtomicBool::new(true),
            enabled: AtomicBool::new(true),
            counters: Arc::new(LinkCounters::default()),
            incoming_tx,
            incoming_rx: tokio::sync::Mutex::new(incoming_rx),
        }
    }

    /// Pair a reachable peer.
    pub fn add_peer(&self, name: &str, address: &str) -> SimPeer {
        let descriptor = PeerDescriptor::new(name, address);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.paired.push(descriptor.clone());
        state.reachable.insert(descriptor.address.clone(), tx);
        SimPeer {
            descriptor,
            links: rx,
        }
    }

    /// Pair a peer that refuses every connection.
    pub fn add_unreachable_peer(&self, name: &str, address: &str) {
        self.state.lock().paired.push(PeerDescriptor::new(name, address));
    }

    /// Pair a peer whose connect call never completes.
    pub fn add_hanging_peer(&self, name: &str, address: &str) {
        let descriptor = PeerDescriptor::new(name, address);
        let mut state = self.state.lock();
        state.hanging.push(descriptor.address.clone());
        state.paired.push(descriptor);
    }

    /// Simulate a remote device connecting to the listening service.
    ///
    /// Returns the remote end of the link.
    pub fn incoming(&self, name: &str, address: &str) -> DuplexStream {
        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        let _ = self
            .incoming_tx
            .send((PeerDescriptor::new(name, address), local));
        remote
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Addresses passed to `connect`, in order.
    pub fn connect_attempts(&self) -> Vec<PeerAddress> {
        self.state.lock().attempts.clone()
    }

    /// Links currently held open by the local side.
    pub fn open_links(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open links seen so far.
    pub fn max_open_links(&self) -> usize {
        self.counters.max_open.load(Ordering::SeqCst)
    }

    fn descriptor_for(state: &SimState, address: &PeerAddress) -> PeerDescriptor {
        state
            .paired
            .iter()
            .find(|d| &d.address == address)
            .cloned()
            .unwrap_or_else(|| PeerDescriptor::new(address.as_str(), address.clone()))
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn is_enabled(&self) -> Result<bool, LinkError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(LinkError::AdapterUnavailable);
        }
        Ok(self.enabled.load(Ordering::SeqCst))
    }

    async fn enable(&self) -> Result<(), LinkError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(LinkError::AdapterUnavailable);
        }
        self.enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn paired_devices(&self) -> Result<Vec<PeerDescriptor>, LinkError> {
        Ok(self.state.lock().paired.clone())
    }

    async fn connect(
        &self,
        address: &PeerAddress,
        target: DeviceTarget,
    ) -> Result<(PeerDescriptor, BoxedStream), LinkError> {
        debug!("Simulated connect to {} ({:?})", address, target);

        let (descriptor, sender, hangs) = {
            let mut state = self.state.lock();
            state.attempts.push(address.clone());
            (
                Self::descriptor_for(&state, address),
                state.reachable.get(address).cloned(),
                state.hanging.contains(address),
            )
        };

        if hangs {
            futures::future::pending::<()>().await;
        }

        let sender = sender.ok_or_else(|| LinkError::ConnectFailed(address.to_string()))?;
        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        sender
            .send(remote)
            .map_err(|_| LinkError::ConnectFailed(address.to_string()))?;

        let link = SimLink::new(local, self.counters.clone());
        Ok((descriptor, Box::new(link)))
    }

    async fn accept(&self, target: DeviceTarget) -> Result<(PeerDescriptor, BoxedStream), LinkError> {
        debug!("Simulated accept ({:?})", target);
        let mut incoming = self.incoming_rx.lock().await;
        match incoming.recv().await {
            Some((descriptor, local)) => {
                let link = SimLink::new(local, self.counters.clone());
                Ok((descriptor, Box::new(link)))
            }
            None => Err(LinkError::Transport("incoming queue closed".to_string())),
        }
    }
}
