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

//! Individual link session.
//!
//! A session owns one connect (or accept) attempt and, once established,
//! one read loop. It never touches the connection state itself; everything
//! it observes is posted to the coordinator as a [`SessionEvent`].

use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::constants::{DeviceTarget, READ_BUFFER_SIZE};
use super::error::LinkError;
use super::transport::{BoxedStream, PeerAddress, PeerDescriptor, Transport};

/// Upper bound on flushing the write half when a session closes.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

/// Events emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Link established.
    Connected(PeerDescriptor),
    /// Outgoing connect failed.
    ConnectFailed(LinkError),
    /// Waiting for an incoming link failed.
    ListenFailed(LinkError),
    /// Chunk received from the peer.
    Data(Vec<u8>),
    /// Link closed by the peer or broken.
    Lost(LinkError),
}

/// Session event tagged with the generation of the session that emitted it.
pub type TaggedEvent = (u64, SessionEvent);

/// How the session obtains its link.
#[derive(Debug, Clone)]
pub enum SessionMode {
    Connect(PeerAddress),
    Accept,
}

/// Write side of a session, shareable with callers on other tasks.
///
/// Closing wins over a pending write: a write blocked on a peer that stops
/// reading is cancelled and releases the write half.
#[derive(Clone)]
pub struct SessionWriter {
    half: Arc<Mutex<Option<WriteHalf<BoxedStream>>>>,
    closed: Arc<watch::Sender<bool>>,
}

impl SessionWriter {
    fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            half: Arc::new(Mutex::new(None)),
            closed: Arc::new(closed),
        }
    }

    async fn install(&self, half: WriteHalf<BoxedStream>) {
        *self.half.lock().await = Some(half);
    }

    /// Write the exact bytes given.
    pub async fn write(&self, bytes: &[u8]) -> Result<(), LinkError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(session_closed());
        }

        tokio::select! {
            result = self.write_locked(bytes) => result,
            _ = async { closed.wait_for(|closed| *closed).await.is_ok() } => {
                debug!("Pending write cancelled");
                Err(session_closed())
            }
        }
    }

    async fn write_locked(&self, bytes: &[u8]) -> Result<(), LinkError> {
        let mut guard = self.half.lock().await;
        let half = guard.as_mut().ok_or_else(session_closed)?;
        half.write_all(bytes).await?;
        half.flush().await?;
        Ok(())
    }

    /// Drop the write half. Idempotent.
    async fn close(&self) {
        // Cancels pending writes, so the lock below is always released.
        self.closed.send_replace(true);
        if let Some(mut half) = self.half.lock().await.take() {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, half.shutdown()).await;
        }
    }
}

fn session_closed() -> LinkError {
    LinkError::StreamError("session closed".to_string())
}

/// One connect-and-stream lifecycle.
pub struct Session {
    generation: u64,
    writer: SessionWriter,
    worker: JoinHandle<()>,
}

impl Session {
    /// Spawn the worker task for a new session.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        mode: SessionMode,
        target: DeviceTarget,
        generation: u64,
        events: mpsc::UnboundedSender<TaggedEvent>,
    ) -> Self {
        let writer = SessionWriter::new();
        let worker = tokio::spawn(Self::run(
            transport,
            mode,
            target,
            generation,
            writer.clone(),
            events,
        ));

        Self {
            generation,
            writer,
            worker,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn writer(&self) -> SessionWriter {
        self.writer.clone()
    }

    /// Tear the session down and wait until its worker has finished.
    ///
    /// Releases the link, which unblocks a pending connect or read.
    pub async fn close(self) {
        debug!("Closing session {}", self.generation);
        self.worker.abort();
        let _ = self.worker.await;
        self.writer.close().await;
    }

    async fn run(
        transport: Arc<dyn Transport>,
        mode: SessionMode,
        target: DeviceTarget,
        generation: u64,
        writer: SessionWriter,
        events: mpsc::UnboundedSender<TaggedEvent>,
    ) {
        let emit = |event: SessionEvent| {
            let _ = events.send((generation, event));
        };

        let (peer, stream) = match mode {
            SessionMode::Connect(address) => {
                info!("Connecting to {}", address);
                match transport.connect(&address, target).await {
                    Ok(link) => link,
                    Err(e) => {
                        warn!("Connect to {} failed: {}", address, e);
                        emit(SessionEvent::ConnectFailed(e));
                        return;
                    }
                }
            }
            SessionMode::Accept => {
                info!("Waiting for connections...");
                match transport.accept(target).await {
                    Ok(link) => link,
                    Err(e) => {
                        error!("Accept error: {}", e);
                        emit(SessionEvent::ListenFailed(e));
                        return;
                    }
                }
            }
        };

        info!("Link established with {} ({})", peer.name, peer.address);
        let (mut reader, write_half) = tokio::io::split(stream);
        writer.install(write_half).await;
        emit(SessionEvent::Connected(peer));

        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    info!("Connection closed by remote");
                    emit(SessionEvent::Lost(LinkError::StreamError(
                        "closed by remote".to_string(),
                    )));
                    break;
                }
                Ok(n) => {
                    debug!("Received {} bytes", n);
                    emit(SessionEvent::Data(buf[..n].to_vec()));
                }
                Err(e) => {
                    error!("Read error: {}", e);
                    emit(SessionEvent::Lost(e.into()));
                    break;
                }
            }
        }

        writer.close().await;
    }
}
