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

//! A single managed SPP connection.

use parking_lot::Mutex;
use std::io;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::decoder::{DecodeMode, Utf8Decoder};
use super::device::DeviceIdentity;
use super::events::SessionEventSink;
use super::inbound::{InboundEvent, InboundSender};
use super::transport::{BoxedStream, SppConnector};
use crate::error::SppError;

/// Default bound on a connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Default size of the reader's buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8192;

/// How long a user disconnect waits for an in-flight write before closing.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Per-session tunables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    pub read_buffer_size: usize,
    /// Start the reader as soon as the handshake completes.
    pub start_reader_immediately: bool,
    pub decode_mode: DecodeMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            start_reader_immediately: true,
            decode_mode: DecodeMode::Incremental,
        }
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    Disconnecting,
    Errored,
    PeerDisconnected,
    Closed,
}

impl SessionState {
    /// Whether the session has left the live set for good.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::Connecting | SessionState::Connected)
    }
}

/// Outbound data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
    Byte(u8),
    /// Each value is written as text, back to back.
    Values(Vec<String>),
}

impl Payload {
    /// Render as raw bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Text(text) => text.as_bytes().to_vec(),
            Payload::Bytes(bytes) => bytes.clone(),
            Payload::Byte(b) => vec![*b],
            Payload::Values(values) => values.concat().into_bytes(),
        }
    }

    /// Build a `Values` payload from anything displayable.
    pub fn values<T: ToString>(items: impl IntoIterator<Item = T>) -> Self {
        Payload::Values(items.into_iter().map(|v| v.to_string()).collect())
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Bytes(bytes.to_vec())
    }
}

impl From<u8> for Payload {
    fn from(b: u8) -> Self {
        Payload::Byte(b)
    }
}

impl From<char> for Payload {
    fn from(c: char) -> Self {
        Payload::Text(c.to_string())
    }
}

/// The party a session reports its end to.
pub(crate) trait SessionOwner: Send + Sync {
    /// The session failed during the handshake or lost its peer.
    fn session_lost(&self, device: &DeviceIdentity, session_id: u64);

    /// The stack reported that no Bluetooth radio exists.
    fn adapter_missing(&self, device: &DeviceIdentity, session_id: u64);
}

/// Read side of the socket, carried between reader tasks.
struct InputHalf {
    stream: ReadHalf<BoxedStream>,
    decoder: Utf8Decoder,
}

struct ReaderTask {
    handle: JoinHandle<()>,
    stop_tx: oneshot::Sender<()>,
}

impl ReaderTask {
    fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Write side of the socket. Closing takes the half out, so clones held by
/// in-flight writes cannot keep the socket open.
type SharedWriter = Arc<AsyncMutex<Option<WriteHalf<BoxedStream>>>>;

struct SessionInner {
    state: SessionState,
    writer: Option<SharedWriter>,
    reader: Option<ReaderTask>,
    connect_task: Option<JoinHandle<()>>,
}

/// One connection to one peer device.
///
/// The socket and reader task are owned here and never handed out. A session
/// reports its end once, either to its owner (peer loss, handshake failure) or
/// through `on_disconnected_by_user`.
pub struct Session {
    id: u64,
    device: DeviceIdentity,
    config: SessionConfig,
    sink: Arc<dyn SessionEventSink>,
    owner: Weak<dyn SessionOwner>,
    inbound: InboundSender,
    inner: Mutex<SessionInner>,
    input: AsyncMutex<Option<InputHalf>>,
    /// Flips to true once the socket is going away; cancels stuck writes.
    closing: watch::Sender<bool>,
}

impl Session {
    pub(crate) fn new(
        id: u64,
        device: DeviceIdentity,
        config: SessionConfig,
        sink: Arc<dyn SessionEventSink>,
        owner: Weak<dyn SessionOwner>,
        inbound: InboundSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            device,
            config,
            sink,
            owner,
            inbound,
            inner: Mutex::new(SessionInner {
                state: SessionState::Connecting,
                writer: None,
                reader: None,
                connect_task: None,
            }),
            input: AsyncMutex::new(None),
            closing: watch::channel(false).0,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Whether the socket is open.
    pub fn is_connected(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == SessionState::Connected && inner.writer.is_some()
    }

    pub fn is_reader_active(&self) -> bool {
        self.inner
            .lock()
            .reader
            .as_ref()
            .is_some_and(ReaderTask::is_active)
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != from {
            return false;
        }
        inner.state = to;
        true
    }

    /// Start the handshake in the background.
    pub(crate) fn spawn_connect(self: &Arc<Self>, connector: Arc<dyn SppConnector>) {
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move { session.run_connect(connector).await });
        self.inner.lock().connect_task = Some(handle);
    }

    async fn run_connect(self: Arc<Self>, connector: Arc<dyn SppConnector>) {
        info!("Connecting to {}...", self.device);

        let timeout = self.config.connect_timeout;
        let result = match tokio::time::timeout(timeout, connector.connect(&self.device)).await {
            Ok(result) => result,
            Err(_) => Err(SppError::ConnectionTimeout(timeout)),
        };

        let stream = match result {
            Ok(stream) => stream,
            Err(SppError::NoAdapter) => {
                warn!("No Bluetooth adapter while connecting to {}", self.device);
                if self.transition(SessionState::Connecting, SessionState::Errored) {
                    if let Some(owner) = self.owner.upgrade() {
                        owner.adapter_missing(&self.device, self.id);
                    }
                    self.inner.lock().state = SessionState::Closed;
                }
                return;
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", self.device, e);
                if self.transition(SessionState::Connecting, SessionState::Errored) {
                    if let Some(owner) = self.owner.upgrade() {
                        owner.session_lost(&self.device, self.id);
                    }
                    self.sink.on_connection_error(&self.device);
                    self.inner.lock().state = SessionState::Closed;
                }
                return;
            }
        };

        let (read, write) = tokio::io::split(stream);
        *self.input.lock().await = Some(InputHalf {
            stream: read,
            decoder: Utf8Decoder::new(self.config.decode_mode),
        });

        let accepted = {
            let mut inner = self.inner.lock();
            if inner.state == SessionState::Connecting {
                inner.state = SessionState::Connected;
                inner.writer = Some(Arc::new(AsyncMutex::new(Some(write))));
                true
            } else {
                false
            }
        };
        if !accepted {
            // Disconnected while the handshake was in flight
            debug!("Discarding late connection to {}", self.device);
            *self.input.lock().await = None;
            return;
        }

        info!("Connected to {}", self.device);
        self.sink.on_connect(&self.device);

        if self.config.start_reader_immediately {
            self.start_input();
        }
    }

    /// Spawn the reader task. No-op when one is already active.
    pub fn start_input(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Connected {
            debug!("Not starting reader for {}: {:?}", self.device, inner.state);
            return;
        }
        if inner.reader.as_ref().is_some_and(ReaderTask::is_active) {
            return;
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move { session.run_reader(stop_rx).await });
        inner.reader = Some(ReaderTask { handle, stop_tx });
        debug!("Reader started for {}", self.device);
    }

    /// Ask the reader task to stop. The socket stays open.
    pub fn stop_input(&self) {
        let reader = self.inner.lock().reader.take();
        if let Some(reader) = reader {
            if reader.is_active() {
                let _ = reader.stop_tx.send(());
                debug!("Reader stop requested for {}", self.device);
            }
        }
    }

    async fn run_reader(self: Arc<Self>, mut stop_rx: oneshot::Receiver<()>) {
        // Held for the task's lifetime so readers never overlap
        let mut guard = self.input.lock().await;
        let Some(input) = guard.as_mut() else {
            debug!("Reader for {} has no socket", self.device);
            return;
        };

        let mut buf = vec![0u8; self.config.read_buffer_size.max(1)];

        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    debug!("Reader for {} stopped", self.device);
                    return;
                }
                read = input.stream.read(&mut buf) => match read {
                    Ok(0) => {
                        info!("Connection closed by {}", self.device);
                        break;
                    }
                    Ok(n) => {
                        debug!("Read {} bytes from {}", n, self.device);
                        let text = input.decoder.decode(&buf[..n]);
                        if !text.is_empty()
                            && !self.inbound.push(InboundEvent::new(self.device.clone(), text))
                        {
                            debug!("Inbound consumer gone, dropping data from {}", self.device);
                        }
                    }
                    Err(e) => {
                        warn!("Read error from {}: {}", self.device, e);
                        break;
                    }
                }
            }
        }

        let rest = input.decoder.finish();
        if !rest.is_empty() {
            debug!("Flushing incomplete character from {}", self.device);
            self.inbound.push(InboundEvent::new(self.device.clone(), rest));
        }

        *guard = None;
        drop(guard);
        self.handle_peer_loss();
    }

    fn handle_peer_loss(&self) {
        let writer = {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Connected {
                return;
            }
            inner.state = SessionState::PeerDisconnected;
            inner.reader = None;
            inner.writer.take()
        };
        self.closing.send_replace(true);
        drop(writer);

        if let Some(owner) = self.owner.upgrade() {
            owner.session_lost(&self.device, self.id);
        }
        self.sink.on_disconnect(&self.device);
        self.inner.lock().state = SessionState::Closed;
    }

    /// Write to the socket if it is open.
    ///
    /// Returns the number of bytes written. Writes to a closed socket are
    /// dropped and logged; nothing is queued.
    pub async fn write(&self, payload: &Payload) -> usize {
        let writer = {
            let inner = self.inner.lock();
            match inner.state {
                SessionState::Connected => inner.writer.clone(),
                _ => None,
            }
        };
        let Some(writer) = writer else {
            debug!("Socket to {} not connected, write dropped", self.device);
            return 0;
        };

        let bytes = payload.to_bytes();
        let mut closing = self.closing.subscribe();
        let result = tokio::select! {
            result = async {
                let mut guard = writer.lock().await;
                let half = guard
                    .as_mut()
                    .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
                half.write_all(&bytes).await?;
                half.flush().await
            } => result,
            _ = closing.wait_for(|closing| *closing) => {
                Err(io::Error::new(io::ErrorKind::NotConnected, "session closed"))
            }
        };

        match result {
            Ok(()) => {
                debug!("Wrote {} bytes to {}", bytes.len(), self.device);
                bytes.len()
            }
            Err(e) => {
                warn!("Write to {} failed: {}", self.device, e);
                0
            }
        }
    }

    /// Write on a worker task so the caller never waits on the socket.
    pub fn spawn_write(self: &Arc<Self>, payload: Payload) -> JoinHandle<usize> {
        let session = Arc::clone(self);
        tokio::spawn(async move { session.write(&payload).await })
    }

    /// Close the connection at the user's request.
    ///
    /// Never fails; errors while closing are logged and swallowed. Emits
    /// `on_disconnected_by_user` unless the session had already ended.
    pub async fn disconnect(&self) {
        if self.close().await {
            info!("Disconnected from {}", self.device);
            self.sink.on_disconnected_by_user(&self.device);
        }
    }

    /// Tear down without notifying anyone.
    pub(crate) fn force_close(self: &Arc<Self>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            session.close().await;
        });
    }

    /// Returns false when the session was already terminal.
    async fn close(&self) -> bool {
        let (reader, writer, connect_task) = {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                return false;
            }
            inner.state = SessionState::Disconnecting;
            (
                inner.reader.take(),
                inner.writer.take(),
                inner.connect_task.take(),
            )
        };

        if let Some(task) = connect_task {
            task.abort();
        }

        // A blocked read may ignore the stop signal; abort unblocks it
        if let Some(reader) = reader {
            let _ = reader.stop_tx.send(());
            reader.handle.abort();
            let _ = reader.handle.await;
        }

        if let Some(writer) = writer {
            let mut guard = match tokio::time::timeout(CLOSE_GRACE, writer.lock()).await {
                Ok(guard) => guard,
                Err(_) => {
                    debug!("Write in flight to {}, cancelling it", self.device);
                    self.closing.send_replace(true);
                    writer.lock().await
                }
            };
            if let Some(mut half) = guard.take() {
                match tokio::time::timeout(CLOSE_GRACE, half.shutdown()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!("Ignoring close error for {}: {}", self.device, e),
                    Err(_) => debug!("Shutdown of {} timed out, dropping socket", self.device),
                }
            }
        }
        self.closing.send_replace(true);

        *self.input.lock().await = None;
        self.inner.lock().state = SessionState::Closed;
        true
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("device", &self.device)
            .field("state", &self.state())
            .finish()
    }
}
