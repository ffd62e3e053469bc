//! Test doubles for driving sessions without a Bluetooth stack.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use spp_terminal::bluetooth::{BoxedStream, DeviceIdentity, SessionEvent, SppConnector};
use spp_terminal::{SppError, SppResult};

/// Step a scripted stream goes through on each read.
#[derive(Debug, Clone)]
pub enum ReadStep {
    Data(Vec<u8>),
    Fail,
}

/// Stream that replays reads, then stays idle, and records writes.
pub struct ScriptedStream {
    reads: VecDeque<ReadStep>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl ScriptedStream {
    pub fn new(reads: Vec<ReadStep>) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                reads: reads.into(),
                written: Arc::clone(&written),
            },
            written,
        )
    }

    pub fn idle() -> (Self, Arc<Mutex<Vec<u8>>>) {
        Self::new(Vec::new())
    }
}

impl AsyncRead for ScriptedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.reads.pop_front() {
            Some(ReadStep::Data(data)) => {
                buf.put_slice(&data);
                Poll::Ready(Ok(()))
            }
            Some(ReadStep::Fail) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "link lost",
            ))),
            // Nothing more to read; the session stays up until closed
            None => Poll::Pending,
        }
    }
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.written.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// What the mock connector does on a connect attempt.
pub enum Outcome {
    Accept(ScriptedStream),
    Refuse,
    Hang,
    NoAdapter,
}

/// Connector whose outcomes are queued per device address.
///
/// Devices without a queued outcome get an idle stream.
#[derive(Default)]
pub struct MockConnector {
    outcomes: Mutex<HashMap<String, VecDeque<Outcome>>>,
    writes: Mutex<HashMap<String, Arc<Mutex<Vec<u8>>>>>,
    attempts: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, device: &DeviceIdentity, outcome: Outcome) {
        self.outcomes
            .lock()
            .entry(device.address().to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Queue a stream that replays `reads` and return its write log.
    pub fn push_stream(&self, device: &DeviceIdentity, reads: Vec<ReadStep>) -> Arc<Mutex<Vec<u8>>> {
        let (stream, written) = ScriptedStream::new(reads);
        self.push(device, Outcome::Accept(stream));
        written
    }

    /// Bytes written to the most recent idle stream handed to `device`.
    pub fn written(&self, device: &DeviceIdentity) -> Vec<u8> {
        self.writes
            .lock()
            .get(device.address())
            .map(|w| w.lock().clone())
            .unwrap_or_default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SppConnector for MockConnector {
    async fn connect(&self, device: &DeviceIdentity) -> SppResult<BoxedStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .outcomes
            .lock()
            .get_mut(device.address())
            .and_then(|queue| queue.pop_front());

        match outcome {
            Some(Outcome::Accept(stream)) => Ok(Box::new(stream)),
            Some(Outcome::Refuse) => Err(SppError::ConnectionRefused("refused".into())),
            Some(Outcome::Hang) => futures::future::pending().await,
            Some(Outcome::NoAdapter) => Err(SppError::NoAdapter),
            None => {
                let (stream, written) = ScriptedStream::idle();
                self.writes
                    .lock()
                    .insert(device.address().to_string(), written);
                Ok(Box::new(stream))
            }
        }
    }
}

/// Poll `cond` until it holds, failing the test after two seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

/// Wait for the next session event.
pub async fn next_event(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

/// Drain whatever events are already queued.
pub fn drain_events(rx: &mut tokio::sync::mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
