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

//! Registry of live sessions.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::device::DeviceIdentity;
use super::events::SessionEventSink;
use super::inbound::InboundSender;
use super::session::{Payload, Session, SessionConfig, SessionOwner};
use super::transport::SppConnector;

struct RegistryState {
    sessions: HashMap<DeviceIdentity, Arc<Session>>,
    /// Devices that dropped unexpectedly, oldest first.
    reconnect: Vec<DeviceIdentity>,
}

struct RegistryShared {
    connector: Arc<dyn SppConnector>,
    sink: Arc<dyn SessionEventSink>,
    inbound: InboundSender,
    config: SessionConfig,
    state: Mutex<RegistryState>,
    members_tx: watch::Sender<Vec<DeviceIdentity>>,
    next_id: AtomicU64,
}

impl RegistryShared {
    /// Publish the current membership. Called with the state lock held so
    /// snapshots go out in mutation order.
    fn publish(&self, state: &RegistryState) {
        let mut members: Vec<DeviceIdentity> = state.sessions.keys().cloned().collect();
        members.sort_by(|a, b| a.address().cmp(b.address()));
        self.members_tx.send_replace(members);
    }

    fn is_current(state: &RegistryState, device: &DeviceIdentity, session_id: u64) -> bool {
        state
            .sessions
            .get(device)
            .is_some_and(|s| s.id() == session_id)
    }
}

impl SessionOwner for RegistryShared {
    fn session_lost(&self, device: &DeviceIdentity, session_id: u64) {
        let mut state = self.state.lock();
        if !Self::is_current(&state, device, session_id) {
            debug!("Stale loss report for {}", device);
            return;
        }

        state.sessions.remove(device);
        if !state.reconnect.contains(device) {
            state.reconnect.push(device.clone());
        }
        self.publish(&state);
        info!("Removed {} from live sessions", device);
    }

    fn adapter_missing(&self, device: &DeviceIdentity, session_id: u64) {
        let cleared = {
            let mut state = self.state.lock();
            if !Self::is_current(&state, device, session_id) {
                return;
            }
            let cleared: Vec<Arc<Session>> = state.sessions.drain().map(|(_, s)| s).collect();
            self.publish(&state);
            cleared
        };

        for session in &cleared {
            session.force_close();
        }
        warn!("No Bluetooth adapter, cleared {} sessions", cleared.len());
        self.sink.on_no_bluetooth();
    }
}

/// Tracks live sessions keyed by device.
///
/// Cheap to clone; clones share the same state. Membership changes are
/// driven by session lifecycle events and published as snapshots through
/// [`SessionRegistry::subscribe`].
#[derive(Clone)]
pub struct SessionRegistry {
    shared: Arc<RegistryShared>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new(
        connector: Arc<dyn SppConnector>,
        sink: Arc<dyn SessionEventSink>,
        inbound: InboundSender,
        config: SessionConfig,
    ) -> Self {
        let (members_tx, _) = watch::channel(Vec::new());
        Self {
            shared: Arc::new(RegistryShared {
                connector,
                sink,
                inbound,
                config,
                state: Mutex::new(RegistryState {
                    sessions: HashMap::new(),
                    reconnect: Vec::new(),
                }),
                members_tx,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Open a session to `device` unless one is already live.
    ///
    /// Returns true when a new session was created. The handshake runs in the
    /// background; its outcome arrives through the event sink.
    pub fn connect(&self, device: DeviceIdentity) -> bool {
        let session = {
            let mut state = self.shared.state.lock();
            if state.sessions.contains_key(&device) {
                debug!("Already connected to {}", device);
                return false;
            }
            state.reconnect.retain(|d| d != &device);

            let owner: Weak<dyn SessionOwner> = {
                let weak: Weak<RegistryShared> = Arc::downgrade(&self.shared);
                weak
            };
            let session = Session::new(
                self.shared.next_id.fetch_add(1, Ordering::Relaxed),
                device.clone(),
                self.shared.config.clone(),
                Arc::clone(&self.shared.sink),
                owner,
                self.shared.inbound.clone(),
            );
            state.sessions.insert(device, Arc::clone(&session));
            self.shared.publish(&state);
            session
        };

        session.spawn_connect(Arc::clone(&self.shared.connector));
        true
    }

    /// Close the session to `device`, if any.
    ///
    /// Returns false when no session existed; nothing is emitted then.
    pub async fn disconnect(&self, device: &DeviceIdentity) -> bool {
        let session = {
            let mut state = self.shared.state.lock();
            let session = state.sessions.remove(device);
            if session.is_some() {
                self.shared.publish(&state);
            }
            session
        };

        match session {
            Some(session) => {
                session.disconnect().await;
                true
            }
            None => false,
        }
    }

    /// Whether `device` has a live session.
    pub fn connected(&self, device: &DeviceIdentity) -> bool {
        self.shared.state.lock().sessions.contains_key(device)
    }

    /// Look up the live session for `device`.
    pub fn session(&self, device: &DeviceIdentity) -> Option<Arc<Session>> {
        self.shared.state.lock().sessions.get(device).cloned()
    }

    /// Snapshot of live devices.
    pub fn devices(&self) -> Vec<DeviceIdentity> {
        self.shared.members_tx.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Devices that dropped unexpectedly and may be reconnected.
    pub fn reconnect_candidates(&self) -> Vec<DeviceIdentity> {
        self.shared.state.lock().reconnect.clone()
    }

    /// Receive a membership snapshot after every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<DeviceIdentity>> {
        self.shared.members_tx.subscribe()
    }

    /// Reconnect every candidate. Failed attempts become candidates again.
    pub fn reconnect_all(&self) -> usize {
        let candidates = std::mem::take(&mut self.shared.state.lock().reconnect);
        let count = candidates.len();
        if count > 0 {
            info!("Reconnecting {} devices", count);
        }
        for device in candidates {
            self.connect(device);
        }
        count
    }

    /// Write `payload` to every live session, each on its own task.
    pub fn write_all(&self, payload: Payload) -> Vec<JoinHandle<usize>> {
        let sessions: Vec<Arc<Session>> =
            self.shared.state.lock().sessions.values().cloned().collect();
        sessions
            .iter()
            .map(|session| session.spawn_write(payload.clone()))
            .collect()
    }

    /// The platform reported that no Bluetooth radio exists.
    pub fn on_no_bluetooth(&self) {
        let cleared: Vec<Arc<Session>> = {
            let mut state = self.shared.state.lock();
            let cleared = state.sessions.drain().map(|(_, s)| s).collect();
            self.shared.publish(&state);
            cleared
        };
        for session in &cleared {
            session.force_close();
        }
        self.shared.sink.on_no_bluetooth();
    }

    /// Disconnect every session. Used at application shutdown.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut state = self.shared.state.lock();
            let sessions = state.sessions.drain().map(|(_, s)| s).collect();
            self.shared.publish(&state);
            sessions
        };
        info!("Shutting down {} sessions", sessions.len());
        futures::future::join_all(sessions.iter().map(|s| s.disconnect())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::events::{ChannelSink, SessionEvent};
    use crate::bluetooth::inbound::inbound_channel;
    use crate::bluetooth::transport::BoxedStream;
    use crate::error::SppResult;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Connects to a pipe whose far end is kept open.
    #[derive(Default)]
    struct HeldOpen {
        peers: Mutex<Vec<tokio::io::DuplexStream>>,
    }

    #[async_trait]
    impl SppConnector for HeldOpen {
        async fn connect(&self, _device: &DeviceIdentity) -> SppResult<BoxedStream> {
            let (local, peer) = tokio::io::duplex(64);
            self.peers.lock().push(peer);
            Ok(Box::new(local))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_duplicate_loss_reports_are_idempotent() {
        let (sink, mut events) = ChannelSink::new();
        let (inbound_tx, _inbound_rx) = inbound_channel();
        let registry = SessionRegistry::new(
            Arc::new(HeldOpen::default()),
            Arc::new(sink),
            inbound_tx,
            SessionConfig::default(),
        );
        let device = DeviceIdentity::from_address("AA:BB:CC:DD:EE:FF");

        registry.connect(device.clone());
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(SessionEvent::Connected(device.clone())));
        let id = registry.session(&device).unwrap().id();

        let mut threads = Vec::new();
        for _ in 0..8 {
            let shared = Arc::clone(&registry.shared);
            let device = device.clone();
            threads.push(std::thread::spawn(move || shared.session_lost(&device, id)));
        }
        for thread in threads {
            thread.join().unwrap();
        }

        assert!(registry.is_empty());
        assert_eq!(registry.reconnect_candidates(), vec![device.clone()]);

        // A report from an older session must not touch a newer one
        registry.connect(device.clone());
        assert!(registry.reconnect_candidates().is_empty());
        registry.shared.session_lost(&device, id);
        assert!(registry.connected(&device));
    }
}
