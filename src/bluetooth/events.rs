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

//! Session lifecycle notifications.

use tokio::sync::mpsc;
use tracing::{info, warn};

use super::device::DeviceIdentity;

/// Receives lifecycle notifications from sessions and the registry.
///
/// Calls are made from worker tasks and must return quickly; implementations
/// that need to do real work should hand the event off, as [`ChannelSink`]
/// does.
pub trait SessionEventSink: Send + Sync {
    /// Handshake succeeded.
    fn on_connect(&self, device: &DeviceIdentity);
    /// The connection dropped without being asked to.
    fn on_disconnect(&self, device: &DeviceIdentity);
    /// The connection was closed locally.
    fn on_disconnected_by_user(&self, device: &DeviceIdentity);
    /// The handshake failed or timed out.
    fn on_connection_error(&self, device: &DeviceIdentity);
    /// No Bluetooth radio is present.
    fn on_no_bluetooth(&self);
}

/// Events emitted by sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected(DeviceIdentity),
    Disconnected(DeviceIdentity),
    DisconnectedByUser(DeviceIdentity),
    ConnectionError(DeviceIdentity),
    NoBluetooth,
}

impl SessionEvent {
    /// Human readable notice, as shown to the user.
    pub fn describe(&self) -> String {
        match self {
            SessionEvent::Connected(d) => format!("Connected to {}", d.display_name()),
            SessionEvent::Disconnected(d) | SessionEvent::DisconnectedByUser(d) => {
                format!("Disconnected from {}", d.display_name())
            }
            SessionEvent::ConnectionError(d) => {
                format!("Unable to connect to {}", d.display_name())
            }
            SessionEvent::NoBluetooth => "No Bluetooth on device".to_string(),
        }
    }
}

/// Forwards every notification over a channel to a consumer task.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver its events are delivered to.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            warn!("Session event dropped, no consumer");
        }
    }
}

impl SessionEventSink for ChannelSink {
    fn on_connect(&self, device: &DeviceIdentity) {
        self.emit(SessionEvent::Connected(device.clone()));
    }

    fn on_disconnect(&self, device: &DeviceIdentity) {
        self.emit(SessionEvent::Disconnected(device.clone()));
    }

    fn on_disconnected_by_user(&self, device: &DeviceIdentity) {
        self.emit(SessionEvent::DisconnectedByUser(device.clone()));
    }

    fn on_connection_error(&self, device: &DeviceIdentity) {
        self.emit(SessionEvent::ConnectionError(device.clone()));
    }

    fn on_no_bluetooth(&self) {
        self.emit(SessionEvent::NoBluetooth);
    }
}

/// Writes every notification to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl SessionEventSink for LogSink {
    fn on_connect(&self, device: &DeviceIdentity) {
        info!("Connected to {}", device);
    }

    fn on_disconnect(&self, device: &DeviceIdentity) {
        warn!("Connection to {} lost", device);
    }

    fn on_disconnected_by_user(&self, device: &DeviceIdentity) {
        info!("Disconnected from {}", device);
    }

    fn on_connection_error(&self, device: &DeviceIdentity) {
        warn!("Unable to connect to {}", device);
    }

    fn on_no_bluetooth(&self) {
        warn!("No Bluetooth adapter present");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_forwards_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        let device = DeviceIdentity::new("AA:BB:CC:DD:EE:FF", Some("HC-05".into()));

        sink.on_connect(&device);
        sink.on_disconnect(&device);
        sink.on_no_bluetooth();

        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Connected(device.clone()));
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Disconnected(device));
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::NoBluetooth);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_describe() {
        let device = DeviceIdentity::new("AA:BB:CC:DD:EE:FF", Some("HC-05".into()));
        assert_eq!(
            SessionEvent::ConnectionError(device).describe(),
            "Unable to connect to HC-05"
        );
    }
}
