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

//! BlueZ backend for connecting and discovery.

use async_trait::async_trait;
use bluer::rfcomm::{ConnectRequest, Profile, ReqError, Role, SocketAddr, Stream};
use bluer::{Adapter, AdapterEvent, AdapterProperty, Address};
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::device::{DeviceIdentity, DiscoveredDevice, SPP_UUID};
use super::discovery::{DiscoveryAdapter, RadioState};
use super::transport::{BoxedStream, SppConnector};
use crate::error::{SppError, SppResult};

/// Connect calls waiting for BlueZ to hand over their profile connection.
type PendingConnects = Arc<Mutex<HashMap<Address, oneshot::Sender<ConnectRequest>>>>;

/// Clears a connect's entry in the pending map when the connect ends, including
/// when it is cancelled by a timeout or abort.
///
/// Must be created before the receiver so the receiver is dropped first. An
/// entry is only removed once its receiver is gone, which leaves a newer
/// connect to the same device alone.
struct PendingSlot<'a, K: Eq + Hash, T> {
    pending: &'a Mutex<HashMap<K, oneshot::Sender<T>>>,
    key: K,
}

impl<K: Eq + Hash, T> Drop for PendingSlot<'_, K, T> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock();
        if pending.get(&self.key).is_some_and(|tx| tx.is_closed()) {
            pending.remove(&self.key);
        }
    }
}

/// SPP client and discovery over the system's BlueZ daemon.
pub struct BluezBackend {
    session: bluer::Session,
    /// Connect straight to this RFCOMM channel instead of resolving the
    /// SPP service record.
    rfcomm_channel: Option<u8>,
    pending: PendingConnects,
}

impl BluezBackend {
    /// Open a BlueZ session and register the SPP client profile.
    pub async fn new(rfcomm_channel: Option<u8>) -> SppResult<Self> {
        let session = bluer::Session::new().await?;
        info!("BlueZ session created");

        let pending: PendingConnects = Arc::new(Mutex::new(HashMap::new()));

        if rfcomm_channel.is_none() {
            let profile = Profile {
                uuid: SPP_UUID,
                name: Some("Serial Port".to_string()),
                role: Some(Role::Client),
                require_authentication: Some(false),
                require_authorization: Some(false),
                auto_connect: Some(false),
                ..Default::default()
            };
            let handle = session.register_profile(profile).await?;
            info!("SPP profile registered (UUID: {})", SPP_UUID);

            let pending = Arc::clone(&pending);
            tokio::spawn(async move {
                Self::route_profile_connections(handle, pending).await;
            });
        }

        Ok(Self {
            session,
            rfcomm_channel,
            pending,
        })
    }

    /// Hand each incoming profile connection to the connect call that asked
    /// for it.
    async fn route_profile_connections(
        mut handle: bluer::rfcomm::ProfileHandle,
        pending: PendingConnects,
    ) {
        while let Some(request) = handle.next().await {
            let address = request.device();
            let waiter = pending.lock().remove(&address);
            match waiter {
                Some(tx) => {
                    if let Err(request) = tx.send(request) {
                        debug!("Connect to {} gave up before profile arrived", address);
                        request.reject(ReqError::Canceled);
                    }
                }
                None => {
                    warn!("Rejecting unsolicited SPP connection from {}", address);
                    request.reject(ReqError::Rejected);
                }
            }
        }
        error!("SPP profile handle closed");
    }

    async fn adapter(&self) -> SppResult<Adapter> {
        self.session
            .default_adapter()
            .await
            .map_err(|_| SppError::NoAdapter)
    }

    fn parse_address(device: &DeviceIdentity) -> SppResult<Address> {
        device
            .address()
            .parse()
            .map_err(|_| SppError::InvalidAddress(device.address().to_string()))
    }

    async fn describe(adapter: &Adapter, address: Address) -> SppResult<DiscoveredDevice> {
        let device = adapter.device(address)?;
        let name = device.name().await.ok().flatten();
        let bonded = device.is_paired().await.unwrap_or(false);
        Ok(DiscoveredDevice {
            identity: DeviceIdentity::new(address.to_string(), name),
            bonded,
        })
    }
}

#[async_trait]
impl SppConnector for BluezBackend {
    async fn connect(&self, device: &DeviceIdentity) -> SppResult<BoxedStream> {
        let address = Self::parse_address(device)?;
        let adapter = self.adapter().await?;

        if let Some(channel) = self.rfcomm_channel {
            debug!("Connecting to {} on RFCOMM channel {}", address, channel);
            let stream = Stream::connect(SocketAddr::new(address, channel))
                .await
                .map_err(|e| SppError::ConnectionRefused(e.to_string()))?;
            return Ok(Box::new(stream));
        }

        let _slot = PendingSlot {
            pending: self.pending.as_ref(),
            key: address,
        };
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(address, tx);

        let target = adapter.device(address)?;
        target
            .connect_profile(&SPP_UUID)
            .await
            .map_err(|e| SppError::ConnectionRefused(e.to_string()))?;

        let request = rx.await.map_err(|_| {
            SppError::ConnectionRefused("profile connection was not delivered".to_string())
        })?;
        let stream = request.accept()?;
        Ok(Box::new(stream))
    }
}

#[async_trait]
impl DiscoveryAdapter for BluezBackend {
    async fn paired_devices(&self) -> SppResult<Vec<DiscoveredDevice>> {
        let adapter = self.adapter().await?;
        let mut devices = Vec::new();

        for address in adapter.device_addresses().await? {
            let device = Self::describe(&adapter, address).await?;
            if device.bonded {
                devices.push(device);
            }
        }

        Ok(devices)
    }

    async fn discover(&self) -> SppResult<BoxStream<'static, DiscoveredDevice>> {
        let adapter = self.adapter().await?;
        let events = adapter.discover_devices().await?;

        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                match event {
                    AdapterEvent::DeviceAdded(address) => {
                        Self::describe(&adapter, address).await.ok()
                    }
                    _ => None,
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn radio_states(&self) -> SppResult<BoxStream<'static, RadioState>> {
        let adapter = self.adapter().await?;
        let events = adapter.events().await?;

        let stream = events.filter_map(|event| async move {
            match event {
                AdapterEvent::PropertyChanged(AdapterProperty::Powered(true)) => {
                    Some(RadioState::On)
                }
                AdapterEvent::PropertyChanged(AdapterProperty::Powered(false)) => {
                    Some(RadioState::Off)
                }
                _ => None,
            }
        });
        Ok(stream.boxed())
    }

    fn request_radio_on(&self) {
        let session = self.session.clone();
        tokio::spawn(async move {
            let result = async {
                let adapter = session.default_adapter().await?;
                if !adapter.is_powered().await? {
                    info!("Powering on Bluetooth adapter...");
                    adapter.set_powered(true).await?;
                }
                Ok::<(), bluer::Error>(())
            }
            .await;
            if let Err(e) = result {
                warn!("Failed to power on Bluetooth adapter: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finished_connect_clears_pending_entry() {
        let pending: Mutex<HashMap<u8, oneshot::Sender<()>>> = Mutex::new(HashMap::new());
        {
            let _slot = PendingSlot {
                pending: &pending,
                key: 1,
            };
            let (tx, _rx) = oneshot::channel();
            pending.lock().insert(1, tx);
        }
        assert!(pending.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_connect_clears_pending_entry() {
        let pending: Mutex<HashMap<u8, oneshot::Sender<()>>> = Mutex::new(HashMap::new());
        let waiting = async {
            let _slot = PendingSlot {
                pending: &pending,
                key: 7,
            };
            let (tx, rx) = oneshot::channel();
            pending.lock().insert(7, tx);
            rx.await
        };
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(20), waiting).await;
        assert!(timed_out.is_err());
        assert!(pending.lock().is_empty());
    }

    #[test]
    fn test_newer_connect_keeps_its_entry() {
        let pending: Mutex<HashMap<u8, oneshot::Sender<()>>> = Mutex::new(HashMap::new());
        let (tx, rx) = oneshot::channel();
        {
            let _stale = PendingSlot {
                pending: &pending,
                key: 2,
            };
            pending.lock().insert(2, tx);
        }
        assert!(pending.lock().contains_key(&2));
        drop(rx);
    }
}
