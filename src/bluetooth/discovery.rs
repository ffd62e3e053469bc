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

//! Device discovery and radio control seam.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::device::DiscoveredDevice;
use crate::error::SppResult;

/// Power state of the local radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    On,
    Off,
}

/// Platform discovery and pairing API.
#[async_trait]
pub trait DiscoveryAdapter: Send + Sync {
    /// Whether the platform lets us scan. Assumed true unless overridden.
    fn permissions_granted(&self) -> bool {
        true
    }

    /// Devices bonded with this host.
    async fn paired_devices(&self) -> SppResult<Vec<DiscoveredDevice>>;

    /// Start a scan and stream devices as they are found.
    async fn discover(&self) -> SppResult<BoxStream<'static, DiscoveredDevice>>;

    /// Stream of radio power changes.
    async fn radio_states(&self) -> SppResult<BoxStream<'static, RadioState>>;

    /// Ask for the radio to be powered on. The outcome shows up on
    /// [`DiscoveryAdapter::radio_states`].
    fn request_radio_on(&self);
}

/// Candidate devices: bonded ones first, then whatever a scan turns up.
#[derive(Debug, Default)]
pub struct DeviceList {
    devices: Vec<DiscoveredDevice>,
}

impl DeviceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the bonded part of the list, keeping discovered devices.
    pub fn set_paired(&mut self, paired: Vec<DiscoveredDevice>) {
        let discovered: Vec<DiscoveredDevice> = self
            .devices
            .drain(..)
            .filter(|d| !d.bonded && !paired.iter().any(|p| p.identity == d.identity))
            .collect();
        self.devices = paired;
        self.devices.extend(discovered);
    }

    /// Add a discovered device. Returns false if it is already listed.
    pub fn add_discovered(&mut self, device: DiscoveredDevice) -> bool {
        if self.devices.iter().any(|d| d.identity == device.identity) {
            return false;
        }
        self.devices.push(device);
        true
    }

    pub fn devices(&self) -> &[DiscoveredDevice] {
        &self.devices
    }

    /// Look a device up by list position or address.
    pub fn find(&self, key: &str) -> Option<&DiscoveredDevice> {
        if let Ok(index) = key.parse::<usize>() {
            return self.devices.get(index);
        }
        self.devices
            .iter()
            .find(|d| d.identity.address().eq_ignore_ascii_case(key))
    }
}

/// Refresh bonded devices, then scan for `duration`.
///
/// Returns the devices newly added to `list`.
pub async fn scan(
    adapter: &dyn DiscoveryAdapter,
    list: &mut DeviceList,
    duration: Duration,
) -> SppResult<Vec<DiscoveredDevice>> {
    list.set_paired(adapter.paired_devices().await?);

    if !adapter.permissions_granted() {
        warn!("Discovery not permitted, showing paired devices only");
        return Ok(Vec::new());
    }

    info!("Scanning for {:?}...", duration);
    let mut found = Vec::new();
    let mut stream = adapter.discover().await?;
    let collect = async {
        while let Some(device) = stream.next().await {
            if list.add_discovered(device.clone()) {
                debug!("Discovered {}", device.identity);
                found.push(device);
            }
        }
    };
    // Scans run until the deadline; hitting it is the normal exit
    let _ = tokio::time::timeout(duration, collect).await;

    info!("Scan finished, {} new devices", found.len());
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::device::DeviceIdentity;
    use parking_lot::Mutex;

    fn dev(address: &str, bonded: bool) -> DiscoveredDevice {
        DiscoveredDevice {
            identity: DeviceIdentity::from_address(address),
            bonded,
        }
    }

    struct FakeAdapter {
        paired: Vec<DiscoveredDevice>,
        found: Vec<DiscoveredDevice>,
        radio_requests: Mutex<u32>,
    }

    #[async_trait]
    impl DiscoveryAdapter for FakeAdapter {
        async fn paired_devices(&self) -> SppResult<Vec<DiscoveredDevice>> {
            Ok(self.paired.clone())
        }

        async fn discover(&self) -> SppResult<BoxStream<'static, DiscoveredDevice>> {
            Ok(futures::stream::iter(self.found.clone()).boxed())
        }

        async fn radio_states(&self) -> SppResult<BoxStream<'static, RadioState>> {
            Ok(futures::stream::iter(vec![RadioState::Off, RadioState::On]).boxed())
        }

        fn request_radio_on(&self) {
            *self.radio_requests.lock() += 1;
        }
    }

    #[test]
    fn test_device_list_filters_duplicates() {
        let mut list = DeviceList::new();
        list.set_paired(vec![dev("AA:AA:AA:AA:AA:AA", true)]);

        assert!(!list.add_discovered(dev("AA:AA:AA:AA:AA:AA", false)));
        assert!(list.add_discovered(dev("BB:BB:BB:BB:BB:BB", false)));
        assert!(!list.add_discovered(dev("bb:bb:bb:bb:bb:bb", false)));
        assert_eq!(list.devices().len(), 2);

        assert_eq!(
            list.find("1").unwrap().identity.address(),
            "BB:BB:BB:BB:BB:BB"
        );
        assert!(list.find("aa:aa:aa:aa:aa:aa").unwrap().bonded);
        assert!(list.find("7").is_none());
    }

    #[test]
    fn test_refresh_keeps_discovered() {
        let mut list = DeviceList::new();
        list.set_paired(vec![dev("AA:AA:AA:AA:AA:AA", true)]);
        list.add_discovered(dev("BB:BB:BB:BB:BB:BB", false));

        // B got paired in the meantime
        list.set_paired(vec![
            dev("AA:AA:AA:AA:AA:AA", true),
            dev("BB:BB:BB:BB:BB:BB", true),
        ]);
        assert_eq!(list.devices().len(), 2);
        assert!(list.devices().iter().all(|d| d.bonded));
    }

    #[tokio::test]
    async fn test_scan_collects_new_devices() {
        let adapter = FakeAdapter {
            paired: vec![dev("AA:AA:AA:AA:AA:AA", true)],
            found: vec![
                dev("AA:AA:AA:AA:AA:AA", false),
                dev("CC:CC:CC:CC:CC:CC", false),
                dev("CC:CC:CC:CC:CC:CC", false),
            ],
            radio_requests: Mutex::new(0),
        };

        let mut list = DeviceList::new();
        let found = scan(&adapter, &mut list, Duration::from_millis(200))
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].identity.address(), "CC:CC:CC:CC:CC:CC");
        assert_eq!(list.devices().len(), 2);

        adapter.request_radio_on();
        assert_eq!(*adapter.radio_requests.lock(), 1);
    }
}
