// ── Device inventory ──
//
// MAC-keyed table of every device object seen under one adapter. All
// access goes through a short-lived mutex; callers clone what they need
// out of an entry and drop the lock before any bus call. Each entry
// owns the cancellation token of its property-event forwarder, released
// exactly when the entry is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hearth_core::MacAddress;
use tokio_util::sync::CancellationToken;

use crate::bus::DeviceProxy;
use crate::session::WatchCallback;

/// RSSI value BlueZ reports for a device that is out of range.
pub(crate) const RSSI_DEVICE_UNAVAILABLE: i16 = 0;

pub(crate) struct DeviceEntry {
    device: Arc<dyn DeviceProxy>,
    /// Cancels the property-event forwarder task for this device.
    subscription: CancellationToken,
    last_seen: Instant,
    rssi: i16,
    name: String,
    watch: Option<Arc<WatchCallback>>,
}

impl DeviceEntry {
    pub(crate) fn new(
        device: Arc<dyn DeviceProxy>,
        subscription: CancellationToken,
        name: String,
    ) -> Self {
        Self {
            device,
            subscription,
            last_seen: Instant::now(),
            rssi: RSSI_DEVICE_UNAVAILABLE,
            name,
            watch: None,
        }
    }

    pub(crate) fn is_watched(&self) -> bool {
        self.watch.is_some()
    }
}

#[derive(Default)]
pub(crate) struct DeviceRegistry {
    entries: Mutex<HashMap<MacAddress, DeviceEntry>>,
}

impl DeviceRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert an entry unless the MAC is already present. Returns
    /// `false` (and cancels the new entry's subscription) on duplicates.
    pub(crate) fn insert(&self, mac: MacAddress, entry: DeviceEntry) -> bool {
        let mut entries = self.entries.lock().expect("registry lock poisoned");
        if entries.contains_key(&mac) {
            entry.subscription.cancel();
            return false;
        }
        entries.insert(mac, entry);
        true
    }

    pub(crate) fn contains(&self, mac: MacAddress) -> bool {
        self.entries
            .lock()
            .expect("registry lock poisoned")
            .contains_key(&mac)
    }

    /// Clone the device proxy out of an entry so the caller can issue
    /// bus calls without holding the lock.
    pub(crate) fn device(&self, mac: MacAddress) -> Option<Arc<dyn DeviceProxy>> {
        self.entries
            .lock()
            .expect("registry lock poisoned")
            .get(&mac)
            .map(|entry| Arc::clone(&entry.device))
    }

    /// Apply an RSSI observation: refresh `last_seen` and the cached
    /// value. Observations for unknown MACs are dropped.
    pub(crate) fn touch(&self, mac: MacAddress, rssi: i16) {
        let mut entries = self.entries.lock().expect("registry lock poisoned");
        if let Some(entry) = entries.get_mut(&mac) {
            entry.last_seen = Instant::now();
            entry.rssi = rssi;
        }
    }

    /// Install a watch callback. `None` if the MAC is unknown,
    /// `Some(false)` if the device was already watched.
    pub(crate) fn set_watch(&self, mac: MacAddress, callback: Arc<WatchCallback>) -> Option<bool> {
        let mut entries = self.entries.lock().expect("registry lock poisoned");
        let entry = entries.get_mut(&mac)?;
        if entry.watch.is_some() {
            return Some(false);
        }
        entry.watch = Some(callback);
        Some(true)
    }

    /// Remove a watch callback. Unknown or unwatched MACs are a no-op.
    pub(crate) fn clear_watch(&self, mac: MacAddress) {
        let mut entries = self.entries.lock().expect("registry lock poisoned");
        if let Some(entry) = entries.get_mut(&mac) {
            entry.watch = None;
        }
    }

    /// The watch callback for a MAC, if one is installed.
    pub(crate) fn watch_callback(&self, mac: MacAddress) -> Option<Arc<WatchCallback>> {
        self.entries
            .lock()
            .expect("registry lock poisoned")
            .get(&mac)
            .and_then(|entry| entry.watch.clone())
    }

    /// Devices with a fresh RSSI observation: seen within `max_age` and
    /// not carrying the unavailable sentinel.
    pub(crate) fn fresh(&self, max_age: Duration) -> HashMap<MacAddress, String> {
        let entries = self.entries.lock().expect("registry lock poisoned");
        entries
            .iter()
            .filter(|(_, entry)| {
                entry.last_seen.elapsed() <= max_age && entry.rssi != RSSI_DEVICE_UNAVAILABLE
            })
            .map(|(mac, entry)| (*mac, entry.name.clone()))
            .collect()
    }

    /// Drop unwatched entries idle for longer than `max_idle`,
    /// releasing their subscriptions. Returns the evicted MACs so the
    /// caller can ask the adapter to forget them.
    pub(crate) fn evict_idle(&self, max_idle: Duration) -> Vec<MacAddress> {
        let mut entries = self.entries.lock().expect("registry lock poisoned");
        let mut evicted = Vec::new();

        entries.retain(|mac, entry| {
            if entry.is_watched() || entry.last_seen.elapsed() <= max_idle {
                return true;
            }
            entry.subscription.cancel();
            evicted.push(*mac);
            false
        });

        evicted
    }

    /// Release every subscription and drop all entries.
    pub(crate) fn clear(&self) {
        let mut entries = self.entries.lock().expect("registry lock poisoned");
        for entry in entries.values() {
            entry.subscription.cancel();
        }
        entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().expect("registry lock poisoned").len()
    }
}
