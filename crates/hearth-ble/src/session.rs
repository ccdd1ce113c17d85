// ── Adapter session ──
//
// One session per radio. The session enumerates device objects at
// construction, subscribes to object-added events, and runs a single
// event-loop task that applies all property changes to the registry.
// External callers (`lescan`, `connect`, `watch`) only ever take the
// registry lock for map operations; bus calls happen with the lock
// dropped. Lock order: status > discovery > registry > classic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hearth_core::MacAddress;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{
    AdapterProxy, AdapterSignal, DeviceProxy, DeviceSignal, HostBus, Transport,
    EVENT_CHANNEL_CAPACITY,
};
use crate::classic::{AvailabilityTracker, ClassicProbe};
use crate::error::BleError;
use crate::gatt::HciConnection;
use crate::registry::{DeviceEntry, DeviceRegistry};

const CHANGE_POWER_ATTEMPTS: u32 = 5;
const CHANGE_POWER_DELAY: Duration = Duration::from_millis(200);

/// Invoked once per manufacturer-data entry a watched device advertises.
pub type WatchCallback = dyn Fn(MacAddress, Vec<u8>) + Send + Sync;

// ── SessionTiming ───────────────────────────────────────────────────

/// Freshness and eviction windows for one adapter session. All three
/// must be strictly positive.
#[derive(Debug, Clone, Copy)]
pub struct SessionTiming {
    /// RSSI observations older than this are not reported by `lescan`.
    pub le_max_age_rssi: Duration,
    /// Unwatched entries idle longer than this are evicted.
    pub le_max_unavailability_time: Duration,
    /// Window during which a previously seen Classic device is reported
    /// present despite a negative detect.
    pub classic_artificial_availability_timeout: Duration,
}

impl SessionTiming {
    pub fn validate(&self) -> Result<(), BleError> {
        let fields = [
            ("leMaxAgeRssi", self.le_max_age_rssi),
            ("leMaxUnavailabilityTime", self.le_max_unavailability_time),
            (
                "classicArtificialAvaibilityTimeout",
                self.classic_artificial_availability_timeout,
            ),
        ];

        for (field, value) in fields {
            if value.is_zero() {
                return Err(BleError::InvalidArgument {
                    field: "timing",
                    reason: format!("{field} must be strictly positive"),
                });
            }
        }
        Ok(())
    }
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            le_max_age_rssi: Duration::from_secs(30),
            le_max_unavailability_time: Duration::from_secs(7 * 24 * 60 * 60),
            classic_artificial_availability_timeout: Duration::from_secs(30),
        }
    }
}

/// Identity snapshot of the adapter, for diagnostics.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub address: MacAddress,
    pub powered: bool,
    pub discovering: bool,
}

// ── AdapterSession ──────────────────────────────────────────────────

pub struct AdapterSession {
    name: String,
    adapter: Arc<dyn AdapterProxy>,
    classic: Arc<dyn ClassicProbe>,
    timing: SessionTiming,
    registry: Arc<DeviceRegistry>,
    tracker: AvailabilityTracker,
    /// Serializes power transitions.
    status_lock: tokio::sync::Mutex<()>,
    /// Serializes discovery start/stop.
    discovery_lock: tokio::sync::Mutex<()>,
    /// Broadcast by `down()`; cancels in-flight `lescan` waits.
    reset_condition: Notify,
    cancel: CancellationToken,
    event_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AdapterSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterSession")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl AdapterSession {
    /// Acquire the adapter, enumerate its known device objects, and
    /// start the event-loop task.
    pub async fn open(
        bus: &dyn HostBus,
        classic: Arc<dyn ClassicProbe>,
        name: &str,
        timing: SessionTiming,
    ) -> Result<Arc<Self>, BleError> {
        timing.validate()?;

        let adapter = bus.adapter(name).await?;
        let registry = Arc::new(DeviceRegistry::new());
        let cancel = CancellationToken::new();
        let (event_tx, device_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        for device in adapter.known_devices().await? {
            let mac = device.mac();
            if let Err(err) = track_device(&registry, device, &event_tx, &cancel).await {
                warn!(%mac, error = %err, "skipping unreadable device object");
            }
        }

        let adapter_rx = adapter.events().await?;
        let event_task = tokio::spawn(run_event_loop(
            Arc::clone(&adapter),
            Arc::clone(&registry),
            adapter_rx,
            device_rx,
            event_tx,
            cancel.clone(),
        ));

        info!(adapter = name, devices = registry.len(), "adapter session open");

        Ok(Arc::new(Self {
            name: name.to_string(),
            adapter,
            classic,
            tracker: AvailabilityTracker::new(timing.classic_artificial_availability_timeout),
            timing,
            registry,
            status_lock: tokio::sync::Mutex::new(()),
            discovery_lock: tokio::sync::Mutex::new(()),
            reset_condition: Notify::new(),
            cancel,
            event_task: std::sync::Mutex::new(Some(event_task)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of device objects currently tracked.
    pub fn device_count(&self) -> usize {
        self.registry.len()
    }

    // ── Power and discovery ──────────────────────────────────────

    /// Power the adapter on (if needed) and start LE discovery.
    pub async fn up(&self) -> Result<(), BleError> {
        debug!(adapter = %self.name, "bringing up");
        let _status = self.status_lock.lock().await;

        if !self.adapter.is_powered().await? {
            self.adapter.set_powered(true).await?;
            self.wait_until_powered(true).await?;
        }

        self.start_le_discovery().await
    }

    /// Power the adapter off, cancelling any in-flight `lescan` wait.
    pub async fn down(&self) -> Result<(), BleError> {
        debug!(adapter = %self.name, "switching down");
        let _status = self.status_lock.lock().await;

        self.reset_condition.notify_waiters();

        if !self.adapter.is_powered().await? {
            return Ok(());
        }

        self.adapter.set_powered(false).await?;
        self.wait_until_powered(false).await
    }

    pub async fn reset(&self) -> Result<(), BleError> {
        self.down().await?;
        self.up().await
    }

    async fn wait_until_powered(&self, target: bool) -> Result<(), BleError> {
        for _ in 0..CHANGE_POWER_ATTEMPTS {
            if self.adapter.is_powered().await? == target {
                return Ok(());
            }
            tokio::time::sleep(CHANGE_POWER_DELAY).await;
        }

        Err(BleError::Timeout(format!(
            "power change of adapter {}",
            self.name
        )))
    }

    async fn start_le_discovery(&self) -> Result<(), BleError> {
        let _discovery = self.discovery_lock.lock().await;
        if self.adapter.is_discovering().await? {
            return Ok(());
        }
        self.adapter.start_discovery(Transport::Le).await
    }

    async fn stop_le_discovery(&self) -> Result<(), BleError> {
        let _discovery = self.discovery_lock.lock().await;
        self.adapter.stop_discovery().await
    }

    // ── Scanning ─────────────────────────────────────────────────

    /// Scan for LE devices: wait out the timeout (or a reset), then
    /// report every entry with a fresh, non-zero RSSI observation.
    /// Stale unwatched entries are evicted afterwards.
    pub async fn lescan(
        &self,
        timeout: Duration,
    ) -> Result<HashMap<MacAddress, String>, BleError> {
        info!(
            adapter = %self.name,
            timeout_secs = timeout.as_secs(),
            "starting BLE scan"
        );

        self.start_le_discovery().await?;

        if tokio::time::timeout(timeout, self.reset_condition.notified())
            .await
            .is_ok()
        {
            debug!("BLE scan terminated prematurely");
        }

        let found = self.registry.fresh(self.timing.le_max_age_rssi);
        self.evict_stale().await;

        info!(count = found.len(), "BLE scan finished");
        Ok(found)
    }

    /// Targeted Classic inquiry, filtered through the artificial
    /// availability window.
    pub async fn detect(&self, mac: MacAddress) -> Result<bool, BleError> {
        let detected = self.classic.detect(&self.name, mac).await?;
        Ok(self.tracker.judge(mac, detected))
    }

    /// General Classic inquiry. No post-processing.
    pub async fn scan(&self) -> Result<HashMap<MacAddress, String>, BleError> {
        self.classic.scan(&self.name).await
    }

    pub async fn info(&self) -> Result<AdapterInfo, BleError> {
        Ok(AdapterInfo {
            name: self.name.clone(),
            address: self.adapter.address().await?,
            powered: self.adapter.is_powered().await?,
            discovering: self.adapter.is_discovering().await?,
        })
    }

    // ── Per-device operations ────────────────────────────────────

    /// Open a GATT connection to a known device.
    pub async fn connect(
        &self,
        mac: MacAddress,
        timeout: Duration,
    ) -> Result<HciConnection, BleError> {
        debug!(%mac, "connecting to device");

        let device = self
            .registry
            .device(mac)
            .ok_or(BleError::DeviceNotFound(mac))?;

        if !device.is_connected().await? {
            device.connect(timeout).await?;
        }

        Ok(HciConnection::new(device, timeout))
    }

    /// Subscribe to a device's manufacturer-data notifications.
    /// Watching an already watched device is a no-op.
    pub fn watch(&self, mac: MacAddress, callback: Arc<WatchCallback>) -> Result<(), BleError> {
        match self.registry.set_watch(mac, callback) {
            None => Err(BleError::DeviceNotFound(mac)),
            Some(false) => Ok(()),
            Some(true) => {
                debug!(%mac, "watching device");
                Ok(())
            }
        }
    }

    /// Remove a watch. Unknown or unwatched devices are a no-op.
    pub fn unwatch(&self, mac: MacAddress) {
        self.registry.clear_watch(mac);
    }

    async fn evict_stale(&self) {
        for mac in self
            .registry
            .evict_idle(self.timing.le_max_unavailability_time)
        {
            info!(%mac, "removing unavailable LE device");
            // Best effort: the entry is already gone from the registry.
            if let Err(err) = self.adapter.remove_device(mac).await {
                debug!(%mac, error = %err, "adapter refused to forget device");
            }
        }
    }

    // ── Teardown ─────────────────────────────────────────────────

    /// Stop discovery, cancel the event loop and release every
    /// subscription. Failures are logged, never raised.
    pub async fn shutdown(&self) {
        if let Err(err) = self.stop_le_discovery().await {
            debug!(adapter = %self.name, error = %err, "stopping discovery failed");
        }

        self.cancel.cancel();

        let task = self
            .event_task
            .lock()
            .expect("event task lock poisoned")
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }

        self.registry.clear();
        debug!(adapter = %self.name, "session closed");
    }
}

impl Drop for AdapterSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Event fan-in ────────────────────────────────────────────────────

/// Subscribe to a device's property events and register it. The
/// forwarder task funnels events into the session channel and stops
/// when its entry (or the whole session) is cancelled.
async fn track_device(
    registry: &DeviceRegistry,
    device: Arc<dyn DeviceProxy>,
    event_tx: &mpsc::Sender<(MacAddress, DeviceSignal)>,
    session_cancel: &CancellationToken,
) -> Result<(), BleError> {
    let mac = device.mac();
    if registry.contains(mac) {
        return Ok(());
    }

    let name = match device.name().await {
        Ok(Some(name)) => name,
        _ => "unknown".to_string(),
    };

    let mut events = device.events().await?;
    let subscription = session_cancel.child_token();
    let forwarder_token = subscription.clone();
    let tx = event_tx.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = forwarder_token.cancelled() => break,
                signal = events.recv() => {
                    let Some(signal) = signal else { break };
                    if tx.send((mac, signal)).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    registry.insert(mac, DeviceEntry::new(device, subscription, name));
    Ok(())
}

/// The session's single event loop: object lifecycle events from the
/// adapter, property events from every tracked device.
async fn run_event_loop(
    adapter: Arc<dyn AdapterProxy>,
    registry: Arc<DeviceRegistry>,
    mut adapter_rx: mpsc::Receiver<AdapterSignal>,
    mut device_rx: mpsc::Receiver<(MacAddress, DeviceSignal)>,
    event_tx: mpsc::Sender<(MacAddress, DeviceSignal)>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            signal = adapter_rx.recv() => {
                let Some(signal) = signal else { break };
                handle_adapter_signal(&adapter, &registry, &event_tx, &cancel, signal).await;
            }
            event = device_rx.recv() => {
                let Some((mac, signal)) = event else { break };
                handle_device_signal(&registry, mac, signal);
            }
        }
    }

    debug!("session event loop exiting");
}

async fn handle_adapter_signal(
    adapter: &Arc<dyn AdapterProxy>,
    registry: &DeviceRegistry,
    event_tx: &mpsc::Sender<(MacAddress, DeviceSignal)>,
    cancel: &CancellationToken,
    signal: AdapterSignal,
) {
    match signal {
        AdapterSignal::DeviceAdded(mac) => {
            let device = match adapter.device(mac).await {
                Ok(device) => device,
                Err(err) => {
                    warn!(%mac, error = %err, "cannot resolve added device object");
                    return;
                }
            };
            if let Err(err) = track_device(registry, device, event_tx, cancel).await {
                warn!(%mac, error = %err, "failed to track discovered device");
            }
        }
        AdapterSignal::DeviceRemoved(mac) => {
            // The entry ages out through eviction; nothing to do now.
            debug!(%mac, "device object removed from the bus");
        }
    }
}

fn handle_device_signal(registry: &DeviceRegistry, mac: MacAddress, signal: DeviceSignal) {
    match signal {
        DeviceSignal::Rssi(rssi) => registry.touch(mac, rssi),
        DeviceSignal::ManufacturerData(data) => {
            // Clone the callback out so it runs without the registry lock.
            let Some(callback) = registry.watch_callback(mac) else {
                return;
            };
            for (_, payload) in data {
                callback(mac, payload);
            }
        }
    }
}
