// ── System-bus seam ──
//
// The session layer is written against these traits so the discovery
// and inventory logic can be driven without a running bluetoothd. The
// production implementation lives in `bluez`; tests provide in-memory
// fakes. Proxies must be cheap to clone through `Arc` because callers
// drop the registry lock before issuing blocking bus calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hearth_core::MacAddress;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::BleError;

/// Buffer for adapter- and device-event channels. Events are tiny and
/// the consumer (the session event loop) only does map updates, so a
/// small buffer suffices.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Discovery transport filter (`SetDiscoveryFilter` on the bus).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Le,
    BrEdr,
    Auto,
}

/// Adapter-level object lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterSignal {
    /// A device object appeared under the adapter's path.
    DeviceAdded(MacAddress),
    /// A device object was removed from the bus.
    DeviceRemoved(MacAddress),
}

/// Per-device property-change events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSignal {
    /// The `RSSI` property changed.
    Rssi(i16),
    /// The `ManufacturerData` property changed: manufacturer code to
    /// advertisement payload.
    ManufacturerData(HashMap<u16, Vec<u8>>),
}

/// Entry point to the system bus.
#[async_trait]
pub trait HostBus: Send + Sync + 'static {
    /// Acquire a proxy for the adapter with the given name (e.g. `hci0`).
    async fn adapter(&self, name: &str) -> Result<Arc<dyn AdapterProxy>, BleError>;
}

/// Proxy for one Bluetooth adapter object.
#[async_trait]
pub trait AdapterProxy: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn address(&self) -> Result<MacAddress, BleError>;

    async fn is_powered(&self) -> Result<bool, BleError>;

    async fn set_powered(&self, powered: bool) -> Result<(), BleError>;

    async fn is_discovering(&self) -> Result<bool, BleError>;

    /// Apply the transport filter and start discovery. An operation
    /// already in progress is not an error.
    async fn start_discovery(&self, transport: Transport) -> Result<(), BleError>;

    async fn stop_discovery(&self) -> Result<(), BleError>;

    /// Ask the adapter to forget a device object.
    async fn remove_device(&self, mac: MacAddress) -> Result<(), BleError>;

    /// Enumerate device objects currently known under this adapter.
    async fn known_devices(&self) -> Result<Vec<Arc<dyn DeviceProxy>>, BleError>;

    /// Resolve a proxy for a single device object.
    async fn device(&self, mac: MacAddress) -> Result<Arc<dyn DeviceProxy>, BleError>;

    /// Subscribe to object-added/removed events. Called once per session.
    async fn events(&self) -> Result<mpsc::Receiver<AdapterSignal>, BleError>;
}

/// Proxy for one device object, including its GATT database.
#[async_trait]
pub trait DeviceProxy: Send + Sync + 'static {
    /// The address the bus reports for this object.
    fn mac(&self) -> MacAddress;

    async fn name(&self) -> Result<Option<String>, BleError>;

    async fn is_connected(&self) -> Result<bool, BleError>;

    /// Connect, bounded by the given timeout. A connect already in
    /// progress is not an error.
    async fn connect(&self, timeout: Duration) -> Result<(), BleError>;

    /// Subscribe to property changes. Dropping the receiver releases
    /// the subscription.
    async fn events(&self) -> Result<mpsc::Receiver<DeviceSignal>, BleError>;

    async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>, BleError>;

    async fn write_characteristic(&self, uuid: Uuid, payload: &[u8]) -> Result<(), BleError>;

    /// Enable notifications on a characteristic. Dropping the receiver
    /// disables them.
    async fn notify_characteristic(
        &self,
        uuid: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, BleError>;
}
