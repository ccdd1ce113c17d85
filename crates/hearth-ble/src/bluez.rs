// ── BlueZ D-Bus implementation of the bus seam ──
//
// Talks to bluetoothd through the `bluer` crate: adapter objects under
// `/org/bluez/<name>`, device objects under
// `/org/bluez/<name>/dev_XX_XX_XX_XX_XX_XX`. Discovery runs with the
// `{Transport: "le"}` filter and stays active for as long as the
// discovery stream is held. "In progress" answers from the daemon are
// recovered locally and never surface to callers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bluer::{
    Adapter, AdapterEvent, Address, DeviceEvent, DeviceProperty, DiscoveryFilter,
    DiscoveryTransport, Session,
};
use futures_util::StreamExt;
use hearth_core::MacAddress;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::bus::{
    AdapterProxy, AdapterSignal, DeviceProxy, DeviceSignal, HostBus, Transport,
    EVENT_CHANNEL_CAPACITY,
};
use crate::error::BleError;

fn bus_err(err: bluer::Error) -> BleError {
    BleError::Bus(err.to_string())
}

/// Treat `org.bluez.Error.InProgress` as success.
fn recover_in_progress(result: bluer::Result<()>) -> Result<(), BleError> {
    match result {
        Err(err) if err.kind == bluer::ErrorKind::InProgress => {
            debug!("bus reports operation already in progress, continuing");
            Ok(())
        }
        other => other.map_err(bus_err),
    }
}

// ── BluezBus ────────────────────────────────────────────────────────

/// Production [`HostBus`] backed by a bluetoothd session.
pub struct BluezBus {
    session: Session,
}

impl BluezBus {
    pub async fn connect() -> Result<Self, BleError> {
        let session = Session::new().await.map_err(bus_err)?;
        Ok(Self { session })
    }
}

#[async_trait]
impl HostBus for BluezBus {
    async fn adapter(&self, name: &str) -> Result<Arc<dyn AdapterProxy>, BleError> {
        let adapter = self
            .session
            .adapter(name)
            .map_err(|_| BleError::AdapterNotFound(name.to_string()))?;

        Ok(Arc::new(BluezAdapter {
            name: name.to_string(),
            adapter,
            discovery: Mutex::new(None),
        }))
    }
}

// ── BluezAdapter ────────────────────────────────────────────────────

struct BluezAdapter {
    name: String,
    adapter: Adapter,
    /// Token of the task holding the discovery stream. Discovery stays
    /// active while the stream is alive; cancelling drops it.
    discovery: Mutex<Option<CancellationToken>>,
}

#[async_trait]
impl AdapterProxy for BluezAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn address(&self) -> Result<MacAddress, BleError> {
        let addr = self.adapter.address().await.map_err(bus_err)?;
        Ok(MacAddress::new(addr.0))
    }

    async fn is_powered(&self) -> Result<bool, BleError> {
        self.adapter.is_powered().await.map_err(bus_err)
    }

    async fn set_powered(&self, powered: bool) -> Result<(), BleError> {
        self.adapter.set_powered(powered).await.map_err(bus_err)
    }

    async fn is_discovering(&self) -> Result<bool, BleError> {
        self.adapter.is_discovering().await.map_err(bus_err)
    }

    async fn start_discovery(&self, transport: Transport) -> Result<(), BleError> {
        let mut guard = self.discovery.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        // Someone else (another process) may already be scanning.
        if self.adapter.is_discovering().await.map_err(bus_err)? {
            return Ok(());
        }

        let filter = DiscoveryFilter {
            transport: match transport {
                Transport::Le => DiscoveryTransport::Le,
                Transport::BrEdr => DiscoveryTransport::BrEdr,
                Transport::Auto => DiscoveryTransport::Auto,
            },
            ..Default::default()
        };
        recover_in_progress(self.adapter.set_discovery_filter(filter).await)?;

        let stream = match self.adapter.discover_devices().await {
            Ok(stream) => stream,
            Err(err) if err.kind == bluer::ErrorKind::InProgress => return Ok(()),
            Err(err) => return Err(bus_err(err)),
        };

        // Hold the stream until cancelled; device-added events reach the
        // session through the `events()` subscription, so items here are
        // only drained.
        let token = CancellationToken::new();
        let task_token = token.clone();
        tokio::spawn(async move {
            let mut stream = std::pin::pin!(stream);
            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    event = stream.next() => {
                        if event.is_none() {
                            break;
                        }
                        trace!("discovery event drained");
                    }
                }
            }
        });

        *guard = Some(token);
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<(), BleError> {
        if let Some(token) = self.discovery.lock().await.take() {
            token.cancel();
        }
        Ok(())
    }

    async fn remove_device(&self, mac: MacAddress) -> Result<(), BleError> {
        self.adapter
            .remove_device(Address(mac.octets()))
            .await
            .map_err(bus_err)
    }

    async fn known_devices(&self) -> Result<Vec<Arc<dyn DeviceProxy>>, BleError> {
        let mut devices: Vec<Arc<dyn DeviceProxy>> = Vec::new();

        for addr in self.adapter.device_addresses().await.map_err(bus_err)? {
            match self.adapter.device(addr) {
                Ok(device) => devices.push(Arc::new(BluezDevice {
                    mac: MacAddress::new(addr.0),
                    device,
                })),
                Err(err) => {
                    warn!(address = %addr, error = %err, "skipping unreadable device object");
                }
            }
        }

        Ok(devices)
    }

    async fn device(&self, mac: MacAddress) -> Result<Arc<dyn DeviceProxy>, BleError> {
        let device = self
            .adapter
            .device(Address(mac.octets()))
            .map_err(|_| BleError::DeviceNotFound(mac))?;

        Ok(Arc::new(BluezDevice { mac, device }))
    }

    async fn events(&self) -> Result<mpsc::Receiver<AdapterSignal>, BleError> {
        let stream = self.adapter.events().await.map_err(bus_err)?;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut stream = std::pin::pin!(stream);
            while let Some(event) = stream.next().await {
                let signal = match event {
                    AdapterEvent::DeviceAdded(addr) => {
                        AdapterSignal::DeviceAdded(MacAddress::new(addr.0))
                    }
                    AdapterEvent::DeviceRemoved(addr) => {
                        AdapterSignal::DeviceRemoved(MacAddress::new(addr.0))
                    }
                    AdapterEvent::PropertyChanged(_) => continue,
                };
                if tx.send(signal).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}

// ── BluezDevice ─────────────────────────────────────────────────────

struct BluezDevice {
    mac: MacAddress,
    device: bluer::Device,
}

impl BluezDevice {
    async fn characteristic(
        &self,
        uuid: Uuid,
    ) -> Result<bluer::gatt::remote::Characteristic, BleError> {
        for service in self.device.services().await.map_err(bus_err)? {
            for characteristic in service.characteristics().await.map_err(bus_err)? {
                if characteristic.uuid().await.map_err(bus_err)? == uuid {
                    return Ok(characteristic);
                }
            }
        }

        Err(BleError::Bus(format!(
            "device {} has no characteristic {uuid}",
            self.mac
        )))
    }
}

#[async_trait]
impl DeviceProxy for BluezDevice {
    fn mac(&self) -> MacAddress {
        self.mac
    }

    async fn name(&self) -> Result<Option<String>, BleError> {
        self.device.name().await.map_err(bus_err)
    }

    async fn is_connected(&self) -> Result<bool, BleError> {
        self.device.is_connected().await.map_err(bus_err)
    }

    async fn connect(&self, timeout: Duration) -> Result<(), BleError> {
        match tokio::time::timeout(timeout, self.device.connect()).await {
            Ok(result) => recover_in_progress(result),
            Err(_) => Err(BleError::Timeout(format!("connect to {}", self.mac))),
        }
    }

    async fn events(&self) -> Result<mpsc::Receiver<DeviceSignal>, BleError> {
        let stream = self.device.events().await.map_err(bus_err)?;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut stream = std::pin::pin!(stream);
            while let Some(DeviceEvent::PropertyChanged(property)) = stream.next().await {
                let signal = match property {
                    DeviceProperty::Rssi(rssi) => DeviceSignal::Rssi(rssi),
                    DeviceProperty::ManufacturerData(data) => {
                        DeviceSignal::ManufacturerData(data)
                    }
                    _ => continue,
                };
                if tx.send(signal).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>, BleError> {
        self.characteristic(uuid)
            .await?
            .read()
            .await
            .map_err(bus_err)
    }

    async fn write_characteristic(&self, uuid: Uuid, payload: &[u8]) -> Result<(), BleError> {
        self.characteristic(uuid)
            .await?
            .write(payload)
            .await
            .map_err(bus_err)
    }

    async fn notify_characteristic(
        &self,
        uuid: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, BleError> {
        let characteristic = self.characteristic(uuid).await?;
        let stream = characteristic.notify().await.map_err(bus_err)?;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // Dropping the receiver ends this task, which drops the notify
        // session and disables notifications on the device.
        tokio::spawn(async move {
            let mut stream = std::pin::pin!(stream);
            while let Some(payload) = stream.next().await {
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}
