// ── GATT connection ──

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use crate::bus::DeviceProxy;
use crate::error::BleError;

/// Short-lived handle for GATT reads and writes against one device.
///
/// Created by [`AdapterSession::connect`](crate::AdapterSession::connect)
/// for a single interaction (a poll, a command) and dropped afterwards;
/// device drivers address characteristics by UUID.
pub struct HciConnection {
    device: Arc<dyn DeviceProxy>,
    timeout: Duration,
}

impl HciConnection {
    pub(crate) fn new(device: Arc<dyn DeviceProxy>, timeout: Duration) -> Self {
        Self { device, timeout }
    }

    /// Read the value of a characteristic.
    pub async fn read(&self, uuid: Uuid) -> Result<Vec<u8>, BleError> {
        self.device.read_characteristic(uuid).await
    }

    /// Write a value to a characteristic.
    pub async fn write(&self, uuid: Uuid, payload: &[u8]) -> Result<(), BleError> {
        self.device.write_characteristic(uuid, payload).await
    }

    /// Enable notifications on `notify_uuid`, write `payload` to
    /// `write_uuid`, and wait for a single notification. Notifications
    /// are disabled again when the subscription is dropped.
    pub async fn notified_write(
        &self,
        notify_uuid: Uuid,
        write_uuid: Uuid,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, BleError> {
        let mut notifications = self.device.notify_characteristic(notify_uuid).await?;

        self.device.write_characteristic(write_uuid, payload).await?;

        match tokio::time::timeout(timeout, notifications.recv()).await {
            Ok(Some(response)) => {
                debug!(
                    device = %self.device.mac(),
                    bytes = response.len(),
                    "notification received"
                );
                Ok(response)
            }
            Ok(None) => Err(BleError::Bus(format!(
                "notification stream of {} closed",
                self.device.mac()
            ))),
            Err(_) => Err(BleError::Timeout(format!(
                "notification from {}",
                self.device.mac()
            ))),
        }
    }

    /// The per-operation timeout this connection was opened with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
