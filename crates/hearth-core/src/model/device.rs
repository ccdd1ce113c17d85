// ── Device description ──

use serde::{Deserialize, Serialize};

use crate::model::ident::{DeviceId, MacAddress};
use crate::model::telemetry::{ModuleType, RefreshTime};

/// Everything the gateway knows about a freshly discovered device.
///
/// This is the payload of a new-device announcement: the upstream server
/// uses it to decide whether the device should be paired and how often
/// its modules should be polled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescription {
    pub id: DeviceId,
    pub vendor: String,
    pub product_name: String,
    pub module_types: Vec<ModuleType>,
    pub refresh: RefreshTime,
    /// Hardware address, when the device class has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<MacAddress>,
}

impl DeviceDescription {
    /// Whether the server may schedule periodic polling for this device.
    pub fn supports_refresh(&self) -> bool {
        !self.refresh.is_none()
    }
}
