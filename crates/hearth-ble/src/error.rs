use hearth_core::MacAddress;
use thiserror::Error;

/// Top-level error type for the Bluetooth layer.
#[derive(Debug, Error)]
pub enum BleError {
    /// The requested device is not in the inventory.
    #[error("device {0} is not known")]
    DeviceNotFound(MacAddress),

    /// The named adapter does not exist on the system bus.
    #[error("adapter {0} is not available")]
    AdapterNotFound(String),

    /// A bounded wait ran out (power change, GATT notification, connect).
    #[error("{0} timed out")]
    Timeout(String),

    /// The system bus or the controller reported a failure.
    #[error("bus error: {0}")]
    Bus(String),

    /// A configuration value failed validation.
    #[error("invalid {field}: {reason}")]
    InvalidArgument {
        field: &'static str,
        reason: String,
    },
}

impl BleError {
    /// Returns `true` for errors a caller may retry after a delay.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DeviceNotFound(_) | Self::AdapterNotFound(_))
    }
}
