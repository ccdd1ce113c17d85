// ── Command API ──
//
// Requests the rest of the gateway routes through the server connector.
// Each command translates to exactly one outbound message; the caller is
// completed when the correlated answer arrives, a terminal resend
// failure occurs, or the connector is stopped.

use crate::model::device::DeviceDescription;
use crate::model::ident::{DeviceId, DevicePrefix, ModuleId};

/// A request for the upstream server.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Announce a freshly discovered device.
    NewDevice(DeviceDescription),

    /// Ask which devices of the given class are paired on the server.
    DeviceList { prefix: DevicePrefix },

    /// Ask for the last value the server knows for a module.
    LastValue { device: DeviceId, module: ModuleId },
}

/// The server's answer to a [`Command`].
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// The server acknowledged the request without data.
    Accepted,

    /// Paired devices of the requested class.
    DeviceList(Vec<DeviceId>),

    /// Last known value of the requested module.
    LastValue(f64),
}
