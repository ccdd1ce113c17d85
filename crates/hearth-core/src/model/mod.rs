// ── Gateway domain model ──
//
// Canonical value types used by every other crate in the workspace.
// All wire forms (serde) live with the types they describe.

pub mod device;
pub mod ident;
pub mod telemetry;

pub use device::DeviceDescription;
pub use ident::{DeviceId, DevicePrefix, MacAddress, ModuleId};
pub use telemetry::{ModuleType, ModuleValue, RefreshTime, SensorData, Timestamp};
