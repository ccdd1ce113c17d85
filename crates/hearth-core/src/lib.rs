//! Domain model shared across the hearth gateway workspace.
//!
//! This crate owns the value types that flow between the Bluetooth layer
//! (`hearth-ble`), the upstream connector (`hearth-link`), and the daemon:
//!
//! - **Identifiers** ([`model::ident`]) — [`MacAddress`] with dual-separator
//!   parsing, [`DeviceId`] (prefix + 64-bit ident), [`ModuleId`].
//! - **Telemetry** ([`model::telemetry`]) — [`SensorData`], [`ModuleValue`],
//!   [`Timestamp`] (microseconds since epoch), [`RefreshTime`].
//! - **Device descriptions** ([`model::device`]) — the payload of a
//!   new-device announcement sent upstream.
//! - **Commands** ([`command`]) — typed requests the rest of the gateway
//!   routes through the server connector.
//!
//! The crate has no I/O and no async dependencies; everything here is a
//! plain value type with serde wire forms.

pub mod command;
pub mod error;
pub mod model;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{Command, CommandOutcome};
pub use error::ModelError;
pub use model::device::DeviceDescription;
pub use model::ident::{DeviceId, DevicePrefix, MacAddress, ModuleId};
pub use model::telemetry::{ModuleType, ModuleValue, RefreshTime, SensorData, Timestamp};
