// ── Telemetry value model ──
//
// SensorData is the unit of telemetry relayed upstream: one device, one
// timestamp, a batch of module values. Timestamps are microseconds since
// the Unix epoch and monotonic non-decreasing per device entry.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::model::ident::{DeviceId, ModuleId};

// ── ModuleType ──────────────────────────────────────────────────────

/// Kind of value a device module measures or controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    Temperature,
    Humidity,
    Brightness,
    OnOff,
    Color,
    ColorTemperature,
    Rssi,
    Battery,
}

impl ModuleType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Brightness => "brightness",
            Self::OnOff => "on_off",
            Self::Color => "color",
            Self::ColorTemperature => "color_temperature",
            Self::Rssi => "rssi",
            Self::Battery => "battery",
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temperature" => Ok(Self::Temperature),
            "humidity" => Ok(Self::Humidity),
            "brightness" => Ok(Self::Brightness),
            "on_off" => Ok(Self::OnOff),
            "color" => Ok(Self::Color),
            "color_temperature" => Ok(Self::ColorTemperature),
            "rssi" => Ok(Self::Rssi),
            "battery" => Ok(Self::Battery),
            other => Err(ModelError::UnknownModuleType(other.to_string())),
        }
    }
}

// ── RefreshTime ─────────────────────────────────────────────────────

/// How often a device should be polled. `None` means the device is not
/// pollable at all; a polling period must be strictly positive.
///
/// Wire form is whole seconds, with `-1` standing for "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTime {
    None,
    Every(Duration),
}

impl RefreshTime {
    pub fn every_secs(secs: u64) -> Result<Self, ModelError> {
        if secs == 0 {
            return Err(ModelError::InvalidArgument {
                field: "refresh time",
                reason: "polling period must be strictly positive".into(),
            });
        }
        Ok(Self::Every(Duration::from_secs(secs)))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn period(&self) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Every(d) => Some(*d),
        }
    }
}

impl Serialize for RefreshTime {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::None => serializer.serialize_i64(-1),
            Self::Every(d) => serializer.serialize_i64(d.as_secs() as i64),
        }
    }
}

impl<'de> Deserialize<'de> for RefreshTime {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let secs = i64::deserialize(deserializer)?;
        if secs < 0 {
            return Ok(Self::None);
        }
        Self::every_secs(secs as u64).map_err(serde::de::Error::custom)
    }
}

// ── Timestamp ───────────────────────────────────────────────────────

/// Microseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_micros())
    }

    pub const fn as_micros(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Utc.timestamp_micros(self.0).single() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}us", self.0),
        }
    }
}

// ── ModuleValue / SensorData ────────────────────────────────────────

/// One measured or reported value of a single device module.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModuleValue {
    pub module: ModuleId,
    pub value: f64,
}

impl ModuleValue {
    pub const fn new(module: ModuleId, value: f64) -> Self {
        Self { module, value }
    }
}

/// A batch of module values reported by one device at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorData {
    pub device: DeviceId,
    pub at: Timestamp,
    pub values: Vec<ModuleValue>,
}

impl SensorData {
    pub fn new(device: DeviceId, values: Vec<ModuleValue>) -> Self {
        Self {
            device,
            at: Timestamp::now(),
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ident::DevicePrefix;

    #[test]
    fn refresh_time_rejects_zero() {
        assert!(RefreshTime::every_secs(0).is_err());
        assert!(RefreshTime::every_secs(30).is_ok());
    }

    #[test]
    fn refresh_time_wire_form() {
        assert_eq!(serde_json::to_string(&RefreshTime::None).unwrap(), "-1");
        let every = RefreshTime::every_secs(30).unwrap();
        assert_eq!(serde_json::to_string(&every).unwrap(), "30");

        let none: RefreshTime = serde_json::from_str("-1").unwrap();
        assert!(none.is_none());
        let back: RefreshTime = serde_json::from_str("30").unwrap();
        assert_eq!(back, every);
        assert!(serde_json::from_str::<RefreshTime>("0").is_err());
    }

    #[test]
    fn module_type_string_round_trip() {
        for mt in [
            ModuleType::Temperature,
            ModuleType::OnOff,
            ModuleType::ColorTemperature,
        ] {
            assert_eq!(mt.as_str().parse::<ModuleType>().unwrap(), mt);
        }
    }

    #[test]
    fn timestamp_now_is_positive_and_ordered() {
        let a = Timestamp::now();
        let b = Timestamp::now();
        assert!(a.as_micros() > 0);
        assert!(a <= b);
    }

    #[test]
    fn sensor_data_serde_round_trip() {
        let data = SensorData {
            device: DeviceId::new(DevicePrefix::Ble, 0xAABB),
            at: Timestamp(1_700_000_000_000_000),
            values: vec![ModuleValue::new(ModuleId(0), 21.5)],
        };

        let json = serde_json::to_string(&data).unwrap();
        let back: SensorData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, data);
    }
}
