// ── Core identity types ──
//
// MacAddress, DeviceId and ModuleId form the foundation of the device
// inventory and of every upstream message. String forms are stable and
// round-trip through FromStr/Display.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ModelError;

// ── MacAddress ──────────────────────────────────────────────────────

/// 48-bit Bluetooth hardware address.
///
/// Parses from colon- or underscore-separated hex (case-insensitive) and
/// renders with either separator; BlueZ object paths use the underscore
/// form (`dev_AA_BB_CC_DD_EE_FF`), everything else uses colons. Equality
/// and hashing are on the six raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Parse a MAC address split by the given separator.
    pub fn parse(raw: &str, separator: char) -> Result<Self, ModelError> {
        let mut octets = [0u8; 6];
        let mut count = 0;

        for group in raw.split(separator) {
            if count == 6 || group.len() != 2 {
                return Err(ModelError::MalformedMac(raw.to_string()));
            }
            octets[count] = u8::from_str_radix(group, 16)
                .map_err(|_| ModelError::MalformedMac(raw.to_string()))?;
            count += 1;
        }

        if count != 6 {
            return Err(ModelError::MalformedMac(raw.to_string()));
        }

        Ok(Self(octets))
    }

    /// Render as uppercase hex groups joined by the given separator.
    pub fn render(&self, separator: char) -> String {
        let mut out = String::with_capacity(17);
        for (i, octet) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(separator);
            }
            out.push_str(&format!("{octet:02X}"));
        }
        out
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(':'))
    }
}

impl FromStr for MacAddress {
    type Err = ModelError;

    /// Accepts both the colon and the underscore form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let separator = if s.contains('_') { '_' } else { ':' };
        Self::parse(s, separator)
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ── DevicePrefix ────────────────────────────────────────────────────

/// Device class. The prefix of a [`DeviceId`] determines which manager
/// is responsible for the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePrefix {
    Virtual,
    Ble,
    Classic,
}

impl DevicePrefix {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Virtual => "virtual",
            Self::Ble => "ble",
            Self::Classic => "classic",
        }
    }
}

impl fmt::Display for DevicePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DevicePrefix {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "virtual" => Ok(Self::Virtual),
            "ble" => Ok(Self::Ble),
            "classic" => Ok(Self::Classic),
            other => Err(ModelError::UnknownPrefix(other.to_string())),
        }
    }
}

// ── DeviceId ────────────────────────────────────────────────────────

/// Gateway-wide device identifier: a class prefix plus a 64-bit ident.
///
/// String form is `<prefix>:<ident-hex>`, e.g. `ble:a1b2c3d4e5f6`.
/// Ordering is total: by prefix, then by ident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId {
    pub prefix: DevicePrefix,
    pub ident: u64,
}

impl DeviceId {
    pub const fn new(prefix: DevicePrefix, ident: u64) -> Self {
        Self { prefix, ident }
    }

    /// Derive a BLE device id from the hardware address.
    pub fn from_mac(prefix: DevicePrefix, mac: MacAddress) -> Self {
        let mut ident = 0u64;
        for octet in mac.octets() {
            ident = (ident << 8) | u64::from(octet);
        }
        Self { prefix, ident }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:x}", self.prefix, self.ident)
    }
}

impl FromStr for DeviceId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, ident) = s
            .split_once(':')
            .ok_or_else(|| ModelError::MalformedDeviceId(s.to_string()))?;

        Ok(Self {
            prefix: prefix.parse()?,
            ident: u64::from_str_radix(ident, 16)
                .map_err(|_| ModelError::MalformedDeviceId(s.to_string()))?,
        })
    }
}

impl Serialize for DeviceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ── ModuleId ────────────────────────────────────────────────────────

/// Index of a sensor or actuator module within a device.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ModuleId(pub u16);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ModuleId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u16>()
            .map(Self)
            .map_err(|_| ModelError::InvalidArgument {
                field: "module id",
                reason: format!("{s:?} is not a 16-bit integer"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_parses_colon_form() {
        let mac = MacAddress::parse("AA:BB:CC:DD:EE:FF", ':').unwrap();
        assert_eq!(mac.octets(), [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    }

    #[test]
    fn mac_parses_underscore_form() {
        let mac = MacAddress::parse("aa_bb_cc_dd_ee_ff", '_').unwrap();
        assert_eq!(mac.octets(), [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    }

    #[test]
    fn mac_round_trips_both_separators() {
        let mac = MacAddress::new([0x01, 0x23, 0x45, 0x67, 0x89, 0xAB]);
        assert_eq!(MacAddress::parse(&mac.render(':'), ':').unwrap(), mac);
        assert_eq!(MacAddress::parse(&mac.render('_'), '_').unwrap(), mac);
    }

    #[test]
    fn mac_parse_is_case_insensitive() {
        let upper = MacAddress::parse("AA:BB:CC:DD:EE:FF", ':').unwrap();
        let lower = MacAddress::parse("aa:bb:cc:dd:ee:ff", ':').unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn mac_rejects_malformed_input() {
        assert!(MacAddress::parse("AA:BB:CC:DD:EE", ':').is_err());
        assert!(MacAddress::parse("AA:BB:CC:DD:EE:FF:00", ':').is_err());
        assert!(MacAddress::parse("AA:BB:CC:DD:EE:GG", ':').is_err());
        assert!(MacAddress::parse("AABBCCDDEEFF", ':').is_err());
    }

    #[test]
    fn mac_from_str_detects_separator() {
        let colon: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let under: MacAddress = "AA_BB_CC_DD_EE_FF".parse().unwrap();
        assert_eq!(colon, under);
    }

    #[test]
    fn device_id_string_round_trip() {
        let id = DeviceId::new(DevicePrefix::Ble, 0xa1b2c3d4e5f6);
        assert_eq!(id.to_string(), "ble:a1b2c3d4e5f6");
        assert_eq!(id.to_string().parse::<DeviceId>().unwrap(), id);
    }

    #[test]
    fn device_id_ordering_is_prefix_first() {
        let virt = DeviceId::new(DevicePrefix::Virtual, u64::MAX);
        let ble = DeviceId::new(DevicePrefix::Ble, 0);
        assert!(virt < ble);
    }

    #[test]
    fn device_id_from_mac_packs_octets() {
        let mac = MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let id = DeviceId::from_mac(DevicePrefix::Ble, mac);
        assert_eq!(id.ident, 0xAABBCCDDEEFF);
    }

    #[test]
    fn mac_serde_uses_colon_string() {
        let mac = MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"AA:BB:CC:DD:EE:FF\"");
        let back: MacAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
    }
}
