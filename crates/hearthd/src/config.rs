// ── Daemon configuration ──
//
// TOML file merged with HEARTHD_-prefixed environment variables via
// figment. Key names are the historical camelCase forms the rest of
// the deployment tooling already uses (including the long-standing
// "Avaibility" spelling); values are whole seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use hearth_ble::SessionTiming;
use hearth_link::{GatewayInfo, LinkConfig, TlsMode};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── Sections ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub bluetooth: BluetoothSection,
    pub server: ServerSection,
    pub gateway: GatewaySection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bluetooth: BluetoothSection::default(),
            server: ServerSection::default(),
            gateway: GatewaySection::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BluetoothSection {
    /// Adapter to run the session on.
    pub adapter: String,

    /// Seconds an RSSI observation stays fresh for scan results.
    pub le_max_age_rssi: u64,

    /// Seconds of silence before an unwatched device is evicted.
    pub le_max_unavailability_time: u64,

    /// Seconds a previously seen Classic device keeps being reported
    /// present despite negative detects.
    pub classic_artificial_avaibility_timeout: u64,
}

impl Default for BluetoothSection {
    fn default() -> Self {
        Self {
            adapter: "hci0".into(),
            le_max_age_rssi: 30,
            le_max_unavailability_time: 7 * 24 * 60 * 60,
            classic_artificial_avaibility_timeout: 30,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub poll_timeout: u64,
    pub receive_timeout: u64,
    pub send_timeout: u64,
    pub retry_connect_timeout: u64,
    pub busy_sleep: u64,
    pub resend_timeout: u64,
    pub max_message_size: usize,
    pub ssl: SslSection,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8443,
            poll_timeout: 1,
            receive_timeout: 30,
            send_timeout: 5,
            retry_connect_timeout: 10,
            busy_sleep: 30,
            resend_timeout: 20,
            max_message_size: 4096,
            ssl: SslSection::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SslSection {
    pub enable: bool,
    pub ca_file: Option<PathBuf>,
    pub accept_invalid: bool,
}

impl Default for SslSection {
    fn default() -> Self {
        Self {
            enable: true,
            ca_file: None,
            accept_invalid: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySection {
    /// Identity presented during registration. Must be set.
    pub id: String,

    /// Seconds between discovery rounds announcing new devices.
    pub announce_interval: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            id: String::new(),
            announce_interval: 30,
        }
    }
}

// ── Loading and translation ─────────────────────────────────────────

impl Config {
    /// Load from the given file (or the default location) plus
    /// `HEARTHD_`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_path);

        let config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("HEARTHD_"))
            .extract()?;

        Ok(config)
    }

    fn default_path() -> PathBuf {
        ProjectDirs::from("org", "hearth", "hearthd")
            .map(|dirs| dirs.config_dir().join("hearthd.toml"))
            .unwrap_or_else(|| PathBuf::from("hearthd.toml"))
    }

    pub fn session_timing(&self) -> SessionTiming {
        SessionTiming {
            le_max_age_rssi: Duration::from_secs(self.bluetooth.le_max_age_rssi),
            le_max_unavailability_time: Duration::from_secs(
                self.bluetooth.le_max_unavailability_time,
            ),
            classic_artificial_availability_timeout: Duration::from_secs(
                self.bluetooth.classic_artificial_avaibility_timeout,
            ),
        }
    }

    pub fn link_config(&self) -> LinkConfig {
        let server = &self.server;

        let tls = if !server.ssl.enable {
            TlsMode::Disabled
        } else if server.ssl.accept_invalid {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref ca) = server.ssl.ca_file {
            TlsMode::CustomCa(ca.clone())
        } else {
            TlsMode::System
        };

        LinkConfig {
            host: server.host.clone(),
            port: server.port,
            tls,
            poll_timeout: Duration::from_secs(server.poll_timeout),
            receive_timeout: Duration::from_secs(server.receive_timeout),
            send_timeout: Duration::from_secs(server.send_timeout),
            retry_connect_timeout: Duration::from_secs(server.retry_connect_timeout),
            busy_sleep: Duration::from_secs(server.busy_sleep),
            resend_timeout: Duration::from_secs(server.resend_timeout),
            max_message_size: server.max_message_size,
            gateway: GatewayInfo {
                gateway_id: self.gateway.id.clone(),
                version: env!("CARGO_PKG_VERSION").into(),
                ip_address: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case_keys_are_recognized() {
        let raw = r#"
            [bluetooth]
            adapter = "hci1"
            leMaxAgeRssi = 15
            leMaxUnavailabilityTime = 60
            classicArtificialAvaibilityTimeout = 45

            [server]
            host = "gw.example.org"
            resendTimeout = 7
            maxMessageSize = 8192

            [server.ssl]
            acceptInvalid = true

            [gateway]
            id = "1216850908695427"
        "#;

        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.bluetooth.adapter, "hci1");
        assert_eq!(config.bluetooth.le_max_age_rssi, 15);
        assert_eq!(config.bluetooth.classic_artificial_avaibility_timeout, 45);

        let timing = config.session_timing();
        assert_eq!(timing.le_max_unavailability_time, Duration::from_secs(60));

        let link = config.link_config();
        assert_eq!(link.host, "gw.example.org");
        assert_eq!(link.resend_timeout, Duration::from_secs(7));
        assert_eq!(link.max_message_size, 8192);
        assert!(matches!(link.tls, TlsMode::DangerAcceptInvalid));
        assert_eq!(link.gateway.gateway_id, "1216850908695427");
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let config: Config = toml::from_str("[gateway]\nid = \"g\"\n").unwrap();
        assert_eq!(config.bluetooth.adapter, "hci0");
        assert_eq!(config.server.port, 8443);
        assert!(matches!(config.link_config().tls, TlsMode::System));
    }

    #[test]
    fn disabled_ssl_maps_to_plain_ws() {
        let config: Config =
            toml::from_str("[server.ssl]\nenable = false\n[gateway]\nid = \"g\"\n").unwrap();
        assert!(matches!(config.link_config().tls, TlsMode::Disabled));
    }
}
