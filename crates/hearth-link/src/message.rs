// ── Wire protocol ──
//
// One JSON message per WebSocket frame, tagged by `message_type`.
// Every outbound message carries a client-generated id; the server
// echoes it in the answer, which is how the context poll correlates
// responses. Ids are stable across resends, making resends idempotent
// at the server.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hearth_core::{DeviceDescription, DeviceId, DevicePrefix, ModuleId, SensorData};

/// Client-generated request identifier.
pub type MessageId = Uuid;

/// Identity the gateway presents during registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayInfo {
    pub gateway_id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<std::net::IpAddr>,
}

// ── Gateway → server ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum GatewayMessage {
    /// First message after every (re)connect.
    GatewayRegister {
        id: MessageId,
        #[serde(flatten)]
        info: GatewayInfo,
    },

    /// Announce a freshly discovered device.
    NewDeviceRequest {
        id: MessageId,
        device: DeviceDescription,
    },

    /// Ask which devices of a class are paired.
    DeviceListRequest {
        id: MessageId,
        device_prefix: DevicePrefix,
    },

    /// Ask for the last value the server stores for a module.
    LastValueRequest {
        id: MessageId,
        device_id: DeviceId,
        module_id: ModuleId,
    },

    /// Telemetry export. Confirmed by the server per id.
    SensorDataExport {
        id: MessageId,
        data: Vec<SensorData>,
    },
}

impl GatewayMessage {
    pub fn id(&self) -> MessageId {
        match self {
            Self::GatewayRegister { id, .. }
            | Self::NewDeviceRequest { id, .. }
            | Self::DeviceListRequest { id, .. }
            | Self::LastValueRequest { id, .. }
            | Self::SensorDataExport { id, .. } => *id,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GatewayRegister { .. } => "gateway_register",
            Self::NewDeviceRequest { .. } => "new_device_request",
            Self::DeviceListRequest { .. } => "device_list_request",
            Self::LastValueRequest { .. } => "last_value_request",
            Self::SensorDataExport { .. } => "sensor_data_export",
        }
    }
}

// ── Server → gateway ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration accepted; the link is ready for traffic.
    GatewayAccepted { id: MessageId },

    /// Registration refused.
    GatewayRejected { id: MessageId, reason: String },

    /// Plain acknowledgement of a request without response data.
    GenericAck { id: MessageId },

    DeviceListResponse {
        id: MessageId,
        devices: Vec<DeviceId>,
    },

    LastValueResponse { id: MessageId, value: f64 },

    /// Telemetry confirmed as durably received.
    SensorDataConfirm { id: MessageId },

    /// Application-level failure for the given request.
    ServerError {
        id: MessageId,
        code: u16,
        message: String,
    },
}

impl ServerMessage {
    pub fn id(&self) -> MessageId {
        match self {
            Self::GatewayAccepted { id }
            | Self::GatewayRejected { id, .. }
            | Self::GenericAck { id }
            | Self::DeviceListResponse { id, .. }
            | Self::LastValueResponse { id, .. }
            | Self::SensorDataConfirm { id }
            | Self::ServerError { id, .. } => *id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::{ModuleType, RefreshTime};

    #[test]
    fn register_message_flattens_gateway_info() {
        let id = Uuid::new_v4();
        let msg = GatewayMessage::GatewayRegister {
            id,
            info: GatewayInfo {
                gateway_id: "1216850908695427".into(),
                version: "0.3.0".into(),
                ip_address: None,
            },
        };

        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(json["message_type"], "gateway_register");
        assert_eq!(json["gateway_id"], "1216850908695427");
        assert_eq!(json["id"], id.to_string());
    }

    #[test]
    fn new_device_round_trip() {
        let msg = GatewayMessage::NewDeviceRequest {
            id: Uuid::new_v4(),
            device: DeviceDescription {
                id: DeviceId::new(DevicePrefix::Ble, 0xAABBCCDDEEFF),
                vendor: "Revogi".into(),
                product_name: "Smart Plug".into(),
                module_types: vec![ModuleType::OnOff],
                refresh: RefreshTime::every_secs(5).unwrap(),
                mac: None,
            },
        };

        let json = serde_json::to_string(&msg).unwrap();
        let back: GatewayMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn server_message_id_is_uniform() {
        let id = Uuid::new_v4();
        for msg in [
            ServerMessage::GatewayAccepted { id },
            ServerMessage::GenericAck { id },
            ServerMessage::LastValueResponse { id, value: 1.5 },
            ServerMessage::ServerError {
                id,
                code: 13,
                message: "unknown device".into(),
            },
        ] {
            assert_eq!(msg.id(), id);
        }
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let raw = r#"{"message_type":"gateway_selfdestruct","id":"1f3b1b1e-0000-0000-0000-000000000000"}"#;
        assert!(serde_json::from_str::<ServerMessage>(raw).is_err());
    }
}
