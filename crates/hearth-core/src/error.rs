use thiserror::Error;

/// Errors produced while constructing or parsing domain values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A MAC address string did not have six two-digit hex groups.
    #[error("malformed MAC address: {0:?}")]
    MalformedMac(String),

    /// A device-id string did not match `<prefix>:<hex-ident>`.
    #[error("malformed device id: {0:?}")]
    MalformedDeviceId(String),

    /// An unrecognized device-class prefix.
    #[error("unknown device prefix: {0:?}")]
    UnknownPrefix(String),

    /// An unrecognized module type name.
    #[error("unknown module type: {0:?}")]
    UnknownModuleType(String),

    /// A value failed a range or sign constraint.
    #[error("invalid {field}: {reason}")]
    InvalidArgument {
        field: &'static str,
        reason: String,
    },
}
