use thiserror::Error;

use crate::message::MessageId;

/// Top-level error type for the server connector.
#[derive(Debug, Error)]
pub enum LinkError {
    /// TCP, TLS or WebSocket handshake failure.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Socket I/O failure on an established link.
    #[error("websocket error: {0}")]
    Io(String),

    /// Malformed frame, oversized frame, or an unexpected message.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The server refused the gateway's registration.
    #[error("registration rejected: {0}")]
    Rejected(String),

    /// The server reported an application-level error for a request.
    #[error("server error {code}: {message}")]
    Server { code: u16, message: String },

    /// No answer arrived within the resend budget.
    #[error("no answer for request {id} after {attempts} attempts")]
    Timeout { id: MessageId, attempts: u32 },

    /// The connector was stopped while the request was pending.
    #[error("connector stopped")]
    Stopped,

    /// A configuration value failed validation.
    #[error("invalid {field}: {reason}")]
    InvalidArgument {
        field: &'static str,
        reason: String,
    },
}

impl LinkError {
    /// Returns `true` if retrying the request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Io(_) | Self::Timeout { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
