//! Upstream server connector for the hearth gateway.
//!
//! Maintains one persistent WebSocket link to the server and relays
//! commands and telemetry over it:
//!
//! - **[`Connector`]** — sender/receiver task pair with a reconnect +
//!   re-register handshake. The sender owns the connection state
//!   machine; the receiver dispatches server messages and can only
//!   demote the link to disconnected.
//! - **Output queue** — FIFO of outbound contexts, each carrying a
//!   resend deadline. Contexts that go unanswered are re-sent a bounded
//!   number of times, then failed with a timeout.
//! - **Context poll** — correlation table from request id to the
//!   awaiter of the eventual server answer.
//! - **[`message`]** — the tagged-JSON wire protocol, one serialized
//!   message per WebSocket frame.
//!
//! Commands ([`hearth_core::Command`]) enter through
//! [`Connector::execute`]; telemetry through [`Connector::export`].
//! Both complete when the correlated answer arrives, a terminal resend
//! failure occurs, or the connector is stopped.

pub mod connector;
pub mod error;
pub mod message;
pub(crate) mod poll;
pub(crate) mod queue;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use connector::{Connector, LinkConfig, LinkState};
pub use error::LinkError;
pub use message::{GatewayInfo, GatewayMessage, MessageId, ServerMessage};
pub use transport::TlsMode;
