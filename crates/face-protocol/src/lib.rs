//! Face bridge wire contracts.
//!
//! This crate owns the JSON shapes exchanged between tabs and the broker:
//! call/response envelopes on `POST /mcp` and broadcast notifications on the
//! tab event stream. It carries no transport or runtime code.

pub mod envelope;
pub mod face;
pub mod methods;
pub mod notification;

pub use envelope::{
    CallEnvelope, CallResult, ContentItem, JSONRPC_VERSION, RequestId, ResponseEnvelope,
    ResponseOutcome, RpcError, RpcErrorCode,
};
pub use face::{FaceName, Mood, UnknownValue};
pub use notification::{BroadcastNotification, TabEvent, WebhookOutcome};

/// Path of the synthetic remote-control endpoint.
pub const MCP_PATH: &str = "/mcp";
/// Path of the tab event stream (WebSocket).
pub const EVENTS_PATH: &str = "/events";
