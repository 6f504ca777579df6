//! Tab-side pieces of the face broker: the call wrapper, the event session a
//! tab attaches with, the local reducer, and the voice tool-call bridge.

mod client;
mod reducer;
mod session;
mod tool_bridge;

pub use client::{BrokerClient, BrokerClientConfig, ClientError, DEFAULT_BROKER_URL};
pub use reducer::{FaceState, TabEffect, TabReducer};
pub use session::{AppliedNotification, TabSession, TabSessionError};
pub use tool_bridge::{FUNCTION_CALL_DONE_EVENT, FunctionCall, ToolBridge, ToolCallOutcome};
