//! Voice session facade: negotiation, the transport state machine and tool dispatch.
//!
//! The wire types stay reachable through `crate::protocol` when you need to build or
//! inspect control-channel messages yourself.

mod builder;
pub mod capabilities;
mod dispatcher;
mod negotiator;
mod session;
mod status;
mod tools;

pub use builder::TransportSessionBuilder;
pub use capabilities::{ConfiguratorBus, ConfiguratorEvent, LocationTable};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use negotiator::{Negotiator, RestNegotiator, SessionToken, Signaling};
pub use session::{RemoteAudioHandler, TransportSession};
pub use status::{SessionAlert, SessionState};
pub use tools::{
    BoxFuture as ToolFuture, ToolCall, ToolDefinition, ToolRegistry, ToolResult, failure_output,
    parameters_for,
};
