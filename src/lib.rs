#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod credential;
pub mod error;
pub mod protocol;
pub mod sdk;
pub mod transport;

pub use config::{AudioConstraints, VoiceConfig};
pub use credential::Credential;
pub use error::{Error, Result};
pub use protocol::client_events::ClientEvent;
pub use protocol::models::{Item, Modality, SessionUpdate, Tool};
pub use protocol::server_events::ServerEvent;
pub use sdk::{
    ConfiguratorBus, ConfiguratorEvent, DispatchOutcome, Dispatcher, LocationTable, Negotiator,
    RestNegotiator, SessionAlert, SessionState, SessionToken, Signaling, ToolCall, ToolRegistry,
    ToolResult, TransportSession, TransportSessionBuilder,
};
pub use transport::peer::{
    ControlChannel, MediaDevices, MediaStream, PeerConnection, PeerEvent, PeerFactory,
    RemoteAudioTrack, SessionDescription,
};

const TRACE_TRUNCATE_SUFFIX: &str = "... (truncated)";

/// Cut `s` to at most `max_bytes` on a char boundary, noting how much was dropped.
pub(crate) fn safe_truncate(s: &str, max_bytes: usize) -> std::borrow::Cow<'_, str> {
    if s.len() <= max_bytes {
        return std::borrow::Cow::Borrowed(s);
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    std::borrow::Cow::Owned(format!(
        "{} {} {} bytes",
        &s[..end],
        TRACE_TRUNCATE_SUFFIX,
        s.len() - end
    ))
}
