use crate::sdk::SessionAlert;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("OpenAI API key is not defined")]
    MissingCredential,

    /// The cleaned value never appears in the message.
    #[error("Invalid OpenAI API key format (expected an `sk-` prefix)")]
    MalformedCredential,

    #[error("Session negotiation failed with status {status}: {body}")]
    NegotiationFailed { status: u16, body: String },

    #[error("Malformed negotiation response: {0}")]
    MalformedResponse(String),

    #[error("SDP exchange failed with status {status}: {body}")]
    SignalingFailed { status: u16, body: String },

    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Media device unavailable: {0}")]
    MediaUnavailable(String),

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Tool handler failed: {0}")]
    HandlerFailure(String),

    #[error("A connection attempt is already in flight")]
    ConnectInProgress,

    #[error("Connect requested again within the debounce window")]
    ConnectDebounced,

    #[error("The connection attempt was torn down before it completed")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("The control channel was closed")]
    ConnectionClosed,

    #[error("HTTP protocol error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse or serialize JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Header error: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
}

impl Error {
    /// The indicator this error should raise, if any.
    ///
    /// Latch rejections and cancellations are not failures from the user's point of
    /// view and raise nothing.
    #[must_use]
    pub fn alert(&self) -> Option<SessionAlert> {
        match self {
            Self::ConnectInProgress | Self::ConnectDebounced | Self::Cancelled => None,
            Self::PermissionDenied(_) => Some(SessionAlert::PermissionNeeded),
            Self::TransportFailure(_)
            | Self::SignalingFailed { .. }
            | Self::ConnectionClosed
            | Self::Http(_) => Some(SessionAlert::ConnectionError),
            other => Some(SessionAlert::Failure(other.to_string())),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
