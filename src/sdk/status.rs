use std::fmt;

/// Lifecycle of a [`super::TransportSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Negotiating,
    Connecting,
    Open,
    Closing,
    Failed,
}

impl SessionState {
    /// The microphone indicator is lit only while a session is live.
    #[must_use]
    pub const fn is_mic_on(self) -> bool {
        matches!(self, Self::Open)
    }

    #[must_use]
    pub const fn is_connecting(self) -> bool {
        matches!(self, Self::Negotiating | Self::Connecting)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Negotiating => "negotiating",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Failed => "failed",
        };
        write!(f, "{label}")
    }
}

/// A persistent, dismissible user-facing indicator raised by failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAlert {
    PermissionNeeded,
    ConnectionError,
    Failure(String),
}

impl SessionAlert {
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::PermissionNeeded => "Microphone access is needed to talk to the assistant.",
            Self::ConnectionError => "Could not reach the voice assistant. Check your connection.",
            Self::Failure(message) => message,
        }
    }
}
