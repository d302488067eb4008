use crate::Result;
use crate::config::VoiceConfig;
use crate::credential::Credential;
use crate::transport::peer::SessionDescription;
use crate::transport::rest::{RealtimeRestAdapter, SessionRequest};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Short-lived authorization for one media session.
pub struct SessionToken {
    value: SecretString,
    expires_at: Option<u64>,
}

impl SessionToken {
    #[must_use]
    pub fn new(value: impl Into<String>, expires_at: Option<u64>) -> Self {
        Self { value: SecretString::from(value.into()), expires_at }
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    /// Unix seconds, when the service reported one.
    #[must_use]
    pub const fn expires_at(&self) -> Option<u64> {
        self.expires_at
    }

    #[must_use]
    pub fn is_expired_at(&self, unix_now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= unix_now)
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        self.is_expired_at(now)
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Obtains a session token. Implementations must not retry internally.
#[async_trait]
pub trait Negotiator: Send + Sync {
    /// # Errors
    /// `NegotiationFailed` for non-success responses, `MalformedResponse` when the
    /// token field is absent.
    async fn negotiate(&self, credential: &Credential) -> Result<SessionToken>;
}

/// Exchanges the local offer for the remote answer.
#[async_trait]
pub trait Signaling: Send + Sync {
    /// # Errors
    /// `SignalingFailed` for non-success responses.
    async fn exchange(&self, token: &SessionToken, offer: &SessionDescription) -> Result<SessionDescription>;
}

/// Negotiation and signaling against the Realtime REST endpoints.
#[derive(Clone, Debug)]
pub struct RestNegotiator {
    rest: RealtimeRestAdapter,
    session_url: String,
    connect_url: String,
    request: SessionRequest,
}

impl RestNegotiator {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    #[allow(clippy::result_large_err)]
    pub fn new(config: &VoiceConfig) -> Result<Self> {
        Ok(Self::with_adapter(RealtimeRestAdapter::new()?, config))
    }

    #[must_use]
    pub fn with_adapter(rest: RealtimeRestAdapter, config: &VoiceConfig) -> Self {
        Self {
            rest,
            session_url: config.session_url.clone(),
            connect_url: config.connect_url.clone(),
            request: SessionRequest {
                model: config.model.clone(),
                voice: config.voice.clone(),
            },
        }
    }
}

#[async_trait]
impl Negotiator for RestNegotiator {
    async fn negotiate(&self, credential: &Credential) -> Result<SessionToken> {
        tracing::debug!(url = %self.session_url, model = %self.request.model, "requesting session token");
        let secret = self
            .rest
            .create_session(&self.session_url, credential, &self.request)
            .await?;
        let token = SessionToken::new(secret.value, secret.expires_at);
        if token.is_expired() {
            tracing::warn!(expires_at = ?token.expires_at(), "session token already expired on arrival");
        }
        Ok(token)
    }
}

#[async_trait]
impl Signaling for RestNegotiator {
    async fn exchange(&self, token: &SessionToken, offer: &SessionDescription) -> Result<SessionDescription> {
        tracing::debug!(url = %self.connect_url, bytes = offer.sdp.len(), "posting SDP offer");
        let answer = self
            .rest
            .post_sdp_offer(&self.connect_url, &self.request.model, token.expose(), &offer.sdp)
            .await?;
        Ok(SessionDescription::answer(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_expiry() {
        let token = SessionToken::new("ek_1", Some(100));
        assert!(token.is_expired_at(100));
        assert!(!token.is_expired_at(99));
        assert!(!SessionToken::new("ek_2", None).is_expired_at(u64::MAX));
    }

    #[test]
    fn token_debug_is_redacted() {
        let token = SessionToken::new("ek_secret", Some(1));
        assert!(!format!("{token:?}").contains("ek_secret"));
    }
}
