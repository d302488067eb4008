use super::negotiator::{Negotiator, RestNegotiator, Signaling};
use super::session::{RemoteAudioHandler, SessionParts, TransportSession};
use super::tools::ToolRegistry;
use crate::config::VoiceConfig;
use crate::credential::Credential;
use crate::transport::peer::{MediaDevices, PeerFactory, RemoteAudioTrack};
use crate::{Error, Result};
use std::sync::Arc;

/// Assembles a [`TransportSession`].
///
/// The platform supplies media devices and a peer factory. Negotiation and signaling
/// default to the REST endpoints named in the config.
pub struct TransportSessionBuilder {
    config: Option<VoiceConfig>,
    credential: Option<String>,
    negotiator: Option<Arc<dyn Negotiator>>,
    signaling: Option<Arc<dyn Signaling>>,
    devices: Option<Arc<dyn MediaDevices>>,
    peers: Option<Arc<dyn PeerFactory>>,
    tools: ToolRegistry,
    remote_audio: Option<RemoteAudioHandler>,
}

impl TransportSessionBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: None,
            credential: None,
            negotiator: None,
            signaling: None,
            devices: None,
            peers: None,
            tools: ToolRegistry::new(),
            remote_audio: None,
        }
    }

    #[must_use]
    pub fn config(mut self, config: VoiceConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Raw credential; validated in [`Self::build`].
    #[must_use]
    pub fn credential(mut self, raw: impl Into<String>) -> Self {
        self.credential = Some(raw.into());
        self
    }

    #[must_use]
    pub fn negotiator(mut self, negotiator: Arc<dyn Negotiator>) -> Self {
        self.negotiator = Some(negotiator);
        self
    }

    #[must_use]
    pub fn signaling(mut self, signaling: Arc<dyn Signaling>) -> Self {
        self.signaling = Some(signaling);
        self
    }

    #[must_use]
    pub fn media_devices(mut self, devices: Arc<dyn MediaDevices>) -> Self {
        self.devices = Some(devices);
        self
    }

    #[must_use]
    pub fn peer_factory(mut self, peers: Arc<dyn PeerFactory>) -> Self {
        self.peers = Some(peers);
        self
    }

    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn on_remote_audio<F>(mut self, handler: F) -> Self
    where
        F: Fn(RemoteAudioTrack) + Send + Sync + 'static,
    {
        self.remote_audio = Some(Arc::new(handler));
        self
    }

    /// # Errors
    /// Credential errors as from [`Credential::validate`] (the credential falls back
    /// to `OPENAI_API_KEY`), and `Error::Config` for an invalid config or a missing
    /// platform seam.
    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<TransportSession> {
        let credential = match self.credential {
            Some(raw) => Credential::validate(Some(&raw))?,
            None => Credential::from_env(crate::credential::CREDENTIAL_ENV)?,
        };
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let devices = self
            .devices
            .ok_or_else(|| Error::Config("media_devices is required".to_string()))?;
        let peers = self
            .peers
            .ok_or_else(|| Error::Config("peer_factory is required".to_string()))?;

        let (negotiator, signaling) = match (self.negotiator, self.signaling) {
            (Some(negotiator), Some(signaling)) => (negotiator, signaling),
            (negotiator, signaling) => {
                let rest = Arc::new(RestNegotiator::new(&config)?);
                (
                    negotiator.unwrap_or_else(|| Arc::clone(&rest) as Arc<dyn Negotiator>),
                    signaling.unwrap_or_else(|| rest as Arc<dyn Signaling>),
                )
            }
        };

        tracing::debug!(
            model = %config.model,
            tools = self.tools.len(),
            credential = %credential.redacted(),
            "transport session built"
        );

        Ok(TransportSession::from_parts(SessionParts {
            config,
            credential,
            negotiator,
            signaling,
            devices,
            peers,
            tools: Arc::new(self.tools),
            remote_audio: self.remote_audio,
        }))
    }
}

impl Default for TransportSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
