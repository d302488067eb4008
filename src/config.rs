use crate::{Error, Result};
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1/realtime";
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";
pub const DEFAULT_VOICE: &str = "ash";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_CHANNEL_LABEL: &str = "response";
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

const DEFAULT_ICE_GATHERING_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CHANNEL_OPEN_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_CONNECT_DEBOUNCE: Duration = Duration::from_secs(1);

pub const DEFAULT_INSTRUCTIONS: &str = "You are a virtual sales advisor specializing in BMW vehicles. \
Talk quickly and concisely. Your goal is to help customers find the ideal BMW model based on their needs, \
preferences, and budget. Act with professionalism, friendliness, and accuracy. Always highlight the premium \
features of BMW vehicles, such as advanced technology, elegant design, exceptional performance, and comfort. \
You are familiar with the structure of the website where you are deployed: Home page (home), BMW iX Models \
(ixModels), BMW iX xDrive50 Customization (ixXDrive50Customize) and BMW iX M60 Customization (ixM60Customize). \
If the customer mentions a specific model, provide relevant information and offer to navigate there. \
Ask about the type of vehicle they are looking for, desired features, and their budget range. \
Offer financing plans, current promotions, and test drives. When the customer has finished customizing \
the vehicle, ask for a phone number so an advisor can follow up, and save it. \
Show enthusiasm for BMW vehicles, but always respond concisely and focused.";

/// Microphone capture constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub sample_rate: u32,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

/// Runtime configuration for a voice session. Holds no secrets.
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Session-issuance endpoint.
    pub session_url: String,
    /// Offer/answer endpoint; `model` is appended as a query parameter.
    pub connect_url: String,
    pub model: String,
    pub voice: String,
    pub instructions: String,
    pub ice_servers: Vec<String>,
    pub channel_label: String,
    pub audio: AudioConstraints,
    pub ice_gathering_timeout: Duration,
    pub channel_open_timeout: Duration,
    pub connect_debounce: Duration,
    /// Ask for a new model response after each tool output.
    pub auto_respond_after_tool: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self::with_api_base(DEFAULT_API_BASE)
    }
}

impl VoiceConfig {
    /// Defaults with both endpoints rooted at `base` (e.g. a local dev proxy).
    #[must_use]
    pub fn with_api_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            session_url: format!("{base}/sessions"),
            connect_url: base.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            audio: AudioConstraints::default(),
            ice_gathering_timeout: DEFAULT_ICE_GATHERING_TIMEOUT,
            channel_open_timeout: DEFAULT_CHANNEL_OPEN_TIMEOUT,
            connect_debounce: DEFAULT_CONNECT_DEBOUNCE,
            auto_respond_after_tool: false,
        }
    }

    /// Load configuration from environment variables, reading `.env` first outside tests.
    ///
    /// The credential is read separately through [`crate::Credential::from_env`].
    ///
    /// # Errors
    /// Returns `Error::Config` when an override is not a valid URL or a list is empty.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> Result<Self> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base = lookup("REALTIME_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let mut config = Self::with_api_base(&base);

        if let Some(url) = lookup("REALTIME_SESSION_URL") {
            config.session_url = url;
        }
        if let Some(url) = lookup("REALTIME_CONNECT_URL") {
            config.connect_url = url;
        }
        if let Some(model) = lookup("REALTIME_MODEL") {
            config.model = model;
        }
        if let Some(voice) = lookup("REALTIME_VOICE") {
            config.voice = voice;
        }
        if let Some(instructions) = lookup("REALTIME_INSTRUCTIONS") {
            config.instructions = instructions;
        }
        if let Some(label) = lookup("REALTIME_CHANNEL_LABEL") {
            config.channel_label = label;
        }
        if let Some(servers) = lookup("REALTIME_ICE_SERVERS") {
            config.ice_servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns `Error::Config` describing the first invalid field.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("session_url", &self.session_url), ("connect_url", &self.connect_url)] {
            url::Url::parse(value)
                .map_err(|e| Error::Config(format!("{name} '{value}' is not a valid URL: {e}")))?;
        }
        if self.ice_servers.is_empty() {
            return Err(Error::Config("at least one ICE server is required".to_string()));
        }
        if self.channel_label.is_empty() {
            return Err(Error::Config("channel_label must not be empty".to_string()));
        }
        Ok(())
    }
}
