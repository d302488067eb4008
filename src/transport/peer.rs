//! Peer connection and media capture seams.
//!
//! The WebRTC stack and the audio device layer belong to the embedding platform.
//! The session drives them only through these traits, so one connection attempt
//! always works on a fresh set of primitives handed out by a [`PeerFactory`].

use crate::Result;
use crate::config::AudioConstraints;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpType::Offer, sdp: sdp.into() }
    }

    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpType::Answer, sdp: sdp.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IceGatheringState {
    #[default]
    New,
    Gathering,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    /// States the transport does not recover from on its own.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
}

/// An inbound audio stream negotiated by the peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAudioTrack {
    pub track_id: String,
    pub stream_id: Option<String>,
}

/// Asynchronous notifications from a live peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    ConnectionStateChanged(PeerConnectionState),
    ChannelMessage(String),
    ChannelClosed,
    RemoteAudio(RemoteAudioTrack),
}

/// Captured local audio. Stopping is idempotent.
pub trait MediaStream: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
    fn live_tracks(&self) -> usize;
    fn stop(&self);
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire microphone input.
    ///
    /// # Errors
    /// `PermissionDenied` when the user or platform refuses access, `MediaUnavailable`
    /// when no usable device exists.
    async fn capture_microphone(&self, constraints: &AudioConstraints) -> Result<Arc<dyn MediaStream>>;
}

/// The ordered control channel that rides alongside the media transport.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    fn label(&self) -> &str;

    fn ready_state(&self) -> watch::Receiver<ChannelState>;

    /// # Errors
    /// Returns an error if the channel is not open or the send fails.
    async fn send_text(&self, text: String) -> Result<()>;

    async fn close(&self);
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// # Errors
    /// Returns an error if the channel cannot be created.
    async fn create_control_channel(&self, label: &str) -> Result<Arc<dyn ControlChannel>>;

    /// # Errors
    /// Returns an error if the stream cannot be attached.
    async fn add_audio_stream(
        &self,
        stream: Arc<dyn MediaStream>,
        direction: TransceiverDirection,
    ) -> Result<()>;

    /// # Errors
    /// Returns an error if the offer cannot be generated.
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// # Errors
    /// Returns an error if the description is rejected.
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    /// The current local description, including every candidate gathered so far.
    async fn local_description(&self) -> Option<SessionDescription>;

    /// # Errors
    /// Returns an error if the remote description is rejected in the current state.
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    fn ice_gathering_state(&self) -> watch::Receiver<IceGatheringState>;

    async fn close(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub ice_servers: Vec<String>,
}

/// A freshly created peer connection together with its event feed.
pub struct PeerHandles {
    pub peer: Arc<dyn PeerConnection>,
    pub events: mpsc::Receiver<PeerEvent>,
}

#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// # Errors
    /// Returns an error if the platform cannot create a peer connection.
    async fn create(&self, config: &PeerConfig) -> Result<PeerHandles>;
}
