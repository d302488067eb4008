use super::dispatcher::Dispatcher;
use super::negotiator::{Negotiator, SessionToken, Signaling};
use super::status::{SessionAlert, SessionState};
use super::tools::ToolRegistry;
use crate::config::VoiceConfig;
use crate::credential::Credential;
use crate::protocol::client_events::ClientEvent;
use crate::protocol::models::{Modality, SessionUpdate};
use crate::transport::peer::{
    ChannelState, ControlChannel, IceGatheringState, MediaDevices, MediaStream, PeerConfig,
    PeerConnection, PeerEvent, PeerFactory, RemoteAudioTrack, TransceiverDirection,
};
use crate::{Error, Result};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::time::{Instant, timeout};

pub type RemoteAudioHandler = Arc<dyn Fn(RemoteAudioTrack) + Send + Sync>;

/// Owns one real-time voice connection at a time: the token, the microphone
/// capture, the peer connection and its control channel.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct TransportSession {
    inner: Arc<Inner>,
}

pub(super) struct SessionParts {
    pub config: VoiceConfig,
    pub credential: Credential,
    pub negotiator: Arc<dyn Negotiator>,
    pub signaling: Arc<dyn Signaling>,
    pub devices: Arc<dyn MediaDevices>,
    pub peers: Arc<dyn PeerFactory>,
    pub tools: Arc<ToolRegistry>,
    pub remote_audio: Option<RemoteAudioHandler>,
}

struct Inner {
    config: VoiceConfig,
    credential: Credential,
    negotiator: Arc<dyn Negotiator>,
    signaling: Arc<dyn Signaling>,
    devices: Arc<dyn MediaDevices>,
    peers: Arc<dyn PeerFactory>,
    tools: Arc<ToolRegistry>,
    state: watch::Sender<SessionState>,
    alert: watch::Sender<Option<SessionAlert>>,
    remote_audio: Mutex<Option<RemoteAudioHandler>>,
    // Lock order: `control` before `active`.
    control: Mutex<Control>,
    active: Mutex<Option<ActiveConnection>>,
}

#[derive(Default)]
struct Control {
    next_generation: u64,
    last_attempt: Option<Instant>,
    in_flight: Option<u64>,
    // Set when the transport died under an attempt that was still connecting.
    lost: Option<(u64, String)>,
}

/// Everything acquired for one connection attempt.
struct ActiveConnection {
    generation: u64,
    token: Option<SessionToken>,
    media: Option<Arc<dyn MediaStream>>,
    peer: Option<Arc<dyn PeerConnection>>,
    channel: Option<Arc<dyn ControlChannel>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ActiveConnection {
    const fn new(generation: u64) -> Self {
        Self {
            generation,
            token: None,
            media: None,
            peer: None,
            channel: None,
            shutdown: None,
        }
    }

    async fn release(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(media) = self.media.take() {
            media.stop();
        }
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
        if let Some(peer) = self.peer.take() {
            peer.close().await;
        }
        self.token = None;
        tracing::debug!(generation = self.generation, "connection resources released");
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(media) = self.media.take() {
            media.stop();
        }
        let channel = self.channel.take();
        let peer = self.peer.take();
        if channel.is_none() && peer.is_none() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Some(channel) = channel {
                        channel.close().await;
                    }
                    if let Some(peer) = peer {
                        peer.close().await;
                    }
                });
            }
            Err(_) => tracing::warn!(
                generation = self.generation,
                "dropped a live connection outside a runtime; peer left to its own cleanup"
            ),
        }
    }
}

impl TransportSession {
    #[must_use]
    pub fn builder() -> super::TransportSessionBuilder {
        super::TransportSessionBuilder::new()
    }

    pub(super) fn from_parts(parts: SessionParts) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (alert, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                config: parts.config,
                credential: parts.credential,
                negotiator: parts.negotiator,
                signaling: parts.signaling,
                devices: parts.devices,
                peers: parts.peers,
                tools: parts.tools,
                state,
                alert,
                remote_audio: Mutex::new(parts.remote_audio),
                control: Mutex::new(Control::default()),
                active: Mutex::new(None),
            }),
        }
    }

    /// Open a voice connection and return the captured microphone stream.
    ///
    /// Any previous connection is torn down first.
    ///
    /// # Errors
    /// - `ConnectInProgress` / `ConnectDebounced` when the call collapses into an
    ///   earlier one. Nothing is sent.
    /// - `NegotiationFailed`, `MalformedResponse`, `PermissionDenied`,
    ///   `MediaUnavailable`, `SignalingFailed`, `TransportFailure` for the step
    ///   that failed.
    /// - `Cancelled` when `disconnect()` ran while this attempt was in flight.
    pub async fn connect(&self) -> Result<Arc<dyn MediaStream>> {
        let generation = self.inner.begin_attempt().await?;
        match Arc::clone(&self.inner).establish(generation).await {
            Ok(media) => Ok(media),
            Err(err) => Err(self.inner.abort_attempt(generation, err).await),
        }
    }

    /// Tear down the current connection, if any. Safe to call in any state.
    pub async fn disconnect(&self) {
        let released = {
            let mut control = self.inner.control.lock().await;
            control.in_flight = None;
            let mut active = self.inner.active.lock().await;
            let released = active.take();
            if released.is_some() {
                self.inner.set_state(SessionState::Closing);
            }
            released
        };

        let Some(connection) = released else {
            tracing::debug!("disconnect with no live connection");
            return;
        };
        tracing::info!(generation = connection.generation, "disconnecting");
        connection.release().await;
        self.inner.settle(SessionState::Closing);
    }

    /// Disconnect and connect again, bypassing the debounce window.
    ///
    /// # Errors
    /// Same as [`Self::connect`], except `ConnectDebounced`.
    pub async fn reconnect(&self) -> Result<Arc<dyn MediaStream>> {
        self.disconnect().await;
        self.inner.control.lock().await.last_attempt = None;
        self.connect().await
    }

    /// Register the sink for inbound audio; replaces any earlier one.
    pub async fn on_remote_audio<F>(&self, handler: F)
    where
        F: Fn(RemoteAudioTrack) + Send + Sync + 'static,
    {
        *self.inner.remote_audio.lock().await = Some(Arc::new(handler));
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn is_mic_on(&self) -> bool {
        self.state().is_mic_on()
    }

    #[must_use]
    pub fn alert(&self) -> Option<SessionAlert> {
        self.inner.alert.borrow().clone()
    }

    #[must_use]
    pub fn watch_alert(&self) -> watch::Receiver<Option<SessionAlert>> {
        self.inner.alert.subscribe()
    }

    pub fn dismiss_alert(&self) {
        self.inner.alert.send_replace(None);
    }

    #[must_use]
    pub fn config(&self) -> &VoiceConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn tools(&self) -> &ToolRegistry {
        &self.inner.tools
    }
}

impl fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSession")
            .field("state", &self.state())
            .field("model", &self.inner.config.model)
            .field("credential", &self.inner.credential)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            tracing::info!(from = %state, to = %next, "session state");
            *state = next;
            true
        });
    }

    /// Return to Idle unless something else moved the state on meanwhile.
    fn settle(&self, from: SessionState) {
        self.state.send_if_modified(|state| {
            if *state != from {
                return false;
            }
            tracing::info!(from = %state, to = %SessionState::Idle, "session state");
            *state = SessionState::Idle;
            true
        });
    }

    async fn begin_attempt(&self) -> Result<u64> {
        let (generation, previous) = {
            let mut control = self.control.lock().await;
            if let Some(in_flight) = control.in_flight {
                tracing::debug!(in_flight, "connect ignored; attempt already running");
                return Err(Error::ConnectInProgress);
            }
            let now = Instant::now();
            let debounce = self.config.connect_debounce;
            if control.last_attempt.is_some_and(|last| now.duration_since(last) < debounce) {
                tracing::debug!(?debounce, "connect ignored; inside debounce window");
                return Err(Error::ConnectDebounced);
            }
            control.last_attempt = Some(now);
            control.next_generation += 1;
            let generation = control.next_generation;
            control.in_flight = Some(generation);
            control.lost = None;

            let previous = self.active.lock().await.replace(ActiveConnection::new(generation));
            (generation, previous)
        };

        if let Some(previous) = previous {
            tracing::info!(generation = previous.generation, "tearing down previous connection");
            previous.release().await;
        }

        // disconnect() may have taken the slot during the teardown above.
        let entered = self
            .stash(generation, |_| {
                self.alert.send_replace(None);
                self.set_state(SessionState::Negotiating);
            })
            .await;
        if entered.is_none() {
            tracing::debug!(generation, "connect superseded before negotiation");
            self.finish_attempt(generation).await;
            return Err(Error::Cancelled);
        }
        Ok(generation)
    }

    async fn establish(self: Arc<Self>, generation: u64) -> Result<Arc<dyn MediaStream>> {
        let token = self.negotiator.negotiate(&self.credential).await?;
        tracing::debug!(generation, expires_at = ?token.expires_at(), "session token obtained");
        self.ensure_current(generation).await?;

        let media = self.devices.capture_microphone(&self.config.audio).await?;
        if self.stash(generation, |slot| slot.media = Some(Arc::clone(&media))).await.is_none() {
            media.stop();
            return Err(Error::Cancelled);
        }

        let handles = self
            .peers
            .create(&PeerConfig { ice_servers: self.config.ice_servers.clone() })
            .await?;
        let peer = handles.peer;
        if self.stash(generation, |slot| slot.peer = Some(Arc::clone(&peer))).await.is_none() {
            peer.close().await;
            return Err(Error::Cancelled);
        }

        let channel = peer.create_control_channel(&self.config.channel_label).await?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let stashed = self
            .stash(generation, |slot| {
                slot.channel = Some(Arc::clone(&channel));
                slot.shutdown = Some(shutdown_tx);
            })
            .await;
        if stashed.is_none() {
            channel.close().await;
            return Err(Error::Cancelled);
        }

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.tools),
            Arc::clone(&channel),
            self.config.auto_respond_after_tool,
        );
        tokio::spawn(pump(
            Arc::downgrade(&self),
            generation,
            handles.events,
            shutdown_rx,
            dispatcher,
        ));

        peer.add_audio_stream(Arc::clone(&media), TransceiverDirection::SendRecv).await?;
        let offer = peer.create_offer().await?;
        peer.set_local_description(offer).await?;
        self.stash(generation, |_| self.set_state(SessionState::Connecting))
            .await
            .ok_or(Error::Cancelled)?;

        let gathering_timeout = self.config.ice_gathering_timeout;
        let mut gathering = peer.ice_gathering_state();
        let gathered = timeout(
            gathering_timeout,
            gathering.wait_for(|state| *state == IceGatheringState::Complete),
        )
        .await
        .map(|result| result.is_ok());
        match gathered {
            Ok(true) => tracing::debug!(generation, "ICE gathering complete"),
            Ok(false) => {
                tracing::warn!(generation, "ICE gathering state feed ended; using current offer");
            }
            Err(_) => tracing::warn!(
                generation,
                timeout = ?gathering_timeout,
                "ICE gathering did not complete in time; using partial offer"
            ),
        }
        self.ensure_current(generation).await?;

        let local = peer.local_description().await.ok_or_else(|| {
            Error::TransportFailure("no local description after offer".to_string())
        })?;
        let answer = self.signaling.exchange(&token, &local).await?;
        self.ensure_current(generation).await?;
        peer.set_remote_description(answer).await?;

        let open_timeout = self.config.channel_open_timeout;
        let mut ready = channel.ready_state();
        let opened = timeout(
            open_timeout,
            ready.wait_for(|state| matches!(state, ChannelState::Open | ChannelState::Closed)),
        )
        .await
        .map(|result| result.map(|state| *state == ChannelState::Open));
        match opened {
            Ok(Ok(true)) => {}
            Ok(Ok(false) | Err(_)) => {
                return Err(Error::TransportFailure(
                    "control channel closed before opening".to_string(),
                ));
            }
            Err(_) => {
                return Err(Error::TransportFailure(format!(
                    "control channel did not open within {open_timeout:?}"
                )));
            }
        }
        self.ensure_current(generation).await?;

        let update = ClientEvent::SessionUpdate {
            event_id: None,
            session: Box::new(self.session_update()),
        };
        channel.send_text(serde_json::to_string(&update)?).await?;
        tracing::debug!(generation, tools = self.tools.len(), "session configuration sent");

        {
            let mut active = self.active.lock().await;
            match active.as_mut() {
                Some(slot) if slot.generation == generation => {
                    slot.token = Some(token);
                    self.set_state(SessionState::Open);
                }
                _ => return Err(Error::Cancelled),
            }
        }
        self.finish_attempt(generation).await;
        tracing::info!(generation, model = %self.config.model, "voice session open");
        Ok(media)
    }

    fn session_update(&self) -> SessionUpdate {
        let tools = self.tools.manifest();
        let tool_choice = (!tools.is_empty()).then(|| "auto".to_string());
        SessionUpdate {
            modalities: Some(vec![Modality::Text, Modality::Audio]),
            instructions: Some(self.config.instructions.clone()),
            voice: Some(self.config.voice.clone()),
            tools: Some(tools),
            tool_choice,
        }
    }

    /// Run `record` on this attempt's slot. `None` means the slot is gone.
    async fn stash<T>(
        &self,
        generation: u64,
        record: impl FnOnce(&mut ActiveConnection) -> T,
    ) -> Option<T> {
        let mut active = self.active.lock().await;
        match active.as_mut() {
            Some(slot) if slot.generation == generation => Some(record(slot)),
            _ => None,
        }
    }

    async fn ensure_current(&self, generation: u64) -> Result<()> {
        self.stash(generation, |_| ()).await.ok_or(Error::Cancelled)
    }

    async fn finish_attempt(&self, generation: u64) {
        let mut control = self.control.lock().await;
        if control.in_flight == Some(generation) {
            control.in_flight = None;
        }
    }

    /// Release what a failed attempt acquired. Returns the error to hand the
    /// caller: `err` itself, `TransportFailure` if the transport died under the
    /// attempt, or `Cancelled` if `disconnect()` or a newer attempt took over.
    async fn abort_attempt(&self, generation: u64, err: Error) -> Error {
        let slot = {
            let mut active = self.active.lock().await;
            if active.as_ref().is_some_and(|slot| slot.generation == generation) {
                active.take()
            } else {
                None
            }
        };

        let err = match slot {
            Some(slot) => {
                tracing::warn!(generation, error = %err, "connection attempt failed");
                self.set_state(SessionState::Failed);
                if let Some(alert) = err.alert() {
                    self.alert.send_replace(Some(alert));
                }
                slot.release().await;
                self.settle(SessionState::Failed);
                err
            }
            None => {
                let lost = self
                    .control
                    .lock()
                    .await
                    .lost
                    .take_if(|(lost, _)| *lost == generation);
                match lost {
                    Some((_, reason)) => {
                        tracing::warn!(
                            generation,
                            %reason,
                            "connection attempt lost its transport"
                        );
                        Error::TransportFailure(reason)
                    }
                    None => {
                        tracing::debug!(
                            generation,
                            error = %err,
                            "superseded connection attempt stopped"
                        );
                        Error::Cancelled
                    }
                }
            }
        };
        self.finish_attempt(generation).await;
        err
    }

    /// Tear down a live connection after the transport gave out underneath it.
    async fn fail_active(&self, generation: u64, reason: &str) {
        let slot = {
            let mut control = self.control.lock().await;
            let mut active = self.active.lock().await;
            if active.as_ref().is_some_and(|slot| slot.generation == generation) {
                if control.in_flight == Some(generation) {
                    control.lost = Some((generation, reason.to_string()));
                }
                active.take()
            } else {
                None
            }
        };
        let Some(slot) = slot else { return };

        tracing::warn!(generation, reason, "transport lost; tearing down");
        self.set_state(SessionState::Failed);
        self.alert.send_replace(Some(SessionAlert::ConnectionError));
        slot.release().await;
        self.settle(SessionState::Failed);
    }

    async fn deliver_remote_audio(&self, track: RemoteAudioTrack) {
        let handler = self.remote_audio.lock().await.clone();
        match handler {
            Some(handler) => handler(track),
            None => {
                tracing::debug!(
                    track = %track.track_id,
                    "remote audio arrived with no sink registered"
                );
            }
        }
    }
}

async fn pump(
    inner: Weak<Inner>,
    generation: u64,
    mut events: mpsc::Receiver<PeerEvent>,
    mut shutdown: oneshot::Receiver<()>,
    dispatcher: Dispatcher,
) {
    let mut seen_tracks = HashSet::new();
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                let Some(inner) = inner.upgrade() else { break };
                match event {
                    PeerEvent::ChannelMessage(text) => {
                        dispatcher.on_message(&text).await;
                    }
                    PeerEvent::RemoteAudio(track) => {
                        if seen_tracks.insert(track.track_id.clone()) {
                            inner.deliver_remote_audio(track).await;
                        }
                    }
                    PeerEvent::ConnectionStateChanged(state) => {
                        tracing::debug!(generation, ?state, "peer connection state");
                        if state.is_terminal() {
                            let reason = format!("peer connection {state:?}");
                            inner.fail_active(generation, &reason).await;
                            break;
                        }
                    }
                    PeerEvent::ChannelClosed => {
                        let was_open = *inner.state.borrow() == SessionState::Open;
                        if was_open {
                            inner.fail_active(generation, "control channel closed").await;
                            break;
                        }
                        tracing::debug!(generation, "control channel closed before open");
                    }
                }
            }
        }
    }
    tracing::debug!(generation, "event pump stopped");
}
