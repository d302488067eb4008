#![allow(dead_code)]

use async_trait::async_trait;
use oai_rt_voice::config::AudioConstraints;
use oai_rt_voice::sdk::SessionToken;
use oai_rt_voice::transport::peer::{
    ChannelState, ControlChannel, IceGatheringState, MediaDevices, MediaStream, PeerConfig,
    PeerConnection, PeerConnectionState, PeerEvent, PeerFactory, PeerHandles, RemoteAudioTrack,
    SessionDescription, TransceiverDirection,
};
use oai_rt_voice::{Credential, Error, Negotiator, Result, Signaling, VoiceConfig};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, watch};

pub const TEST_CREDENTIAL: &str = "sk-test-0123456789";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fast timeouts and no debounce unless a test asks for one.
pub fn test_config() -> VoiceConfig {
    let mut config = VoiceConfig::with_api_base("http://127.0.0.1:9/v1/realtime");
    config.ice_gathering_timeout = Duration::from_millis(200);
    config.channel_open_timeout = Duration::from_millis(500);
    config.connect_debounce = Duration::ZERO;
    config
}

// ---- media ----

#[derive(Debug)]
pub struct FakeStream {
    id: String,
    live: AtomicBool,
}

impl FakeStream {
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

impl MediaStream for FakeStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn live_tracks(&self) -> usize {
        usize::from(self.is_live())
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeDevices {
    pub deny: AtomicBool,
    pub captured: Mutex<Vec<Arc<FakeStream>>>,
    pub last_constraints: Mutex<Option<AudioConstraints>>,
}

impl FakeDevices {
    pub fn live_tracks(&self) -> usize {
        self.captured.lock().unwrap().iter().map(|s| s.live_tracks()).sum()
    }

    pub fn captures(&self) -> usize {
        self.captured.lock().unwrap().len()
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn capture_microphone(&self, constraints: &AudioConstraints) -> Result<Arc<dyn MediaStream>> {
        *self.last_constraints.lock().unwrap() = Some(*constraints);
        if self.deny.load(Ordering::SeqCst) {
            return Err(Error::PermissionDenied("NotAllowedError".to_string()));
        }
        let mut captured = self.captured.lock().unwrap();
        let stream = Arc::new(FakeStream {
            id: format!("mic-{}", captured.len() + 1),
            live: AtomicBool::new(true),
        });
        captured.push(Arc::clone(&stream));
        Ok(stream)
    }
}

// ---- control channel ----

pub struct FakeChannel {
    label: String,
    state: watch::Sender<ChannelState>,
    sent: Mutex<Vec<String>>,
    events: mpsc::Sender<PeerEvent>,
}

impl FakeChannel {
    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }
}

#[async_trait]
impl ControlChannel for FakeChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    async fn send_text(&self, text: String) -> Result<()> {
        if *self.state.borrow() != ChannelState::Open {
            return Err(Error::ConnectionClosed);
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&self) {
        let was_open = self.state.send_replace(ChannelState::Closed) != ChannelState::Closed;
        if was_open {
            let _ = self.events.try_send(PeerEvent::ChannelClosed);
        }
    }
}

// ---- peer ----

pub struct FakePeer {
    gathering: Arc<watch::Sender<IceGatheringState>>,
    complete_gathering: bool,
    open_channel: bool,
    channel: Mutex<Option<Arc<FakeChannel>>>,
    // Shared so the gathering task can append candidates.
    local: Arc<Mutex<Option<SessionDescription>>>,
    remote: Mutex<Option<SessionDescription>>,
    streams: Mutex<Vec<(String, TransceiverDirection)>>,
    events: mpsc::Sender<PeerEvent>,
    close_delay: Duration,
    closed: AtomicBool,
}

impl FakePeer {
    pub fn channel(&self) -> Arc<FakeChannel> {
        self.channel.lock().unwrap().clone().expect("control channel was never created")
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        self.remote.lock().unwrap().clone()
    }

    pub fn streams(&self) -> Vec<(String, TransceiverDirection)> {
        self.streams.lock().unwrap().clone()
    }

    /// Simulate an inbound event from the platform.
    pub async fn emit(&self, event: PeerEvent) {
        self.events.send(event).await.unwrap();
    }

    /// Simulate a tool invocation arriving on the control channel.
    pub async fn deliver(&self, message: serde_json::Value) {
        self.emit(PeerEvent::ChannelMessage(message.to_string())).await;
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn create_control_channel(&self, label: &str) -> Result<Arc<dyn ControlChannel>> {
        assert!(self.local.lock().unwrap().is_none(), "channel must exist before the offer");
        let (state, _) = watch::channel(ChannelState::Connecting);
        let channel = Arc::new(FakeChannel {
            label: label.to_string(),
            state,
            sent: Mutex::new(Vec::new()),
            events: self.events.clone(),
        });
        *self.channel.lock().unwrap() = Some(Arc::clone(&channel));
        Ok(channel)
    }

    async fn add_audio_stream(&self, stream: Arc<dyn MediaStream>, direction: TransceiverDirection) -> Result<()> {
        self.streams.lock().unwrap().push((stream.id().to_string(), direction));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer("v=0\r\no=- offer\r\n"))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        *self.local.lock().unwrap() = Some(description);
        self.gathering.send_replace(IceGatheringState::Gathering);
        if self.complete_gathering {
            let gathering = Arc::clone(&self.gathering);
            let local = Arc::clone(&self.local);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if let Some(desc) = local.lock().unwrap().as_mut() {
                    desc.sdp.push_str("a=candidate:1 1 udp 1 127.0.0.1 50000 typ host\r\n");
                }
                gathering.send_replace(IceGatheringState::Complete);
            });
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().unwrap().clone()
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        *self.remote.lock().unwrap() = Some(description);
        let _ = self.events.try_send(PeerEvent::ConnectionStateChanged(PeerConnectionState::Connected));
        let _ = self.events.try_send(PeerEvent::RemoteAudio(RemoteAudioTrack {
            track_id: "remote-audio-1".to_string(),
            stream_id: Some("remote-stream".to_string()),
        }));
        if self.open_channel {
            if let Some(channel) = self.channel.lock().unwrap().as_ref() {
                channel.state.send_replace(ChannelState::Open);
            }
        }
        Ok(())
    }

    fn ice_gathering_state(&self) -> watch::Receiver<IceGatheringState> {
        self.gathering.subscribe()
    }

    async fn close(&self) {
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        self.closed.store(true, Ordering::SeqCst);
        let channel = self.channel.lock().unwrap().clone();
        if let Some(channel) = channel {
            channel.close().await;
        }
    }
}

#[derive(Default)]
pub struct FakePeerFactory {
    pub stall_gathering: AtomicBool,
    pub never_open: AtomicBool,
    /// Milliseconds each new peer takes to close.
    pub close_delay_ms: AtomicU64,
    pub created: Mutex<Vec<Arc<FakePeer>>>,
    pub ice_servers: Mutex<Vec<String>>,
}

impl FakePeerFactory {
    pub fn peers(&self) -> Vec<Arc<FakePeer>> {
        self.created.lock().unwrap().clone()
    }

    pub fn last(&self) -> Arc<FakePeer> {
        self.peers().last().cloned().expect("no peer created")
    }

    pub fn open_peers(&self) -> usize {
        self.peers().iter().filter(|p| !p.is_closed()).count()
    }
}

#[async_trait]
impl PeerFactory for FakePeerFactory {
    async fn create(&self, config: &PeerConfig) -> Result<PeerHandles> {
        *self.ice_servers.lock().unwrap() = config.ice_servers.clone();
        let (tx, rx) = mpsc::channel(32);
        let (gathering, _) = watch::channel(IceGatheringState::New);
        let peer = Arc::new(FakePeer {
            gathering: Arc::new(gathering),
            complete_gathering: !self.stall_gathering.load(Ordering::SeqCst),
            open_channel: !self.never_open.load(Ordering::SeqCst),
            channel: Mutex::new(None),
            local: Arc::new(Mutex::new(None)),
            remote: Mutex::new(None),
            streams: Mutex::new(Vec::new()),
            events: tx,
            close_delay: Duration::from_millis(self.close_delay_ms.load(Ordering::SeqCst)),
            closed: AtomicBool::new(false),
        });
        self.created.lock().unwrap().push(Arc::clone(&peer));
        Ok(PeerHandles { peer, events: rx })
    }
}

// ---- negotiation ----

pub struct FakeNegotiator {
    pub calls: AtomicUsize,
    pub fail_status: Mutex<Option<u16>>,
    pub gate: Option<Arc<Notify>>,
    pub entered: Arc<Notify>,
}

impl FakeNegotiator {
    pub fn ok() -> Self {
        Self { calls: AtomicUsize::new(0), fail_status: Mutex::new(None), gate: None, entered: Arc::new(Notify::new()) }
    }

    pub fn failing(status: u16) -> Self {
        let negotiator = Self::ok();
        *negotiator.fail_status.lock().unwrap() = Some(status);
        negotiator
    }

    /// Blocks inside `negotiate` until `gate` is notified.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self { gate: Some(gate), ..Self::ok() }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Negotiator for FakeNegotiator {
    async fn negotiate(&self, credential: &Credential) -> Result<SessionToken> {
        assert_eq!(credential.expose(), TEST_CREDENTIAL);
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let fail_status = *self.fail_status.lock().unwrap();
        if let Some(status) = fail_status {
            return Err(Error::NegotiationFailed { status, body: "{\"error\":\"denied\"}".to_string() });
        }
        Ok(SessionToken::new("ek_test_token", None))
    }
}

#[derive(Default)]
pub struct FakeSignaling {
    pub offers: Mutex<Vec<String>>,
    pub fail_status: Mutex<Option<u16>>,
}

#[async_trait]
impl Signaling for FakeSignaling {
    async fn exchange(&self, token: &SessionToken, offer: &SessionDescription) -> Result<SessionDescription> {
        assert_eq!(token.expose(), "ek_test_token");
        self.offers.lock().unwrap().push(offer.sdp.clone());
        let fail_status = *self.fail_status.lock().unwrap();
        if let Some(status) = fail_status {
            return Err(Error::SignalingFailed { status, body: "bad offer".to_string() });
        }
        Ok(SessionDescription::answer("v=0\r\no=- answer\r\n"))
    }
}
