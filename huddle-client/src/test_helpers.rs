//! In-memory collaborators for tests
//!
//! `FakeSignaling` answers every request the way a healthy server would unless
//! told otherwise; `FakeEngine` fakes the transports/producers/consumers of a
//! WebRTC engine and drives the same handler callbacks a real one does.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use huddle_proto::{
    ConsumerId, ProducerId, RtpCapabilities, TrackKind, TransportId, TransportParams,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::engine::{
    ConsumeOptions, ConsumerEvents, EngineConsumer, EngineProducer, MediaConstraints,
    MediaDevices, MediaEngine, MediaStream, MediaTrack, MediaTransport, ProduceOptions,
    ProducerEvents, TrackSettings, TransportHandler,
};
use crate::error::{EngineError, Error, MediaError, Result};
use crate::renderer::{Renderer, SessionObserver};
use crate::signaling::{RawEvent, SignalingTransport};
use crate::types::{ConnectionState, QualityLabel, SessionState, StreamSlot, TransportRole};

/// Router capabilities with Opus and VP8
pub fn router_capabilities() -> RtpCapabilities {
    serde_json::from_value(json!({
        "codecs": [
            { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
            { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000,
              "rtcpFeedback": [{ "type": "nack" }, { "type": "ccm", "parameter": "fir" }] }
        ],
        "headerExtensions": []
    }))
    .unwrap()
}

/// How the fake server answers one request
#[derive(Debug, Clone)]
pub enum Reply {
    /// What a healthy server would answer
    Default,
    Value(Value),
    /// Never answer
    Silent,
    /// Answer normally after a delay
    Delayed(Duration),
}

/// In-memory signaling server
pub struct FakeSignaling {
    connected: AtomicBool,
    events: broadcast::Sender<RawEvent>,
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<(String, Value)>>,
    emitted: Mutex<Vec<(String, Value)>>,
    connect_failures: AtomicUsize,
    connects: AtomicUsize,
    next_id: AtomicUsize,
}

impl FakeSignaling {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            connected: AtomicBool::new(false),
            events,
            replies: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            emitted: Mutex::new(Vec::new()),
            connect_failures: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
        })
    }

    /// Answer every `name` request with `reply`
    pub fn set_reply(&self, name: &str, reply: Reply) {
        self.set_reply_sequence(name, vec![reply]);
    }

    /// Answer successive `name` requests in order; the last reply sticks
    pub fn set_reply_sequence(&self, name: &str, replies: Vec<Reply>) {
        self.replies.lock().insert(name.to_string(), replies.into());
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.connect_failures.store(count, Ordering::SeqCst);
    }

    /// Push a server event
    pub fn push(&self, name: &str, payload: Value) {
        let _ = self.events.send(RawEvent::Message {
            name: name.to_string(),
            payload,
        });
    }

    /// Drop the socket with `reason`
    pub fn drop_connection(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(RawEvent::Disconnected(reason.to_string()));
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn request_payloads(&self, name: &str) -> Vec<Value> {
        self.requests
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn emitted_names(&self) -> Vec<String> {
        self.emitted.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn emitted(&self, name: &str) -> Vec<Value> {
        self.emitted
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    fn next_reply(&self, name: &str) -> Reply {
        let mut replies = self.replies.lock();
        match replies.get_mut(name) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Reply::Default),
            Some(queue) => queue.front().cloned().unwrap_or(Reply::Default),
            None => Reply::Default,
        }
    }

    fn next_id(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn default_response(&self, name: &str, payload: &Value) -> Value {
        match name {
            "getRouterRtpCapabilities" => serde_json::to_value(router_capabilities()).unwrap(),
            "createWebRtcTransport" => {
                let role = if payload.get("rtpCapabilities").is_some() {
                    "send"
                } else {
                    "recv"
                };
                json!({
                    "id": format!("{role}-transport-{}", self.next_id()),
                    "iceParameters": { "usernameFragment": "frag", "password": "pw" },
                    "iceCandidates": [],
                    "dtlsParameters": { "role": "auto", "fingerprints": [] }
                })
            }
            "produce" => json!({ "producer_id": format!("producer-{}", self.next_id()) }),
            "consume" => {
                let producer = payload["producerId"].as_str().unwrap_or_default();
                let kind = if producer.contains("audio") { "audio" } else { "video" };
                json!({
                    "id": format!("consumer-{}", self.next_id()),
                    "kind": kind,
                    "rtpParameters": { "codecs": [] }
                })
            }
            _ => json!({}),
        }
    }
}

#[async_trait]
impl SignalingTransport for FakeSignaling {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            let _ = self.events.send(RawEvent::ConnectError("xhr poll error".to_string()));
            return Err(Error::Signaling("xhr poll error".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.events.send(RawEvent::Connected);
        Ok(())
    }

    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self
                .events
                .send(RawEvent::Disconnected("io client disconnect".to_string()));
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn emit(&self, event: &str, payload: Value) -> Result<()> {
        self.emitted.lock().push((event.to_string(), payload));
        Ok(())
    }

    async fn emit_with_ack(&self, event: &str, payload: Value) -> Result<Value> {
        self.requests.lock().push((event.to_string(), payload.clone()));
        match self.next_reply(event) {
            Reply::Default => Ok(self.default_response(event, &payload)),
            Reply::Value(value) => Ok(value),
            Reply::Silent => std::future::pending().await,
            Reply::Delayed(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.default_response(event, &payload))
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<RawEvent> {
        self.events.subscribe()
    }
}

/// Captured or received track
pub struct FakeTrack {
    id: String,
    kind: TrackKind,
    settings: TrackSettings,
    live: AtomicBool,
}

impl FakeTrack {
    pub fn audio() -> Arc<Self> {
        Self::new(TrackKind::Audio, TrackSettings::default())
    }

    pub fn video(width: u32, height: u32) -> Arc<Self> {
        Self::new(
            TrackKind::Video,
            TrackSettings {
                width: Some(width),
                height: Some(height),
                frame_rate: Some(30.0),
            },
        )
    }

    fn new(kind: TrackKind, settings: TrackSettings) -> Arc<Self> {
        Arc::new(Self {
            id: nanoid::nanoid!(),
            kind,
            settings,
            live: AtomicBool::new(true),
        })
    }
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn settings(&self) -> TrackSettings {
        self.settings
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// Capture devices handing out fresh fake tracks
#[derive(Default)]
pub struct FakeDevices {
    user_error: Mutex<Option<MediaError>>,
    display_error: Mutex<Option<MediaError>>,
    captured: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_user_media(&self, error: MediaError) {
        *self.user_error.lock() = Some(error);
    }

    pub fn fail_display_media(&self, error: MediaError) {
        *self.display_error.lock() = Some(error);
    }

    pub fn clear_failures(&self) {
        *self.user_error.lock() = None;
        *self.display_error.lock() = None;
    }

    /// Every track handed out so far
    pub fn captured(&self) -> Vec<Arc<FakeTrack>> {
        self.captured.lock().clone()
    }

    fn hand_out(&self, track: Arc<FakeTrack>) -> MediaStream {
        self.captured.lock().push(track.clone());
        MediaStream::from_track(track)
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn user_media(&self, constraints: MediaConstraints) -> std::result::Result<MediaStream, MediaError> {
        if let Some(error) = self.user_error.lock().clone() {
            return Err(error);
        }
        let track = match constraints {
            MediaConstraints::Audio => FakeTrack::audio(),
            MediaConstraints::Video(v) => FakeTrack::video(v.width.ideal, v.height.ideal),
        };
        Ok(self.hand_out(track))
    }

    async fn display_media(&self) -> std::result::Result<MediaStream, MediaError> {
        if let Some(error) = self.display_error.lock().clone() {
            return Err(error);
        }
        Ok(self.hand_out(FakeTrack::video(1920, 1080)))
    }
}

/// WebRTC engine stand-in
#[derive(Default)]
pub struct FakeEngine {
    load_error: Mutex<Option<EngineError>>,
    transports: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_load(&self, error: EngineError) {
        *self.load_error.lock() = Some(error);
    }

    pub fn transports(&self) -> Vec<Arc<FakeTransport>> {
        self.transports.lock().clone()
    }

    /// Most recently created transport of `role`
    pub fn transport(&self, role: TransportRole) -> Option<Arc<FakeTransport>> {
        self.transports.lock().iter().rev().find(|t| t.role == role).cloned()
    }

    pub fn producer(&self, id: &ProducerId) -> Option<Arc<FakeProducer>> {
        self.transports()
            .iter()
            .flat_map(|t| t.producers.lock().clone())
            .find(|p| &p.id == id)
    }

    /// Most recent consumer of a remote producer
    pub fn consumer_for(&self, producer_id: &ProducerId) -> Option<Arc<FakeConsumer>> {
        self.transports()
            .iter()
            .flat_map(|t| t.consumers.lock().clone())
            .filter(|c| &c.producer_id == producer_id)
            .last()
    }

    fn create(&self, role: TransportRole, params: TransportParams, handler: Arc<dyn TransportHandler>) -> Arc<dyn MediaTransport> {
        let transport = Arc::new(FakeTransport {
            id: params.id,
            role,
            handler,
            state: Mutex::new(ConnectionState::New),
            closed: AtomicBool::new(false),
            end_track_on_produce: AtomicBool::new(false),
            producers: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
        });
        self.transports.lock().push(transport.clone());
        transport
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn load(&self, router: &RtpCapabilities) -> std::result::Result<RtpCapabilities, EngineError> {
        match self.load_error.lock().clone() {
            Some(error) => Err(error),
            None => Ok(router.clone()),
        }
    }

    fn create_send_transport(
        &self,
        params: TransportParams,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<Arc<dyn MediaTransport>> {
        Ok(self.create(TransportRole::Send, params, handler))
    }

    fn create_recv_transport(
        &self,
        params: TransportParams,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<Arc<dyn MediaTransport>> {
        Ok(self.create(TransportRole::Recv, params, handler))
    }
}

pub struct FakeTransport {
    id: TransportId,
    role: TransportRole,
    handler: Arc<dyn TransportHandler>,
    state: Mutex<ConnectionState>,
    closed: AtomicBool,
    end_track_on_produce: AtomicBool,
    producers: Mutex<Vec<Arc<FakeProducer>>>,
    consumers: Mutex<Vec<Arc<FakeConsumer>>>,
}

impl FakeTransport {
    fn closed_error() -> Error {
        Error::Engine(EngineError::new("InvalidStateError", "transport closed"))
    }

    /// Run the DTLS handshake on first use
    pub async fn ensure_connected(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Self::closed_error());
        }
        if *self.state.lock() != ConnectionState::New {
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        self.handler
            .on_connect(json!({ "role": "client", "fingerprints": [] }))
            .await?;
        if self.is_closed() {
            return Err(Self::closed_error());
        }
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    pub fn producers(&self) -> Vec<Arc<FakeProducer>> {
        self.producers.lock().clone()
    }

    /// End the next produced track before `produce` returns
    pub fn end_track_on_produce(&self) {
        self.end_track_on_produce.store(true, Ordering::SeqCst);
    }

    /// Change state and report it to the handler
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
        self.handler.on_connection_state_change(state);
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    fn id(&self) -> TransportId {
        self.id.clone()
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    async fn produce(
        &self,
        options: ProduceOptions,
        events: Arc<dyn ProducerEvents>,
    ) -> Result<Arc<dyn EngineProducer>> {
        self.ensure_connected().await?;
        let kind = options.track.kind();
        let id = self
            .handler
            .on_produce(kind, json!({ "codecs": [], "encodings": options.encodings.len() }))
            .await?;
        if self.is_closed() {
            return Err(Self::closed_error());
        }

        let producer = Arc::new(FakeProducer {
            id,
            kind,
            track: options.track,
            events,
            closed: AtomicBool::new(false),
        });
        self.producers.lock().push(producer.clone());
        if self.end_track_on_produce.swap(false, Ordering::SeqCst) {
            producer.end_track();
        }
        Ok(producer)
    }

    async fn consume(
        &self,
        options: ConsumeOptions,
        events: Arc<dyn ConsumerEvents>,
    ) -> Result<Arc<dyn EngineConsumer>> {
        self.ensure_connected().await?;
        let track: Arc<dyn MediaTrack> = match options.kind {
            TrackKind::Audio => FakeTrack::audio(),
            TrackKind::Video => FakeTrack::video(1280, 720),
        };

        let consumer = Arc::new(FakeConsumer {
            id: options.id,
            producer_id: options.producer_id,
            kind: options.kind,
            track,
            events,
            closed: AtomicBool::new(false),
        });
        self.consumers.lock().push(consumer.clone());
        Ok(consumer)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state.lock() = ConnectionState::Closed;

        let producers = self.producers.lock().clone();
        let consumers = self.consumers.lock().clone();
        for producer in producers {
            if !producer.closed.swap(true, Ordering::SeqCst) {
                producer.events.on_transport_closed();
            }
        }
        for consumer in consumers {
            if !consumer.closed.swap(true, Ordering::SeqCst) {
                consumer.events.on_transport_closed();
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct FakeProducer {
    id: ProducerId,
    kind: TrackKind,
    track: Arc<dyn MediaTrack>,
    events: Arc<dyn ProducerEvents>,
    closed: AtomicBool,
}

impl FakeProducer {
    /// The captured track ended on its own (device unplugged, share stopped)
    pub fn end_track(&self) {
        self.track.stop();
        self.events.on_track_ended();
    }
}

impl EngineProducer for FakeProducer {
    fn id(&self) -> ProducerId {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn track(&self) -> Arc<dyn MediaTrack> {
        Arc::clone(&self.track)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct FakeConsumer {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: TrackKind,
    track: Arc<dyn MediaTrack>,
    events: Arc<dyn ConsumerEvents>,
    closed: AtomicBool,
}

impl FakeConsumer {
    /// The remote producer went away
    pub fn close_producer(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.events.on_producer_closed();
    }

    pub fn end_track(&self) {
        self.track.stop();
        self.events.on_track_ended();
    }
}

impl EngineConsumer for FakeConsumer {
    fn id(&self) -> ConsumerId {
        self.id.clone()
    }

    fn producer_id(&self) -> ProducerId {
        self.producer_id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn track(&self) -> Arc<dyn MediaTrack> {
        Arc::clone(&self.track)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    Added {
        slot: StreamSlot,
        kind: TrackKind,
        id: String,
    },
    Removed(String),
    Quality {
        id: String,
        label: QualityLabel,
    },
    Stats(String),
}

/// Renderer and observer that remember what they were told
#[derive(Default)]
pub struct RecordingRenderer {
    events: Mutex<Vec<RenderEvent>>,
    states: Mutex<Vec<SessionState>>,
    local: Mutex<Option<usize>>,
    remote: Mutex<Option<usize>>,
}

impl RecordingRenderer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<RenderEvent> {
        self.events.lock().clone()
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.states.lock().clone()
    }

    /// Size of the last local stream list reported
    pub fn local_stream_count(&self) -> Option<usize> {
        *self.local.lock()
    }

    /// Size of the last remote stream list reported
    pub fn remote_stream_count(&self) -> Option<usize> {
        *self.remote.lock()
    }
}

impl Renderer for RecordingRenderer {
    fn stream_added(&self, slot: StreamSlot, kind: TrackKind, id: &str, _stream: &MediaStream) {
        self.events.lock().push(RenderEvent::Added {
            slot,
            kind,
            id: id.to_string(),
        });
    }

    fn stream_removed(&self, id: &str) {
        self.events.lock().push(RenderEvent::Removed(id.to_string()));
    }

    fn quality_updated(&self, id: &str, label: QualityLabel) {
        self.events.lock().push(RenderEvent::Quality {
            id: id.to_string(),
            label,
        });
    }

    fn network_stats(&self, id: &str, _stats: &huddle_proto::ConsumerStats) {
        self.events.lock().push(RenderEvent::Stats(id.to_string()));
    }
}

impl SessionObserver for RecordingRenderer {
    fn on_local_stream_update(&self, streams: &[MediaStream]) {
        *self.local.lock() = Some(streams.len());
    }

    fn on_remote_stream_update(&self, streams: &[MediaStream]) {
        *self.remote.lock() = Some(streams.len());
    }

    fn on_state_change(&self, state: SessionState) {
        self.states.lock().push(state);
    }
}
