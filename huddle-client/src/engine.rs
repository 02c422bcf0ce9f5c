//! Seams to the media engine and capture devices
//!
//! The session layer never touches ICE, DTLS or RTP itself. A WebRTC client
//! engine provides transports, producers and consumers; the session hands it
//! handler objects and reacts to the events they receive.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use huddle_proto::{
    ConsumerId, DtlsParameters, ProducerId, RtpCapabilities, RtpCodecCapability, RtpParameters,
    TrackKind, TransportId, TransportParams,
};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, MediaError, Result};
use crate::types::ConnectionState;

/// Frame properties a live track reports once capture has started
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrackSettings {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
}

/// One captured or received media track
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> String;
    fn kind(&self) -> TrackKind;
    fn settings(&self) -> TrackSettings;
    /// Release the underlying device or receiver. Idempotent.
    fn stop(&self);
    fn is_live(&self) -> bool;
}

/// A set of tracks rendered together
#[derive(Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            id: nanoid::nanoid!(),
            tracks,
        }
    }

    /// Fresh playback stream wrapping a single track
    pub fn from_track(track: Arc<dyn MediaTrack>) -> Self {
        Self::new(vec![track])
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    #[must_use]
    pub fn first_track(&self, kind: TrackKind) -> Option<Arc<dyn MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == kind).cloned()
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.iter().map(|t| t.id()).collect::<Vec<_>>())
            .finish()
    }
}

/// Ideal value with a hard lower bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub ideal: u32,
    pub min: u32,
}

impl Range {
    #[must_use]
    pub const fn new(ideal: u32, min: u32) -> Self {
        Self { ideal, min }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub width: Range,
    pub height: Range,
    pub frame_rate: Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaConstraints {
    /// Default microphone
    Audio,
    Video(VideoConstraints),
}

/// Local capture devices
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn user_media(&self, constraints: MediaConstraints) -> std::result::Result<MediaStream, MediaError>;
    async fn display_media(&self) -> std::result::Result<MediaStream, MediaError>;
}

/// One encoding layer of an outbound video track
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RtpEncoding {
    /// bps
    pub max_bitrate: u32,
    pub scale_resolution_down_by: f64,
}

impl RtpEncoding {
    #[must_use]
    pub const fn new(max_bitrate: u32, scale_resolution_down_by: f64) -> Self {
        Self {
            max_bitrate,
            scale_resolution_down_by,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecOptions {
    pub start_bitrate_kbps: u32,
}

/// Arguments of an outbound produce handshake
#[derive(Clone)]
pub struct ProduceOptions {
    pub track: Arc<dyn MediaTrack>,
    /// Forced codec; `None` lets the engine pick
    pub codec: Option<RtpCodecCapability>,
    /// Empty means a single engine-default layer
    pub encodings: Vec<RtpEncoding>,
    pub codec_options: Option<CodecOptions>,
}

impl fmt::Debug for ProduceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProduceOptions")
            .field("track", &self.track.id())
            .field("codec", &self.codec.as_ref().map(|c| c.mime_type.as_str()))
            .field("encodings", &self.encodings)
            .field("codec_options", &self.codec_options)
            .finish()
    }
}

/// Arguments of an inbound consume, as returned by the server
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: TrackKind,
    pub rtp_parameters: RtpParameters,
}

/// Per-transport callbacks the engine invokes
///
/// The engine calls `on_connect` the first time media needs to flow and
/// `on_produce` once per outbound track. Errors returned from either abort
/// the engine operation that triggered them.
#[async_trait]
pub trait TransportHandler: Send + Sync {
    async fn on_connect(&self, dtls_parameters: DtlsParameters) -> Result<()>;

    async fn on_produce(&self, kind: TrackKind, rtp_parameters: RtpParameters) -> Result<ProducerId>;

    fn on_connection_state_change(&self, state: ConnectionState);
}

/// Terminal events of a local producer
pub trait ProducerEvents: Send + Sync {
    fn on_track_ended(&self);
    fn on_transport_closed(&self);
}

/// Terminal events of a remote consumer
pub trait ConsumerEvents: Send + Sync {
    fn on_track_ended(&self);
    fn on_transport_closed(&self);
    /// The remote producer behind this consumer went away
    fn on_producer_closed(&self);
}

pub trait EngineProducer: Send + Sync {
    fn id(&self) -> ProducerId;
    fn kind(&self) -> TrackKind;
    fn track(&self) -> Arc<dyn MediaTrack>;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

pub trait EngineConsumer: Send + Sync {
    fn id(&self) -> ConsumerId;
    fn producer_id(&self) -> ProducerId;
    fn kind(&self) -> TrackKind;
    fn track(&self) -> Arc<dyn MediaTrack>;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

/// One negotiated network path
#[async_trait]
pub trait MediaTransport: Send + Sync {
    fn id(&self) -> TransportId;

    fn connection_state(&self) -> ConnectionState;

    async fn produce(
        &self,
        options: ProduceOptions,
        events: Arc<dyn ProducerEvents>,
    ) -> Result<Arc<dyn EngineProducer>>;

    async fn consume(
        &self,
        options: ConsumeOptions,
        events: Arc<dyn ConsumerEvents>,
    ) -> Result<Arc<dyn EngineConsumer>>;

    /// Close the transport and every producer/consumer on it. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// WebRTC client engine
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Load the router capabilities, returning what both sides support
    async fn load(&self, router: &RtpCapabilities) -> std::result::Result<RtpCapabilities, EngineError>;

    fn create_send_transport(
        &self,
        params: TransportParams,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<Arc<dyn MediaTransport>>;

    fn create_recv_transport(
        &self,
        params: TransportParams,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<Arc<dyn MediaTransport>>;
}
