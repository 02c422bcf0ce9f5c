//! Local media production
//!
//! One producer per [`MediaKind`] at a time. Starting a kind that is already
//! live (or still being negotiated) is rejected with
//! [`Error::ProducerActive`]; callers close the old producer first.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use huddle_proto::messages::ProducerClosed;
use huddle_proto::ProducerId;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::MediaConfig;
use crate::device::CapabilitySet;
use crate::engine::{
    CodecOptions, EngineProducer, MediaConstraints, MediaDevices, MediaStream, MediaTrack,
    MediaTransport, ProduceOptions, ProducerEvents, RtpEncoding,
};
use crate::error::{Error, MediaError, Result};
use crate::renderer::StreamNotifier;
use crate::signaling::SignalingChannel;
use crate::types::{MediaKind, QualityLabel, TransportRole};

/// A live local producer
#[derive(Debug, Clone)]
pub struct ProducedMedia {
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub stream: MediaStream,
}

struct ProducerEntry {
    producer: Arc<dyn EngineProducer>,
    stream: MediaStream,
}

#[derive(Default)]
struct ProducerState {
    closed: bool,
    entries: HashMap<MediaKind, ProducerEntry>,
    pending: HashSet<MediaKind>,
}

/// Sole owner of the local producer map
#[derive(Clone)]
pub struct ProducerManager {
    inner: Arc<ProducerInner>,
}

struct ProducerInner {
    channel: SignalingChannel,
    devices: Arc<dyn MediaDevices>,
    media: MediaConfig,
    notifier: StreamNotifier,
    state: Mutex<ProducerState>,
}

/// Holds a kind as pending until dropped
struct Reservation<'a> {
    inner: &'a ProducerInner,
    kind: MediaKind,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.inner.state.lock().pending.remove(&self.kind);
    }
}

impl ProducerManager {
    pub fn new(
        channel: SignalingChannel,
        devices: Arc<dyn MediaDevices>,
        media: MediaConfig,
        notifier: StreamNotifier,
    ) -> Self {
        Self {
            inner: Arc::new(ProducerInner {
                channel,
                devices,
                media,
                notifier,
                state: Mutex::new(ProducerState::default()),
            }),
        }
    }

    /// Capture `kind` and publish it on the send transport
    pub async fn produce(
        &self,
        kind: MediaKind,
        capabilities: &CapabilitySet,
        transport: &Arc<dyn MediaTransport>,
    ) -> Result<ProducedMedia> {
        let _reservation = self.reserve(kind)?;

        let stream = self
            .acquire(kind)
            .await
            .map_err(|source| Error::Capture { kind, source })?;

        let Some(track) = stream.first_track(kind.track_kind()) else {
            stream.stop_all();
            return Err(Error::Capture {
                kind,
                source: MediaError::NotFound(format!("capture returned no {} track", kind.track_kind())),
            });
        };

        let options = encoding_policy(kind, capabilities, &self.inner.media, Arc::clone(&track));
        debug!(kind = %kind, ?options, "Producing");

        let events = Arc::new(ProducerHandler {
            manager: Arc::downgrade(&self.inner),
            kind,
            producer_id: OnceLock::new(),
            track_ended: AtomicBool::new(false),
            transport_closed: AtomicBool::new(false),
        });

        let producer = match transport.produce(options, events.clone()).await {
            Ok(producer) => producer,
            Err(e) => {
                stream.stop_all();
                return Err(Error::ProducerCreate {
                    kind,
                    source: Box::new(e),
                });
            }
        };

        let producer_id = producer.id();
        let _ = events.producer_id.set(producer_id.clone());

        let streams = {
            let mut state = self.inner.state.lock();
            if state.closed {
                drop(state);
                debug!(kind = %kind, producer_id = %producer_id, "Producer resolved after teardown");
                producer.close();
                stream.stop_all();
                return Err(Error::SessionClosed);
            }
            if events.is_ended() {
                drop(state);
                let transport_closed = events.transport_closed.load(Ordering::SeqCst);
                self.inner.discard(&producer_id, !transport_closed);
                producer.close();
                stream.stop_all();
                return Err(if transport_closed {
                    Error::ProducerCreate {
                        kind,
                        source: Box::new(Error::TransportUnavailable(TransportRole::Send)),
                    }
                } else {
                    Error::Capture {
                        kind,
                        source: MediaError::Other {
                            name: "TrackEnded".to_string(),
                            message: "track ended while producing".to_string(),
                        },
                    }
                });
            }
            state.entries.insert(
                kind,
                ProducerEntry {
                    producer,
                    stream: stream.clone(),
                },
            );
            collect_streams(&state)
        };

        info!(kind = %kind, producer_id = %producer_id, "Producer created");

        let notifier = &self.inner.notifier;
        notifier.local_added(kind.track_kind(), producer_id.as_str(), &stream);
        if kind != MediaKind::Audio {
            let settings = track.settings();
            if let (Some(width), Some(height)) = (settings.width, settings.height) {
                notifier.quality(producer_id.as_str(), QualityLabel::from_resolution(width, height));
            }
        }
        notifier.local_streams(&streams);

        Ok(ProducedMedia {
            producer_id,
            kind,
            stream,
        })
    }

    fn reserve(&self, kind: MediaKind) -> Result<Reservation<'_>> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(Error::SessionClosed);
        }
        if state.entries.contains_key(&kind) || !state.pending.insert(kind) {
            warn!(kind = %kind, "Producer already active");
            return Err(Error::ProducerActive(kind));
        }
        Ok(Reservation {
            inner: &self.inner,
            kind,
        })
    }

    async fn acquire(&self, kind: MediaKind) -> std::result::Result<MediaStream, MediaError> {
        let devices = &self.inner.devices;
        match kind {
            MediaKind::Audio => devices.user_media(MediaConstraints::Audio).await,
            MediaKind::Screen => devices.display_media().await,
            MediaKind::Video => {
                let mut last = None;
                for (step, constraints) in self.inner.media.video_ladder.iter().enumerate() {
                    match devices.user_media(MediaConstraints::Video(*constraints)).await {
                        Ok(stream) => return Ok(stream),
                        Err(e) => {
                            warn!(step, error = %e, "Camera rejected constraints, falling back");
                            last = Some(e);
                        }
                    }
                }
                Err(last.unwrap_or_else(|| {
                    MediaError::Overconstrained("no video constraints configured".to_string())
                }))
            }
        }
    }

    /// Close the producer of `kind`
    ///
    /// Notifies the server, closes the engine producer and stops the captured
    /// track. Returns the closed producer's id, or `None` when nothing of that
    /// kind was live.
    pub fn close_producer(&self, kind: MediaKind) -> Option<ProducerId> {
        self.inner.close(kind, None, true)
    }

    #[must_use]
    pub fn producer_id(&self, kind: MediaKind) -> Option<ProducerId> {
        self.inner
            .state
            .lock()
            .entries
            .get(&kind)
            .map(|entry| entry.producer.id())
    }

    #[must_use]
    pub fn is_active(&self, kind: MediaKind) -> bool {
        self.inner.state.lock().entries.contains_key(&kind)
    }

    #[must_use]
    pub fn streams(&self) -> Vec<MediaStream> {
        collect_streams(&self.inner.state.lock())
    }

    /// Drop every producer without notifying the server and refuse new ones
    pub fn close_all(&self) {
        let drained: Vec<_> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.entries.drain().collect()
        };
        if drained.is_empty() {
            return;
        }
        for (kind, entry) in drained {
            debug!(kind = %kind, producer_id = %entry.producer.id(), "Closing producer");
            entry.producer.close();
            entry.stream.stop_all();
            self.inner.notifier.removed(entry.producer.id().as_str());
        }
        self.inner.notifier.local_streams(&[]);
    }
}

impl ProducerInner {
    /// Tell the server about a producer that never made it into the map
    fn discard(&self, producer_id: &ProducerId, notify_server: bool) {
        debug!(producer_id = %producer_id, "Producer ended before registration");
        if notify_server {
            if let Err(e) = self.channel.emit(&ProducerClosed {
                producer_id: producer_id.clone(),
            }) {
                warn!(producer_id = %producer_id, error = %e, "Failed to notify producer close");
            }
        }
    }

    /// Remove and release the entry of `kind`
    ///
    /// With `expected` set, only an entry whose producer has that id is
    /// touched, so a late event from a replaced producer is harmless.
    fn close(&self, kind: MediaKind, expected: Option<&ProducerId>, notify_server: bool) -> Option<ProducerId> {
        let (entry, streams) = {
            let mut state = self.state.lock();
            let matches = match (state.entries.get(&kind), expected) {
                (Some(entry), Some(id)) => &entry.producer.id() == id,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !matches {
                drop(state);
                debug!(kind = %kind, "No producer to close");
                return None;
            }
            let entry = state.entries.remove(&kind)?;
            (entry, collect_streams(&state))
        };

        let producer_id = entry.producer.id();
        if notify_server {
            if let Err(e) = self.channel.emit(&ProducerClosed {
                producer_id: producer_id.clone(),
            }) {
                warn!(producer_id = %producer_id, error = %e, "Failed to notify producer close");
            }
        }

        entry.producer.close();
        entry.stream.stop_all();

        info!(kind = %kind, producer_id = %producer_id, "Producer closed");
        self.notifier.removed(producer_id.as_str());
        self.notifier.local_streams(&streams);

        Some(producer_id)
    }
}

fn collect_streams(state: &ProducerState) -> Vec<MediaStream> {
    let mut streams: Vec<_> = state
        .entries
        .iter()
        .map(|(kind, entry)| (*kind, entry.stream.clone()))
        .collect();
    streams.sort_by_key(|(kind, _)| MediaKind::ALL.iter().position(|k| k == kind));
    streams.into_iter().map(|(_, stream)| stream).collect()
}

/// Produce options for `kind`
///
/// Camera video uses a single capped layer when the preferred codec was
/// negotiated, otherwise the configured simulcast layers. Screen shares never
/// use simulcast.
#[must_use]
pub fn encoding_policy(
    kind: MediaKind,
    capabilities: &CapabilitySet,
    media: &MediaConfig,
    track: Arc<dyn MediaTrack>,
) -> ProduceOptions {
    let preferred = capabilities.find_codec(&media.preferred_codec).cloned();
    let start = CodecOptions {
        start_bitrate_kbps: media.start_bitrate_kbps,
    };

    match kind {
        MediaKind::Audio => ProduceOptions {
            track,
            codec: None,
            encodings: Vec::new(),
            codec_options: None,
        },
        MediaKind::Video => match preferred {
            Some(codec) => ProduceOptions {
                track,
                codec: Some(codec),
                encodings: vec![RtpEncoding::new(media.max_bitrate, 1.0)],
                codec_options: Some(start),
            },
            None => ProduceOptions {
                track,
                codec: None,
                encodings: media.simulcast_layers.clone(),
                codec_options: Some(start),
            },
        },
        MediaKind::Screen => ProduceOptions {
            track,
            codec: preferred,
            encodings: Vec::new(),
            codec_options: Some(start),
        },
    }
}

/// Terminal events of one producer
struct ProducerHandler {
    manager: Weak<ProducerInner>,
    kind: MediaKind,
    producer_id: OnceLock<ProducerId>,
    /// Set before acting, so `produce` sees events that beat registration
    track_ended: AtomicBool,
    transport_closed: AtomicBool,
}

impl ProducerHandler {
    fn is_ended(&self) -> bool {
        self.track_ended.load(Ordering::SeqCst) || self.transport_closed.load(Ordering::SeqCst)
    }
}

impl ProducerEvents for ProducerHandler {
    fn on_track_ended(&self) {
        self.track_ended.store(true, Ordering::SeqCst);
        let (Some(manager), Some(id)) = (self.manager.upgrade(), self.producer_id.get()) else {
            return;
        };
        info!(kind = %self.kind, producer_id = %id, "Local track ended");
        manager.close(self.kind, Some(id), true);
    }

    fn on_transport_closed(&self) {
        self.transport_closed.store(true, Ordering::SeqCst);
        let (Some(manager), Some(id)) = (self.manager.upgrade(), self.producer_id.get()) else {
            return;
        };
        debug!(kind = %self.kind, producer_id = %id, "Send transport closed under producer");
        manager.close(self.kind, Some(id), false);
    }
}
