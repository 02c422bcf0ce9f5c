//! Presentation-side collaborators
//!
//! The session never touches presentation state. It reports stream-set
//! changes to a [`Renderer`] and lifecycle changes to a [`SessionObserver`].

use std::sync::Arc;

use huddle_proto::{ConsumerStats, TrackKind};

use crate::engine::MediaStream;
use crate::types::{QualityLabel, SessionState, StreamSlot};

/// Draws streams. `id` is the producer id the stream belongs to.
pub trait Renderer: Send + Sync {
    fn stream_added(&self, slot: StreamSlot, kind: TrackKind, id: &str, stream: &MediaStream);

    fn stream_removed(&self, id: &str);

    fn quality_updated(&self, id: &str, label: QualityLabel);

    /// Latest network snapshot for a remote stream
    fn network_stats(&self, _id: &str, _stats: &ConsumerStats) {}
}

/// Session-level change notifications
pub trait SessionObserver: Send + Sync {
    fn on_local_stream_update(&self, _streams: &[MediaStream]) {}

    fn on_remote_stream_update(&self, _streams: &[MediaStream]) {}

    fn on_state_change(&self, _state: SessionState) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Fan-out point shared by the managers
#[derive(Clone)]
pub struct StreamNotifier {
    renderer: Arc<dyn Renderer>,
    observer: Arc<dyn SessionObserver>,
}

impl StreamNotifier {
    pub fn new(renderer: Arc<dyn Renderer>, observer: Arc<dyn SessionObserver>) -> Self {
        Self { renderer, observer }
    }

    pub(crate) fn local_added(&self, kind: TrackKind, id: &str, stream: &MediaStream) {
        self.renderer.stream_added(StreamSlot::Local, kind, id, stream);
    }

    pub(crate) fn remote_added(&self, kind: TrackKind, id: &str, stream: &MediaStream) {
        self.renderer.stream_added(StreamSlot::Remote, kind, id, stream);
    }

    pub(crate) fn removed(&self, id: &str) {
        self.renderer.stream_removed(id);
    }

    pub(crate) fn quality(&self, id: &str, label: QualityLabel) {
        self.renderer.quality_updated(id, label);
    }

    pub(crate) fn network_stats(&self, id: &str, stats: &ConsumerStats) {
        self.renderer.network_stats(id, stats);
    }

    pub(crate) fn local_streams(&self, streams: &[MediaStream]) {
        self.observer.on_local_stream_update(streams);
    }

    pub(crate) fn remote_streams(&self, streams: &[MediaStream]) {
        self.observer.on_remote_stream_update(streams);
    }

    pub(crate) fn state(&self, state: SessionState) {
        self.observer.on_state_change(state);
    }
}
