//! Remote media consumption
//!
//! Every announced remote producer ends up as at most one consumer. Entries
//! remove themselves when the remote producer, the track or the receive
//! transport goes away.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use huddle_proto::messages::Consume;
use huddle_proto::{ConsumerId, ProducerId, TrackKind};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::device::CapabilitySet;
use crate::engine::{ConsumeOptions, ConsumerEvents, EngineConsumer, MediaStream, MediaTransport};
use crate::error::{Error, Result};
use crate::renderer::StreamNotifier;
use crate::signaling::SignalingChannel;
use crate::stats::NetworkStats;

/// A live remote stream
#[derive(Debug, Clone)]
pub struct ConsumedMedia {
    pub producer_id: ProducerId,
    pub consumer_id: ConsumerId,
    pub kind: TrackKind,
    pub stream: MediaStream,
}

struct ConsumerEntry {
    consumer: Arc<dyn EngineConsumer>,
    stream: MediaStream,
}

#[derive(Default)]
struct ConsumerState {
    /// Transports are up; announcements can be consumed immediately
    ready: bool,
    closed: bool,
    queued: Vec<ProducerId>,
    /// In-flight consumes, with the consumer id once the server assigned one
    pending: HashMap<ProducerId, Option<ConsumerId>>,
    /// In-flight consumes closed before they were registered
    cancelled: HashSet<ProducerId>,
    entries: HashMap<ProducerId, ConsumerEntry>,
}

/// Sole owner of the remote consumer map
#[derive(Clone)]
pub struct ConsumerManager {
    inner: Arc<ConsumerInner>,
}

struct ConsumerInner {
    channel: SignalingChannel,
    notifier: StreamNotifier,
    stats: Arc<NetworkStats>,
    state: Mutex<ConsumerState>,
}

struct Claim<'a> {
    inner: &'a ConsumerInner,
    producer_id: ProducerId,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.pending.remove(&self.producer_id);
        state.cancelled.remove(&self.producer_id);
    }
}

impl ConsumerManager {
    pub fn new(channel: SignalingChannel, notifier: StreamNotifier, stats: Arc<NetworkStats>) -> Self {
        Self {
            inner: Arc::new(ConsumerInner {
                channel,
                notifier,
                stats,
                state: Mutex::new(ConsumerState::default()),
            }),
        }
    }

    /// Queue an announcement that arrived before the transports exist
    ///
    /// Returns `true` when the id was queued; the caller consumes it right
    /// away otherwise.
    pub fn enqueue_if_not_ready(&self, producer_id: &ProducerId) -> bool {
        let mut state = self.inner.state.lock();
        if state.ready || state.closed {
            return !state.ready;
        }
        if !state.queued.contains(producer_id) {
            debug!(producer_id = %producer_id, "Queueing producer announcement");
            state.queued.push(producer_id.clone());
        }
        true
    }

    /// Accept announcements from now on, returning the ones queued so far
    pub fn mark_ready(&self) -> Vec<ProducerId> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Vec::new();
        }
        state.ready = true;
        std::mem::take(&mut state.queued)
    }

    /// Subscribe to a remote producer
    ///
    /// Returns `Ok(None)` when the producer is already consumed or being
    /// consumed.
    pub async fn consume(
        &self,
        producer_id: ProducerId,
        capabilities: &CapabilitySet,
        transport: &Arc<dyn MediaTransport>,
    ) -> Result<Option<ConsumedMedia>> {
        let Some(_claim) = self.claim(&producer_id)? else {
            debug!(producer_id = %producer_id, "Producer already consumed");
            return Ok(None);
        };

        self.create(producer_id.clone(), capabilities, transport)
            .await
            .map_err(|source| Error::ConsumerCreate {
                producer_id,
                source: Box::new(source),
            })
    }

    fn claim(&self, producer_id: &ProducerId) -> Result<Option<Claim<'_>>> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(Error::SessionClosed);
        }
        if state.entries.contains_key(producer_id) || state.pending.contains_key(producer_id) {
            return Ok(None);
        }
        state.pending.insert(producer_id.clone(), None);
        Ok(Some(Claim {
            inner: &self.inner,
            producer_id: producer_id.clone(),
        }))
    }

    async fn create(
        &self,
        producer_id: ProducerId,
        capabilities: &CapabilitySet,
        transport: &Arc<dyn MediaTransport>,
    ) -> Result<Option<ConsumedMedia>> {
        let response = self
            .inner
            .channel
            .request(&Consume {
                rtp_capabilities: capabilities.local().clone(),
                consumer_transport_id: transport.id(),
                producer_id: producer_id.clone(),
            })
            .await?;

        let consumer_id = response.id.clone();
        {
            let mut state = self.inner.state.lock();
            if state.cancelled.contains(&producer_id) {
                debug!(producer_id = %producer_id, "Consumer closed before creation");
                return Ok(None);
            }
            if let Some(pending) = state.pending.get_mut(&producer_id) {
                *pending = Some(consumer_id.clone());
            }
        }

        let events = Arc::new(ConsumerHandler {
            manager: Arc::downgrade(&self.inner),
            producer_id: producer_id.clone(),
            consumer_id: consumer_id.clone(),
        });

        let consumer = transport
            .consume(
                ConsumeOptions {
                    id: response.id,
                    producer_id: producer_id.clone(),
                    kind: response.kind,
                    rtp_parameters: response.rtp_parameters,
                },
                events,
            )
            .await?;

        let kind = consumer.kind();
        let stream = MediaStream::from_track(consumer.track());

        let streams = {
            let mut state = self.inner.state.lock();
            if state.closed {
                drop(state);
                consumer.close();
                stream.stop_all();
                return Err(Error::SessionClosed);
            }
            if state.cancelled.contains(&producer_id) {
                drop(state);
                consumer.close();
                stream.stop_all();
                debug!(producer_id = %producer_id, consumer_id = %consumer_id, "Consumer closed before registration");
                return Ok(None);
            }
            state.entries.insert(
                producer_id.clone(),
                ConsumerEntry {
                    consumer,
                    stream: stream.clone(),
                },
            );
            collect_streams(&state)
        };

        info!(producer_id = %producer_id, consumer_id = %consumer_id, kind = %kind, "Consumer created");

        self.inner.notifier.remote_added(kind, producer_id.as_str(), &stream);
        self.inner.notifier.remote_streams(&streams);

        Ok(Some(ConsumedMedia {
            producer_id,
            consumer_id,
            kind,
            stream,
        }))
    }

    /// Close and forget the consumer of `producer_id`. Idempotent.
    ///
    /// A consume still in flight for `producer_id` is cancelled instead and
    /// never registers. Returns `true` only when a live consumer was closed.
    pub fn remove_consumer(&self, producer_id: &ProducerId) -> bool {
        self.inner.remove(producer_id, None)
    }

    /// Same as [`remove_consumer`](Self::remove_consumer), located by consumer id
    pub fn remove_by_consumer_id(&self, consumer_id: &ConsumerId) -> bool {
        let producer_id = {
            let state = self.inner.state.lock();
            state
                .entries
                .iter()
                .find(|(_, entry)| &entry.consumer.id() == consumer_id)
                .map(|(producer_id, _)| producer_id.clone())
                .or_else(|| {
                    state
                        .pending
                        .iter()
                        .find(|(_, pending)| pending.as_ref() == Some(consumer_id))
                        .map(|(producer_id, _)| producer_id.clone())
                })
        };

        match producer_id {
            Some(producer_id) => self.inner.remove(&producer_id, Some(consumer_id)),
            None => {
                debug!(consumer_id = %consumer_id, "No consumer to remove");
                false
            }
        }
    }

    #[must_use]
    pub fn contains(&self, producer_id: &ProducerId) -> bool {
        self.inner.state.lock().entries.contains_key(producer_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn producer_ids(&self) -> Vec<ProducerId> {
        let mut ids: Vec<_> = self.inner.state.lock().entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn streams(&self) -> Vec<MediaStream> {
        collect_streams(&self.inner.state.lock())
    }

    /// Close every consumer and refuse new ones
    pub fn close_all(&self) {
        let drained: Vec<_> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.ready = false;
            state.queued.clear();
            state.entries.drain().collect()
        };
        if drained.is_empty() {
            return;
        }
        for (producer_id, entry) in drained {
            entry.consumer.close();
            entry.stream.stop_all();
            self.inner.stats.remove(&producer_id);
            self.inner.notifier.removed(producer_id.as_str());
        }
        self.inner.notifier.remote_streams(&[]);
    }
}

impl ConsumerInner {
    /// With `expected` set, only the consumer with that id is removed
    fn remove(&self, producer_id: &ProducerId, expected: Option<&ConsumerId>) -> bool {
        let (entry, streams) = {
            let mut state = self.state.lock();
            let matches = match (state.entries.get(producer_id), expected) {
                (Some(entry), Some(id)) => &entry.consumer.id() == id,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !matches {
                let cancel = match (state.pending.get(producer_id), expected) {
                    (Some(Some(pending)), Some(id)) => pending == id,
                    (Some(None), Some(_)) => false,
                    (Some(_), None) => true,
                    (None, _) => false,
                };
                if cancel && !state.entries.contains_key(producer_id) {
                    debug!(producer_id = %producer_id, "Cancelling in-flight consume");
                    state.cancelled.insert(producer_id.clone());
                }
                return false;
            }
            let Some(entry) = state.entries.remove(producer_id) else {
                return false;
            };
            (entry, collect_streams(&state))
        };

        entry.consumer.close();
        entry.stream.stop_all();
        self.stats.remove(producer_id);

        info!(producer_id = %producer_id, consumer_id = %entry.consumer.id(), "Consumer removed");
        self.notifier.removed(producer_id.as_str());
        self.notifier.remote_streams(&streams);
        true
    }
}

fn collect_streams(state: &ConsumerState) -> Vec<MediaStream> {
    let mut entries: Vec<_> = state.entries.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries.into_iter().map(|(_, entry)| entry.stream.clone()).collect()
}

/// Terminal events of one consumer
struct ConsumerHandler {
    manager: Weak<ConsumerInner>,
    producer_id: ProducerId,
    consumer_id: ConsumerId,
}

impl ConsumerHandler {
    fn remove(&self, cause: &'static str) {
        if let Some(manager) = self.manager.upgrade() {
            if manager.remove(&self.producer_id, Some(&self.consumer_id)) {
                debug!(producer_id = %self.producer_id, cause, "Consumer removed itself");
            }
        }
    }
}

impl ConsumerEvents for ConsumerHandler {
    fn on_track_ended(&self) {
        self.remove("trackended");
    }

    fn on_transport_closed(&self) {
        self.remove("transportclose");
    }

    fn on_producer_closed(&self) {
        self.remove("producerclose");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CapabilityNegotiator;
    use crate::renderer::StreamNotifier;
    use crate::test_helpers::{
        router_capabilities, FakeEngine, FakeSignaling, RecordingRenderer, RenderEvent, Reply,
    };
    use crate::transport::TransportCoordinator;
    use crate::types::TransportRole;
    use huddle_proto::{ConsumerStats, CurrentConditions, OptimalConfiguration};
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        server: Arc<FakeSignaling>,
        engine: Arc<FakeEngine>,
        renderer: Arc<RecordingRenderer>,
        stats: Arc<NetworkStats>,
        caps: Arc<CapabilitySet>,
        transport: Arc<dyn MediaTransport>,
        manager: ConsumerManager,
    }

    async fn fixture() -> Fixture {
        let server = FakeSignaling::new();
        let engine = FakeEngine::new();
        let renderer = RecordingRenderer::new();
        let stats = Arc::new(NetworkStats::new());
        let channel = SignalingChannel::new(server.clone(), Duration::from_secs(10));

        let caps = CapabilityNegotiator::new(engine.clone())
            .load_capabilities(&router_capabilities())
            .await
            .unwrap();
        let coordinator = TransportCoordinator::new(channel.clone(), engine.clone());
        coordinator.init_transports(&caps).await.unwrap();
        let transport = coordinator.require(TransportRole::Recv).unwrap();

        let notifier = StreamNotifier::new(renderer.clone(), renderer.clone());
        let manager = ConsumerManager::new(channel, notifier, stats.clone());

        Fixture {
            server,
            engine,
            renderer,
            stats,
            caps,
            transport,
            manager,
        }
    }

    fn pid(id: &str) -> ProducerId {
        ProducerId::from(id)
    }

    #[tokio::test]
    async fn test_consume_registers_once() {
        let f = fixture().await;

        let media = f
            .manager
            .consume(pid("p1"), &f.caps, &f.transport)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(media.producer_id, pid("p1"));
        assert_eq!(media.stream.tracks().len(), 1);

        let again = f.manager.consume(pid("p1"), &f.caps, &f.transport).await.unwrap();
        assert!(again.is_none());
        assert_eq!(f.manager.len(), 1);
        assert_eq!(f.server.request_payloads("consume").len(), 1);

        let payload = &f.server.request_payloads("consume")[0];
        assert_eq!(payload["producerId"], "p1");
        assert_eq!(payload["consumerTransportId"], f.transport.id().as_str());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let f = fixture().await;
        let media = f
            .manager
            .consume(pid("p1"), &f.caps, &f.transport)
            .await
            .unwrap()
            .unwrap();

        assert!(f.manager.remove_consumer(&pid("p1")));
        assert!(!f.manager.remove_consumer(&pid("p1")));

        let removed = f
            .renderer
            .events()
            .into_iter()
            .filter(|e| e == &RenderEvent::Removed("p1".to_string()))
            .count();
        assert_eq!(removed, 1);
        assert!(!media.stream.tracks()[0].is_live());
    }

    #[tokio::test]
    async fn test_terminal_events_remove_once() {
        let f = fixture().await;
        for id in ["p1", "p2", "p3"] {
            f.manager.consume(pid(id), &f.caps, &f.transport).await.unwrap();
        }

        let c1 = f.engine.consumer_for(&pid("p1")).unwrap();
        c1.close_producer();
        c1.close_producer();
        f.engine.consumer_for(&pid("p2")).unwrap().end_track();
        assert_eq!(f.manager.producer_ids(), vec![pid("p3")]);

        f.transport.close();
        assert!(f.manager.is_empty());
        assert_eq!(f.renderer.remote_stream_count(), Some(0));

        let removed = f
            .renderer
            .events()
            .into_iter()
            .filter(|e| matches!(e, RenderEvent::Removed(_)))
            .count();
        assert_eq!(removed, 3);
    }

    #[tokio::test]
    async fn test_stale_handler_does_not_remove_newer_consumer() {
        let f = fixture().await;
        f.manager.consume(pid("p1"), &f.caps, &f.transport).await.unwrap();
        let old = f.engine.consumer_for(&pid("p1")).unwrap();

        f.manager.remove_consumer(&pid("p1"));
        f.manager.consume(pid("p1"), &f.caps, &f.transport).await.unwrap();

        old.close_producer();
        assert!(f.manager.contains(&pid("p1")));
    }

    #[tokio::test]
    async fn test_remove_by_consumer_id() {
        let f = fixture().await;
        let media = f
            .manager
            .consume(pid("p1"), &f.caps, &f.transport)
            .await
            .unwrap()
            .unwrap();

        assert!(f.manager.remove_by_consumer_id(&media.consumer_id));
        assert!(!f.manager.remove_by_consumer_id(&media.consumer_id));
    }

    #[tokio::test]
    async fn test_removal_evicts_stats() {
        let f = fixture().await;
        f.manager.consume(pid("p1"), &f.caps, &f.transport).await.unwrap();
        f.stats.update(ConsumerStats {
            producer_id: pid("p1"),
            current_conditions: CurrentConditions::default(),
            optimal_configuration: OptimalConfiguration::default(),
        });

        f.manager.remove_consumer(&pid("p1"));
        assert!(f.stats.get(&pid("p1")).is_none());
    }

    #[tokio::test]
    async fn test_failed_consume_can_be_retried() {
        let f = fixture().await;
        f.server.set_reply_sequence(
            "consume",
            vec![Reply::Value(json!({ "error": "Cannot consume" })), Reply::Default],
        );

        let err = f
            .manager
            .consume(pid("p1"), &f.caps, &f.transport)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConsumerCreate { .. }));
        assert!(f.manager.is_empty());

        let media = f.manager.consume(pid("p1"), &f.caps, &f.transport).await.unwrap();
        assert!(media.is_some());
    }

    #[tokio::test]
    async fn test_queue_before_ready() {
        let f = fixture().await;

        assert!(f.manager.enqueue_if_not_ready(&pid("p1")));
        assert!(f.manager.enqueue_if_not_ready(&pid("p1")));
        assert!(f.manager.enqueue_if_not_ready(&pid("p2")));

        assert_eq!(f.manager.mark_ready(), vec![pid("p1"), pid("p2")]);
        assert!(!f.manager.enqueue_if_not_ready(&pid("p3")));
        assert!(f.manager.mark_ready().is_empty());
    }

    #[tokio::test]
    async fn test_close_all_refuses_new_consumers() {
        let f = fixture().await;
        f.manager.consume(pid("p1"), &f.caps, &f.transport).await.unwrap();

        f.manager.close_all();
        assert!(f.manager.is_empty());

        let err = f.manager.consume(pid("p2"), &f.caps, &f.transport).await.unwrap_err();
        assert!(matches!(err, Error::SessionClosed));
        assert!(f.manager.mark_ready().is_empty());
    }
}
