//! Room session
//!
//! A [`RoomClient`] drives one pass through a room: join, publish and
//! subscribe, then exit or lose the connection. It owns the transports,
//! producers and consumers of that pass and tears all of them down exactly
//! once, whatever ends the session. Reconnecting builds a fresh client; see
//! [`crate::reconnect`].

use std::sync::{Arc, Weak};

use huddle_proto::messages::{ExitRoom, GetProducers, GetRouterRtpCapabilities, JoinRoom};
use huddle_proto::{ConsumerStats, ProducerId, RoomId, ServerEvent};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::classifier::ErrorCenter;
use crate::config::ClientConfig;
use crate::consumer::{ConsumedMedia, ConsumerManager};
use crate::device::{CapabilityNegotiator, CapabilitySet};
use crate::engine::{MediaDevices, MediaEngine, MediaStream, MediaTransport};
use crate::error::{Error, Result};
use crate::producer::{ProducedMedia, ProducerManager};
use crate::renderer::{Renderer, SessionObserver, StreamNotifier};
use crate::signaling::{ChannelEvent, ChannelEvents, SignalingChannel, SignalingTransport};
use crate::stats::NetworkStats;
use crate::transport::TransportCoordinator;
use crate::types::{MediaKind, SessionState, TransportRole};
use crate::validation::validate_join;


/// Everything a session talks to
#[derive(Clone)]
pub struct Collaborators {
    pub signaling: Arc<dyn SignalingTransport>,
    pub engine: Arc<dyn MediaEngine>,
    pub devices: Arc<dyn MediaDevices>,
    pub renderer: Arc<dyn Renderer>,
    pub observer: Arc<dyn SessionObserver>,
    pub errors: ErrorCenter,
}

/// What ended a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    UserExit,
    /// The server closed the session; not retried
    ServerDisconnect,
    /// The link dropped; the session may be rebuilt
    ConnectionLost(String),
    JoinFailed,
}

/// One session in one room
#[derive(Clone)]
pub struct RoomClient {
    inner: Arc<RoomInner>,
}

struct RoomInner {
    room_id: RoomId,
    name: String,
    channel: SignalingChannel,
    negotiator: CapabilityNegotiator,
    capabilities: RwLock<Option<Arc<CapabilitySet>>>,
    transports: TransportCoordinator,
    producers: ProducerManager,
    consumers: ConsumerManager,
    stats: Arc<NetworkStats>,
    errors: ErrorCenter,
    notifier: StreamNotifier,
    state: watch::Sender<SessionState>,
    exit: watch::Sender<Option<ExitReason>>,
    cancel: CancellationToken,
}

impl Drop for RoomInner {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.transports.close_all();
    }
}

impl RoomClient {
    pub fn new(
        room_id: impl Into<RoomId>,
        name: impl Into<String>,
        config: &ClientConfig,
        collaborators: Collaborators,
    ) -> Self {
        let room_id = RoomId::new(room_id.into().as_str().trim());
        let name = name.into().trim().to_string();

        let channel = SignalingChannel::new(
            collaborators.signaling,
            config.signaling.request_timeout(),
        );
        let notifier = StreamNotifier::new(collaborators.renderer, collaborators.observer);
        let stats = Arc::new(NetworkStats::new());

        Self {
            inner: Arc::new(RoomInner {
                room_id,
                name,
                negotiator: CapabilityNegotiator::new(collaborators.engine.clone()),
                capabilities: RwLock::new(None),
                transports: TransportCoordinator::new(channel.clone(), collaborators.engine),
                producers: ProducerManager::new(
                    channel.clone(),
                    collaborators.devices,
                    config.media.clone(),
                    notifier.clone(),
                ),
                consumers: ConsumerManager::new(channel.clone(), notifier.clone(), stats.clone()),
                stats,
                errors: collaborators.errors,
                notifier,
                channel,
                state: watch::Sender::new(SessionState::Idle),
                exit: watch::Sender::new(None),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Join the room and bring up both transports
    ///
    /// Invalid input is rejected before anything is sent. Any failure after
    /// that tears the session down and leaves exactly one error in the
    /// [`ErrorCenter`].
    pub async fn join(&self) -> Result<()> {
        let inner = &self.inner;
        if let Err(e) = validate_join(inner.room_id.as_str(), &inner.name) {
            let err = Error::from(e);
            inner.errors.record(&err);
            return Err(err);
        }
        inner.transition(&[SessionState::Idle], SessionState::Joining, "join")?;
        info!(room_id = %inner.room_id, name = %inner.name, "Joining room");

        tokio::spawn(run_events(
            Arc::downgrade(&self.inner),
            inner.channel.subscribe(),
            inner.cancel.clone(),
        ));

        let result = tokio::select! {
            r = inner.join_sequence() => r,
            () = inner.cancel.cancelled() => Err(inner.exit_error()),
        };

        match result {
            Ok(()) => {
                inner.transition(&[SessionState::Joining], SessionState::Joined, "join")?;
                info!(room_id = %inner.room_id, "Joined room");
                Ok(())
            }
            Err(err) => {
                warn!(room_id = %inner.room_id, error = %err, "Join failed");
                inner.close_session(ExitReason::JoinFailed, Some(&err));
                Err(err)
            }
        }
    }

    /// Leave the room
    ///
    /// The server is told first, but teardown happens whether or not it
    /// answers.
    pub async fn exit(&self) {
        let inner = &self.inner;
        match inner.transition(
            &[SessionState::Joining, SessionState::Joined],
            SessionState::Exiting,
            "exit",
        ) {
            Ok(()) => {
                if let Err(e) = inner.channel.request(&ExitRoom {}).await {
                    warn!(room_id = %inner.room_id, error = %e, "exit-room not acknowledged");
                }
            }
            Err(_) => debug!(room_id = %inner.room_id, state = %inner.state(), "Exit without a live session"),
        }
        inner.close_session(ExitReason::UserExit, None);
    }

    /// Capture and publish local media of `kind`
    pub async fn produce(&self, kind: MediaKind) -> Result<ProducedMedia> {
        let inner = &self.inner;
        let result: Result<ProducedMedia> = async {
            inner.require_state(SessionState::Joined, "produce")?;
            let capabilities = inner.capabilities()?;
            let transport = inner.transports.require(TransportRole::Send)?;
            inner.producers.produce(kind, &capabilities, &transport).await
        }
        .await;

        if let Err(e) = &result {
            inner.errors.record_with_context(e, Some(kind.as_str()));
        }
        result
    }

    /// Stop publishing `kind`
    pub fn close_producer(&self, kind: MediaKind) -> Option<ProducerId> {
        self.inner.producers.close_producer(kind)
    }

    /// Subscribe to a remote producer outside of server announcements
    pub async fn consume(&self, producer_id: ProducerId) -> Result<Option<ConsumedMedia>> {
        let result = self.inner.consume(producer_id).await;
        if let Err(e) = &result {
            self.inner.errors.record(e);
        }
        result
    }

    pub fn remove_consumer(&self, producer_id: &ProducerId) -> bool {
        self.inner.consumers.remove_consumer(producer_id)
    }

    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.inner.room_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.inner.exit.borrow().clone()
    }

    /// Wait for the session to end
    pub async fn closed(&self) -> ExitReason {
        let mut rx = self.inner.exit.subscribe();
        rx.wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|reason| reason.clone())
            .unwrap_or(ExitReason::UserExit)
    }

    #[must_use]
    pub fn capabilities(&self) -> Option<Arc<CapabilitySet>> {
        self.inner.capabilities.read().clone()
    }

    #[must_use]
    pub fn transport(&self, role: TransportRole) -> Option<Arc<dyn MediaTransport>> {
        self.inner.transports.get(role)
    }

    #[must_use]
    pub fn local_streams(&self) -> Vec<MediaStream> {
        self.inner.producers.streams()
    }

    #[must_use]
    pub fn remote_streams(&self) -> Vec<MediaStream> {
        self.inner.consumers.streams()
    }

    #[must_use]
    pub fn remote_producers(&self) -> Vec<ProducerId> {
        self.inner.consumers.producer_ids()
    }

    #[must_use]
    pub fn is_producing(&self, kind: MediaKind) -> bool {
        self.inner.producers.is_active(kind)
    }

    #[must_use]
    pub fn network_stats(&self, producer_id: &ProducerId) -> Option<ConsumerStats> {
        self.inner.stats.get(producer_id)
    }

    #[must_use]
    pub fn errors(&self) -> &ErrorCenter {
        &self.inner.errors
    }
}

impl RoomInner {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn require_state(&self, expected: SessionState, operation: &'static str) -> Result<()> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState { operation, state })
        }
    }

    /// Move to `next` if the current state is one of `allowed`
    fn transition(
        &self,
        allowed: &[SessionState],
        next: SessionState,
        operation: &'static str,
    ) -> Result<()> {
        let mut current = SessionState::Idle;
        let changed = self.state.send_if_modified(|state| {
            current = *state;
            if allowed.contains(state) && *state != next {
                *state = next;
                true
            } else {
                false
            }
        });
        if !changed {
            return Err(Error::InvalidState {
                operation,
                state: current,
            });
        }

        debug!(room_id = %self.room_id, from = %current, to = %next, "Session state changed");
        self.notifier.state(next);
        Ok(())
    }

    fn force_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(room_id = %self.room_id, from = %previous, to = %next, "Session state changed");
            self.notifier.state(next);
        }
    }

    fn capabilities(&self) -> Result<Arc<CapabilitySet>> {
        self.capabilities
            .read()
            .clone()
            .ok_or(Error::CapabilitiesNotLoaded)
    }

    async fn join_sequence(self: &Arc<Self>) -> Result<()> {
        self.channel
            .request(&JoinRoom {
                room_id: self.room_id.clone(),
                name: self.name.clone(),
            })
            .await?;

        let router = self.channel.request(&GetRouterRtpCapabilities {}).await?;
        let capabilities = self.negotiator.load_capabilities(&router).await?;
        *self.capabilities.write() = Some(Arc::clone(&capabilities));

        self.transports.init_transports(&capabilities).await?;

        for producer_id in self.consumers.mark_ready() {
            self.spawn_consume(producer_id);
        }
        self.channel.emit(&GetProducers {})?;
        Ok(())
    }

    /// The error an operation interrupted by teardown should report
    fn exit_error(&self) -> Error {
        match self.exit.borrow().as_ref() {
            Some(ExitReason::ServerDisconnect) => Error::ServerDisconnect,
            Some(ExitReason::ConnectionLost(reason)) => Error::ConnectionLost(reason.clone()),
            _ => Error::SessionClosed,
        }
    }

    /// Tear everything down. Only the first call has any effect.
    ///
    /// `error` is recorded only by the call that actually closes the session.
    fn close_session(&self, reason: ExitReason, error: Option<&Error>) -> bool {
        let mut first = false;
        self.exit.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason.clone());
            first = true;
            true
        });
        if !first {
            return false;
        }

        self.cancel.cancel();
        self.consumers.close_all();
        self.producers.close_all();
        self.transports.close_all();
        self.stats.clear();

        self.force_state(match reason {
            ExitReason::ConnectionLost(_) => SessionState::Reconnecting,
            _ => SessionState::Closed,
        });

        if let Some(err) = error {
            self.errors.record(err);
        }
        info!(room_id = %self.room_id, reason = ?reason, "Session closed");
        true
    }

    async fn consume(&self, producer_id: ProducerId) -> Result<Option<ConsumedMedia>> {
        let capabilities = self.capabilities()?;
        let transport = self.transports.require(TransportRole::Recv)?;
        self.consumers.consume(producer_id, &capabilities, &transport).await
    }

    fn spawn_consume(self: &Arc<Self>, producer_id: ProducerId) {
        let inner = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                () = cancel.cancelled() => return,
                r = inner.consume(producer_id.clone()) => r,
            };
            match result {
                Ok(_) => {}
                Err(e) if cancel.is_cancelled() => {
                    debug!(producer_id = %producer_id, error = %e, "Consume interrupted by teardown");
                }
                Err(e) => {
                    warn!(producer_id = %producer_id, error = %e, "Failed to consume producer");
                    inner.errors.record(&e);
                }
            }
        });
    }

    fn on_new_producer(self: &Arc<Self>, producer_id: ProducerId) {
        if self.consumers.enqueue_if_not_ready(&producer_id) {
            return;
        }
        self.spawn_consume(producer_id);
    }

    fn on_stats(&self, stats: ConsumerStats) {
        let producer_id = stats.producer_id.clone();
        if !self.consumers.contains(&producer_id) {
            trace!(producer_id = %producer_id, "Stats for unknown consumer");
            return;
        }

        self.notifier.network_stats(producer_id.as_str(), &stats);
        if let Some(label) = self.stats.update(stats) {
            self.notifier.quality(producer_id.as_str(), label);
        }
    }

    /// Returns `false` once the session is over
    fn handle_event(self: &Arc<Self>, event: ChannelEvent) -> bool {
        match event {
            ChannelEvent::Connected => {
                debug!(room_id = %self.room_id, "Signaling connected");
            }
            ChannelEvent::Disconnected(reason) => {
                if reason.is_server_initiated() {
                    info!(room_id = %self.room_id, "Disconnected by server");
                    self.close_session(ExitReason::ServerDisconnect, Some(&Error::ServerDisconnect));
                } else {
                    warn!(room_id = %self.room_id, reason = %reason, "Signaling connection lost");
                    let err = Error::ConnectionLost(reason.to_string());
                    self.close_session(ExitReason::ConnectionLost(reason.to_string()), Some(&err));
                }
                return false;
            }
            ChannelEvent::ConnectError(message) => {
                warn!(room_id = %self.room_id, error = %message, "Signaling connect error");
                let err = Error::Signaling(message.clone());
                self.close_session(ExitReason::ConnectionLost(message), Some(&err));
                return false;
            }
            ChannelEvent::Server(ServerEvent::ConnectionSuccess(_)) => {
                debug!(room_id = %self.room_id, "Server acknowledged connection");
            }
            ChannelEvent::Server(ServerEvent::NewProducers(announcements)) => {
                debug!(room_id = %self.room_id, count = announcements.len(), "New producers announced");
                for announcement in announcements {
                    self.on_new_producer(announcement.producer_id);
                }
            }
            ChannelEvent::Server(ServerEvent::ConsumerClosed(closed)) => {
                let removed = match &closed.producer_id {
                    Some(producer_id) => self.consumers.remove_consumer(producer_id),
                    None => self.consumers.remove_by_consumer_id(&closed.consumer_id),
                };
                debug!(consumer_id = %closed.consumer_id, removed, "Consumer closed by server");
            }
            ChannelEvent::Server(ServerEvent::ConsumerStats(stats)) => self.on_stats(stats),
        }
        true
    }
}

async fn run_events(inner: Weak<RoomInner>, mut events: ChannelEvents, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };

        match event {
            Some(event) => {
                if !inner.handle_event(event) {
                    break;
                }
            }
            None => {
                let err = Error::ConnectionLost("signaling transport closed".to_string());
                inner.close_session(
                    ExitReason::ConnectionLost("signaling transport closed".to_string()),
                    Some(&err),
                );
                break;
            }
        }
    }
    trace!("Room event loop stopped");
}
