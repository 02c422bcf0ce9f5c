//! Transport coordination
//!
//! Establishes the outbound and inbound media transports of a session and
//! answers the engine's per-transport callbacks over the signaling channel.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use huddle_proto::messages::{ConnectTransport, CreateWebRtcTransport, Produce};
use huddle_proto::{DtlsParameters, ProducerId, RtpParameters, TrackKind, TransportId};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::device::CapabilitySet;
use crate::engine::{MediaEngine, MediaTransport, TransportHandler};
use crate::error::{Error, Result};
use crate::signaling::SignalingChannel;
use crate::types::{ConnectionState, TransportRole};

/// Owns the send and receive transports of one session
#[derive(Clone)]
pub struct TransportCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    channel: SignalingChannel,
    engine: Arc<dyn MediaEngine>,
    send: RwLock<Option<Arc<dyn MediaTransport>>>,
    recv: RwLock<Option<Arc<dyn MediaTransport>>>,
}

impl CoordinatorInner {
    fn slot(&self, role: TransportRole) -> &RwLock<Option<Arc<dyn MediaTransport>>> {
        match role {
            TransportRole::Send => &self.send,
            TransportRole::Recv => &self.recv,
        }
    }

    /// Close the transport in `role` if it is still the one with `id`
    fn close_if_current(&self, role: TransportRole, id: &TransportId) {
        let taken = {
            let mut slot = self.slot(role).write();
            match slot.as_ref() {
                Some(transport) if &transport.id() == id => slot.take(),
                _ => None,
            }
        };
        if let Some(transport) = taken {
            transport.close();
        }
    }
}

impl TransportCoordinator {
    pub fn new(channel: SignalingChannel, engine: Arc<dyn MediaEngine>) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                channel,
                engine,
                send: RwLock::new(None),
                recv: RwLock::new(None),
            }),
        }
    }

    /// Create the send transport, then the receive transport
    ///
    /// The receive request is not issued until the send transport exists. On
    /// failure nothing is left open.
    pub async fn init_transports(&self, capabilities: &CapabilitySet) -> Result<()> {
        let send = self
            .create(
                TransportRole::Send,
                CreateWebRtcTransport::Send {
                    rtp_capabilities: capabilities.local().clone(),
                },
            )
            .await?;
        self.install(TransportRole::Send, send);

        match self
            .create(
                TransportRole::Recv,
                CreateWebRtcTransport::Recv { force_tcp: false },
            )
            .await
        {
            Ok(recv) => {
                self.install(TransportRole::Recv, recv);
                Ok(())
            }
            Err(e) => {
                self.close_all();
                Err(e)
            }
        }
    }

    async fn create(
        &self,
        role: TransportRole,
        request: CreateWebRtcTransport,
    ) -> Result<Arc<dyn MediaTransport>> {
        let wrap = |source: Error| Error::TransportCreate {
            role,
            source: Box::new(source),
        };

        let params = self.inner.channel.request(&request).await.map_err(wrap)?;
        let transport_id = params.id.clone();

        let handler: Arc<dyn TransportHandler> = Arc::new(TransportEvents {
            coordinator: Arc::downgrade(&self.inner),
            channel: self.inner.channel.clone(),
            role,
            transport_id: transport_id.clone(),
        });

        let transport = match role {
            TransportRole::Send => self.inner.engine.create_send_transport(params, handler),
            TransportRole::Recv => self.inner.engine.create_recv_transport(params, handler),
        }
        .map_err(wrap)?;

        info!(role = %role, transport_id = %transport_id, "Transport created");
        Ok(transport)
    }

    fn install(&self, role: TransportRole, transport: Arc<dyn MediaTransport>) {
        let previous = self.inner.slot(role).write().replace(transport);
        if let Some(previous) = previous {
            warn!(role = %role, transport_id = %previous.id(), "Replacing open transport");
            previous.close();
        }
    }

    #[must_use]
    pub fn get(&self, role: TransportRole) -> Option<Arc<dyn MediaTransport>> {
        self.inner.slot(role).read().clone()
    }

    /// The transport in `role`, if it exists and has not failed or closed
    pub fn require(&self, role: TransportRole) -> Result<Arc<dyn MediaTransport>> {
        match self.get(role) {
            Some(transport) if !transport.is_closed() && !transport.connection_state().is_terminal() => {
                Ok(transport)
            }
            _ => Err(Error::TransportUnavailable(role)),
        }
    }

    #[must_use]
    pub fn send_transport(&self) -> Option<Arc<dyn MediaTransport>> {
        self.get(TransportRole::Send)
    }

    #[must_use]
    pub fn recv_transport(&self) -> Option<Arc<dyn MediaTransport>> {
        self.get(TransportRole::Recv)
    }

    /// Close both transports. Outstanding engine operations on them fail.
    pub fn close_all(&self) {
        for role in [TransportRole::Send, TransportRole::Recv] {
            let taken = self.inner.slot(role).write().take();
            if let Some(transport) = taken {
                debug!(role = %role, transport_id = %transport.id(), "Closing transport");
                transport.close();
            }
        }
    }
}

/// Engine callbacks for one transport
struct TransportEvents {
    coordinator: Weak<CoordinatorInner>,
    channel: SignalingChannel,
    role: TransportRole,
    transport_id: TransportId,
}

#[async_trait]
impl TransportHandler for TransportEvents {
    async fn on_connect(&self, dtls_parameters: DtlsParameters) -> Result<()> {
        debug!(role = %self.role, transport_id = %self.transport_id, "Connecting transport");
        self.channel
            .request(&ConnectTransport {
                transport_id: self.transport_id.clone(),
                dtls_parameters,
            })
            .await?;
        Ok(())
    }

    async fn on_produce(&self, kind: TrackKind, rtp_parameters: RtpParameters) -> Result<ProducerId> {
        if self.role != TransportRole::Send {
            return Err(Error::TransportUnavailable(TransportRole::Send));
        }

        let response = self
            .channel
            .request(&Produce {
                transport_id: self.transport_id.clone(),
                kind,
                rtp_parameters,
            })
            .await?;
        Ok(response.producer_id)
    }

    fn on_connection_state_change(&self, state: ConnectionState) {
        info!(
            role = %self.role,
            transport_id = %self.transport_id,
            state = %state,
            "Transport connection state changed"
        );

        if state == ConnectionState::Failed {
            warn!(role = %self.role, transport_id = %self.transport_id, "Transport failed, closing");
            if let Some(coordinator) = self.coordinator.upgrade() {
                coordinator.close_if_current(self.role, &self.transport_id);
            }
        }
    }
}
