//! Signaling channel
//!
//! Wraps a raw socket transport with typed requests, per-request deadlines
//! and decoded server events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use huddle_proto::{DisconnectReason, Notification, RemoteError, Request, ServerEvent};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// Inbound event as delivered by the socket
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    Connected,
    Disconnected(String),
    ConnectError(String),
    Message { name: String, payload: Value },
}

/// Raw bidirectional event socket
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Open the socket. Resolves once the server accepted the connection.
    async fn connect(&self) -> Result<()>;

    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Fire-and-forget message
    fn emit(&self, event: &str, payload: Value) -> Result<()>;

    /// Message answered through the acknowledgement callback
    async fn emit_with_ack(&self, event: &str, payload: Value) -> Result<Value>;

    fn subscribe(&self) -> broadcast::Receiver<RawEvent>;
}

/// Decoded channel event
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected(DisconnectReason),
    ConnectError(String),
    Server(ServerEvent),
}

/// Typed request/response wrapper over a [`SignalingTransport`]
#[derive(Clone)]
pub struct SignalingChannel {
    transport: Arc<dyn SignalingTransport>,
    request_timeout: Duration,
}

impl SignalingChannel {
    pub fn new(transport: Arc<dyn SignalingTransport>, request_timeout: Duration) -> Self {
        Self {
            transport,
            request_timeout,
        }
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn SignalingTransport> {
        &self.transport
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Send a request and wait for its acknowledgement
    ///
    /// Fails with [`Error::RequestTimeout`] when no answer arrives in time and
    /// with [`Error::Remote`] when the answer carries an `error` field.
    pub async fn request<R: Request>(&self, request: &R) -> Result<R::Response> {
        let payload = serde_json::to_value(request).map_err(|source| Error::Payload {
            request: R::NAME,
            source,
        })?;

        trace!(request = R::NAME, "Sending signaling request");

        let response = tokio::time::timeout(
            self.request_timeout,
            self.transport.emit_with_ack(R::NAME, payload),
        )
        .await
        .map_err(|_| {
            warn!(request = R::NAME, timeout = ?self.request_timeout, "Signaling request timed out");
            Error::RequestTimeout {
                request: R::NAME,
                timeout: self.request_timeout,
            }
        })??;

        if let Some(error) = RemoteError::from_response(&response) {
            debug!(request = R::NAME, error = %error.message, "Signaling request rejected");
            return Err(Error::Remote {
                request: R::NAME,
                error,
            });
        }

        serde_json::from_value(response).map_err(|source| Error::Payload {
            request: R::NAME,
            source,
        })
    }

    /// Send a fire-and-forget notification
    pub fn emit<N: Notification>(&self, notification: &N) -> Result<()> {
        let payload = serde_json::to_value(notification).map_err(|source| Error::Payload {
            request: N::NAME,
            source,
        })?;
        trace!(event = N::NAME, "Emitting signaling notification");
        self.transport.emit(N::NAME, payload)
    }

    pub fn subscribe(&self) -> ChannelEvents {
        ChannelEvents {
            rx: self.transport.subscribe(),
        }
    }
}

/// Stream of decoded channel events
pub struct ChannelEvents {
    rx: broadcast::Receiver<RawEvent>,
}

impl ChannelEvents {
    /// Next event, or `None` once the transport is gone
    ///
    /// Unknown and malformed server events are logged and skipped.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.rx.recv().await {
                Ok(RawEvent::Connected) => return Some(ChannelEvent::Connected),
                Ok(RawEvent::Disconnected(reason)) => {
                    return Some(ChannelEvent::Disconnected(DisconnectReason::new(reason)))
                }
                Ok(RawEvent::ConnectError(message)) => {
                    return Some(ChannelEvent::ConnectError(message))
                }
                Ok(RawEvent::Message { name, payload }) => {
                    match ServerEvent::decode(&name, payload) {
                        Ok(Some(event)) => return Some(ChannelEvent::Server(event)),
                        Ok(None) => trace!(event = %name, "Ignoring unknown server event"),
                        Err(e) => warn!(event = %name, error = %e, "Malformed server event"),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Signaling event receiver lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FakeSignaling, Reply};
    use huddle_proto::messages::{ExitRoom, GetProducers, GetRouterRtpCapabilities, JoinRoom};
    use huddle_proto::RoomId;
    use serde_json::json;

    fn channel(server: &Arc<FakeSignaling>) -> SignalingChannel {
        SignalingChannel::new(server.clone(), Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out() {
        let server = FakeSignaling::new();
        server.set_reply(GetRouterRtpCapabilities::NAME, Reply::Silent);

        let started = tokio::time::Instant::now();
        let err = channel(&server)
            .request(&GetRouterRtpCapabilities {})
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::RequestTimeout {
                request: "getRouterRtpCapabilities",
                ..
            }
        ));
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_error_field_is_rejection() {
        let server = FakeSignaling::new();
        server.set_reply(JoinRoom::NAME, Reply::Value(json!({ "error": "Room is full" })));

        let err = channel(&server)
            .request(&JoinRoom {
                room_id: RoomId::from("abc"),
                name: "alice".to_string(),
            })
            .await
            .unwrap_err();

        match err {
            Error::Remote { request, error } => {
                assert_eq!(request, "join-room");
                assert_eq!(error.message, "Room is full");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_typed_response() {
        let server = FakeSignaling::new();
        let caps = channel(&server)
            .request(&GetRouterRtpCapabilities {})
            .await
            .unwrap();
        assert!(caps.find_codec("video/VP8").is_some());

        channel(&server).request(&ExitRoom {}).await.unwrap();
        assert_eq!(server.requests(), vec!["getRouterRtpCapabilities", "exit-room"]);
    }

    #[tokio::test]
    async fn test_malformed_response_is_payload_error() {
        let server = FakeSignaling::new();
        server.set_reply(
            GetRouterRtpCapabilities::NAME,
            Reply::Value(json!({ "codecs": "nope" })),
        );

        let err = channel(&server)
            .request(&GetRouterRtpCapabilities {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Payload { .. }));
    }

    #[tokio::test]
    async fn test_emit_and_events() {
        let server = FakeSignaling::new();
        let channel = channel(&server);
        let mut events = channel.subscribe();

        channel.emit(&GetProducers {}).unwrap();
        assert_eq!(server.emitted_names(), vec!["getProducers"]);

        server.push("hello", json!({}));
        server.push("newProducers", json!([{ "producer_id": "p1" }]));
        server.push("consumerClosed", json!({ "wrong": true }));
        server.drop_connection("io server disconnect");

        match events.recv().await {
            Some(ChannelEvent::Server(ServerEvent::NewProducers(list))) => {
                assert_eq!(list[0].producer_id.as_str(), "p1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match events.recv().await {
            Some(ChannelEvent::Disconnected(reason)) => assert!(reason.is_server_initiated()),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
