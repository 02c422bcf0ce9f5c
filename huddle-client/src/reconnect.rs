//! Session supervision and reconnection
//!
//! A [`SessionSupervisor`] keeps a participant in a room across network
//! drops. Each pass connects the signaling socket and builds a fresh
//! [`RoomClient`]; a lost connection schedules another pass after an
//! exponential delay. A server-initiated disconnect, an explicit exit or a
//! join rejection ends supervision.

use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use huddle_proto::RoomId;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ClientConfig, ReconnectConfig};
use crate::error::{Error, Result};
use crate::room::{Collaborators, ExitReason, RoomClient};
use crate::validation::validate_join;

/// Delays between reconnection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_secs(config.initial_delay_seconds),
            max_delay: Duration::from_secs(config.max_delay_seconds),
        }
    }
}

impl ReconnectPolicy {
    /// Doubling delays starting at `initial_delay`, capped at `max_delay`,
    /// one per allowed attempt
    #[must_use]
    pub fn delays(&self) -> ExponentialBackoff {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.max_attempts)
            .build()
    }
}

/// Connection status for display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub connecting: bool,
    /// Reconnection attempts made since the last successful join
    pub attempts: usize,
    pub max_attempts: usize,
}

/// How supervision ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Exited,
    ClosedByServer,
    /// Every reconnection attempt failed
    Abandoned { attempts: usize },
}

enum PassEnd {
    Exited,
    ClosedByServer,
    Lost { joined: bool },
}

pub struct SessionSupervisor {
    config: Arc<ClientConfig>,
    collaborators: Collaborators,
    policy: ReconnectPolicy,
    status: watch::Sender<ConnectionStatus>,
    current: Mutex<Option<RoomClient>>,
    stop: CancellationToken,
}

impl SessionSupervisor {
    pub fn new(config: ClientConfig, collaborators: Collaborators) -> Self {
        let policy = ReconnectPolicy::from(&config.reconnect);
        Self {
            config: Arc::new(config),
            collaborators,
            status: watch::Sender::new(ConnectionStatus {
                max_attempts: policy.max_attempts,
                ..ConnectionStatus::default()
            }),
            policy,
            current: Mutex::new(None),
            stop: CancellationToken::new(),
        }
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Session of the current pass, if one is running
    #[must_use]
    pub fn current(&self) -> Option<RoomClient> {
        self.current.lock().clone()
    }

    /// Leave the room and stop reconnecting
    pub fn exit(&self) {
        self.stop.cancel();
    }

    fn publish(&self, connected: bool, connecting: bool, attempts: usize) {
        self.status.send_replace(ConnectionStatus {
            connected,
            connecting,
            attempts,
            max_attempts: self.policy.max_attempts,
        });
    }

    /// Stay in `room_id` until exit, server disconnect or exhaustion
    ///
    /// Fails only when the first join is rejected for a reason other than
    /// the connection.
    pub async fn run(&self, room_id: impl Into<RoomId>, name: impl Into<String>) -> Result<SessionOutcome> {
        let room_id = room_id.into();
        let name = name.into();
        if let Err(e) = validate_join(room_id.as_str(), &name) {
            let err = Error::from(e);
            self.collaborators.errors.record(&err);
            return Err(err);
        }

        let mut delays = self.policy.delays();
        let mut attempts = 0;

        let outcome = loop {
            if self.stop.is_cancelled() {
                break SessionOutcome::Exited;
            }
            self.publish(false, true, attempts);

            match self.pass(&room_id, &name, attempts).await {
                Ok(PassEnd::Exited) => break SessionOutcome::Exited,
                Ok(PassEnd::ClosedByServer) => break SessionOutcome::ClosedByServer,
                Ok(PassEnd::Lost { joined }) => {
                    if joined {
                        attempts = 0;
                        delays = self.policy.delays();
                    }
                }
                Err(e) => {
                    self.publish(false, false, attempts);
                    self.collaborators.signaling.disconnect();
                    return Err(e);
                }
            }

            let Some(delay) = delays.next() else {
                let err = Error::ReconnectExhausted { attempts };
                error!(attempts, room_id = %room_id, "Max reconnection attempts reached");
                self.collaborators.errors.record(&err);
                break SessionOutcome::Abandoned { attempts };
            };

            attempts += 1;
            self.publish(false, true, attempts);
            info!(
                attempt = attempts,
                max_attempts = self.policy.max_attempts,
                delay = ?delay,
                "Reconnecting"
            );
            tokio::select! {
                () = self.stop.cancelled() => break SessionOutcome::Exited,
                () = tokio::time::sleep(delay) => {}
            }
        };

        self.current.lock().take();
        self.collaborators.signaling.disconnect();
        self.publish(false, false, attempts);
        info!(room_id = %room_id, outcome = ?outcome, "Session supervision ended");
        Ok(outcome)
    }

    /// One connect-join-wait cycle
    async fn pass(&self, room_id: &RoomId, name: &str, attempts: usize) -> Result<PassEnd> {
        let signaling = &self.collaborators.signaling;
        if !signaling.is_connected() {
            let connect = tokio::time::timeout(
                self.config.signaling.request_timeout(),
                signaling.connect(),
            );
            let connected = tokio::select! {
                () = self.stop.cancelled() => return Ok(PassEnd::Exited),
                r = connect => r,
            };
            match connected {
                Ok(Ok(())) => debug!("Signaling connected"),
                Ok(Err(e)) => {
                    warn!(error = %e, "Signaling connect failed");
                    self.collaborators.errors.record(&e);
                    return Ok(PassEnd::Lost { joined: false });
                }
                Err(_) => {
                    let err = Error::RequestTimeout {
                        request: "connect",
                        timeout: self.config.signaling.request_timeout(),
                    };
                    warn!(error = %err, "Signaling connect timed out");
                    self.collaborators.errors.record(&err);
                    return Ok(PassEnd::Lost { joined: false });
                }
            }
        }

        let client = RoomClient::new(
            room_id.clone(),
            name,
            &self.config,
            self.collaborators.clone(),
        );
        *self.current.lock() = Some(client.clone());

        let joined = tokio::select! {
            () = self.stop.cancelled() => {
                client.exit().await;
                return Ok(PassEnd::Exited);
            }
            r = client.join() => r,
        };

        if let Err(e) = joined {
            return match client.exit_reason() {
                Some(ExitReason::ServerDisconnect) => Ok(PassEnd::ClosedByServer),
                Some(ExitReason::ConnectionLost(_)) => Ok(PassEnd::Lost { joined: false }),
                _ if e.is_connection_error() => Ok(PassEnd::Lost { joined: false }),
                _ => Err(e),
            };
        }

        if attempts > 0 {
            info!(attempts, room_id = %room_id, "Reconnected");
        }
        self.publish(true, false, 0);

        let reason = tokio::select! {
            () = self.stop.cancelled() => {
                client.exit().await;
                ExitReason::UserExit
            }
            reason = client.closed() => reason,
        };

        Ok(match reason {
            ExitReason::UserExit | ExitReason::JoinFailed => PassEnd::Exited,
            ExitReason::ServerDisconnect => PassEnd::ClosedByServer,
            ExitReason::ConnectionLost(_) => PassEnd::Lost { joined: true },
        })
    }
}
