//! Server-pushed events

use crate::ids::{ConsumerId, ProducerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reason string the socket layer reports when the server closed the session
pub const SERVER_DISCONNECT_REASON: &str = "io server disconnect";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerAnnouncement {
    pub producer_id: ProducerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerClosed {
    pub consumer_id: ConsumerId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer_id: Option<ProducerId>,
}

/// Periodic network-quality snapshot for one consumed producer
///
/// Produced by the server's estimator; the client only relays it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerStats {
    pub producer_id: ProducerId,

    #[serde(default)]
    pub current_conditions: CurrentConditions,

    #[serde(default)]
    pub optimal_configuration: OptimalConfiguration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrentConditions {
    /// Mbps
    pub bandwidth: f64,
    pub throughput: f64,
    pub packet_loss: f64,
    /// Milliseconds
    pub latency: f64,
    /// Milliseconds
    pub jitter: f64,
    /// Either a number or a percentage string depending on server version
    pub congestion_score: Value,
    pub current_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimalConfiguration {
    /// Mbps
    pub bandwidth: f64,
    pub predicted_score: f64,
    /// Quality label such as `FHD` or `HD`
    pub video_quality: Option<String>,
    pub congestion_reduction_percentage: Value,
}

/// Named events the server pushes outside any request
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ConnectionSuccess(Value),
    NewProducers(Vec<ProducerAnnouncement>),
    ConsumerClosed(ConsumerClosed),
    ConsumerStats(ConsumerStats),
}

impl ServerEvent {
    pub const CONNECTION_SUCCESS: &'static str = "connection-success";
    pub const NEW_PRODUCERS: &'static str = "newProducers";
    pub const CONSUMER_CLOSED: &'static str = "consumerClosed";
    pub const CONSUMER_STATS: &'static str = "consumer-stats";

    /// Decode a named event. Unknown names yield `Ok(None)`.
    pub fn decode(name: &str, payload: Value) -> Result<Option<Self>, serde_json::Error> {
        let event = match name {
            Self::CONNECTION_SUCCESS => Self::ConnectionSuccess(payload),
            Self::NEW_PRODUCERS => Self::NewProducers(serde_json::from_value(payload)?),
            Self::CONSUMER_CLOSED => Self::ConsumerClosed(serde_json::from_value(payload)?),
            Self::CONSUMER_STATS => Self::ConsumerStats(serde_json::from_value(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ConnectionSuccess(_) => Self::CONNECTION_SUCCESS,
            Self::NewProducers(_) => Self::NEW_PRODUCERS,
            Self::ConsumerClosed(_) => Self::CONSUMER_CLOSED,
            Self::ConsumerStats(_) => Self::CONSUMER_STATS,
        }
    }
}

/// Why the signaling socket went away
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason(String);

impl DisconnectReason {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    /// The server closed the session on purpose; it must not be retried
    #[must_use]
    pub fn is_server_initiated(&self) -> bool {
        self.0 == SERVER_DISCONNECT_REASON
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
