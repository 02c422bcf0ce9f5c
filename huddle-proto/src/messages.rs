//! Client-initiated messages
//!
//! Every request is answered through the socket acknowledgement callback.
//! A response object carrying an `error` field is a rejection, regardless of
//! which request it answers.

use crate::ids::{ProducerId, RoomId, TransportId};
use crate::rtp::{DtlsParameters, RtpCapabilities, RtpParameters, TrackKind, TransportParams};
use crate::ConsumerId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request/response message
pub trait Request: Serialize {
    /// Event name on the wire
    const NAME: &'static str;

    /// Shape of a successful acknowledgement
    type Response: DeserializeOwned;
}

/// A fire-and-forget message
pub trait Notification: Serialize {
    const NAME: &'static str;
}

/// Acknowledgement whose content is not inspected
pub type Ack = Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRoom {
    pub room_id: RoomId,
    pub name: String,
}

impl Request for JoinRoom {
    const NAME: &'static str = "join-room";
    type Response = Ack;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetRouterRtpCapabilities {}

impl Request for GetRouterRtpCapabilities {
    const NAME: &'static str = "getRouterRtpCapabilities";
    type Response = RtpCapabilities;
}

/// Transport creation; the send side passes local capabilities, the receive
/// side passes fixed parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CreateWebRtcTransport {
    #[serde(rename_all = "camelCase")]
    Send { rtp_capabilities: RtpCapabilities },

    #[serde(rename_all = "camelCase")]
    Recv { force_tcp: bool },
}

impl Request for CreateWebRtcTransport {
    const NAME: &'static str = "createWebRtcTransport";
    type Response = TransportParams;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectTransport {
    pub transport_id: TransportId,

    #[serde(rename = "dtlsParameters")]
    pub dtls_parameters: DtlsParameters,
}

impl Request for ConnectTransport {
    const NAME: &'static str = "connectTransport";
    type Response = Ack;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Produce {
    pub transport_id: TransportId,
    pub kind: TrackKind,

    #[serde(rename = "rtpParameters")]
    pub rtp_parameters: RtpParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProduceResponse {
    pub producer_id: ProducerId,
}

impl Request for Produce {
    const NAME: &'static str = "produce";
    type Response = ProduceResponse;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consume {
    pub rtp_capabilities: RtpCapabilities,
    pub consumer_transport_id: TransportId,
    pub producer_id: ProducerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeResponse {
    pub id: ConsumerId,
    pub kind: TrackKind,
    pub rtp_parameters: RtpParameters,
}

impl Request for Consume {
    const NAME: &'static str = "consume";
    type Response = ConsumeResponse;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExitRoom {}

impl Request for ExitRoom {
    const NAME: &'static str = "exit-room";
    type Response = Ack;
}

/// Ask the server to announce every producer already in the room
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetProducers {}

impl Notification for GetProducers {
    const NAME: &'static str = "getProducers";
}

/// Tell the server a local producer has been closed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerClosed {
    pub producer_id: ProducerId,
}

impl Notification for ProducerClosed {
    const NAME: &'static str = "producerClosed";
}

/// Rejection carried in an acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub message: String,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Text(String),
    Detailed {
        #[serde(default)]
        message: Option<String>,
        #[serde(default, rename = "type")]
        kind: Option<String>,
        #[serde(default)]
        context: Option<Value>,
    },
}

impl RemoteError {
    /// Extract the rejection from an acknowledgement, if it is one
    ///
    /// The server reports errors either as a bare string or as an object with
    /// `message`, `type` and `context`.
    #[must_use]
    pub fn from_response(response: &Value) -> Option<Self> {
        let body = response.as_object()?.get("error")?;
        if body.is_null() {
            return None;
        }

        match serde_json::from_value::<ErrorBody>(body.clone()) {
            Ok(ErrorBody::Text(message)) => Some(Self {
                message,
                kind: None,
                context: None,
            }),
            Ok(ErrorBody::Detailed {
                message,
                kind,
                context,
            }) => Some(Self {
                message: message.unwrap_or_else(|| "Request failed".to_string()),
                kind,
                context,
            }),
            Err(_) => Some(Self {
                message: body.to_string(),
                kind: None,
                context: None,
            }),
        }
    }
}
