//! RTP capability descriptions and negotiation parameters
//!
//! Capabilities are inspected by the client (codec selection), so they are
//! modelled field by field. ICE/DTLS/RTP parameters are produced and consumed
//! by the media engine and only relayed here, so they stay opaque JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// DTLS parameters of a transport, relayed verbatim
pub type DtlsParameters = Value;

/// RTP parameters of a producer or consumer, relayed verbatim
pub type RtpParameters = Value;

/// Media kind as the engine and the server see it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codecs and header extensions an endpoint can handle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,

    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtension>,
}

impl RtpCapabilities {
    /// Find a codec by MIME type (case-insensitive, e.g. `video/VP8`)
    #[must_use]
    pub fn find_codec(&self, mime_type: &str) -> Option<&RtpCodecCapability> {
        self.codecs
            .iter()
            .find(|codec| codec.mime_type.eq_ignore_ascii_case(mime_type))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: TrackKind,
    pub mime_type: String,
    pub clock_rate: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,

    #[serde(default)]
    pub parameters: Map<String, Value>,

    #[serde(default)]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcpFeedback {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub parameter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpHeaderExtension {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TrackKind>,

    pub uri: String,
    pub preferred_id: u16,

    #[serde(default)]
    pub preferred_encrypt: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
}

/// Parameters returned by `createWebRtcTransport`
///
/// Exchanged exactly once, when the transport is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: crate::TransportId,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: DtlsParameters,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sctp_parameters: Option<Value>,
}
