//! Common types used throughout the session layer

use huddle_proto::TrackKind;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use huddle_proto::{ConsumerId, ProducerId, RoomId, TransportId};

/// What a local producer captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
    Screen,
}

impl MediaKind {
    pub const ALL: [Self; 3] = [Self::Audio, Self::Video, Self::Screen];

    /// Kind of the track carried on the wire (screen shares are video)
    #[must_use]
    pub const fn track_kind(&self) -> TrackKind {
        match self {
            Self::Audio => TrackKind::Audio,
            Self::Video | Self::Screen => TrackKind::Video,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Screen => "screen",
        }
    }
}

impl From<TrackKind> for MediaKind {
    fn from(kind: TrackKind) -> Self {
        match kind {
            TrackKind::Audio => Self::Audio,
            TrackKind::Video => Self::Video,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a media transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportRole {
    Send,
    Recv,
}

impl fmt::Display for TransportRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send => f.write_str("send"),
            Self::Recv => f.write_str("receive"),
        }
    }
}

/// Connection state of a media transport
///
/// `new → connecting → connected → failed → closed`; a failed transport is
/// closed and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Lifecycle of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Joining,
    Joined,
    Reconnecting,
    Exiting,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Joining => "joining",
            Self::Joined => "joined",
            Self::Reconnecting => "reconnecting",
            Self::Exiting => "exiting",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Where the renderer should place a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamSlot {
    Local,
    Remote,
}

/// Human-readable video quality label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityLabel {
    #[serde(rename = "4K")]
    Uhd,
    #[serde(rename = "FHD")]
    Fhd,
    #[serde(rename = "HD")]
    Hd,
    #[serde(rename = "SD")]
    Sd,
    #[serde(rename = "LD")]
    Ld,
}

impl QualityLabel {
    /// Label for a decoded frame size
    #[must_use]
    pub const fn from_resolution(width: u32, height: u32) -> Self {
        let pixels = width as u64 * height as u64;
        if pixels >= 3840 * 2160 {
            Self::Uhd
        } else if pixels >= 1920 * 1080 {
            Self::Fhd
        } else if pixels >= 1280 * 720 {
            Self::Hd
        } else if pixels >= 640 * 480 {
            Self::Sd
        } else {
            Self::Ld
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Uhd => "4K",
            Self::Fhd => "FHD",
            Self::Hd => "HD",
            Self::Sd => "SD",
            Self::Ld => "LD",
        }
    }
}

impl std::str::FromStr for QualityLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "4K" | "UHD" => Ok(Self::Uhd),
            "FHD" => Ok(Self::Fhd),
            "HD" => Ok(Self::Hd),
            "SD" => Ok(Self::Sd),
            "LD" => Ok(Self::Ld),
            other => Err(format!("Unknown quality label: {other}")),
        }
    }
}

impl fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_is_sent_as_video() {
        assert_eq!(MediaKind::Screen.track_kind(), TrackKind::Video);
        assert_eq!(MediaKind::Audio.track_kind(), TrackKind::Audio);
        assert_eq!(MediaKind::from(TrackKind::Video), MediaKind::Video);
    }

    #[test]
    fn test_quality_label_thresholds() {
        assert_eq!(QualityLabel::from_resolution(3840, 2160), QualityLabel::Uhd);
        assert_eq!(QualityLabel::from_resolution(1920, 1080), QualityLabel::Fhd);
        assert_eq!(QualityLabel::from_resolution(1280, 720), QualityLabel::Hd);
        assert_eq!(QualityLabel::from_resolution(640, 480), QualityLabel::Sd);
        assert_eq!(QualityLabel::from_resolution(320, 240), QualityLabel::Ld);
        assert_eq!(QualityLabel::Fhd.to_string(), "FHD");
        assert_eq!("hd".parse::<QualityLabel>(), Ok(QualityLabel::Hd));
        assert!("8K".parse::<QualityLabel>().is_err());
    }

    #[test]
    fn test_transport_role_display() {
        assert_eq!(TransportRole::Send.to_string(), "send");
        assert_eq!(TransportRole::Recv.to_string(), "receive");
    }
}
