use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::engine::{Range, RtpEncoding, VideoConstraints};

/// Client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub signaling: SignalingConfig,
    pub reconnect: ReconnectConfig,
    pub errors: ErrorsConfig,
    pub media: MediaConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub request_timeout_seconds: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 10,
        }
    }
}

impl SignalingConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: usize,
    pub initial_delay_seconds: u64,
    pub max_delay_seconds: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_seconds: 1,
            max_delay_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorsConfig {
    /// How long a low-severity record stays visible
    pub low_severity_ttl_seconds: u64,
    /// Attempts used by `ErrorCenter::retry_operation` when none is given
    pub retry_attempts: usize,
}

impl Default for ErrorsConfig {
    fn default() -> Self {
        Self {
            low_severity_ttl_seconds: 5,
            retry_attempts: 3,
        }
    }
}

impl ErrorsConfig {
    #[must_use]
    pub const fn low_severity_ttl(&self) -> Duration {
        Duration::from_secs(self.low_severity_ttl_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// MIME type preferred for camera and screen producers
    pub preferred_codec: String,
    /// Bitrate ceiling of the single encoding used with the preferred codec (bps)
    pub max_bitrate: u32,
    /// Initial bitrate hint handed to the encoder (kbps)
    pub start_bitrate_kbps: u32,
    /// Simulcast layers used when the preferred codec is unavailable, lowest first
    pub simulcast_layers: Vec<RtpEncoding>,
    /// Camera constraints tried in order until one is satisfied
    pub video_ladder: Vec<VideoConstraints>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            preferred_codec: "video/VP8".to_string(),
            max_bitrate: 2_000_000,
            start_bitrate_kbps: 1000,
            simulcast_layers: vec![
                RtpEncoding::new(500_000, 4.0),
                RtpEncoding::new(1_000_000, 2.0),
                RtpEncoding::new(2_000_000, 1.0),
            ],
            video_ladder: vec![
                VideoConstraints {
                    width: Range::new(1280, 640),
                    height: Range::new(720, 480),
                    frame_rate: Range::new(30, 15),
                },
                VideoConstraints {
                    width: Range::new(640, 320),
                    height: Range::new(480, 240),
                    frame_rate: Range::new(24, 15),
                },
                VideoConstraints {
                    width: Range::new(320, 160),
                    height: Range::new(240, 120),
                    frame_rate: Range::new(15, 10),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Let `logging::install` set the global subscriber. Hosts with their
    /// own subscriber leave this off and compose `logging::layer` instead.
    pub install_global: bool,
    /// Applies to the huddle crates only
    pub level: String,
    pub format: LogFormat,
    pub file_path: Option<String>,
    /// Emit an event when a span closes, with its timings
    pub span_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            install_global: false,
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file_path: None,
            span_events: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // HUDDLE_SIGNALING__REQUEST_TIMEOUT_SECONDS, HUDDLE_RECONNECT__MAX_ATTEMPTS, ...
        builder = builder.add_source(
            Environment::with_prefix("HUDDLE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }
}
