//! User-facing error classification
//!
//! Maps crate errors onto a fixed taxonomy with default severities and
//! remediation text, and keeps the set of errors currently shown to the user.

use std::collections::HashMap;
use std::future::Future;
use std::iter::once;
use std::sync::{Arc, Weak};
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ErrorsConfig;
use crate::error::{Error, MediaError, Result};
use crate::types::MediaKind;
use crate::validation::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    // connection
    SocketConnectionFailed,
    SocketDisconnected,
    SocketTimeout,
    // room
    RoomJoinFailed,
    RoomNotFound,
    RoomFull,
    // devices
    CameraNotFound,
    CameraPermissionDenied,
    CameraInUse,
    MicNotFound,
    MicPermissionDenied,
    MicInUse,
    ScreenShareFailed,
    // negotiation
    DeviceLoadFailed,
    TransportCreateFailed,
    ProducerCreateFailed,
    ConsumerCreateFailed,
    // network
    NetworkError,
    BandwidthInsufficient,
    // validation
    InvalidRoomId,
    InvalidName,
    EmptyFields,
}

impl ErrorKind {
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::DeviceLoadFailed => Severity::Critical,
            Self::SocketConnectionFailed
            | Self::RoomJoinFailed
            | Self::RoomNotFound
            | Self::CameraPermissionDenied
            | Self::MicPermissionDenied
            | Self::TransportCreateFailed
            | Self::ProducerCreateFailed
            | Self::NetworkError => Severity::High,
            Self::SocketDisconnected
            | Self::SocketTimeout
            | Self::RoomFull
            | Self::CameraNotFound
            | Self::CameraInUse
            | Self::MicNotFound
            | Self::MicInUse
            | Self::ScreenShareFailed
            | Self::ConsumerCreateFailed
            | Self::BandwidthInsufficient => Severity::Medium,
            Self::InvalidRoomId | Self::InvalidName | Self::EmptyFields => Severity::Low,
        }
    }

    #[must_use]
    pub const fn default_message(&self) -> &'static str {
        match self {
            Self::SocketConnectionFailed => {
                "Failed to connect to server. Please check your internet connection."
            }
            Self::SocketDisconnected => "Connection lost. Attempting to reconnect...",
            Self::SocketTimeout => "Connection timed out. Please try again.",
            Self::RoomJoinFailed => "Failed to join room. Please try again.",
            Self::RoomNotFound => "Room not found. Please check the room ID.",
            Self::RoomFull => "Room is full. Please try another room.",
            Self::CameraNotFound => "Camera not found. Please connect a camera and try again.",
            Self::CameraPermissionDenied => {
                "Camera access denied. Please allow camera permissions and try again."
            }
            Self::CameraInUse => "Camera is already in use by another application.",
            Self::MicNotFound => {
                "Microphone not found. Please connect a microphone and try again."
            }
            Self::MicPermissionDenied => {
                "Microphone access denied. Please allow microphone permissions and try again."
            }
            Self::MicInUse => "Microphone is already in use by another application.",
            Self::ScreenShareFailed => "Screen sharing failed. Please try again.",
            Self::DeviceLoadFailed => "Failed to load media device. Please refresh and try again.",
            Self::TransportCreateFailed => "Connection setup failed. Please try again.",
            Self::ProducerCreateFailed => {
                "Failed to start media stream. Please check your device permissions."
            }
            Self::ConsumerCreateFailed => "Failed to connect to participant. Please try again.",
            Self::NetworkError => "Network error occurred. Please check your connection.",
            Self::BandwidthInsufficient => "Network bandwidth is insufficient for video streaming.",
            Self::InvalidRoomId => "Please enter a valid room ID.",
            Self::InvalidName => "Please enter a valid name (2-50 characters).",
            Self::EmptyFields => "Please fill in all required fields.",
        }
    }

    /// Classify a crate error
    #[must_use]
    pub fn classify(err: &Error) -> Self {
        match err {
            Error::Validation(v) => match v {
                ValidationError::EmptyFields { .. } => Self::EmptyFields,
                ValidationError::InvalidRoomId => Self::InvalidRoomId,
                ValidationError::InvalidName => Self::InvalidName,
            },
            Error::RequestTimeout { .. } => Self::SocketTimeout,
            Error::NotConnected | Error::ConnectionLost(_) | Error::ServerDisconnect => {
                Self::SocketDisconnected
            }
            Error::SessionClosed => Self::SocketDisconnected,
            Error::Signaling(message) => {
                Self::from_message(message).unwrap_or(Self::SocketConnectionFailed)
            }
            Error::ReconnectExhausted { .. } => Self::SocketConnectionFailed,
            Error::Remote { request, error } => {
                Self::from_message(&error.message).unwrap_or(match *request {
                    "join-room" => Self::RoomJoinFailed,
                    "createWebRtcTransport" | "connectTransport" => Self::TransportCreateFailed,
                    "produce" => Self::ProducerCreateFailed,
                    "consume" => Self::ConsumerCreateFailed,
                    _ => Self::NetworkError,
                })
            }
            Error::Payload { .. } => Self::NetworkError,
            Error::DeviceLoad(_) | Error::CapabilitiesNotLoaded => Self::DeviceLoadFailed,
            Error::TransportCreate { source, .. } => {
                Self::from_cause(source).unwrap_or(Self::TransportCreateFailed)
            }
            Error::TransportUnavailable(_) => Self::TransportCreateFailed,
            Error::Capture { kind, source } => Self::from_capture(*kind, source),
            Error::ProducerActive(_) => Self::ProducerCreateFailed,
            Error::ProducerCreate { source, .. } => {
                Self::from_cause(source).unwrap_or(Self::ProducerCreateFailed)
            }
            Error::ConsumerCreate { source, .. } => {
                Self::from_cause(source).unwrap_or(Self::ConsumerCreateFailed)
            }
            Error::Engine(e) => Self::from_message(&e.message).unwrap_or(Self::NetworkError),
            Error::InvalidState { .. } => Self::RoomJoinFailed,
            Error::RetryExhausted { last, .. } => Self::classify(last),
        }
    }

    /// Connection-level causes win over the operation that hit them
    fn from_cause(source: &Error) -> Option<Self> {
        match Self::classify(source) {
            kind @ (Self::SocketTimeout | Self::SocketDisconnected | Self::BandwidthInsufficient) => {
                Some(kind)
            }
            _ => None,
        }
    }

    fn from_capture(kind: MediaKind, source: &MediaError) -> Self {
        match (kind, source) {
            (MediaKind::Screen, _) => Self::ScreenShareFailed,
            (MediaKind::Video, MediaError::NotFound(_) | MediaError::Overconstrained(_)) => {
                Self::CameraNotFound
            }
            (MediaKind::Video, MediaError::PermissionDenied(_)) => Self::CameraPermissionDenied,
            (MediaKind::Video, MediaError::InUse(_)) => Self::CameraInUse,
            (MediaKind::Audio, MediaError::NotFound(_) | MediaError::Overconstrained(_)) => {
                Self::MicNotFound
            }
            (MediaKind::Audio, MediaError::PermissionDenied(_)) => Self::MicPermissionDenied,
            (MediaKind::Audio, MediaError::InUse(_)) => Self::MicInUse,
            (_, MediaError::Other { .. }) => Self::ProducerCreateFailed,
        }
    }

    /// Match known fragments of a free-form error message
    #[must_use]
    pub fn from_message(message: &str) -> Option<Self> {
        let message = message.to_lowercase();
        let kind = if message.contains("room") && message.contains("not found") {
            Self::RoomNotFound
        } else if message.contains("room") && message.contains("full") {
            Self::RoomFull
        } else if message.contains("timeout") || message.contains("timed out") {
            Self::SocketTimeout
        } else if message.contains("bandwidth") {
            Self::BandwidthInsufficient
        } else if message.contains("disconnect") {
            Self::SocketDisconnected
        } else if message.contains("network") {
            Self::NetworkError
        } else {
            return None;
        };
        Some(kind)
    }
}

/// One error shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub kind: ErrorKind,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorEvent {
    Added(ErrorRecord),
    Dismissed(Uuid),
    Cleared,
}

/// The set of errors currently shown to the user
///
/// Low-severity records expire on their own; everything else stays until
/// dismissed. Expiry timers are cancelled when their record goes away and
/// when the center is dropped.
#[derive(Clone)]
pub struct ErrorCenter {
    inner: Arc<CenterInner>,
}

struct CenterInner {
    records: Mutex<Vec<ErrorRecord>>,
    timers: Mutex<HashMap<Uuid, CancellationToken>>,
    custom_messages: RwLock<HashMap<ErrorKind, String>>,
    events: broadcast::Sender<ErrorEvent>,
    low_severity_ttl: Duration,
    default_retry_attempts: usize,
    shutdown: CancellationToken,
}

impl Drop for CenterInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl CenterInner {
    fn remove(&self, id: Uuid) -> bool {
        if let Some(timer) = self.timers.lock().remove(&id) {
            timer.cancel();
        }

        let removed = {
            let mut records = self.records.lock();
            let before = records.len();
            records.retain(|r| r.id != id);
            records.len() != before
        };

        if removed {
            let _ = self.events.send(ErrorEvent::Dismissed(id));
        }
        removed
    }
}

impl Default for ErrorCenter {
    fn default() -> Self {
        Self::new(&ErrorsConfig::default())
    }
}

impl ErrorCenter {
    #[must_use]
    pub fn new(config: &ErrorsConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(CenterInner {
                records: Mutex::new(Vec::new()),
                timers: Mutex::new(HashMap::new()),
                custom_messages: RwLock::new(HashMap::new()),
                events,
                low_severity_ttl: config.low_severity_ttl(),
                default_retry_attempts: config.retry_attempts,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Override the default message of a kind
    pub fn set_custom_message(&self, kind: ErrorKind, message: impl Into<String>) {
        self.inner.custom_messages.write().insert(kind, message.into());
    }

    /// Classify and record a crate error
    pub fn record(&self, err: &Error) -> ErrorRecord {
        self.record_with_context(err, None)
    }

    pub fn record_with_context(&self, err: &Error, context: Option<&str>) -> ErrorRecord {
        let kind = ErrorKind::classify(err);
        let mut details = json!({ "error": err.to_string() });
        if let Some(context) = context {
            details["context"] = Value::String(context.to_string());
        }
        if let Error::Remote { error, .. } = err.root() {
            if let Some(remote) = &error.context {
                details["remote"] = remote.clone();
            }
        }
        self.add(kind, details)
    }

    /// Record an error of `kind` with its configured message
    pub fn add(&self, kind: ErrorKind, details: Value) -> ErrorRecord {
        let message = self
            .inner
            .custom_messages
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| kind.default_message().to_string());
        self.add_with_message(kind, message, details)
    }

    pub fn add_with_message(&self, kind: ErrorKind, message: impl Into<String>, details: Value) -> ErrorRecord {
        let record = ErrorRecord {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            severity: kind.severity(),
            timestamp: Utc::now(),
            details,
        };

        match record.severity {
            Severity::Critical | Severity::High => {
                error!(kind = ?kind, error_id = %record.id, details = %record.details, "{}", record.message);
            }
            Severity::Medium => {
                warn!(kind = ?kind, error_id = %record.id, details = %record.details, "{}", record.message);
            }
            Severity::Low => {
                info!(kind = ?kind, error_id = %record.id, "{}", record.message);
            }
        }

        self.inner.records.lock().push(record.clone());
        if record.severity == Severity::Low {
            self.schedule_expiry(record.id);
        }
        let _ = self.inner.events.send(ErrorEvent::Added(record.clone()));
        record
    }

    fn schedule_expiry(&self, id: Uuid) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(error_id = %id, "No runtime for error expiry, record will persist");
            return;
        };

        let token = self.inner.shutdown.child_token();
        self.inner.timers.lock().insert(id, token.clone());

        let center: Weak<CenterInner> = Arc::downgrade(&self.inner);
        let ttl = self.inner.low_severity_ttl;
        runtime.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(ttl) => {
                    if let Some(center) = center.upgrade() {
                        center.timers.lock().remove(&id);
                        center.remove(id);
                    }
                }
            }
        });
    }

    /// Remove a record. Returns whether it existed.
    pub fn dismiss(&self, id: Uuid) -> bool {
        self.inner.remove(id)
    }

    pub fn clear(&self) {
        for (_, timer) in self.inner.timers.lock().drain() {
            timer.cancel();
        }
        self.inner.records.lock().clear();
        let _ = self.inner.events.send(ErrorEvent::Cleared);
    }

    /// Remove every record of `kind`
    pub fn clear_kind(&self, kind: ErrorKind) -> usize {
        let ids: Vec<Uuid> = self
            .inner
            .records
            .lock()
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.id)
            .collect();
        ids.into_iter().filter(|id| self.inner.remove(*id)).count()
    }

    #[must_use]
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.inner.records.lock().clone()
    }

    #[must_use]
    pub fn by_severity(&self, severity: Severity) -> Vec<ErrorRecord> {
        self.inner
            .records
            .lock()
            .iter()
            .filter(|r| r.severity == severity)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.inner.records.lock().is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ErrorEvent> {
        self.inner.events.subscribe()
    }

    /// Run `operation` with the configured number of attempts
    pub async fn retry<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.retry_operation(operation, self.inner.default_retry_attempts)
            .await
    }

    /// Run `operation` up to `max_attempts` times
    ///
    /// Waits `2^attempt` seconds after each failed attempt. Every failure is
    /// recorded; the records are dismissed once an attempt succeeds.
    pub async fn retry_operation<T, F, Fut>(&self, mut operation: F, max_attempts: usize) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = max_attempts.max(1);
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_secs(2))
            .with_max_delay(Duration::from_secs(3600))
            .with_factor(2.0)
            .with_max_times(max_attempts - 1)
            .build();

        let mut recorded = Vec::new();
        let mut last_err = None;
        for (attempt, delay) in (1..).zip(once(Duration::ZERO).chain(backoff)) {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }

            match operation().await {
                Ok(value) => {
                    for id in recorded {
                        self.dismiss(id);
                    }
                    if attempt > 1 {
                        info!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    debug!(attempt, max_attempts, error = %e, "Operation attempt failed");
                    let context = format!("Attempt {attempt}/{max_attempts}");
                    recorded.push(self.record_with_context(&e, Some(&context)).id);
                    last_err = Some(e);
                }
            }
        }

        Err(Error::RetryExhausted {
            attempts: max_attempts,
            last: Box::new(last_err.unwrap_or(Error::SessionClosed)),
        })
    }
}
