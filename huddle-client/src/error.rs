use std::time::Duration;

use huddle_proto::{ProducerId, RemoteError};
use thiserror::Error;

use crate::types::{MediaKind, SessionState, TransportRole};
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Request {request} timed out after {timeout:?}")]
    RequestTimeout {
        request: &'static str,
        timeout: Duration,
    },

    #[error("Signaling channel is not connected")]
    NotConnected,

    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("Request {request} rejected: {}", .error.message)]
    Remote {
        request: &'static str,
        error: RemoteError,
    },

    #[error("Malformed {request} payload: {source}")]
    Payload {
        request: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Disconnected by server")]
    ServerDisconnect,

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Failed to load media device: {0}")]
    DeviceLoad(#[source] EngineError),

    #[error("Router capabilities have not been loaded")]
    CapabilitiesNotLoaded,

    #[error("Failed to create {role} transport: {source}")]
    TransportCreate {
        role: TransportRole,
        #[source]
        source: Box<Error>,
    },

    #[error("No usable {0} transport")]
    TransportUnavailable(TransportRole),

    #[error("Failed to capture {kind}: {source}")]
    Capture {
        kind: MediaKind,
        #[source]
        source: MediaError,
    },

    #[error("A {0} producer is already active")]
    ProducerActive(MediaKind),

    #[error("Failed to produce {kind}: {source}")]
    ProducerCreate {
        kind: MediaKind,
        #[source]
        source: Box<Error>,
    },

    #[error("Failed to consume producer {producer_id}: {source}")]
    ConsumerCreate {
        producer_id: ProducerId,
        #[source]
        source: Box<Error>,
    },

    #[error("Media engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: usize },

    #[error("Operation failed after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: usize,
        #[source]
        last: Box<Error>,
    },

    #[error("Session is closed")]
    SessionClosed,
}

impl Error {
    /// The innermost error of a wrapped chain
    ///
    /// Creation failures wrap the signaling error that caused them; the root
    /// decides whether the failure was a timeout, a rejection or a lost link.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::TransportCreate { source, .. }
            | Self::ProducerCreate { source, .. }
            | Self::ConsumerCreate { source, .. } => source.root(),
            Self::RetryExhausted { last, .. } => last.root(),
            other => other,
        }
    }

    /// Failure caused by the signaling link rather than by the request itself
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.root(),
            Self::NotConnected | Self::ConnectionLost(_) | Self::ServerDisconnect
        )
    }
}

/// Error reported by the media engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{name}: {message}")]
pub struct EngineError {
    /// Engine-specific error name, e.g. `UnsupportedError`
    pub name: String,
    pub message: String,
}

impl EngineError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Failure acquiring a local capture device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device already in use: {0}")]
    InUse(String),

    #[error("Constraints cannot be satisfied: {0}")]
    Overconstrained(String),

    #[error("{name}: {message}")]
    Other { name: String, message: String },
}

impl MediaError {
    /// Map a platform error name onto a typed failure
    pub fn from_name(name: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match name {
            "NotAllowedError" | "PermissionDeniedError" | "SecurityError" => {
                Self::PermissionDenied(message)
            }
            "NotFoundError" | "DevicesNotFoundError" => Self::NotFound(message),
            "NotReadableError" | "TrackStartError" | "AbortError" => Self::InUse(message),
            "OverconstrainedError" | "ConstraintNotSatisfiedError" => {
                Self::Overconstrained(message)
            }
            _ => Self::Other {
                name: name.to_string(),
                message,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
