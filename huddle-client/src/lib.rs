//! Huddle client session layer
//!
//! Orchestrates a participant's session against a selective-forwarding media
//! server: joins a room over the signaling channel, negotiates capabilities,
//! brings up one send and one receive transport, publishes local media and
//! subscribes to everyone else's.
//!
//! ## Architecture
//!
//! - **`RoomClient`**: one session in one room, from join to teardown
//! - **`SessionSupervisor`**: rebuilds the session after network drops
//! - **`TransportCoordinator`**: the send/receive transport pair
//! - **`ProducerManager`** / **`ConsumerManager`**: local and remote media
//! - **`ErrorCenter`**: user-facing error taxonomy with severities
//!
//! ICE, DTLS and RTP are left to a WebRTC engine behind [`MediaEngine`];
//! capture is behind [`MediaDevices`] and presentation behind [`Renderer`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use huddle_client::{ClientConfig, Collaborators, ErrorCenter, SessionSupervisor};
//!
//! let config = ClientConfig::load(None)?;
//! huddle_client::logging::install(&config.logging)?;
//!
//! let errors = ErrorCenter::new(&config.errors);
//! let supervisor = SessionSupervisor::new(config, Collaborators {
//!     signaling, engine, devices, renderer, observer,
//!     errors: errors.clone(),
//! });
//! let outcome = supervisor.run("standup", "alice").await?;
//! ```

pub mod classifier;
pub mod config;
pub mod consumer;
pub mod device;
pub mod engine;
pub mod error;
pub mod logging;
pub mod producer;
pub mod reconnect;
pub mod renderer;
pub mod room;
pub mod signaling;
pub mod stats;
pub mod transport;
pub mod types;
pub mod validation;

#[cfg(test)]
pub mod test_helpers;

pub use classifier::{ErrorCenter, ErrorEvent, ErrorKind, ErrorRecord, Severity};
pub use config::ClientConfig;
pub use consumer::{ConsumedMedia, ConsumerManager};
pub use device::{CapabilityNegotiator, CapabilitySet};
pub use engine::{MediaDevices, MediaEngine, MediaStream, MediaTrack, MediaTransport};
pub use error::{EngineError, Error, MediaError, Result};
pub use producer::{ProducedMedia, ProducerManager};
pub use reconnect::{ConnectionStatus, ReconnectPolicy, SessionOutcome, SessionSupervisor};
pub use renderer::{NoopObserver, Renderer, SessionObserver};
pub use room::{Collaborators, ExitReason, RoomClient};
pub use signaling::{SignalingChannel, SignalingTransport};
pub use stats::NetworkStats;
pub use transport::TransportCoordinator;
pub use types::{
    ConnectionState, MediaKind, QualityLabel, SessionState, StreamSlot, TransportRole,
};
