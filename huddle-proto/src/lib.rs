//! Huddle Signaling Protocol
//!
//! Wire vocabulary spoken between a huddle client and the selective-forwarding
//! media server over the signaling channel.
//!
//! ## Layout
//!
//! - **`ids`**: newtype identifiers assigned by the server (rooms, transports,
//!   producers, consumers)
//! - **`rtp`**: capability descriptions and the opaque negotiation blobs
//! - **`messages`**: request/response pairs and fire-and-forget notifications
//! - **`events`**: events pushed by the server
//!
//! Requests implement [`Request`], which ties the message name to its payload
//! and the expected response type:
//!
//! ```rust,ignore
//! use huddle_proto::{messages::JoinRoom, Request};
//!
//! let payload = serde_json::to_value(JoinRoom { room_id, name })?;
//! let raw = socket.emit_with_ack(JoinRoom::NAME, payload).await?;
//! ```

pub mod events;
pub mod ids;
pub mod messages;
pub mod rtp;

pub use events::{
    ConsumerClosed, ConsumerStats, CurrentConditions, DisconnectReason, OptimalConfiguration,
    ProducerAnnouncement, ServerEvent,
};
pub use ids::{ConsumerId, ProducerId, RoomId, TransportId};
pub use messages::{Notification, RemoteError, Request};
pub use rtp::{
    DtlsParameters, RtcpFeedback, RtpCapabilities, RtpCodecCapability, RtpHeaderExtension,
    RtpParameters, TrackKind, TransportParams,
};
