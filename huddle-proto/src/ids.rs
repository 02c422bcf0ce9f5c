//! Identifiers exchanged over the signaling channel
//!
//! All of them are opaque strings chosen by the server (or, for rooms, typed by
//! the user). The newtypes keep a producer id from being passed where a
//! consumer id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Name of a room on the media server
    RoomId
);
string_id!(
    /// Server-assigned identifier of a WebRTC transport
    TransportId
);
string_id!(
    /// Server-assigned identifier of a producer (one outbound track)
    ProducerId
);
string_id!(
    /// Server-assigned identifier of a consumer (one inbound track)
    ConsumerId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let id = ProducerId::from("p-1");
        assert_eq!(serde_json::to_value(&id).unwrap(), serde_json::json!("p-1"));

        let back: ProducerId = serde_json::from_value(serde_json::json!("p-1")).unwrap();
        assert_eq!(back, id);
        assert_eq!(back.to_string(), "p-1");
    }

    #[test]
    fn test_room_id_empty() {
        assert!(RoomId::new("").is_empty());
        assert!(!RoomId::new("abc").is_empty());
    }
}
