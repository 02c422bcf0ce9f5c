//! Join-request validation
//!
//! Runs before any network traffic; a rejected request never creates a
//! session.

/// Minimum room id length
pub const ROOM_ID_MIN: usize = 3;
/// Minimum participant name length
pub const NAME_MIN: usize = 2;
/// Maximum participant name length
pub const NAME_MAX: usize = 50;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    EmptyFields { field: &'static str },

    #[error("Room id must be at least {ROOM_ID_MIN} characters")]
    InvalidRoomId,

    #[error("Name must be {NAME_MIN}-{NAME_MAX} characters")]
    InvalidName,
}

/// Validation result
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate the `(room_id, name)` pair of a join request
pub fn validate_join(room_id: &str, name: &str) -> ValidationResult<()> {
    let room_id = room_id.trim();
    let name = name.trim();

    if room_id.is_empty() {
        return Err(ValidationError::EmptyFields { field: "Room ID" });
    }
    if name.is_empty() {
        return Err(ValidationError::EmptyFields { field: "Name" });
    }
    if room_id.chars().count() < ROOM_ID_MIN {
        return Err(ValidationError::InvalidRoomId);
    }

    let name_len = name.chars().count();
    if !(NAME_MIN..=NAME_MAX).contains(&name_len) {
        return Err(ValidationError::InvalidName);
    }

    Ok(())
}
