//! # Validation Module
//!
//! Fail-fast checks for consumer input. Anything rejected here is a bug at
//! the call site, never a connectivity problem.
//!
//! ## Usage
//! ```rust
//! use tether_core::validation::{channel_name, validate_owner_id};
//!
//! validate_owner_id("user-1").unwrap();
//! assert_eq!(channel_name("sync", "user-1"), "sync:user-1");
//! ```

use crate::error::ValidationError;
use crate::MAX_IDENTIFIER_LEN;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Separator between channel prefix and owner id.
pub const CHANNEL_SEPARATOR: char = ':';

/// Validates the owner id that scopes a channel namespace.
///
/// ## Rules
/// - Must not be empty or whitespace
///
/// Length is not bounded; account ids come from the auth backend as-is.
pub fn validate_owner_id(owner_id: &str) -> ValidationResult<()> {
    validate_required("owner_id", owner_id)
}

/// Validates a channel prefix.
///
/// ## Rules
/// - Must not be empty
/// - Must not contain `:` (it separates prefix and owner id)
pub fn validate_channel_prefix(prefix: &str) -> ValidationResult<()> {
    validate_identifier("channel_prefix", prefix)?;
    if prefix.contains(CHANNEL_SEPARATOR) {
        return Err(ValidationError::InvalidFormat {
            field: "channel_prefix".to_string(),
            reason: format!("must not contain '{}'", CHANNEL_SEPARATOR),
        });
    }
    Ok(())
}

/// Validates a backend resource name.
pub fn validate_resource_name(resource_name: &str) -> ValidationResult<()> {
    validate_identifier("resource_name", resource_name)
}

/// Builds the channel name `"{prefix}:{owner_id}"`.
pub fn channel_name(prefix: &str, owner_id: &str) -> String {
    format!("{}{}{}", prefix, CHANNEL_SEPARATOR, owner_id)
}

fn validate_required(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    Ok(())
}

fn validate_identifier(field: &str, value: &str) -> ValidationResult<()> {
    validate_required(field, value)?;
    if value.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_IDENTIFIER_LEN,
        });
    }
    Ok(())
}
