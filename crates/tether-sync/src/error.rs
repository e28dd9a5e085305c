//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Misuse      │  │      Transport          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Validation     │  │  SendFailed             │ │
//! │  │  ConfigLoad...  │  │  (empty owner)  │  │  ChannelClosed          │ │
//! │  │  ConfigSave...  │  │                 │  │  (never reach consumer) │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │  Serialization  │  │    Internal     │                              │
//! │  │                 │  │                 │                              │
//! │  │  Serialization  │  │  ShuttingDown   │                              │
//! │  │  Failed         │  │                 │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation Policy
//! Transport errors are logged and absorbed by the manager. Consumers only
//! ever see misuse and configuration errors.

use thiserror::Error;

use tether_core::{CoreError, ValidationError};

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Misuse Errors
    // =========================================================================
    /// Consumer input rejected at the call site.
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// A broadcast could not be handed to the transport.
    #[error("Failed to send on channel {channel}: {reason}")]
    SendFailed { channel: String, reason: String },

    /// The channel is no longer joined on the backend.
    #[error("Channel {0} is closed")]
    ChannelClosed(String),

    // =========================================================================
    // Serialization Errors
    // =========================================================================
    /// Failed to serialize or decode a payload.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// The sync agent has stopped.
    #[error("Sync agent is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => SyncError::Validation(v),
            CoreError::InvalidFilterTemplate {
                resource_name,
                reason,
            } => SyncError::InvalidConfig(format!(
                "filter template for '{}' is invalid: {}",
                resource_name, reason
            )),
            CoreError::PayloadDecode(reason) => SyncError::SerializationFailed(reason),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if a later attempt may succeed without consumer action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::SendFailed { .. } | SyncError::ChannelClosed(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the caller passed something it never should have.
    pub fn is_misuse(&self) -> bool {
        matches!(self, SyncError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert!(SyncError::ChannelClosed("sync:u1".into()).is_retryable());
        assert!(!SyncError::ShuttingDown.is_retryable());

        assert!(SyncError::InvalidConfig("bad".into()).is_config_error());
        assert!(!SyncError::ShuttingDown.is_config_error());

        let err: SyncError = ValidationError::Required {
            field: "owner_id".into(),
        }
        .into();
        assert!(err.is_misuse());
        assert_eq!(err.to_string(), "Invalid input: owner_id is required");
    }

    #[test]
    fn test_core_error_conversion() {
        let err: SyncError = CoreError::InvalidFilterTemplate {
            resource_name: "items".into(),
            reason: "unknown placeholder ${x}".into(),
        }
        .into();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("items"));
    }
}
