//! # Error Types
//!
//! Domain-specific error types for tether-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tether-core errors (this file)                                        │
//! │  ├── CoreError        - General domain errors                          │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  tether-sync errors (separate crate)                                   │
//! │  └── SyncError        - Config, misuse and internal agent failures     │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → consumer call site    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Connectivity failures never appear here. Only consumer misuse does.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A filter template could not be rendered for an owner.
    #[error("Filter template for '{resource_name}' is invalid: {reason}")]
    InvalidFilterTemplate {
        resource_name: String,
        reason: String,
    },

    /// A broadcast payload could not be decoded into the requested type.
    #[error("Broadcast payload could not be decoded: {0}")]
    PayloadDecode(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These indicate a consumer bug (empty owner id, malformed config), not a
/// transient condition, and are reported at the call site.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format (e.g., reserved separator inside a prefix).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value (e.g., two watch specs for one resource).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
