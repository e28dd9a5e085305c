//! # Domain Types
//!
//! Types shared between the sync manager and the application stores that
//! consume its notifications.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────┐   │
//! │  │   WatchSpec     │   │     SyncEvent       │   │   ChangeType    │   │
//! │  │  ─────────────  │   │  ─────────────────  │   │  ─────────────  │   │
//! │  │  resource_name  │   │  RowChange {        │   │  Insert         │   │
//! │  │  filter_template│   │    resource_name,   │   │  Update         │   │
//! │  │  "${ownerId}"   │   │    change_type }    │   │  Delete         │   │
//! │  └─────────────────┘   │  Broadcast {        │   └─────────────────┘   │
//! │                        │    event, payload } │                          │
//! │                        └─────────────────────┘                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Invalidate, Don't Apply
//! A `SyncEvent::RowChange` only says *which* resource changed and *how*.
//! Row contents are deliberately dropped: after a gap the change feed cannot
//! be trusted to rebuild state, so consumers always refetch the resource.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};

/// Placeholder substituted with the owner id when a filter is rendered.
pub const OWNER_PLACEHOLDER: &str = "${ownerId}";

// =============================================================================
// Change Type
// =============================================================================

/// Kind of row change reported by the backend change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Insert => write!(f, "insert"),
            ChangeType::Update => write!(f, "update"),
            ChangeType::Delete => write!(f, "delete"),
        }
    }
}

impl std::str::FromStr for ChangeType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insert" => Ok(ChangeType::Insert),
            "update" => Ok(ChangeType::Update),
            "delete" => Ok(ChangeType::Delete),
            other => Err(ValidationError::InvalidFormat {
                field: "change_type".to_string(),
                reason: format!("unknown change type '{}'", other),
            }),
        }
    }
}

// =============================================================================
// Sync Event
// =============================================================================

/// A notification delivered to the consumer's `on_event` callback.
///
/// Serialized with a `kind` tag so browser-side stores can switch on it:
/// `{ "kind": "row-change", "resourceName": "items", "changeType": "update" }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "kebab-case")]
#[ts(export)]
pub enum SyncEvent {
    /// Something changed in `resource_name`; go refetch it.
    #[serde(rename_all = "camelCase")]
    RowChange {
        resource_name: String,
        change_type: ChangeType,
    },

    /// Application-defined payload sent by another device of the same owner.
    Broadcast {
        event: String,
        #[ts(type = "unknown")]
        payload: serde_json::Value,
    },
}

impl SyncEvent {
    /// Creates a row-change notification.
    pub fn row_change(resource_name: impl Into<String>, change_type: ChangeType) -> Self {
        SyncEvent::RowChange {
            resource_name: resource_name.into(),
            change_type,
        }
    }

    /// Creates a broadcast notification.
    pub fn broadcast(event: impl Into<String>, payload: serde_json::Value) -> Self {
        SyncEvent::Broadcast {
            event: event.into(),
            payload,
        }
    }

    /// Returns the resource name for row-change events.
    pub fn resource_name(&self) -> Option<&str> {
        match self {
            SyncEvent::RowChange { resource_name, .. } => Some(resource_name),
            SyncEvent::Broadcast { .. } => None,
        }
    }

    /// Decodes a broadcast payload into `T`.
    ///
    /// Returns `Ok(None)` for row-change events.
    pub fn broadcast_as<T: DeserializeOwned>(&self) -> CoreResult<Option<T>> {
        match self {
            SyncEvent::Broadcast { payload, .. } => serde_json::from_value(payload.clone())
                .map(Some)
                .map_err(|e| CoreError::PayloadDecode(e.to_string())),
            SyncEvent::RowChange { .. } => Ok(None),
        }
    }
}

// =============================================================================
// Watch Spec
// =============================================================================

/// Which backend row-change feed to listen to.
///
/// ## Example
/// ```rust
/// use tether_core::WatchSpec;
///
/// let spec = WatchSpec::new("items", "owner_id=eq.${ownerId}");
/// assert_eq!(spec.render_filter("user-1").as_deref(), Some("owner_id=eq.user-1"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct WatchSpec {
    /// Backend resource (table) name.
    #[serde(alias = "resource_name")]
    pub resource_name: String,

    /// Row filter; `${ownerId}` is replaced at subscribe time.
    /// Empty means the whole resource.
    #[serde(default, alias = "filter_template")]
    pub filter_template: String,
}

impl WatchSpec {
    /// Creates a watch spec.
    pub fn new(resource_name: impl Into<String>, filter_template: impl Into<String>) -> Self {
        WatchSpec {
            resource_name: resource_name.into(),
            filter_template: filter_template.into(),
        }
    }

    /// Creates a watch spec without a row filter.
    pub fn unfiltered(resource_name: impl Into<String>) -> Self {
        Self::new(resource_name, String::new())
    }

    /// Substitutes the owner id into the filter template.
    ///
    /// Returns `None` for unfiltered specs.
    pub fn render_filter(&self, owner_id: &str) -> Option<String> {
        if self.filter_template.is_empty() {
            return None;
        }
        Some(self.filter_template.replace(OWNER_PLACEHOLDER, owner_id))
    }

    /// Checks that the resource name is set and that the template only uses
    /// the owner placeholder.
    pub fn validate(&self) -> CoreResult<()> {
        crate::validation::validate_resource_name(&self.resource_name)?;

        let mut rest = self.filter_template.as_str();
        while let Some(start) = rest.find("${") {
            let tail = &rest[start..];
            let end = tail.find('}').ok_or_else(|| CoreError::InvalidFilterTemplate {
                resource_name: self.resource_name.clone(),
                reason: "unterminated placeholder".to_string(),
            })?;
            let placeholder = &tail[..=end];
            if placeholder != OWNER_PLACEHOLDER {
                return Err(CoreError::InvalidFilterTemplate {
                    resource_name: self.resource_name.clone(),
                    reason: format!("unknown placeholder {}", placeholder),
                });
            }
            rest = &tail[end + 1..];
        }

        Ok(())
    }
}
