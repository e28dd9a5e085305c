//! # tether-core: Pure Sync Domain Types
//!
//! The I/O-free half of Tether. Everything here is deterministic and can be
//! shared with any host (tokio service, WASM front end, test harness).
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tether Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Application stores (notes, tasks, ...)             │   │
//! │  │        on_event(SyncEvent) ──► refetch   on_reconnect ──► all   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               tether-sync (SyncManager, agent)                  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tether-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐   │   │
//! │  │   │   types   │  │  channel  │  │validation │  │   error   │   │   │
//! │  │   │ SyncEvent │  │  states & │  │ owner id, │  │ CoreError │   │   │
//! │  │   │ WatchSpec │  │transitions│  │  prefix   │  │           │   │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘   │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO TIMERS • NO NETWORK • PURE FUNCTIONS              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - `SyncEvent`, `ChangeType`, `WatchSpec`
//! - [`channel`] - Channel status state machine
//! - [`validation`] - Owner id / prefix / resource checks
//! - [`error`] - Domain error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod channel;
pub mod error;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use channel::{ChannelState, ChannelStatus, Transition, TransitionAction};
pub use error::{CoreError, CoreResult, ValidationError};
pub use types::{ChangeType, SyncEvent, WatchSpec, OWNER_PLACEHOLDER};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum length of channel prefixes and resource names.
pub const MAX_IDENTIFIER_LEN: usize = 255;
