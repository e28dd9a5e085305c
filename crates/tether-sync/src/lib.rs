//! # tether-sync: Realtime Sync Manager for Tether
//!
//! Keeps every device of one account consistent by turning server-pushed
//! change notifications into "go refetch" signals, and by recovering the
//! push channel from every way it can silently die.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        tether-sync Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                SyncAgentHandle (async, cloneable)                │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ commands                                │
//! │  ┌────────────────────────────▼─────────────────────────────────────┐  │
//! │  │  SyncAgent (tokio task)  ──drives──►  SyncManager (sans-IO)      │  │
//! │  │                                        • subscription/channel    │  │
//! │  │                                        • ReconnectState backoff  │  │
//! │  │                                        • staleness + polling     │  │
//! │  └───────┬──────────────────────────────────────┬───────────────────┘  │
//! │          │ open/close/send                      │ watch/unwatch         │
//! │  ┌───────▼──────────┐                  ┌────────▼───────────┐          │
//! │  │    Transport     │                  │    Environment     │          │
//! │  │ MemoryHub or a   │                  │ Manual / Headless  │          │
//! │  │ BaaS client      │                  │ or host hooks      │          │
//! │  └───────┬──────────┘                  └────────┬───────────┘          │
//! │          └─────────── Signal queue ─────────────┘                      │
//! │                                                                         │
//! │  OUT: SyncListener::on_event / on_reconnect / on_diagnostic            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`agent`] - tokio driver and `SyncAgentHandle`
//! - [`config`] - Sync configuration (TOML + env)
//! - [`environment`] - Visibility/network hooks
//! - [`error`] - Sync error types
//! - [`listener`] - Consumer callbacks and diagnostics
//! - [`manager`] - The subscription state machine
//! - [`memory`] - In-process hub transport
//! - [`reconnect`] - Backoff bookkeeping
//! - [`signal`] - Queued transport/environment inputs
//! - [`transport`] - Channel traits and sinks
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tether_sync::{CallbackListener, ManualEnvironment, MemoryHub, SyncAgentBuilder, SyncConfig};
//!
//! let config = SyncConfig::load_or_default(None);
//! let hub = MemoryHub::new();
//!
//! let handle = SyncAgentBuilder::new(config)
//!     .with_listener(Arc::new(CallbackListener::new(
//!         |event| println!("invalidate {:?}", event),
//!         || println!("refetch everything"),
//!     )))
//!     .spawn(hub.transport(), ManualEnvironment::new())?;
//!
//! handle.subscribe("user-1").await?;
//! handle.broadcast(serde_json::json!({ "type": "settings" })).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod environment;
pub mod error;
pub mod listener;
pub mod manager;
pub mod memory;
pub mod reconnect;
pub mod signal;
pub mod transport;

#[cfg(test)]
mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{SyncAgent, SyncAgentBuilder, SyncAgentHandle};
pub use config::{ChannelSettings, ReconnectSettings, RecoverySettings, SyncConfig};
pub use environment::{
    Environment, EnvironmentEvent, EnvironmentSink, HeadlessEnvironment, ManualEnvironment,
    Visibility,
};
pub use error::{SyncError, SyncResult};
pub use listener::{CallbackListener, Diagnostic, NoOpListener, ReconnectReason, SyncListener};
pub use manager::{SyncManager, SyncStatus};
pub use memory::{MemoryChannel, MemoryHub, MemoryTransport, RowFilter};
pub use reconnect::{PendingReconnect, ReconnectState};
pub use signal::{ChannelEvent, Signal};
pub use transport::{
    BroadcastMessage, Channel, ChannelOptions, ChannelSink, RowChangeBinding, Transport,
};

pub use tether_core::{ChangeType, ChannelState, ChannelStatus, SyncEvent, WatchSpec};
