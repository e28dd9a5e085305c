//! # Channel Transport
//!
//! The pub/sub backend the manager runs on. Tether does not speak any wire
//! protocol itself: a backend-as-a-service client (or the in-process
//! [`MemoryHub`](crate::memory::MemoryHub)) implements these traits.
//!
//! ## Channel Wiring
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Opening a Channel                                    │
//! │                                                                         │
//! │  open_channel("{prefix}:{owner}")                                      │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  on_row_change({ items, owner_id=eq.u1 })   ◄── one per WatchSpec      │
//! │  on_row_change({ notes, owner_id=eq.u1 })                              │
//! │  on_broadcast("sync")                        ◄── exactly one           │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  subscribe(ChannelSink { generation: 7 })                              │
//! │        │                                                                │
//! │        │   joined / errored / closed / timed_out                        │
//! │        │   row changes, broadcasts                                      │
//! │        └──────────────────────────────► manager signal queue           │
//! │                                                                         │
//! │  close_channel(channel)   ◄── sink of generation 7 is now stale        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use tether_core::{ChangeType, ChannelStatus};

use crate::error::SyncResult;
use crate::signal::{ChannelEvent, Signal, SignalSender};

// =============================================================================
// Channel Options & Bindings
// =============================================================================

/// Options passed to [`Transport::open_channel`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Deliver our own broadcasts back to us. Always false for the manager.
    pub broadcast_self: bool,
}

/// A row-change feed registration, rendered from a `WatchSpec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowChangeBinding {
    /// Backend resource name.
    pub resource_name: String,

    /// Row filter with the owner id already substituted.
    pub filter: Option<String>,
}

/// An outgoing application broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastMessage {
    /// Broadcast event name.
    pub event: String,

    /// Application-defined payload.
    pub payload: serde_json::Value,
}

// =============================================================================
// Transport Traits
// =============================================================================

/// One logical channel handed out by a [`Transport`].
pub trait Channel: Send + 'static {
    /// Channel name (`"{prefix}:{owner}"`).
    fn name(&self) -> &str;

    /// Registers interest in a row-change feed. Called before `subscribe`.
    fn on_row_change(&mut self, binding: RowChangeBinding);

    /// Registers interest in an application broadcast event.
    fn on_broadcast(&mut self, event: &str);

    /// Joins the channel. Status changes and notifications are reported to
    /// `sink` from now on.
    fn subscribe(&mut self, sink: ChannelSink);

    /// Sends an application broadcast to the other subscribers.
    fn send(&mut self, message: BroadcastMessage) -> SyncResult<()>;
}

/// Factory and owner of channels.
pub trait Transport: Send + 'static {
    type Channel: Channel;

    /// Creates a channel. Nothing is joined until [`Channel::subscribe`].
    fn open_channel(&mut self, name: &str, options: &ChannelOptions) -> Self::Channel;

    /// Leaves and destroys a channel; its sink receives nothing afterwards.
    fn close_channel(&mut self, channel: Self::Channel);
}

// =============================================================================
// Channel Sink
// =============================================================================

/// Callback target handed to [`Channel::subscribe`].
///
/// Every method returns `false` once the manager is gone, which lets a
/// transport prune dead subscribers.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    generation: u64,
    tx: SignalSender,
}

impl ChannelSink {
    pub(crate) fn new(generation: u64, tx: SignalSender) -> Self {
        ChannelSink { generation, tx }
    }

    /// Generation of the channel this sink belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reports a subscribe-callback status.
    pub fn status(&self, status: ChannelStatus) -> bool {
        self.emit(ChannelEvent::Status(status))
    }

    /// Reports a row change on `resource_name`.
    pub fn row_change(&self, resource_name: &str, change_type: ChangeType) -> bool {
        self.emit(ChannelEvent::RowChange {
            resource_name: resource_name.to_string(),
            change_type,
        })
    }

    /// Reports a broadcast received from another subscriber.
    pub fn broadcast(&self, event: &str, payload: serde_json::Value) -> bool {
        self.emit(ChannelEvent::Broadcast {
            event: event.to_string(),
            payload,
        })
    }

    /// Returns true once the manager has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn emit(&self, event: ChannelEvent) -> bool {
        self.tx
            .send(Signal::Channel {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}
