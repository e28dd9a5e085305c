//! # Signals
//!
//! Everything that reaches the manager from outside (transport callbacks and
//! environment listeners) is funneled through one unbounded queue as a
//! [`Signal`]. Each signal carries the generation (channel) or epoch
//! (environment registration) it was produced under, so anything emitted by
//! a torn-down channel or removed listener is recognizably stale.

use tether_core::{ChangeType, ChannelStatus};
use tokio::sync::mpsc;

use crate::environment::EnvironmentEvent;

/// Sending half of the manager's signal queue.
pub(crate) type SignalSender = mpsc::UnboundedSender<Signal>;

/// Receiving half of the manager's signal queue.
pub(crate) type SignalReceiver = mpsc::UnboundedReceiver<Signal>;

/// Something a transport channel reported.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Subscribe-callback status.
    Status(ChannelStatus),

    /// Low-level row-change notification. Row contents are never forwarded.
    RowChange {
        resource_name: String,
        change_type: ChangeType,
    },

    /// Application broadcast received from another subscriber.
    Broadcast {
        event: String,
        payload: serde_json::Value,
    },
}

/// A queued input for the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// Emitted by the channel opened under `generation`.
    Channel { generation: u64, event: ChannelEvent },

    /// Emitted by environment listeners registered under `epoch`.
    Environment { epoch: u64, event: EnvironmentEvent },
}
