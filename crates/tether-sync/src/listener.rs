//! # Consumer Callbacks
//!
//! Application stores register one [`SyncListener`]. It receives:
//!
//! - `on_event` for every row-change or broadcast notification
//! - `on_reconnect` after every successful (re)join, on short foreground
//!   returns, and on every polling tick
//! - `on_diagnostic` for every lifecycle transition (optional)
//!
//! `on_reconnect` fires often; consumers should make it idempotent and
//! cheap (e.g. "mark all stores stale, refetch visible ones").

use std::time::Duration;

use tether_core::{ChannelState, SyncEvent};

// =============================================================================
// Diagnostics
// =============================================================================

/// Why a reconnect bypassed the backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    /// Came back to the foreground after longer than the staleness threshold.
    Stale { background: Duration },
    /// Came back to the foreground with an unhealthy channel.
    Unhealthy(ChannelState),
    /// The network reported online.
    Online,
    /// The consumer asked for it.
    Manual,
}

/// A lifecycle transition, emitted alongside the `tracing` log line.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// A subscription was created for `owner_id`.
    Subscribed { owner_id: String },
    /// `subscribe` found a healthy channel for the same owner.
    SubscribeSkipped { owner_id: String, state: ChannelState },
    /// A channel was opened and its handlers attached.
    ChannelOpened { channel: String, generation: u64 },
    /// A channel was closed and its handlers detached.
    ChannelClosed { channel: String, generation: u64 },
    /// The live channel changed state.
    StateChanged { from: ChannelState, to: ChannelState },
    /// A backoff retry was scheduled.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// A scheduled retry fired.
    ReconnectStarted { attempt: u32 },
    /// A reconnect was forced past the backoff schedule.
    ForcedReconnect { reason: ReconnectReason },
    /// Environment listeners were installed.
    ListenersRegistered { visibility: bool, network: bool },
    /// Environment listeners were removed.
    ListenersRemoved,
    /// The polling safety net fired.
    PollTick,
    /// A broadcast was dropped because no channel is open.
    BroadcastDropped,
    /// A signal from a detached channel or listener was ignored.
    StaleSignalDropped,
    /// The subscription was torn down.
    Unsubscribed,
}

// =============================================================================
// Listener Trait
// =============================================================================

/// Trait for receiving sync notifications (implemented by app stores).
pub trait SyncListener: Send + Sync {
    /// Called once per received notification.
    fn on_event(&self, event: SyncEvent);

    /// Called whenever data may have been missed and should be refetched.
    fn on_reconnect(&self);

    /// Called for every lifecycle transition.
    fn on_diagnostic(&self, _diagnostic: &Diagnostic) {}
}

/// No-op listener for testing.
pub struct NoOpListener;

impl SyncListener for NoOpListener {
    fn on_event(&self, _event: SyncEvent) {}
    fn on_reconnect(&self) {}
}

type EventFn = Box<dyn Fn(SyncEvent) + Send + Sync>;
type ReconnectFn = Box<dyn Fn() + Send + Sync>;

/// Listener assembled from two closures.
///
/// ```rust
/// use tether_sync::CallbackListener;
///
/// let listener = CallbackListener::new(
///     |event| println!("refetch after {:?}", event),
///     || println!("refetch everything"),
/// );
/// # let _ = listener;
/// ```
pub struct CallbackListener {
    on_event: EventFn,
    on_reconnect: ReconnectFn,
}

impl CallbackListener {
    pub fn new(
        on_event: impl Fn(SyncEvent) + Send + Sync + 'static,
        on_reconnect: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        CallbackListener {
            on_event: Box::new(on_event),
            on_reconnect: Box::new(on_reconnect),
        }
    }
}

impl SyncListener for CallbackListener {
    fn on_event(&self, event: SyncEvent) {
        (self.on_event)(event)
    }

    fn on_reconnect(&self) {
        (self.on_reconnect)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tether_core::ChangeType;

    #[test]
    fn test_callback_listener_dispatch() {
        let events = Arc::new(AtomicUsize::new(0));
        let reconnects = Arc::new(AtomicUsize::new(0));

        let listener = {
            let events = events.clone();
            let reconnects = reconnects.clone();
            CallbackListener::new(
                move |_| {
                    events.fetch_add(1, Ordering::SeqCst);
                },
                move || {
                    reconnects.fetch_add(1, Ordering::SeqCst);
                },
            )
        };

        listener.on_event(SyncEvent::row_change("items", ChangeType::Insert));
        listener.on_reconnect();
        listener.on_reconnect();
        listener.on_diagnostic(&Diagnostic::PollTick);

        assert_eq!(events.load(Ordering::SeqCst), 1);
        assert_eq!(reconnects.load(Ordering::SeqCst), 2);
    }
}
