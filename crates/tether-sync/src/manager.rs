//! # Sync Manager
//!
//! The state machine behind a realtime subscription. It owns one logical
//! channel per owner, folds row-change and broadcast notifications into a
//! single [`SyncListener`], and keeps the channel alive through backoff
//! retries, foreground/network recovery and a polling safety net.
//!
//! ## Driving Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SyncManager (sans-IO)                           │
//! │                                                                         │
//! │  consumer calls           queued signals            timers              │
//! │  ─────────────            ──────────────            ──────              │
//! │  subscribe(owner, now)    handle_signal(sig, now)   next_deadline()     │
//! │  unsubscribe()            pump(now)                 fire_due_timers(now)│
//! │  broadcast(payload)                                                     │
//! │  reconnect_now()                                                        │
//! │                                                                         │
//! │        │                         │                         │            │
//! │        └─────────────────────────┼─────────────────────────┘            │
//! │                                  ▼                                      │
//! │           Subscription { owner, channel@generation, state }             │
//! │           ReconnectState { attempts, pending }                          │
//! │           next_poll_at, listener registration@epoch                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing here sleeps or spawns. Every method takes the current instant, so
//! the whole machine runs deterministically under test.
//! [`SyncAgent`](crate::agent::SyncAgent) drives it on a tokio task.
//!
//! ## Channel Lifecycle
//! ```text
//!   subscribe ──► joining ──joined──► joined ──errored/closed──► errored
//!                    │                                              │
//!                    └──errored/timed_out──► errored                │
//!                                               │                   │
//!                     backoff timer / visible / online / manual     │
//!                                               ▼                   ▼
//!                              close old channel, open new (joining)
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tether_core::validation::{channel_name, validate_owner_id};
use tether_core::{ChangeType, ChannelState, ChannelStatus, SyncEvent, TransitionAction};

use crate::config::SyncConfig;
use crate::environment::{Environment, EnvironmentEvent, EnvironmentSink, Visibility};
use crate::error::SyncResult;
use crate::listener::{Diagnostic, ReconnectReason, SyncListener};
use crate::reconnect::{deadline_after, PendingReconnect, ReconnectState};
use crate::signal::{ChannelEvent, Signal, SignalReceiver, SignalSender};
use crate::transport::{
    BroadcastMessage, Channel, ChannelOptions, ChannelSink, RowChangeBinding, Transport,
};

// =============================================================================
// Status Snapshot
// =============================================================================

/// Point-in-time view of the manager, for UIs and health checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatus {
    /// Owner of the active subscription.
    pub owner_id: Option<String>,

    /// Name of the live channel.
    pub channel: Option<String>,

    /// State of the live channel.
    pub state: Option<ChannelState>,

    /// Retries scheduled since the last successful join.
    pub reconnect_attempts: u32,

    /// A backoff retry is waiting to fire.
    pub reconnect_pending: bool,

    /// Environment listeners are installed.
    pub listeners_registered: bool,

    /// Wall clock of the last `joined` status.
    pub last_joined_at: Option<DateTime<Utc>>,
}

impl SyncStatus {
    /// Returns true if the live channel is joined.
    pub fn is_connected(&self) -> bool {
        self.state == Some(ChannelState::Joined)
    }
}

// =============================================================================
// Internal State
// =============================================================================

struct Subscription<C> {
    owner_id: String,
    channel: C,
    generation: u64,
    state: ChannelState,
    last_visible_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
struct ListenerRegistration {
    visibility: bool,
    network: bool,
}

// =============================================================================
// Sync Manager
// =============================================================================

/// Resilient realtime subscription for one owner at a time.
pub struct SyncManager<T: Transport, E: Environment> {
    config: Arc<SyncConfig>,
    transport: T,
    environment: E,
    listener: Arc<dyn SyncListener>,

    signal_tx: SignalSender,
    signal_rx: SignalReceiver,

    subscription: Option<Subscription<T::Channel>>,
    reconnect: ReconnectState,
    registration: Option<ListenerRegistration>,
    next_poll_at: Option<Instant>,
    last_joined_at: Option<DateTime<Utc>>,

    /// Bumped for every channel opened.
    generation: u64,
    /// Bumped every time environment listeners are removed.
    epoch: u64,
}

impl<T: Transport, E: Environment> SyncManager<T, E> {
    /// Creates a manager. The configuration is validated and frozen.
    pub fn new(
        config: SyncConfig,
        transport: T,
        environment: E,
        listener: Arc<dyn SyncListener>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let reconnect =
            ReconnectState::new(config.reconnect.base_delay(), config.reconnect.max_delay());
        let (signal_tx, signal_rx) = tokio::sync::mpsc::unbounded_channel();

        Ok(SyncManager {
            config: Arc::new(config),
            transport,
            environment,
            listener,
            signal_tx,
            signal_rx,
            subscription: None,
            reconnect,
            registration: None,
            next_poll_at: None,
            last_joined_at: None,
            generation: 0,
            epoch: 0,
        })
    }

    pub fn config(&self) -> &Arc<SyncConfig> {
        &self.config
    }

    /// Owner of the active subscription.
    pub fn owner_id(&self) -> Option<&str> {
        self.subscription.as_ref().map(|s| s.owner_id.as_str())
    }

    /// State of the live channel, if any.
    pub fn channel_state(&self) -> Option<ChannelState> {
        self.subscription.as_ref().map(|s| s.state)
    }

    pub fn pending_reconnect(&self) -> Option<PendingReconnect> {
        self.reconnect.pending()
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            owner_id: self.subscription.as_ref().map(|s| s.owner_id.clone()),
            channel: self
                .subscription
                .as_ref()
                .map(|s| s.channel.name().to_string()),
            state: self.channel_state(),
            reconnect_attempts: self.reconnect.attempts(),
            reconnect_pending: self.reconnect.is_pending(),
            listeners_registered: self.registration.is_some(),
            last_joined_at: self.last_joined_at,
        }
    }

    // =========================================================================
    // Consumer Operations
    // =========================================================================

    /// Subscribes to the channel namespace of `owner_id`.
    ///
    /// A no-op while a channel for the same owner is joining or joined.
    /// Otherwise any existing channel is torn down and a fresh one opened.
    pub fn subscribe(&mut self, owner_id: &str, now: Instant) -> SyncResult<()> {
        validate_owner_id(owner_id)?;

        if let Some(sub) = &self.subscription {
            if sub.owner_id == owner_id && sub.state.is_healthy() {
                debug!(owner_id, state = %sub.state, "Already subscribed, skipping");
                let diagnostic = Diagnostic::SubscribeSkipped {
                    owner_id: owner_id.to_string(),
                    state: sub.state,
                };
                self.emit(diagnostic);
                return Ok(());
            }
        }

        if let Some(old) = self.subscription.take() {
            self.close_channel(old.channel, old.generation);
        }
        self.reconnect.reset();
        self.register_listeners();

        let subscription = self.open_channel(owner_id.to_string());
        self.subscription = Some(subscription);
        self.next_poll_at = Some(deadline_after(now, self.config.poll_interval()));

        info!(owner_id, "Subscribed");
        self.emit(Diagnostic::Subscribed {
            owner_id: owner_id.to_string(),
        });
        Ok(())
    }

    /// Tears everything down. Safe to call repeatedly.
    pub fn unsubscribe(&mut self) {
        self.remove_listeners();
        self.reconnect.reset();
        self.next_poll_at = None;

        match self.subscription.take() {
            Some(sub) => {
                self.close_channel(sub.channel, sub.generation);
                info!(owner_id = %sub.owner_id, "Unsubscribed");
                self.emit(Diagnostic::Unsubscribed);
            }
            None => debug!("Unsubscribe with nothing subscribed"),
        }
    }

    /// Sends an application event to the other subscribers.
    ///
    /// Best effort: returns false when no channel is open or the transport
    /// rejected the message. Never queued, never retried.
    pub fn broadcast(&mut self, payload: serde_json::Value) -> bool {
        let Some(sub) = self.subscription.as_mut() else {
            debug!("No channel open, dropping broadcast");
            self.emit(Diagnostic::BroadcastDropped);
            return false;
        };

        let message = BroadcastMessage {
            event: self.config.broadcast_event().to_string(),
            payload,
        };
        match sub.channel.send(message) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    channel = %sub.channel.name(),
                    error = %e,
                    retryable = e.is_retryable(),
                    "Broadcast failed"
                );
                false
            }
        }
    }

    /// Recreates the channel immediately, bypassing backoff.
    ///
    /// Returns false when nothing is subscribed.
    pub fn reconnect_now(&mut self) -> bool {
        if self.subscription.is_none() {
            debug!("Manual reconnect with nothing subscribed");
            return false;
        }
        self.force_reconnect(ReconnectReason::Manual);
        true
    }

    // =========================================================================
    // Signals
    // =========================================================================

    /// Waits for the next queued signal.
    ///
    /// The manager holds a sender itself, so this never yields `None` while
    /// the manager is alive.
    pub async fn next_signal(&mut self) -> Option<Signal> {
        self.signal_rx.recv().await
    }

    /// Handles every signal already queued. Returns how many were handled.
    pub fn pump(&mut self, now: Instant) -> usize {
        let mut handled = 0;
        while let Ok(signal) = self.signal_rx.try_recv() {
            self.handle_signal(signal, now);
            handled += 1;
        }
        handled
    }

    /// Handles one transport or environment signal.
    pub fn handle_signal(&mut self, signal: Signal, now: Instant) {
        match signal {
            Signal::Channel { generation, event } => {
                let current = self.subscription.as_ref().map(|s| s.generation);
                if current != Some(generation) {
                    debug!(generation, ?current, "Dropping signal from detached channel");
                    self.emit(Diagnostic::StaleSignalDropped);
                    return;
                }
                self.handle_channel_event(event, now);
            }
            Signal::Environment { epoch, event } => {
                if epoch != self.epoch || self.registration.is_none() {
                    debug!(epoch, current = self.epoch, "Dropping signal from removed listener");
                    self.emit(Diagnostic::StaleSignalDropped);
                    return;
                }
                self.handle_environment_event(event, now);
            }
        }
    }

    fn handle_channel_event(&mut self, event: ChannelEvent, now: Instant) {
        match event {
            ChannelEvent::Status(status) => self.handle_status(status, now),
            ChannelEvent::RowChange {
                resource_name,
                change_type,
            } => self.handle_row_change(resource_name, change_type),
            ChannelEvent::Broadcast { event, payload } => {
                if event != self.config.broadcast_event() {
                    debug!(event = %event, "Ignoring broadcast with unknown event name");
                    return;
                }
                self.listener.on_event(SyncEvent::broadcast(event, payload));
            }
        }
    }

    fn handle_row_change(&mut self, resource_name: String, change_type: ChangeType) {
        if !self.config.watches(&resource_name) {
            debug!(resource = %resource_name, "Ignoring change on unwatched resource");
            return;
        }
        debug!(resource = %resource_name, change = %change_type, "Row change");
        self.listener
            .on_event(SyncEvent::row_change(resource_name, change_type));
    }

    fn handle_status(&mut self, status: ChannelStatus, now: Instant) {
        let Some(sub) = self.subscription.as_mut() else {
            return;
        };
        let transition = sub.state.apply(status);
        sub.state = transition.to;
        let channel = sub.channel.name().to_string();

        if transition.from != transition.to {
            self.emit(Diagnostic::StateChanged {
                from: transition.from,
                to: transition.to,
            });
        }

        match transition.action() {
            TransitionAction::Connected => {
                self.reconnect.reset();
                self.last_joined_at = Some(Utc::now());
                info!(channel = %channel, %status, "Channel joined");
                self.listener.on_reconnect();
            }
            TransitionAction::ScheduleReconnect => {
                warn!(channel = %channel, %status, "Channel unhealthy");
                if self.reconnect.is_pending() {
                    debug!(channel = %channel, "Reconnect already pending");
                    return;
                }
                let pending = self.reconnect.schedule(now);
                info!(
                    channel = %channel,
                    attempt = pending.attempt,
                    delay_ms = pending.delay.as_millis() as u64,
                    "Reconnect scheduled"
                );
                self.emit(Diagnostic::ReconnectScheduled {
                    attempt: pending.attempt,
                    delay: pending.delay,
                });
            }
        }
    }

    fn handle_environment_event(&mut self, event: EnvironmentEvent, now: Instant) {
        match event {
            EnvironmentEvent::Visibility(Visibility::Hidden) => {
                if let Some(sub) = self.subscription.as_mut() {
                    sub.last_visible_at = Some(now);
                }
                debug!("App hidden");
            }
            EnvironmentEvent::Visibility(Visibility::Visible) => self.handle_visible(now),
            EnvironmentEvent::Online => {
                if self.subscription.is_some() {
                    self.force_reconnect(ReconnectReason::Online);
                }
            }
            EnvironmentEvent::Offline => info!("Network offline"),
        }
    }

    fn handle_visible(&mut self, now: Instant) {
        let Some(sub) = self.subscription.as_mut() else {
            return;
        };
        let background = sub
            .last_visible_at
            .take()
            .map(|hidden_at| now.saturating_duration_since(hidden_at))
            .unwrap_or(Duration::ZERO);
        let state = sub.state;

        if background > self.config.staleness_threshold() {
            self.force_reconnect(ReconnectReason::Stale { background });
        } else if !state.is_healthy() {
            self.force_reconnect(ReconnectReason::Unhealthy(state));
        } else {
            debug!(
                background_ms = background.as_millis() as u64,
                "Short background, refreshing without reconnect"
            );
            self.listener.on_reconnect();
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    /// Earliest instant at which [`fire_due_timers`](Self::fire_due_timers)
    /// has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let retry = self.reconnect.pending().map(|p| p.deadline);
        match (retry, self.next_poll_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Runs the reconnect retry and polling tick if they are due.
    pub fn fire_due_timers(&mut self, now: Instant) {
        if let Some(pending) = self.reconnect.take_due(now) {
            info!(attempt = pending.attempt, "Reconnecting");
            self.emit(Diagnostic::ReconnectStarted {
                attempt: pending.attempt,
            });
            self.recreate_channel();
        }

        if matches!(self.next_poll_at, Some(at) if at <= now) {
            self.next_poll_at = Some(deadline_after(now, self.config.poll_interval()));
            debug!("Polling tick");
            self.emit(Diagnostic::PollTick);
            self.listener.on_reconnect();
        }
    }

    // =========================================================================
    // Channel Management
    // =========================================================================

    fn force_reconnect(&mut self, reason: ReconnectReason) {
        self.reconnect.reset();
        info!(?reason, "Forcing reconnect");
        self.emit(Diagnostic::ForcedReconnect { reason });
        self.recreate_channel();
    }

    /// Destroys the live channel and opens a fresh one for the same owner.
    fn recreate_channel(&mut self) {
        let Some(old) = self.subscription.take() else {
            return;
        };
        let last_visible_at = old.last_visible_at;
        self.close_channel(old.channel, old.generation);

        let mut subscription = self.open_channel(old.owner_id);
        subscription.last_visible_at = last_visible_at;
        self.subscription = Some(subscription);
    }

    fn open_channel(&mut self, owner_id: String) -> Subscription<T::Channel> {
        self.generation += 1;
        let generation = self.generation;
        let name = channel_name(self.config.channel_prefix(), &owner_id);

        let mut channel = self
            .transport
            .open_channel(&name, &ChannelOptions::default());
        for spec in &self.config.watch {
            channel.on_row_change(RowChangeBinding {
                resource_name: spec.resource_name.clone(),
                filter: spec.render_filter(&owner_id),
            });
        }
        channel.on_broadcast(self.config.broadcast_event());
        channel.subscribe(ChannelSink::new(generation, self.signal_tx.clone()));

        info!(channel = %name, generation, "Channel opened");
        self.emit(Diagnostic::ChannelOpened {
            channel: name,
            generation,
        });

        Subscription {
            owner_id,
            channel,
            generation,
            state: ChannelState::Joining,
            last_visible_at: None,
        }
    }

    fn close_channel(&mut self, channel: T::Channel, generation: u64) {
        let name = channel.name().to_string();
        self.transport.close_channel(channel);
        debug!(channel = %name, generation, "Channel closed");
        self.emit(Diagnostic::ChannelClosed {
            channel: name,
            generation,
        });
    }

    // =========================================================================
    // Environment Listeners
    // =========================================================================

    fn register_listeners(&mut self) {
        if self.registration.is_some() {
            return;
        }
        let visibility = self
            .environment
            .watch_visibility(EnvironmentSink::new(self.epoch, self.signal_tx.clone()));
        let network = self
            .environment
            .watch_network(EnvironmentSink::new(self.epoch, self.signal_tx.clone()));

        if !visibility {
            debug!("Visibility API unavailable, skipping foreground recovery");
        }
        if !network {
            debug!("Network API unavailable, skipping online recovery");
        }

        self.registration = Some(ListenerRegistration {
            visibility,
            network,
        });
        self.emit(Diagnostic::ListenersRegistered {
            visibility,
            network,
        });
    }

    fn remove_listeners(&mut self) {
        if let Some(registration) = self.registration.take() {
            self.environment.unwatch();
            self.epoch += 1;
            debug!(
                visibility = registration.visibility,
                network = registration.network,
                "Environment listeners removed"
            );
            self.emit(Diagnostic::ListenersRemoved);
        }
    }

    fn emit(&self, diagnostic: Diagnostic) {
        self.listener.on_diagnostic(&diagnostic);
    }
}

impl<T: Transport, E: Environment> Drop for SyncManager<T, E> {
    fn drop(&mut self) {
        if self.subscription.is_some() || self.registration.is_some() {
            self.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::ManualEnvironment;
    use crate::test_support::{RecordingListener, RecordingTransport, TransportCall};
    use tether_core::WatchSpec;

    const SECOND: Duration = Duration::from_secs(1);

    struct Harness {
        manager: SyncManager<RecordingTransport, ManualEnvironment>,
        transport: RecordingTransport,
        env: ManualEnvironment,
        listener: Arc<RecordingListener>,
        t0: Instant,
    }

    fn config() -> SyncConfig {
        SyncConfig::new("sync").with_watch(WatchSpec::new("items", "owner_id=eq.${ownerId}"))
    }

    impl Harness {
        fn new() -> Self {
            Self::with_env(ManualEnvironment::new())
        }

        fn with_env(env: ManualEnvironment) -> Self {
            Self::with_config(config(), env)
        }

        fn with_config(config: SyncConfig, env: ManualEnvironment) -> Self {
            let transport = RecordingTransport::default();
            let listener = Arc::new(RecordingListener::default());
            let manager =
                SyncManager::new(config, transport.clone(), env.clone(), listener.clone())
                    .unwrap();
            Harness {
                manager,
                transport,
                env,
                listener,
                t0: Instant::now(),
            }
        }

        fn at(&self, offset: Duration) -> Instant {
            self.t0 + offset
        }

        /// Reports `status` on the newest channel and processes it.
        fn status(&mut self, status: ChannelStatus, now: Instant) {
            assert!(self.transport.last_sink().status(status));
            self.manager.pump(now);
        }
    }

    // -------------------------------------------------------------------------
    // subscribe / unsubscribe
    // -------------------------------------------------------------------------

    #[test]
    fn test_subscribe_is_idempotent_while_healthy() {
        let mut h = Harness::new();
        let now = h.t0;

        h.manager.subscribe("user-1", now).unwrap();
        h.manager.subscribe("user-1", now).unwrap();
        assert_eq!(h.transport.opened(), vec!["sync:user-1"]);

        h.status(ChannelStatus::Joined, now);
        h.manager.subscribe("user-1", now).unwrap();
        assert_eq!(h.transport.opened().len(), 1);
        assert!(h.listener.diagnostics().iter().any(|d| matches!(
            d,
            Diagnostic::SubscribeSkipped { state: ChannelState::Joined, .. }
        )));
    }

    #[test]
    fn test_subscribe_same_owner_recreates_unhealthy_channel() {
        let mut h = Harness::new();
        let now = h.t0;

        h.manager.subscribe("user-1", now).unwrap();
        h.status(ChannelStatus::Errored, now);
        assert!(h.manager.pending_reconnect().is_some());

        h.manager.subscribe("user-1", now).unwrap();
        assert_eq!(h.transport.opened().len(), 2);
        assert!(h.manager.pending_reconnect().is_none());
        assert_eq!(h.manager.status().reconnect_attempts, 0);
    }

    #[test]
    fn test_owner_switch_closes_old_channel_first() {
        let mut h = Harness::new();
        let now = h.t0;

        h.manager.subscribe("a", now).unwrap();
        h.manager.subscribe("b", now).unwrap();

        assert_eq!(
            h.transport.calls(),
            vec![
                TransportCall::Open("sync:a".into()),
                TransportCall::Close("sync:a".into()),
                TransportCall::Open("sync:b".into()),
            ]
        );
        assert_eq!(h.manager.owner_id(), Some("b"));
    }

    #[test]
    fn test_subscribe_rejects_empty_owner() {
        let mut h = Harness::new();
        let err = h.manager.subscribe("  ", h.t0).unwrap_err();
        assert!(err.is_misuse());
        assert!(h.transport.calls().is_empty());
    }

    #[test]
    fn test_subscribe_accepts_long_owner() {
        let mut h = Harness::new();
        let owner = "u".repeat(256);

        h.manager.subscribe(&owner, h.t0).unwrap();
        assert_eq!(h.transport.opened(), vec![format!("sync:{}", owner)]);
        assert_eq!(h.manager.owner_id(), Some(owner.as_str()));
    }

    #[test]
    fn test_huge_poll_interval_does_not_overflow() {
        let mut config = config();
        config.recovery.poll_interval_secs = u64::MAX;
        let mut h = Harness::with_config(config, ManualEnvironment::new());
        let now = h.t0;

        h.manager.subscribe("user-1", now).unwrap();
        let deadline = h.manager.next_deadline().unwrap();
        assert!(deadline > now + Duration::from_secs(86_400 * 365));

        h.manager.fire_due_timers(now + Duration::from_secs(86_400));
        assert!(!h.listener.diagnostics().contains(&Diagnostic::PollTick));
    }

    #[test]
    fn test_channel_wiring() {
        let mut h = Harness::new();
        h.manager.subscribe("user-1", h.t0).unwrap();

        let wiring = h.transport.wiring(0);
        assert_eq!(
            wiring.bindings,
            vec![RowChangeBinding {
                resource_name: "items".into(),
                filter: Some("owner_id=eq.user-1".into()),
            }]
        );
        assert_eq!(wiring.broadcast_events, vec!["sync".to_string()]);
        assert!(!wiring.options.broadcast_self);
        assert_eq!(h.transport.last_sink().generation(), 1);
    }

    #[test]
    fn test_listeners_registered_once_per_lifecycle() {
        let mut h = Harness::new();

        h.manager.subscribe("a", h.t0).unwrap();
        h.manager.subscribe("b", h.t0).unwrap();
        assert_eq!(h.env.watch_calls(), 2);

        h.manager.unsubscribe();
        assert!(!h.env.is_watching());

        h.manager.subscribe("a", h.t0).unwrap();
        assert_eq!(h.env.watch_calls(), 4);
        assert!(h.manager.status().listeners_registered);
    }

    #[test]
    fn test_unsubscribe_cancels_everything() {
        let mut h = Harness::new();
        let now = h.t0;

        h.manager.subscribe("user-1", now).unwrap();
        h.status(ChannelStatus::Joined, now);
        h.status(ChannelStatus::Errored, now);
        let old_sink = h.transport.last_sink();
        assert!(h.manager.next_deadline().is_some());

        h.manager.unsubscribe();
        h.manager.unsubscribe();
        let opened = h.transport.opened().len();
        let reconnects = h.listener.reconnects();

        assert!(h.manager.next_deadline().is_none());
        h.manager.fire_due_timers(h.at(Duration::from_secs(86_400)));

        // Late deliveries from the closed channel and removed listeners.
        old_sink.row_change("items", ChangeType::Update);
        old_sink.status(ChannelStatus::Joined);
        assert!(!h.env.show());
        h.manager.handle_signal(
            Signal::Environment {
                epoch: 0,
                event: EnvironmentEvent::Online,
            },
            now,
        );
        h.manager.pump(now);

        assert_eq!(h.transport.opened().len(), opened);
        assert_eq!(h.listener.reconnects(), reconnects);
        assert!(h.listener.events().is_empty());
        let status = h.manager.status();
        assert_eq!(status.owner_id, None);
        assert_eq!(status.reconnect_attempts, 0);
        assert!(!status.reconnect_pending);
        assert!(!status.listeners_registered);
    }

    #[test]
    fn test_unsubscribe_without_subscription_is_safe() {
        let mut h = Harness::new();
        h.manager.unsubscribe();
        assert!(h.transport.calls().is_empty());
        assert!(h.listener.diagnostics().is_empty());
    }

    // -------------------------------------------------------------------------
    // broadcast
    // -------------------------------------------------------------------------

    #[test]
    fn test_broadcast_before_subscribe_is_dropped() {
        let mut h = Harness::new();

        assert!(!h.manager.broadcast(serde_json::json!({"type": "refresh"})));
        assert!(h.transport.calls().is_empty());
        assert!(h.transport.sent().is_empty());
        assert_eq!(h.listener.diagnostics(), vec![Diagnostic::BroadcastDropped]);
    }

    #[test]
    fn test_broadcast_sends_with_configured_event() {
        let mut h = Harness::new();
        h.manager.subscribe("user-1", h.t0).unwrap();

        assert!(h.manager.broadcast(serde_json::json!({"type": "refresh"})));
        assert_eq!(
            h.transport.sent(),
            vec![BroadcastMessage {
                event: "sync".into(),
                payload: serde_json::json!({"type": "refresh"}),
            }]
        );
    }

    #[test]
    fn test_broadcast_send_failure_is_swallowed() {
        let mut h = Harness::new();
        h.manager.subscribe("user-1", h.t0).unwrap();
        h.transport.fail_sends(true);

        assert!(!h.manager.broadcast(serde_json::json!(1)));
    }

    // -------------------------------------------------------------------------
    // channel status & backoff
    // -------------------------------------------------------------------------

    #[test]
    fn test_backoff_grows_then_clamps_without_giving_up() {
        let mut h = Harness::new();
        let mut now = h.t0;
        h.manager.subscribe("user-1", now).unwrap();

        for n in 1..=21u32 {
            h.status(ChannelStatus::Errored, now);
            let pending = h.manager.pending_reconnect().unwrap();
            let expected = Duration::from_millis((1_000u64 << (n - 1).min(20)).min(300_000));
            assert_eq!(pending.attempt, n);
            assert_eq!(pending.delay, expected, "failure {n}");

            now = pending.deadline;
            h.manager.fire_due_timers(now);
        }

        assert_eq!(h.transport.opened().len(), 22);
        assert_eq!(h.manager.status().reconnect_attempts, 21);
    }

    #[test]
    fn test_joined_resets_backoff() {
        let mut h = Harness::new();
        let now = h.t0;
        h.manager.subscribe("user-1", now).unwrap();

        for _ in 0..3 {
            h.status(ChannelStatus::Errored, now);
            let deadline = h.manager.pending_reconnect().unwrap().deadline;
            h.manager.fire_due_timers(deadline);
        }
        h.status(ChannelStatus::Joined, now);
        assert_eq!(h.manager.status().reconnect_attempts, 0);

        h.status(ChannelStatus::Errored, now);
        assert_eq!(h.manager.pending_reconnect().unwrap().delay, SECOND);
    }

    #[test]
    fn test_unhealthy_status_does_not_stack_timers() {
        let mut h = Harness::new();
        let now = h.t0;
        h.manager.subscribe("user-1", now).unwrap();

        h.status(ChannelStatus::Errored, now);
        h.status(ChannelStatus::Closed, h.at(SECOND / 2));

        let pending = h.manager.pending_reconnect().unwrap();
        assert_eq!(pending.attempt, 1);
        assert_eq!(pending.deadline, now + SECOND);
    }

    #[test]
    fn test_timed_out_is_errored() {
        let mut h = Harness::new();
        h.manager.subscribe("user-1", h.t0).unwrap();
        h.status(ChannelStatus::TimedOut, h.t0);

        assert_eq!(h.manager.channel_state(), Some(ChannelState::Errored));
        assert!(h.manager.pending_reconnect().is_some());
    }

    #[test]
    fn test_joined_after_closed_cancels_pending_retry() {
        let mut h = Harness::new();
        h.manager.subscribe("user-1", h.t0).unwrap();
        h.status(ChannelStatus::Closed, h.t0);
        h.status(ChannelStatus::Joined, h.t0);

        assert!(h.manager.pending_reconnect().is_none());
        h.manager.fire_due_timers(h.at(10 * SECOND));
        assert_eq!(h.transport.opened().len(), 1);
    }

    #[test]
    fn test_signals_from_replaced_channel_are_ignored() {
        let mut h = Harness::new();
        h.manager.subscribe("user-1", h.t0).unwrap();
        let first = h.transport.last_sink();

        assert!(h.manager.reconnect_now());
        first.status(ChannelStatus::Errored);
        first.row_change("items", ChangeType::Insert);
        h.manager.pump(h.t0);

        assert_eq!(h.manager.channel_state(), Some(ChannelState::Joining));
        assert!(h.manager.pending_reconnect().is_none());
        assert!(h.listener.events().is_empty());
    }

    // -------------------------------------------------------------------------
    // notifications
    // -------------------------------------------------------------------------

    #[test]
    fn test_notifications_are_normalized() {
        let mut h = Harness::new();
        h.manager.subscribe("user-1", h.t0).unwrap();
        let sink = h.transport.last_sink();

        sink.row_change("items", ChangeType::Delete);
        sink.row_change("notes", ChangeType::Insert);
        sink.broadcast("sync", serde_json::json!({"type": "settings"}));
        sink.broadcast("presence", serde_json::json!({}));
        h.manager.pump(h.t0);

        assert_eq!(
            h.listener.events(),
            vec![
                SyncEvent::row_change("items", ChangeType::Delete),
                SyncEvent::broadcast("sync", serde_json::json!({"type": "settings"})),
            ]
        );
    }

    // -------------------------------------------------------------------------
    // foreground / network recovery
    // -------------------------------------------------------------------------

    #[test]
    fn test_long_background_forces_reconnect() {
        let mut h = Harness::new();
        h.manager.subscribe("user-1", h.t0).unwrap();
        h.status(ChannelStatus::Joined, h.t0);

        h.env.hide();
        h.manager.pump(h.t0);
        h.env.show();
        h.manager.pump(h.at(70 * SECOND));

        assert_eq!(h.transport.opened().len(), 2);
        assert_eq!(h.manager.channel_state(), Some(ChannelState::Joining));
        assert!(h.listener.diagnostics().contains(&Diagnostic::ForcedReconnect {
            reason: ReconnectReason::Stale {
                background: 70 * SECOND
            }
        }));
    }

    #[test]
    fn test_short_background_refreshes_without_reconnect() {
        let mut h = Harness::new();
        h.manager.subscribe("user-1", h.t0).unwrap();
        h.status(ChannelStatus::Joined, h.t0);
        let before = h.listener.reconnects();

        h.env.hide();
        h.manager.pump(h.t0);
        h.env.show();
        h.manager.pump(h.at(10 * SECOND));

        assert_eq!(h.transport.opened().len(), 1);
        assert_eq!(h.listener.reconnects(), before + 1);
    }

    #[test]
    fn test_background_at_threshold_is_not_stale() {
        let mut h = Harness::new();
        h.manager.subscribe("user-1", h.t0).unwrap();
        h.status(ChannelStatus::Joined, h.t0);

        h.env.hide();
        h.manager.pump(h.t0);
        h.env.show();
        h.manager.pump(h.at(60 * SECOND));

        assert_eq!(h.transport.opened().len(), 1);
    }

    #[test]
    fn test_visible_with_unhealthy_channel_skips_backoff() {
        let mut h = Harness::new();
        h.manager.subscribe("user-1", h.t0).unwrap();
        for _ in 0..4 {
            h.status(ChannelStatus::Errored, h.t0);
            let deadline = h.manager.pending_reconnect().unwrap().deadline;
            h.manager.fire_due_timers(deadline);
        }
        h.status(ChannelStatus::Errored, h.t0);
        assert_eq!(h.manager.pending_reconnect().unwrap().delay, 16 * SECOND);

        h.env.show();
        h.manager.pump(h.at(SECOND));

        assert_eq!(h.transport.opened().len(), 6);
        assert!(h.manager.pending_reconnect().is_none());
        assert_eq!(h.manager.status().reconnect_attempts, 0);
    }

    #[test]
    fn test_online_always_forces_reconnect() {
        let mut h = Harness::new();
        h.manager.subscribe("user-1", h.t0).unwrap();
        h.status(ChannelStatus::Joined, h.t0);

        h.env.go_offline();
        h.manager.pump(h.t0);
        assert_eq!(h.transport.opened().len(), 1);

        h.env.go_online();
        h.manager.pump(h.t0);
        assert_eq!(
            h.transport.calls(),
            vec![
                TransportCall::Open("sync:user-1".into()),
                TransportCall::Close("sync:user-1".into()),
                TransportCall::Open("sync:user-1".into()),
            ]
        );
    }

    #[test]
    fn test_headless_environment_skips_recovery_paths() {
        let mut h = Harness::with_env(ManualEnvironment::with_capabilities(false, false));
        h.manager.subscribe("user-1", h.t0).unwrap();

        assert!(!h.env.show());
        assert!(!h.env.go_online());
        assert!(h.listener.diagnostics().contains(&Diagnostic::ListenersRegistered {
            visibility: false,
            network: false,
        }));
    }

    // -------------------------------------------------------------------------
    // polling
    // -------------------------------------------------------------------------

    #[test]
    fn test_poll_tick_refreshes_regardless_of_health() {
        let mut h = Harness::new();
        h.manager.subscribe("user-1", h.t0).unwrap();
        let interval = h.manager.config().poll_interval();

        h.manager.fire_due_timers(h.at(interval - SECOND));
        assert_eq!(h.listener.reconnects(), 0);

        h.manager.fire_due_timers(h.at(interval));
        assert_eq!(h.listener.reconnects(), 1);

        // A long freeze fires once, then re-arms from now.
        h.manager.fire_due_timers(h.at(interval * 5));
        assert_eq!(h.listener.reconnects(), 2);
        assert_eq!(h.manager.next_deadline(), Some(h.at(interval * 6)));
    }

    // -------------------------------------------------------------------------
    // end to end
    // -------------------------------------------------------------------------

    #[test]
    fn test_end_to_end_invalidation_and_recovery() {
        let mut h = Harness::new();
        let now = h.t0;

        h.manager.subscribe("user-1", now).unwrap();
        h.status(ChannelStatus::Joined, now);
        assert_eq!(h.listener.reconnects(), 1);
        assert!(h.listener.events().is_empty());

        h.transport
            .last_sink()
            .row_change("items", ChangeType::Update);
        h.manager.pump(now);
        assert_eq!(
            h.listener.events(),
            vec![SyncEvent::row_change("items", ChangeType::Update)]
        );

        h.status(ChannelStatus::Errored, now);
        assert_eq!(h.manager.next_deadline(), Some(now + SECOND));

        h.manager.fire_due_timers(now + SECOND);
        assert_eq!(h.transport.opened(), vec!["sync:user-1", "sync:user-1"]);
        assert_eq!(h.listener.events().len(), 1);
    }

    #[test]
    fn test_reconnect_now_requires_subscription() {
        let mut h = Harness::new();
        assert!(!h.manager.reconnect_now());
        assert!(h.transport.calls().is_empty());
    }

    #[test]
    fn test_status_snapshot() {
        let mut h = Harness::new();
        h.manager.subscribe("user-1", h.t0).unwrap();
        h.status(ChannelStatus::Joined, h.t0);

        let status = h.manager.status();
        assert!(status.is_connected());
        assert_eq!(status.owner_id.as_deref(), Some("user-1"));
        assert_eq!(status.channel.as_deref(), Some("sync:user-1"));
        assert!(status.last_joined_at.is_some());
        assert!(!status.reconnect_pending);
    }
}
