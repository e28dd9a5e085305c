//! # Runtime Environment Hooks
//!
//! Page-visibility and network-online signals from the host. Browsers and
//! mobile OSes freeze timers while an app is backgrounded, so these are the
//! only reliable hint that a backoff schedule has gone stale.
//!
//! ## Registration Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  subscribe()  ──► watch_visibility(sink@epoch 4) ──► false? skip path   │
//! │               ──► watch_network(sink@epoch 4)    ──► false? skip path   │
//! │                                                                         │
//! │  subscribe()  ──► already registered, nothing happens                   │
//! │                                                                         │
//! │  unsubscribe() ──► unwatch()   epoch 4 signals are now ignored          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::signal::{Signal, SignalSender};

// =============================================================================
// Events
// =============================================================================

/// Foreground state of the hosting app/tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// A signal raised by the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentEvent {
    Visibility(Visibility),
    Online,
    Offline,
}

// =============================================================================
// Environment Sink
// =============================================================================

/// Callback target for environment listeners.
#[derive(Debug, Clone)]
pub struct EnvironmentSink {
    epoch: u64,
    tx: SignalSender,
}

impl EnvironmentSink {
    pub(crate) fn new(epoch: u64, tx: SignalSender) -> Self {
        EnvironmentSink { epoch, tx }
    }

    /// Reports a visibility change.
    pub fn visibility(&self, visibility: Visibility) -> bool {
        self.emit(EnvironmentEvent::Visibility(visibility))
    }

    /// Reports that the network came back.
    pub fn online(&self) -> bool {
        self.emit(EnvironmentEvent::Online)
    }

    /// Reports that the network went away.
    pub fn offline(&self) -> bool {
        self.emit(EnvironmentEvent::Offline)
    }

    fn emit(&self, event: EnvironmentEvent) -> bool {
        self.tx
            .send(Signal::Environment {
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }
}

// =============================================================================
// Environment Trait
// =============================================================================

/// Source of visibility and network signals.
///
/// Features are detected at registration time: returning `false` means the
/// host has no such API and that recovery path is skipped.
pub trait Environment: Send + 'static {
    /// Starts forwarding visibility changes to `sink`.
    fn watch_visibility(&mut self, sink: EnvironmentSink) -> bool;

    /// Starts forwarding online/offline changes to `sink`.
    fn watch_network(&mut self, sink: EnvironmentSink) -> bool;

    /// Removes every listener installed by the watch methods.
    fn unwatch(&mut self);
}

// =============================================================================
// Headless Environment
// =============================================================================

/// An environment with neither visibility nor network APIs (servers, CLIs).
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessEnvironment;

impl Environment for HeadlessEnvironment {
    fn watch_visibility(&mut self, _sink: EnvironmentSink) -> bool {
        false
    }

    fn watch_network(&mut self, _sink: EnvironmentSink) -> bool {
        false
    }

    fn unwatch(&mut self) {}
}

// =============================================================================
// Manual Environment
// =============================================================================

#[derive(Debug)]
struct ManualState {
    visibility_supported: bool,
    network_supported: bool,
    visibility_sink: Option<EnvironmentSink>,
    network_sink: Option<EnvironmentSink>,
    watch_calls: usize,
}

/// Host-driven environment.
///
/// Clones share state: hand one clone to the manager and keep another to
/// report lifecycle changes from the host (window focus hooks, OS sleep/wake
/// notifications, a reachability monitor).
///
/// ## Usage
/// ```rust,ignore
/// let env = ManualEnvironment::new();
/// let manager = SyncManager::new(config, transport, env.clone(), listener)?;
///
/// // later, from the host's lifecycle callbacks
/// env.hide();
/// env.show();
/// env.go_online();
/// ```
#[derive(Debug, Clone)]
pub struct ManualEnvironment {
    state: Arc<Mutex<ManualState>>,
}

impl Default for ManualEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualEnvironment {
    /// Creates an environment with both APIs available.
    pub fn new() -> Self {
        Self::with_capabilities(true, true)
    }

    /// Creates an environment with the given APIs available.
    pub fn with_capabilities(visibility: bool, network: bool) -> Self {
        ManualEnvironment {
            state: Arc::new(Mutex::new(ManualState {
                visibility_supported: visibility,
                network_supported: network,
                visibility_sink: None,
                network_sink: None,
                watch_calls: 0,
            })),
        }
    }

    /// Reports that the app went to the background.
    pub fn hide(&self) -> bool {
        self.with_visibility_sink(|sink| sink.visibility(Visibility::Hidden))
    }

    /// Reports that the app came back to the foreground.
    pub fn show(&self) -> bool {
        self.with_visibility_sink(|sink| sink.visibility(Visibility::Visible))
    }

    /// Reports a network online event.
    pub fn go_online(&self) -> bool {
        self.with_network_sink(|sink| sink.online())
    }

    /// Reports a network offline event.
    pub fn go_offline(&self) -> bool {
        self.with_network_sink(|sink| sink.offline())
    }

    /// Returns true while any listener is installed.
    pub fn is_watching(&self) -> bool {
        let state = self.state.lock();
        state.visibility_sink.is_some() || state.network_sink.is_some()
    }

    /// Number of successful `watch_*` registrations so far.
    pub fn watch_calls(&self) -> usize {
        self.state.lock().watch_calls
    }

    fn with_visibility_sink(&self, f: impl FnOnce(&EnvironmentSink) -> bool) -> bool {
        match self.state.lock().visibility_sink.as_ref() {
            Some(sink) => f(sink),
            None => {
                debug!("No visibility listener installed");
                false
            }
        }
    }

    fn with_network_sink(&self, f: impl FnOnce(&EnvironmentSink) -> bool) -> bool {
        match self.state.lock().network_sink.as_ref() {
            Some(sink) => f(sink),
            None => {
                debug!("No network listener installed");
                false
            }
        }
    }
}

impl Environment for ManualEnvironment {
    fn watch_visibility(&mut self, sink: EnvironmentSink) -> bool {
        let mut state = self.state.lock();
        if !state.visibility_supported {
            return false;
        }
        state.visibility_sink = Some(sink);
        state.watch_calls += 1;
        true
    }

    fn watch_network(&mut self, sink: EnvironmentSink) -> bool {
        let mut state = self.state.lock();
        if !state.network_supported {
            return false;
        }
        state.network_sink = Some(sink);
        state.watch_calls += 1;
        true
    }

    fn unwatch(&mut self) {
        let mut state = self.state.lock();
        state.visibility_sink = None;
        state.network_sink = None;
    }
}
