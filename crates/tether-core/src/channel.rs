//! # Channel Status State Machine
//!
//! Pure transition rules for a single channel's lifecycle.
//!
//! ## States
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Channel States                                     │
//! │                                                                         │
//! │                  joined                                                 │
//! │   ┌─────────┐ ─────────────► ┌─────────┐                               │
//! │   │ Joining │                │ Joined  │ ──── closed ────► ┌────────┐  │
//! │   └─────────┘ ◄──┐           └────┬────┘                   │ Closed │  │
//! │        │         │                │ errored / timed_out    └───┬────┘  │
//! │        │ errored │ reconnect      ▼                            │       │
//! │        └────────►│           ┌─────────┐                       │       │
//! │                  └────────── │ Errored │ ◄─────────────────────┘       │
//! │                              └─────────┘                               │
//! │                                                                         │
//! │  HEALTHY:   Joining, Joined   (subscribe is a no-op)                   │
//! │  UNHEALTHY: Errored, Closed   (always schedule a reconnect)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any state goes back to `Joining` when a fresh channel is opened.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// =============================================================================
// Channel Status (reported by the transport)
// =============================================================================

/// Status values a transport reports through its subscribe callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Joined,
    Errored,
    Closed,
    TimedOut,
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelStatus::Joined => write!(f, "joined"),
            ChannelStatus::Errored => write!(f, "errored"),
            ChannelStatus::Closed => write!(f, "closed"),
            ChannelStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

// =============================================================================
// Channel State (owned by the manager)
// =============================================================================

/// Observable state of the live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ChannelState {
    Joining,
    Joined,
    Closed,
    Errored,
}

impl ChannelState {
    /// Joining and joined channels are left alone by `subscribe`.
    pub fn is_healthy(&self) -> bool {
        matches!(self, ChannelState::Joining | ChannelState::Joined)
    }

    /// Applies a transport status and returns the resulting transition.
    ///
    /// `timed_out` is folded into `Errored`.
    pub fn apply(self, status: ChannelStatus) -> Transition {
        let to = match status {
            ChannelStatus::Joined => ChannelState::Joined,
            ChannelStatus::Errored | ChannelStatus::TimedOut => ChannelState::Errored,
            ChannelStatus::Closed => ChannelState::Closed,
        };
        Transition { from: self, to }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::Joining => write!(f, "joining"),
            ChannelState::Joined => write!(f, "joined"),
            ChannelState::Closed => write!(f, "closed"),
            ChannelState::Errored => write!(f, "errored"),
        }
    }
}

// =============================================================================
// Transition
// =============================================================================

/// A single state change, with the action the manager owes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ChannelState,
    pub to: ChannelState,
}

/// What the manager must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionAction {
    /// Reset backoff, cancel pending retries, notify `on_reconnect`.
    Connected,
    /// Schedule a reconnect unless one is already pending.
    ScheduleReconnect,
}

impl Transition {
    /// Returns the action required by the new state.
    pub fn action(&self) -> TransitionAction {
        if self.to == ChannelState::Joined {
            TransitionAction::Connected
        } else {
            TransitionAction::ScheduleReconnect
        }
    }
}
