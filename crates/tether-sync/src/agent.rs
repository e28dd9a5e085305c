//! # Sync Agent
//!
//! Runs a [`SyncManager`] on a tokio task and exposes it through a cloneable
//! [`SyncAgentHandle`].
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │   SyncAgentHandle (clone per store / UI component)                     │
//! │     subscribe · unsubscribe · broadcast · reconnect_now · shutdown      │
//! │                    │                                 ▲                  │
//! │                    │ AgentCommand + oneshot reply    │ watch<SyncStatus>│
//! │                    ▼                                 │                  │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      run loop (select!, biased)                  │  │
//! │  │                                                                  │  │
//! │  │   1. queued signals  ──► manager.handle_signal()                 │  │
//! │  │   2. next deadline   ──► manager.fire_due_timers()               │  │
//! │  │   3. commands        ──► manager.subscribe() / broadcast() / ... │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  Signals are drained before commands, so a command always observes     │
//! │  every status change queued ahead of it.                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::environment::Environment;
use crate::error::{SyncError, SyncResult};
use crate::listener::{NoOpListener, SyncListener};
use crate::manager::{SyncManager, SyncStatus};
use crate::transport::Transport;

/// Capacity of the command queue.
const COMMAND_BUFFER: usize = 64;

// =============================================================================
// Commands
// =============================================================================

/// Requests sent from a handle to the agent task.
#[derive(Debug)]
enum AgentCommand {
    Subscribe {
        owner_id: String,
        reply: oneshot::Sender<SyncResult<()>>,
    },
    Unsubscribe {
        reply: oneshot::Sender<()>,
    },
    Broadcast {
        payload: serde_json::Value,
        reply: oneshot::Sender<bool>,
    },
    ReconnectNow {
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<SyncStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

// =============================================================================
// Sync Agent
// =============================================================================

/// Owns the manager and drives it from signals, timers and commands.
pub struct SyncAgent<T: Transport, E: Environment> {
    manager: SyncManager<T, E>,
    command_rx: mpsc::Receiver<AgentCommand>,
    status_tx: watch::Sender<SyncStatus>,
}

impl<T: Transport, E: Environment> SyncAgent<T, E> {
    /// Wraps a manager. The agent does nothing until [`run`](Self::run).
    pub fn new(manager: SyncManager<T, E>) -> (Self, SyncAgentHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status_rx) = watch::channel(manager.status());

        let agent = SyncAgent {
            manager,
            command_rx,
            status_tx,
        };
        (agent, SyncAgentHandle::new(command_tx, status_rx))
    }

    /// Spawns the agent on the current tokio runtime.
    pub fn spawn(manager: SyncManager<T, E>) -> (SyncAgentHandle, JoinHandle<()>) {
        let (agent, handle) = Self::new(manager);
        let task = tokio::spawn(agent.run());
        (handle, task)
    }

    /// Main loop. Returns after `shutdown` or once every handle is dropped.
    pub async fn run(mut self) {
        info!("Sync agent started");

        loop {
            let deadline = self.manager.next_deadline();

            tokio::select! {
                biased;

                Some(signal) = self.manager.next_signal() => {
                    self.manager.handle_signal(signal, Instant::now());
                }

                _ = sleep_until(deadline) => {
                    self.manager.fire_due_timers(Instant::now());
                }

                command = self.command_rx.recv() => match command {
                    Some(AgentCommand::Shutdown { reply }) => {
                        info!("Sync agent received shutdown");
                        self.manager.unsubscribe();
                        self.publish_status();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        info!("All sync handles dropped");
                        self.manager.unsubscribe();
                        self.publish_status();
                        break;
                    }
                },
            }

            self.publish_status();
        }

        info!("Sync agent stopped");
    }

    fn handle_command(&mut self, command: AgentCommand) {
        let now = Instant::now();
        match command {
            AgentCommand::Subscribe { owner_id, reply } => {
                let _ = reply.send(self.manager.subscribe(&owner_id, now));
            }
            AgentCommand::Unsubscribe { reply } => {
                self.manager.unsubscribe();
                let _ = reply.send(());
            }
            AgentCommand::Broadcast { payload, reply } => {
                let _ = reply.send(self.manager.broadcast(payload));
            }
            AgentCommand::ReconnectNow { reply } => {
                let _ = reply.send(self.manager.reconnect_now());
            }
            AgentCommand::Status { reply } => {
                let _ = reply.send(self.manager.status());
            }
            AgentCommand::Shutdown { .. } => {
                debug!("Shutdown is handled by the run loop");
            }
        }
    }

    fn publish_status(&self) {
        let status = self.manager.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Agent Handle (for external control)
// =============================================================================

/// Cloneable handle to a running [`SyncAgent`].
///
/// Every method fails with [`SyncError::ShuttingDown`] once the agent has
/// stopped. Connectivity problems are never reported here.
#[derive(Clone)]
pub struct SyncAgentHandle {
    command_tx: mpsc::Sender<AgentCommand>,
    status_rx: watch::Receiver<SyncStatus>,
}

impl SyncAgentHandle {
    fn new(command_tx: mpsc::Sender<AgentCommand>, status_rx: watch::Receiver<SyncStatus>) -> Self {
        SyncAgentHandle {
            command_tx,
            status_rx,
        }
    }

    /// Subscribes to `owner_id`'s channel namespace.
    pub async fn subscribe(&self, owner_id: impl Into<String>) -> SyncResult<()> {
        let owner_id = owner_id.into();
        self.request(|reply| AgentCommand::Subscribe { owner_id, reply })
            .await?
    }

    pub async fn unsubscribe(&self) -> SyncResult<()> {
        self.request(|reply| AgentCommand::Unsubscribe { reply })
            .await
    }

    /// Broadcasts to the other devices. `Ok(false)` means it was dropped.
    pub async fn broadcast(&self, payload: serde_json::Value) -> SyncResult<bool> {
        self.request(|reply| AgentCommand::Broadcast { payload, reply })
            .await
    }

    /// Serializes `payload` and broadcasts it.
    pub async fn broadcast_json<P: Serialize>(&self, payload: &P) -> SyncResult<bool> {
        let payload = serde_json::to_value(payload)?;
        self.broadcast(payload).await
    }

    /// Recreates the channel now. `Ok(false)` when nothing is subscribed.
    pub async fn reconnect_now(&self) -> SyncResult<bool> {
        self.request(|reply| AgentCommand::ReconnectNow { reply })
            .await
    }

    /// Last published status (may trail queued signals).
    pub fn status(&self) -> SyncStatus {
        self.status_rx.borrow().clone()
    }

    /// Status after every queued signal has been handled.
    pub async fn current_status(&self) -> SyncResult<SyncStatus> {
        self.request(|reply| AgentCommand::Status { reply })
            .await
    }

    /// Receiver that changes whenever the status does.
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }

    /// Unsubscribes and stops the agent.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.request(|reply| AgentCommand::Shutdown { reply })
            .await
    }

    /// Returns true while the agent task is alive.
    pub fn is_running(&self) -> bool {
        !self.command_tx.is_closed()
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> AgentCommand,
    ) -> SyncResult<R> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        reply_rx.await.map_err(|_| SyncError::ShuttingDown)
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating a [`SyncAgent`] with options.
pub struct SyncAgentBuilder {
    config: SyncConfig,
    listener: Option<Arc<dyn SyncListener>>,
}

impl SyncAgentBuilder {
    pub fn new(config: SyncConfig) -> Self {
        SyncAgentBuilder {
            config,
            listener: None,
        }
    }

    /// Sets the consumer callbacks.
    pub fn with_listener(mut self, listener: Arc<dyn SyncListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Validates the config and builds the agent.
    pub fn build<T: Transport, E: Environment>(
        self,
        transport: T,
        environment: E,
    ) -> SyncResult<(SyncAgent<T, E>, SyncAgentHandle)> {
        let listener = self.listener.unwrap_or_else(|| Arc::new(NoOpListener));
        let manager = SyncManager::new(self.config, transport, environment, listener)?;
        Ok(SyncAgent::new(manager))
    }

    /// Builds the agent and spawns it on the current runtime.
    pub fn spawn<T: Transport, E: Environment>(
        self,
        transport: T,
        environment: E,
    ) -> SyncResult<SyncAgentHandle> {
        let (agent, handle) = self.build(transport, environment)?;
        tokio::spawn(agent.run());
        Ok(handle)
    }
}
