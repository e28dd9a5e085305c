//! # Tether Sync Demo
//!
//! Two devices of one account share a [`MemoryHub`]. The demo publishes a
//! row change, sends a broadcast, breaks the channel and brings the phone
//! back online, logging what each device's stores would do.
//!
//! ```text
//! RUST_LOG=tether_sync=debug cargo run -p tether-sync-demo
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tether_core::{ChangeType, ChannelStatus, SyncEvent, WatchSpec};
use tether_sync::{
    Diagnostic, ManualEnvironment, MemoryHub, SyncAgentBuilder, SyncAgentHandle, SyncConfig,
    SyncListener,
};

const OWNER: &str = "user-1";

/// Application broadcast telling other devices which store to refetch.
#[derive(Debug, Serialize, Deserialize)]
struct StoreRefresh {
    store: String,
}

/// Stands in for the app's stores: logs what would be refetched.
struct StoreLog {
    device: &'static str,
}

impl SyncListener for StoreLog {
    fn on_event(&self, event: SyncEvent) {
        match &event {
            SyncEvent::RowChange {
                resource_name,
                change_type,
            } => info!(device = self.device, resource = %resource_name, %change_type, "Refetch"),
            SyncEvent::Broadcast { .. } => match event.broadcast_as::<StoreRefresh>() {
                Ok(Some(refresh)) => info!(device = self.device, store = %refresh.store, "Refetch"),
                Ok(None) => {}
                Err(e) => warn!(device = self.device, error = %e, "Unreadable broadcast"),
            },
        }
    }

    fn on_reconnect(&self) {
        info!(device = self.device, "Refetch all visible stores");
    }

    fn on_diagnostic(&self, diagnostic: &Diagnostic) {
        if let Diagnostic::ReconnectScheduled { attempt, delay } = diagnostic {
            info!(
                device = self.device,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting soon"
            );
        }
    }
}

fn spawn_device(
    device: &'static str,
    config: &SyncConfig,
    hub: &MemoryHub,
    env: ManualEnvironment,
) -> anyhow::Result<SyncAgentHandle> {
    let handle = SyncAgentBuilder::new(config.clone())
        .with_listener(Arc::new(StoreLog { device }))
        .spawn(hub.transport(), env)?;
    Ok(handle)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut config = SyncConfig::load_or_default(None);
    if config.watch.is_empty() {
        config = config
            .with_watch(WatchSpec::new("items", "owner_id=eq.${ownerId}"))
            .with_watch(WatchSpec::new("notes", "owner_id=eq.${ownerId}"));
    }
    config.validate()?;
    let retry_wait = config.reconnect.base_delay() + Duration::from_millis(100);

    let hub = MemoryHub::new();
    let phone_env = ManualEnvironment::new();
    let laptop = spawn_device("laptop", &config, &hub, ManualEnvironment::new())?;
    let phone = spawn_device("phone", &config, &hub, phone_env.clone())?;

    laptop.subscribe(OWNER).await?;
    phone.subscribe(OWNER).await?;
    laptop.current_status().await?;
    phone.current_status().await?;

    info!("--- a row changes on the server");
    hub.publish_row_change(
        "items",
        ChangeType::Update,
        &serde_json::json!({ "id": 7, "owner_id": OWNER }),
    );

    info!("--- the laptop tells its other devices to refresh settings");
    laptop
        .broadcast_json(&StoreRefresh {
            store: "settings".into(),
        })
        .await?;
    phone.current_status().await?;

    info!("--- the server drops the channel");
    let channel = laptop.status().channel.unwrap_or_default();
    hub.fail_channel(&channel, ChannelStatus::Errored);
    tokio::time::sleep(retry_wait).await;

    info!("--- the phone's network comes back");
    phone_env.go_online();

    for (device, handle) in [("laptop", &laptop), ("phone", &phone)] {
        let status = handle.current_status().await?;
        info!(
            device,
            state = ?status.state,
            attempts = status.reconnect_attempts,
            "Final status"
        );
    }

    laptop.shutdown().await?;
    phone.shutdown().await?;
    Ok(())
}
