//! # Sync Configuration
//!
//! Configuration management for the sync manager.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TETHER_CHANNEL_PREFIX=user-sync                                    │
//! │     TETHER_POLL_INTERVAL_SECS=120                                      │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tether/sync.toml (Linux)                                 │
//! │     ~/Library/Application Support/dev.tether.tether/sync.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     prefix "sync", 1s → 5min backoff, 60s staleness, 5min polling      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [channel]
//! prefix = "sync"
//! broadcast_event = "sync"
//!
//! [[watch]]
//! resource_name = "items"
//! filter_template = "owner_id=eq.${ownerId}"
//!
//! [reconnect]
//! base_delay_ms = 1000
//! max_delay_ms = 300000
//!
//! [recovery]
//! staleness_threshold_secs = 60
//! poll_interval_secs = 300
//! ```
//!
//! The configuration is wrapped in an `Arc` when handed to the manager and
//! never changes afterwards.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tether_core::validation::validate_channel_prefix;
use tether_core::WatchSpec;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Channel Settings
// =============================================================================

/// Naming of the per-owner channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Channel name prefix; the full name is `"{prefix}:{owner_id}"`.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Event name of the application broadcast stream.
    #[serde(default = "default_broadcast_event")]
    pub broadcast_event: String,
}

fn default_prefix() -> String {
    "sync".to_string()
}

fn default_broadcast_event() -> String {
    "sync".to_string()
}

impl Default for ChannelSettings {
    fn default() -> Self {
        ChannelSettings {
            prefix: default_prefix(),
            broadcast_event: default_broadcast_event(),
        }
    }
}

// =============================================================================
// Reconnect Settings
// =============================================================================

/// Exponential backoff bounds.
///
/// delay = min(base × 2^attempts, max), repeated at `max` forever.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Delay before the first retry (milliseconds).
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Ceiling for the retry delay (milliseconds).
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_base_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    300_000
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        ReconnectSettings {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl ReconnectSettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

// =============================================================================
// Recovery Settings
// =============================================================================

/// Foreground recovery and polling safety net.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySettings {
    /// Background time after which the channel is assumed dead (seconds).
    #[serde(default = "default_staleness_threshold")]
    pub staleness_threshold_secs: u64,

    /// Interval of the unconditional `on_reconnect` poll (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_staleness_threshold() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    300
}

impl Default for RecoverySettings {
    fn default() -> Self {
        RecoverySettings {
            staleness_threshold_secs: default_staleness_threshold(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Channel naming.
    #[serde(default)]
    pub channel: ChannelSettings,

    /// Row-change feeds to listen to.
    #[serde(default)]
    pub watch: Vec<WatchSpec>,

    /// Backoff bounds.
    #[serde(default)]
    pub reconnect: ReconnectSettings,

    /// Foreground recovery and polling.
    #[serde(default)]
    pub recovery: RecoverySettings,
}

impl SyncConfig {
    /// Creates a config with defaults and the given channel prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        SyncConfig {
            channel: ChannelSettings {
                prefix: prefix.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Adds a watched resource.
    pub fn with_watch(mut self, spec: WatchSpec) -> Self {
        self.watch.push(spec);
        self
    }

    /// Sets the broadcast event name.
    pub fn with_broadcast_event(mut self, event: impl Into<String>) -> Self {
        self.channel.broadcast_event = event.into();
        self
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        validate_channel_prefix(&self.channel.prefix)?;

        if self.channel.broadcast_event.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "broadcast_event must not be empty".into(),
            ));
        }

        if self.reconnect.base_delay_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "base_delay_ms must be greater than 0".into(),
            ));
        }

        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(SyncError::InvalidConfig(format!(
                "max_delay_ms ({}) must be at least base_delay_ms ({})",
                self.reconnect.max_delay_ms, self.reconnect.base_delay_ms
            )));
        }

        if self.recovery.staleness_threshold_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "staleness_threshold_secs must be greater than 0".into(),
            ));
        }

        if self.recovery.poll_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "poll_interval_secs must be greater than 0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for spec in &self.watch {
            spec.validate()?;
            if !seen.insert(spec.resource_name.as_str()) {
                return Err(tether_core::ValidationError::Duplicate {
                    field: "resource_name".into(),
                    value: spec.resource_name.clone(),
                }
                .into());
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key/value source.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(prefix) = lookup("TETHER_CHANNEL_PREFIX") {
            debug!(prefix = %prefix, "Overriding channel prefix from environment");
            self.channel.prefix = prefix;
        }

        if let Some(event) = lookup("TETHER_BROADCAST_EVENT") {
            self.channel.broadcast_event = event;
        }

        if let Some(ms) = lookup("TETHER_RECONNECT_BASE_MS") {
            match ms.parse::<u64>() {
                Ok(v) => self.reconnect.base_delay_ms = v,
                Err(_) => warn!(value = %ms, "Ignoring invalid TETHER_RECONNECT_BASE_MS"),
            }
        }

        if let Some(ms) = lookup("TETHER_RECONNECT_MAX_MS") {
            match ms.parse::<u64>() {
                Ok(v) => self.reconnect.max_delay_ms = v,
                Err(_) => warn!(value = %ms, "Ignoring invalid TETHER_RECONNECT_MAX_MS"),
            }
        }

        if let Some(secs) = lookup("TETHER_STALENESS_SECS") {
            match secs.parse::<u64>() {
                Ok(v) => self.recovery.staleness_threshold_secs = v,
                Err(_) => warn!(value = %secs, "Ignoring invalid TETHER_STALENESS_SECS"),
            }
        }

        if let Some(secs) = lookup("TETHER_POLL_INTERVAL_SECS") {
            match secs.parse::<u64>() {
                Ok(v) => {
                    debug!(secs = v, "Overriding poll interval from environment");
                    self.recovery.poll_interval_secs = v;
                }
                Err(_) => warn!(value = %secs, "Ignoring invalid TETHER_POLL_INTERVAL_SECS"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "tether", "tether")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the channel prefix.
    pub fn channel_prefix(&self) -> &str {
        &self.channel.prefix
    }

    /// Returns the broadcast event name.
    pub fn broadcast_event(&self) -> &str {
        &self.channel.broadcast_event
    }

    /// Returns true if `resource_name` has a watch spec.
    pub fn watches(&self, resource_name: &str) -> bool {
        self.watch.iter().any(|w| w.resource_name == resource_name)
    }

    /// Returns the staleness threshold.
    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.recovery.staleness_threshold_secs)
    }

    /// Returns the polling interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.recovery.poll_interval_secs)
    }
}
