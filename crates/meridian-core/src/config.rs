//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Top-level Meridian configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeridianConfig {
    /// Quiet period before a burst of realtime events triggers a refresh.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// How often the host signal pump samples its source.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Root the host probe resolves `sys/` against.
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
    /// Capacity of observer broadcast channels.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_debounce_ms() -> u64 {
    500
}
fn default_poll_interval_ms() -> u64 {
    5_000
}
fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/")
}
fn default_event_capacity() -> usize {
    64
}

impl Default for MeridianConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            sysfs_root: default_sysfs_root(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl MeridianConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// Unparseable values are ignored with a warning and the default is kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(ms) = parse_var(&lookup, "MERIDIAN_DEBOUNCE_MS") {
            config.debounce_ms = ms;
        }
        if let Some(ms) = parse_var(&lookup, "MERIDIAN_POLL_INTERVAL_MS") {
            if ms == 0 {
                warn!("MERIDIAN_POLL_INTERVAL_MS must be positive, keeping default");
            } else {
                config.poll_interval_ms = ms;
            }
        }
        if let Some(root) = lookup("MERIDIAN_SYSFS_ROOT") {
            config.sysfs_root = PathBuf::from(root);
        }
        if let Some(capacity) = parse_var::<usize>(&lookup, "MERIDIAN_EVENT_CAPACITY") {
            config.event_capacity = capacity.max(1);
        }

        config
    }

    /// Load configuration from a JSON file; missing fields take defaults.
    pub fn load(path: &std::path::Path) -> crate::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        if config.poll_interval_ms == 0 {
            return Err(crate::Error::Config(
                "poll_interval_ms must be positive".into(),
            ));
        }
        Ok(config)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}
