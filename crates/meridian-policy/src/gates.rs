//! Feature gates derived from the policy level.

use std::time::Duration;

use serde::Serialize;

use crate::types::{PolicyLevel, PolicySignalSnapshot};

/// Sync cadence at `Normal` on an unmetered network.
pub const SYNC_INTERVAL_NORMAL_SECS: u64 = 15;
/// Sync cadence at `Normal` on a metered network.
pub const SYNC_INTERVAL_EXPENSIVE_SECS: u64 = 25;
pub const SYNC_INTERVAL_CONSTRAINED_SECS: u64 = 45;
pub const SYNC_INTERVAL_CRITICAL_SECS: u64 = 60;

/// Switches and budgets features read instead of raw signals.
///
/// Every gate is a total function of the level and the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureGates {
    /// Live channels (websockets, push listeners) may be held open.
    #[serde(rename = "realtimeEnabled")]
    pub realtime_enabled: bool,
    /// Seconds between background syncs.
    #[serde(rename = "syncIntervalSeconds")]
    pub sync_interval_seconds: u64,
}

impl FeatureGates {
    pub fn derive(level: PolicyLevel, snapshot: &PolicySignalSnapshot) -> Self {
        Self {
            realtime_enabled: realtime_enabled(level, snapshot),
            sync_interval_seconds: sync_interval_seconds(level, snapshot.network_expensive),
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_seconds)
    }
}

fn realtime_enabled(level: PolicyLevel, snapshot: &PolicySignalSnapshot) -> bool {
    level == PolicyLevel::Normal && snapshot.network_available
}

fn sync_interval_seconds(level: PolicyLevel, network_expensive: bool) -> u64 {
    match level {
        PolicyLevel::Normal if network_expensive => SYNC_INTERVAL_EXPENSIVE_SECS,
        PolicyLevel::Normal => SYNC_INTERVAL_NORMAL_SECS,
        PolicyLevel::Constrained => SYNC_INTERVAL_CONSTRAINED_SECS,
        PolicyLevel::Critical => SYNC_INTERVAL_CRITICAL_SECS,
    }
}
