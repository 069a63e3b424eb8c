//! Signal snapshot, partial updates, and the derived policy level.

use serde::{Deserialize, Serialize};

use crate::gates::FeatureGates;

/// Device thermal pressure as reported by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermalLevel {
    #[default]
    Nominal,
    Fair,
    Serious,
    Critical,
}

impl ThermalLevel {
    pub fn all() -> &'static [ThermalLevel] {
        &[Self::Nominal, Self::Fair, Self::Serious, Self::Critical]
    }

    /// Parse a platform-reported thermal state.
    ///
    /// Unknown values map to `Nominal` so a misreporting sensor never pins
    /// the device in a degraded policy.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fair" | "light" | "moderate" => Self::Fair,
            "serious" | "severe" => Self::Serious,
            "critical" | "emergency" | "shutdown" => Self::Critical,
            _ => Self::Nominal,
        }
    }

    /// Whether the platform is asking apps to shed work.
    pub fn is_throttling(self) -> bool {
        matches!(self, Self::Serious | Self::Critical)
    }
}

impl std::fmt::Display for ThermalLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nominal => write!(f, "nominal"),
            Self::Fair => write!(f, "fair"),
            Self::Serious => write!(f, "serious"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Aggregated policy level. Ordered from least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyLevel {
    Normal,
    Constrained,
    Critical,
}

impl std::fmt::Display for PolicyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Constrained => write!(f, "constrained"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Current value of every monitored runtime signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicySignalSnapshot {
    #[serde(rename = "powerSavingEnabled")]
    pub power_saving_enabled: bool,
    #[serde(rename = "thermalLevel")]
    pub thermal_level: ThermalLevel,
    #[serde(rename = "dataSavingEnabled")]
    pub data_saving_enabled: bool,
    #[serde(rename = "networkExpensive")]
    pub network_expensive: bool,
    #[serde(rename = "networkAvailable")]
    pub network_available: bool,
}

impl Default for PolicySignalSnapshot {
    /// The least-restrictive snapshot: what the app assumes before any
    /// sensor has reported.
    fn default() -> Self {
        Self {
            power_saving_enabled: false,
            thermal_level: ThermalLevel::Nominal,
            data_saving_enabled: false,
            network_expensive: false,
            network_available: true,
        }
    }
}

impl PolicySignalSnapshot {
    /// Derive the policy level. First matching rule wins:
    /// thermal throttling, then power or data saving, then normal.
    pub fn level(&self) -> PolicyLevel {
        if self.thermal_level.is_throttling() {
            PolicyLevel::Critical
        } else if self.power_saving_enabled || self.data_saving_enabled {
            PolicyLevel::Constrained
        } else {
            PolicyLevel::Normal
        }
    }

    /// Return a copy with the fields present in `update` replaced.
    pub fn merged(&self, update: &SignalUpdate) -> Self {
        Self {
            power_saving_enabled: update
                .power_saving_enabled
                .unwrap_or(self.power_saving_enabled),
            thermal_level: update.thermal_level.unwrap_or(self.thermal_level),
            data_saving_enabled: update
                .data_saving_enabled
                .unwrap_or(self.data_saving_enabled),
            network_expensive: update.network_expensive.unwrap_or(self.network_expensive),
            network_available: update.network_available.unwrap_or(self.network_available),
        }
    }

    /// Fields of `self` that differ from `previous`, as an update.
    pub fn diff(&self, previous: &PolicySignalSnapshot) -> SignalUpdate {
        fn changed<T: PartialEq + Copy>(now: T, before: T) -> Option<T> {
            (now != before).then_some(now)
        }
        SignalUpdate {
            power_saving_enabled: changed(self.power_saving_enabled, previous.power_saving_enabled),
            thermal_level: changed(self.thermal_level, previous.thermal_level),
            data_saving_enabled: changed(self.data_saving_enabled, previous.data_saving_enabled),
            network_expensive: changed(self.network_expensive, previous.network_expensive),
            network_available: changed(self.network_available, previous.network_available),
        }
    }
}

/// Partial snapshot pushed by a signal source. `None` leaves a field as is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalUpdate {
    #[serde(default, rename = "powerSavingEnabled", skip_serializing_if = "Option::is_none")]
    pub power_saving_enabled: Option<bool>,
    #[serde(default, rename = "thermalLevel", skip_serializing_if = "Option::is_none")]
    pub thermal_level: Option<ThermalLevel>,
    #[serde(default, rename = "dataSavingEnabled", skip_serializing_if = "Option::is_none")]
    pub data_saving_enabled: Option<bool>,
    #[serde(default, rename = "networkExpensive", skip_serializing_if = "Option::is_none")]
    pub network_expensive: Option<bool>,
    #[serde(default, rename = "networkAvailable", skip_serializing_if = "Option::is_none")]
    pub network_available: Option<bool>,
}

impl SignalUpdate {
    pub fn power_saving(mut self, enabled: bool) -> Self {
        self.power_saving_enabled = Some(enabled);
        self
    }

    pub fn thermal(mut self, level: ThermalLevel) -> Self {
        self.thermal_level = Some(level);
        self
    }

    pub fn data_saving(mut self, enabled: bool) -> Self {
        self.data_saving_enabled = Some(enabled);
        self
    }

    pub fn network_expensive(mut self, expensive: bool) -> Self {
        self.network_expensive = Some(expensive);
        self
    }

    pub fn network_available(mut self, available: bool) -> Self {
        self.network_available = Some(available);
        self
    }

    /// True when the update carries no fields.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Everything an observer needs after one signal update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyDecision {
    pub snapshot: PolicySignalSnapshot,
    pub level: PolicyLevel,
    pub gates: FeatureGates,
    /// Incremented once per coordinator update.
    pub revision: u64,
    #[serde(rename = "computedAt")]
    pub computed_at: chrono::DateTime<chrono::Utc>,
}

impl PolicyDecision {
    pub(crate) fn derive(snapshot: PolicySignalSnapshot, revision: u64) -> Self {
        let level = snapshot.level();
        Self {
            snapshot,
            level,
            gates: FeatureGates::derive(level, &snapshot),
            revision,
            computed_at: chrono::Utc::now(),
        }
    }
}
