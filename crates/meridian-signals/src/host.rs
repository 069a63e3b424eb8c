//! Host signal probe: power, thermal and network state from sysfs.
//!
//! Paths are resolved against a configurable root so the probe can be
//! pointed at a fixture tree. On hosts without these files every field is
//! reported as unknown.

use std::fs;
use std::path::{Path, PathBuf};

use meridian_core::MeridianConfig;
use meridian_policy::{SignalUpdate, ThermalLevel};
use tracing::debug;

use crate::SignalSource;

/// Battery charge at or below which a discharging battery counts as power saving.
const LOW_BATTERY_PERCENT: u32 = 20;

/// Thermal zone temperatures (millidegrees Celsius) at which each level starts.
const FAIR_MILLI_C: i64 = 70_000;
const SERIOUS_MILLI_C: i64 = 80_000;
const CRITICAL_MILLI_C: i64 = 90_000;

/// Interface name prefixes of metered (cellular/tethered) links.
const METERED_PREFIXES: &[&str] = &["wwan", "rmnet", "ppp", "usb", "ccmni"];

/// Reads runtime signals from a Linux sysfs tree.
pub struct HostSignalSource {
    root: PathBuf,
}

impl HostSignalSource {
    /// Probe the live system.
    pub fn discover() -> Self {
        Self::with_root("/")
    }

    /// Probe a tree rooted at `root` (expects `root/sys/...`).
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn from_config(config: &MeridianConfig) -> Self {
        Self::with_root(&config.sysfs_root)
    }

    fn sys(&self, rel: &str) -> PathBuf {
        self.root.join("sys").join(rel)
    }

    /// Power saving: an explicit low-power platform profile, or a battery
    /// that is discharging and low.
    fn power_saving(&self) -> Option<bool> {
        let mut observed = false;

        if let Some(profile) = read_trimmed(&self.sys("firmware/acpi/platform_profile")) {
            observed = true;
            if matches!(profile.as_str(), "low-power" | "quiet" | "cool") {
                return Some(true);
            }
        }

        for supply in list_dir(&self.sys("class/power_supply")) {
            if read_trimmed(&supply.join("type")).as_deref() != Some("Battery") {
                continue;
            }
            observed = true;
            let discharging = read_trimmed(&supply.join("status")).as_deref() == Some("Discharging");
            let capacity = read_trimmed(&supply.join("capacity")).and_then(|c| c.parse::<u32>().ok());
            if discharging && capacity.is_some_and(|c| c <= LOW_BATTERY_PERCENT) {
                return Some(true);
            }
        }

        observed.then_some(false)
    }

    /// Thermal level from the hottest thermal zone.
    fn thermal_level(&self) -> Option<ThermalLevel> {
        let hottest = list_dir(&self.sys("class/thermal"))
            .into_iter()
            .filter(|zone| {
                zone.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("thermal_zone"))
            })
            .filter_map(|zone| read_trimmed(&zone.join("temp")))
            .filter_map(|temp| temp.parse::<i64>().ok())
            .max()?;

        Some(thermal_level_for(hottest))
    }

    /// Network reachability and cost from interface operstate.
    fn network(&self) -> (Option<bool>, Option<bool>) {
        let interfaces = list_dir(&self.sys("class/net"));
        if interfaces.is_empty() {
            return (None, None);
        }

        let up: Vec<String> = interfaces
            .iter()
            .filter_map(|iface| {
                let name = iface.file_name()?.to_str()?.to_string();
                if name == "lo" {
                    return None;
                }
                let state = read_trimmed(&iface.join("operstate"))?;
                (state == "up").then_some(name)
            })
            .collect();

        let available = !up.is_empty();
        let expensive = available
            && up
                .iter()
                .all(|name| METERED_PREFIXES.iter().any(|p| name.starts_with(p)));
        (Some(available), Some(expensive))
    }
}

impl SignalSource for HostSignalSource {
    fn name(&self) -> &'static str {
        "host"
    }

    fn sample(&self) -> SignalUpdate {
        let (network_available, network_expensive) = self.network();
        let update = SignalUpdate {
            power_saving_enabled: self.power_saving(),
            thermal_level: self.thermal_level(),
            // No portable data-saver indicator on Linux hosts.
            data_saving_enabled: None,
            network_expensive,
            network_available,
        };
        debug!("Host signals from {}: {:?}", self.root.display(), update);
        update
    }
}

fn thermal_level_for(milli_c: i64) -> ThermalLevel {
    if milli_c >= CRITICAL_MILLI_C {
        ThermalLevel::Critical
    } else if milli_c >= SERIOUS_MILLI_C {
        ThermalLevel::Serious
    } else if milli_c >= FAIR_MILLI_C {
        ThermalLevel::Fair
    } else {
        ThermalLevel::Nominal
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn list_dir(path: &Path) -> Vec<PathBuf> {
    match fs::read_dir(path) {
        Ok(entries) => {
            let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
            paths.sort();
            paths
        }
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_empty_tree_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = HostSignalSource::with_root(dir.path());
        assert!(source.sample().is_empty());
    }

    #[test]
    fn test_low_battery_discharging() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "sys/class/power_supply/BAT0/type", "Battery\n");
        write(dir.path(), "sys/class/power_supply/BAT0/status", "Discharging\n");
        write(dir.path(), "sys/class/power_supply/BAT0/capacity", "15\n");

        let source = HostSignalSource::with_root(dir.path());
        assert_eq!(source.sample().power_saving_enabled, Some(true));
    }

    #[test]
    fn test_charging_battery_is_not_power_saving() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "sys/class/power_supply/BAT0/type", "Battery\n");
        write(dir.path(), "sys/class/power_supply/BAT0/status", "Charging\n");
        write(dir.path(), "sys/class/power_supply/BAT0/capacity", "5\n");
        write(dir.path(), "sys/class/power_supply/AC/type", "Mains\n");

        let source = HostSignalSource::with_root(dir.path());
        assert_eq!(source.sample().power_saving_enabled, Some(false));
    }

    #[test]
    fn test_low_power_profile() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "sys/firmware/acpi/platform_profile", "low-power\n");

        let source = HostSignalSource::with_root(dir.path());
        assert_eq!(source.sample().power_saving_enabled, Some(true));
    }

    #[test]
    fn test_hottest_zone_wins() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "sys/class/thermal/thermal_zone0/temp", "45000\n");
        write(dir.path(), "sys/class/thermal/thermal_zone1/temp", "83500\n");
        write(dir.path(), "sys/class/thermal/cooling_device0/cur_state", "3\n");

        let source = HostSignalSource::with_root(dir.path());
        assert_eq!(source.sample().thermal_level, Some(ThermalLevel::Serious));
    }

    #[test]
    fn test_thermal_thresholds() {
        assert_eq!(thermal_level_for(20_000), ThermalLevel::Nominal);
        assert_eq!(thermal_level_for(70_000), ThermalLevel::Fair);
        assert_eq!(thermal_level_for(80_000), ThermalLevel::Serious);
        assert_eq!(thermal_level_for(95_000), ThermalLevel::Critical);
    }

    #[test]
    fn test_network_states() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "sys/class/net/lo/operstate", "unknown\n");
        write(dir.path(), "sys/class/net/wlan0/operstate", "down\n");
        write(dir.path(), "sys/class/net/wwan0/operstate", "up\n");

        let source = HostSignalSource::with_root(dir.path());
        let update = source.sample();
        assert_eq!(update.network_available, Some(true));
        assert_eq!(update.network_expensive, Some(true));

        write(dir.path(), "sys/class/net/wlan0/operstate", "up\n");
        let update = source.sample();
        assert_eq!(update.network_expensive, Some(false));

        write(dir.path(), "sys/class/net/wlan0/operstate", "down\n");
        write(dir.path(), "sys/class/net/wwan0/operstate", "down\n");
        let update = source.sample();
        assert_eq!(update.network_available, Some(false));
        assert_eq!(update.network_expensive, Some(false));
    }
}
