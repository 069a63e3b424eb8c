//! Signal pump: polls a source and forwards changes to the coordinator.

use std::sync::Arc;
use std::time::Duration;

use meridian_core::MeridianConfig;
use meridian_policy::{PolicyCoordinator, SignalUpdate};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{HostSignalSource, SignalSource};

/// Shortest polling interval; `tokio::time::interval` rejects zero.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Periodically samples a [`SignalSource`] on a background task.
///
/// Only fields whose sampled value changed since the previous sample are
/// forwarded, so a steady host produces no coordinator updates. Dropping the
/// pump stops polling.
pub struct SignalPump {
    handle: JoinHandle<()>,
}

impl SignalPump {
    /// Start polling `source` every `interval`. The first sample is taken
    /// immediately. Intervals below [`MIN_INTERVAL`] are raised to it.
    pub fn spawn(
        source: Arc<dyn SignalSource>,
        coordinator: Arc<PolicyCoordinator>,
        interval: Duration,
    ) -> Self {
        let interval = if interval < MIN_INTERVAL {
            warn!(
                "SignalPump interval {}ms too short, using {}ms",
                interval.as_millis(),
                MIN_INTERVAL.as_millis()
            );
            MIN_INTERVAL
        } else {
            interval
        };
        info!(
            "SignalPump started: source={}, interval={}ms",
            source.name(),
            interval.as_millis()
        );
        let handle = tokio::spawn(pump_loop(source, coordinator, interval));
        Self { handle }
    }

    /// Poll the host probe described by `config`.
    pub fn for_host(config: &MeridianConfig, coordinator: Arc<PolicyCoordinator>) -> Self {
        Self::spawn(
            Arc::new(HostSignalSource::from_config(config)),
            coordinator,
            config.poll_interval(),
        )
    }

    /// Stop polling.
    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for SignalPump {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn pump_loop(
    source: Arc<dyn SignalSource>,
    coordinator: Arc<PolicyCoordinator>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = SignalUpdate::default();

    loop {
        ticker.tick().await;

        let sampler = Arc::clone(&source);
        let sample = match tokio::task::spawn_blocking(move || sampler.sample()).await {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Signal source {} failed to sample: {}", source.name(), e);
                continue;
            }
        };

        let delta = changed_fields(&last, &sample);
        last = sample;
        if delta.is_empty() {
            continue;
        }

        debug!("SignalPump forwarding {:?}", delta);
        let _ = coordinator.update_signal(delta);
    }
}

/// Fields present in `next` whose value differs from `previous`.
pub fn changed_fields(previous: &SignalUpdate, next: &SignalUpdate) -> SignalUpdate {
    fn pick<T: PartialEq + Copy>(before: Option<T>, now: Option<T>) -> Option<T> {
        match now {
            Some(value) if before != Some(value) => Some(value),
            _ => None,
        }
    }
    SignalUpdate {
        power_saving_enabled: pick(previous.power_saving_enabled, next.power_saving_enabled),
        thermal_level: pick(previous.thermal_level, next.thermal_level),
        data_saving_enabled: pick(previous.data_saving_enabled, next.data_saving_enabled),
        network_expensive: pick(previous.network_expensive, next.network_expensive),
        network_available: pick(previous.network_available, next.network_available),
    }
}
