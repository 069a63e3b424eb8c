//! Policy coordinator: owns the signal snapshot and publishes decisions.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info};

use crate::gates::FeatureGates;
use crate::types::*;

/// Default observer channel capacity.
const DEFAULT_CAPACITY: usize = 64;

struct Inner {
    decision: PolicyDecision,
}

/// Aggregates runtime signals into a single policy decision.
///
/// The snapshot is only ever replaced through [`update_signal`]; readers get
/// copies. Each update is merged, re-derived, and published to observers
/// while the lock is held, so observers see decisions in update order.
///
/// [`update_signal`]: PolicyCoordinator::update_signal
pub struct PolicyCoordinator {
    inner: Mutex<Inner>,
    tx: broadcast::Sender<PolicyDecision>,
}

impl PolicyCoordinator {
    /// Create a coordinator starting from the least-restrictive snapshot.
    pub fn new() -> Self {
        Self::with_snapshot(PolicySignalSnapshot::default(), DEFAULT_CAPACITY)
    }

    /// Create a coordinator with an initial snapshot and observer capacity.
    pub fn with_snapshot(snapshot: PolicySignalSnapshot, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let decision = PolicyDecision::derive(snapshot, 0);
        info!(
            "PolicyCoordinator initialized: level={}, realtime={}, sync={}s",
            decision.level, decision.gates.realtime_enabled, decision.gates.sync_interval_seconds
        );
        Self {
            inner: Mutex::new(Inner { decision }),
            tx,
        }
    }

    /// Merge a partial snapshot and recompute the decision.
    ///
    /// Observers are notified exactly once per call, however many fields
    /// changed (including none).
    pub fn update_signal(&self, update: SignalUpdate) -> PolicyDecision {
        let mut inner = self.inner.lock();
        let previous = inner.decision.level;
        let snapshot = inner.decision.snapshot.merged(&update);
        let decision = PolicyDecision::derive(snapshot, inner.decision.revision + 1);

        debug!("Policy update rev={}: {:?}", decision.revision, update);
        if decision.level != previous {
            info!(
                "Policy level {} -> {} (thermal={}, power_saving={}, data_saving={})",
                previous,
                decision.level,
                snapshot.thermal_level,
                snapshot.power_saving_enabled,
                snapshot.data_saving_enabled
            );
        }

        inner.decision = decision.clone();
        let _ = self.tx.send(decision.clone());
        decision
    }

    pub fn current_policy_level(&self) -> PolicyLevel {
        self.inner.lock().decision.level
    }

    pub fn snapshot(&self) -> PolicySignalSnapshot {
        self.inner.lock().decision.snapshot
    }

    pub fn gates(&self) -> FeatureGates {
        self.inner.lock().decision.gates
    }

    pub fn decision(&self) -> PolicyDecision {
        self.inner.lock().decision.clone()
    }

    pub fn realtime_enabled(&self) -> bool {
        self.gates().realtime_enabled
    }

    pub fn sync_interval(&self) -> Duration {
        self.gates().sync_interval()
    }

    /// Subscribe to decisions published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<PolicyDecision> {
        self.tx.subscribe()
    }

    /// Decisions as a stream. A lagging consumer skips to the newest
    /// decisions rather than erroring.
    pub fn changes(&self) -> impl Stream<Item = PolicyDecision> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|item| item.ok())
    }

    /// Number of live observers.
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for PolicyCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_initial_state() {
        let coordinator = PolicyCoordinator::new();
        assert_eq!(coordinator.current_policy_level(), PolicyLevel::Normal);
        assert!(coordinator.realtime_enabled());
        assert_eq!(coordinator.sync_interval(), Duration::from_secs(15));
        assert_eq!(coordinator.decision().revision, 0);
    }

    #[test]
    fn test_single_notification_per_update() {
        let coordinator = PolicyCoordinator::new();
        let mut rx = coordinator.subscribe();

        let decision = coordinator.update_signal(
            SignalUpdate::default()
                .power_saving(true)
                .data_saving(true)
                .network_expensive(true),
        );

        let received = rx.try_recv().unwrap();
        assert_eq!(received, decision);
        assert_eq!(received.revision, 1);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_repeated_value_still_notifies_once() {
        let coordinator = PolicyCoordinator::new();
        let mut rx = coordinator.subscribe();

        coordinator.update_signal(SignalUpdate::default().power_saving(true));
        coordinator.update_signal(SignalUpdate::default().power_saving(true));

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.snapshot, second.snapshot);
        assert_eq!(second.revision, first.revision + 1);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_thermal_dominates_saving_modes() {
        let coordinator = PolicyCoordinator::new();
        coordinator.update_signal(SignalUpdate::default().power_saving(true));
        assert_eq!(coordinator.current_policy_level(), PolicyLevel::Constrained);

        coordinator.update_signal(SignalUpdate::default().thermal(ThermalLevel::Serious));
        assert_eq!(coordinator.current_policy_level(), PolicyLevel::Critical);
        assert_eq!(coordinator.gates().sync_interval_seconds, 60);

        coordinator.update_signal(SignalUpdate::default().thermal(ThermalLevel::Fair));
        assert_eq!(coordinator.current_policy_level(), PolicyLevel::Constrained);
    }

    #[test]
    fn test_updates_in_any_order_converge() {
        let a = PolicyCoordinator::new();
        let b = PolicyCoordinator::new();
        let thermal = SignalUpdate::default().thermal(ThermalLevel::Fair);
        let network = SignalUpdate::default().network_available(false);

        a.update_signal(thermal);
        a.update_signal(network);
        b.update_signal(network);
        b.update_signal(thermal);

        assert_eq!(a.snapshot(), b.snapshot());
        assert_eq!(a.gates(), b.gates());
    }

    #[test]
    fn test_power_saving_scenario() {
        let coordinator = PolicyCoordinator::new();
        let decision = coordinator.update_signal(
            SignalUpdate::default()
                .thermal(ThermalLevel::Nominal)
                .power_saving(true)
                .data_saving(false)
                .network_expensive(false)
                .network_available(true),
        );
        assert_eq!(decision.level, PolicyLevel::Constrained);
        assert!(!decision.gates.realtime_enabled);
        assert_eq!(decision.gates.sync_interval_seconds, 45);
    }

    #[tokio::test]
    async fn test_changes_stream() {
        let coordinator = PolicyCoordinator::new();
        let changes = coordinator.changes();
        tokio::pin!(changes);
        assert_eq!(coordinator.observer_count(), 1);

        coordinator.update_signal(SignalUpdate::default().network_available(false));
        let decision = changes.next().await.unwrap();
        assert!(!decision.gates.realtime_enabled);
    }
}
