//! End-to-end scenarios for the friends orchestrator against in-memory
//! adapter and realtime fakes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use meridian_core::{MeridianConfig, Registry};
use meridian_policy::{PolicyCoordinator, SignalUpdate, ThermalLevel};
use meridian_runtime::friends::{Friend, FriendRequest, FriendsAdapter, UserId};
use meridian_runtime::keys;
use meridian_runtime::{
    AdapterError, FriendsOrchestrator, LoadState, MutationOutcome, RealtimeChannel, RealtimeEvent,
    RealtimeHandle, RealtimeStart, RefreshOutcome, StateKind, StoreEvent,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

// ---------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------

fn friend(id: UserId) -> Friend {
    Friend {
        id,
        display_name: format!("friend{}", id),
        friends_since: Utc::now(),
    }
}

fn request(id: UserId) -> FriendRequest {
    FriendRequest {
        user_id: id,
        display_name: format!("user{}", id),
        sent_at: Utc::now(),
    }
}

#[derive(Default)]
struct FakeBackend {
    friends: Mutex<Vec<Friend>>,
    incoming: Mutex<Vec<FriendRequest>>,
    outgoing: Mutex<Vec<FriendRequest>>,
    failures: Mutex<HashMap<&'static str, AdapterError>>,
    /// Latencies applied to successive `fetch_friends` calls.
    fetch_latency: Mutex<VecDeque<Duration>>,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeBackend {
    fn seeded() -> Arc<Self> {
        let backend = Self::default();
        *backend.friends.lock() = vec![friend(1), friend(2)];
        *backend.incoming.lock() = vec![request(10)];
        *backend.outgoing.lock() = vec![request(20)];
        Arc::new(backend)
    }

    fn fail(&self, call: &'static str, error: AdapterError) {
        self.failures.lock().insert(call, error);
    }

    fn heal(&self) {
        self.failures.lock().clear();
    }

    fn calls(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }

    fn check(&self, call: &'static str) -> Result<(), AdapterError> {
        self.calls.lock().push(call);
        match self.failures.lock().get(call) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl FriendsAdapter for FakeBackend {
    async fn fetch_friends(&self) -> Result<Vec<Friend>, AdapterError> {
        let snapshot = self.friends.lock().clone();
        let latency = self.fetch_latency.lock().pop_front();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.check("fetch_friends")?;
        Ok(snapshot)
    }

    async fn fetch_incoming_requests(&self) -> Result<Vec<FriendRequest>, AdapterError> {
        self.check("fetch_incoming_requests")?;
        Ok(self.incoming.lock().clone())
    }

    async fn fetch_outgoing_requests(&self) -> Result<Vec<FriendRequest>, AdapterError> {
        self.check("fetch_outgoing_requests")?;
        Ok(self.outgoing.lock().clone())
    }

    async fn remove_friend(&self, _id: UserId) -> Result<(), AdapterError> {
        tokio::task::yield_now().await;
        self.check("remove_friend")
    }

    async fn accept_request(&self, id: UserId) -> Result<Friend, AdapterError> {
        tokio::task::yield_now().await;
        self.check("accept_request")?;
        Ok(friend(id))
    }

    async fn decline_request(&self, _id: UserId) -> Result<(), AdapterError> {
        self.check("decline_request")
    }

    async fn cancel_request(&self, _id: UserId) -> Result<(), AdapterError> {
        self.check("cancel_request")
    }

    async fn send_request(&self, id: UserId) -> Result<FriendRequest, AdapterError> {
        self.check("send_request")?;
        Ok(request(id))
    }
}

#[derive(Default)]
struct FakeChannel {
    senders: Mutex<Vec<mpsc::Sender<RealtimeEvent>>>,
    opened: AtomicUsize,
    released: Arc<AtomicUsize>,
    /// When set, `open` waits for a notification before handing out a handle.
    hold: Mutex<Option<Arc<Notify>>>,
}

impl FakeChannel {
    fn hold_opens(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.hold.lock() = Some(Arc::clone(&gate));
        gate
    }

    fn live(&self) -> usize {
        self.opened.load(Ordering::SeqCst) - self.released.load(Ordering::SeqCst)
    }

    async fn emit(&self, kind: &str) {
        let sender = self.senders.lock().last().cloned();
        if let Some(sender) = sender {
            let _ = sender.send(RealtimeEvent::new("friends", kind)).await;
        }
    }
}

#[async_trait]
impl RealtimeChannel for FakeChannel {
    async fn open(&self, _topic: &str) -> Result<RealtimeHandle, AdapterError> {
        let hold = self.hold.lock().clone();
        if let Some(gate) = hold {
            gate.notified().await;
        }
        let (tx, rx) = mpsc::channel(32);
        self.senders.lock().push(tx);
        self.opened.fetch_add(1, Ordering::SeqCst);
        let released = Arc::clone(&self.released);
        Ok(RealtimeHandle::new(rx).on_release(move || {
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

struct Harness {
    backend: Arc<FakeBackend>,
    channel: Arc<FakeChannel>,
    policy: Arc<PolicyCoordinator>,
    orchestrator: Arc<FriendsOrchestrator>,
}

fn harness() -> Harness {
    let backend = FakeBackend::seeded();
    let channel = Arc::new(FakeChannel::default());
    let policy = Arc::new(PolicyCoordinator::new());
    let config = MeridianConfig {
        debounce_ms: 500,
        ..Default::default()
    };
    let orchestrator = FriendsOrchestrator::new(
        backend.clone(),
        channel.clone(),
        Arc::clone(&policy),
        &config,
    );
    Harness {
        backend,
        channel,
        policy,
        orchestrator,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// ---------------------------------------------------------------
// Refresh
// ---------------------------------------------------------------

#[tokio::test]
async fn test_refresh_loads_all_lists() {
    let h = harness();
    assert_eq!(h.orchestrator.state(), LoadState::Loading);

    assert_eq!(h.orchestrator.refresh().await, Ok(RefreshOutcome::Loaded));

    let data = h.orchestrator.data().unwrap();
    assert_eq!(data.friends.len(), 2);
    assert!(data.has_incoming(10));
    assert!(data.has_outgoing(20));
    assert_eq!(h.orchestrator.state().kind(), StateKind::Loaded);
}

#[tokio::test]
async fn test_first_refresh_failure_has_no_data() {
    let h = harness();
    h.backend
        .fail("fetch_incoming_requests", AdapterError::Network("reset".into()));

    h.orchestrator.refresh().await.unwrap();

    let state = h.orchestrator.state();
    assert_eq!(state.kind(), StateKind::Failed);
    assert_eq!(state.data(), None);
    let presented = h.orchestrator.presented_error().unwrap();
    assert_eq!(
        presented.technical_detail,
        "friends.fetch_incoming_requests: network error: reset"
    );
}

#[tokio::test]
async fn test_refresh_failure_keeps_last_good_data() {
    let h = harness();
    h.orchestrator.refresh().await.unwrap();
    let before = h.orchestrator.data();

    h.backend.fail("fetch_outgoing_requests", AdapterError::Unauthorized);
    h.orchestrator.refresh().await.unwrap();

    assert_eq!(h.orchestrator.state().kind(), StateKind::Failed);
    assert_eq!(h.orchestrator.data(), before);

    h.backend.heal();
    assert_eq!(h.orchestrator.refresh().await, Ok(RefreshOutcome::Loaded));
}

#[tokio::test]
async fn test_refresh_reports_first_failure_in_declaration_order() {
    let h = harness();
    h.backend.fail("fetch_outgoing_requests", AdapterError::Unauthorized);
    h.backend.fail("fetch_friends", AdapterError::Decode("bad json".into()));

    h.orchestrator.refresh().await.unwrap();

    let presented = h.orchestrator.presented_error().unwrap();
    assert!(presented.technical_detail.starts_with("friends.fetch_friends:"));
}

#[tokio::test(start_paused = true)]
async fn test_superseded_refresh_is_discarded() {
    let h = harness();
    h.backend
        .fetch_latency
        .lock()
        .extend([Duration::from_millis(300), Duration::from_millis(10)]);

    let slow = tokio::spawn({
        let orchestrator = Arc::clone(&h.orchestrator);
        async move { orchestrator.refresh().await }
    });
    settle().await;

    h.backend.friends.lock().push(friend(3));
    let fast = h.orchestrator.refresh().await;

    assert_eq!(fast, Ok(RefreshOutcome::Loaded));
    assert_eq!(slow.await.unwrap(), Ok(RefreshOutcome::Superseded));
    assert_eq!(h.orchestrator.data().unwrap().friends.len(), 3);
}

#[tokio::test]
async fn test_first_refresh_notifies_once() {
    let h = harness();
    let mut rx = h.orchestrator.subscribe();

    h.orchestrator.refresh().await.unwrap();

    assert_eq!(
        rx.try_recv().unwrap(),
        StoreEvent::Transitioned {
            from: StateKind::Loading,
            to: StateKind::Loaded,
        }
    );
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_refreshes_notify_once_each_way() {
    let h = harness();
    h.orchestrator.refresh().await.unwrap();
    let mut rx = h.orchestrator.subscribe();
    h.backend
        .fetch_latency
        .lock()
        .extend([Duration::from_millis(300), Duration::from_millis(10)]);

    let slow = tokio::spawn({
        let orchestrator = Arc::clone(&h.orchestrator);
        async move { orchestrator.refresh().await }
    });
    settle().await;
    assert_eq!(h.orchestrator.state().kind(), StateKind::Refreshing);

    assert_eq!(h.orchestrator.refresh().await, Ok(RefreshOutcome::Loaded));
    assert_eq!(slow.await.unwrap(), Ok(RefreshOutcome::Superseded));

    assert_eq!(
        rx.try_recv().unwrap(),
        StoreEvent::Transitioned {
            from: StateKind::Loaded,
            to: StateKind::Refreshing,
        }
    );
    assert_eq!(
        rx.try_recv().unwrap(),
        StoreEvent::Transitioned {
            from: StateKind::Refreshing,
            to: StateKind::Loaded,
        }
    );
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_successful_refresh_clears_refresh_error() {
    let h = harness();
    h.backend.fail("fetch_friends", AdapterError::Network("reset".into()));
    h.orchestrator.refresh().await.unwrap();
    assert!(h.orchestrator.presented_error().is_some());

    h.backend.heal();
    let mut rx = h.orchestrator.subscribe();
    assert_eq!(h.orchestrator.refresh().await, Ok(RefreshOutcome::Loaded));

    assert!(h.orchestrator.presented_error().is_none());
    assert_eq!(
        rx.try_recv().unwrap(),
        StoreEvent::Transitioned {
            from: StateKind::Failed,
            to: StateKind::Refreshing,
        }
    );
    assert_eq!(
        rx.try_recv().unwrap(),
        StoreEvent::Transitioned {
            from: StateKind::Refreshing,
            to: StateKind::Loaded,
        }
    );
    assert_eq!(rx.try_recv().unwrap(), StoreEvent::ErrorDismissed);
}

// ---------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------

#[tokio::test]
async fn test_concurrent_remove_is_rejected() {
    let h = harness();
    h.orchestrator.refresh().await.unwrap();

    let (first, second) = futures::join!(
        h.orchestrator.remove_friend(1),
        h.orchestrator.remove_friend(1)
    );

    assert_eq!(first, MutationOutcome::Applied);
    assert_eq!(second, MutationOutcome::Rejected);
    assert_eq!(h.backend.calls("remove_friend"), 1);
    assert_eq!(h.orchestrator.in_flight_count(), 0);
    assert!(h.orchestrator.data().unwrap().friend(1).is_none());
}

#[tokio::test]
async fn test_mutations_on_different_ids_run_together() {
    let h = harness();
    h.orchestrator.refresh().await.unwrap();

    let (a, b) = futures::join!(
        h.orchestrator.remove_friend(1),
        h.orchestrator.remove_friend(2)
    );

    assert_eq!(a, MutationOutcome::Applied);
    assert_eq!(b, MutationOutcome::Applied);
    assert!(h.orchestrator.data().unwrap().friends.is_empty());
}

#[tokio::test]
async fn test_failed_mutation_only_presents_error() {
    let h = harness();
    h.orchestrator.refresh().await.unwrap();
    let before = h.orchestrator.state();

    h.backend.fail(
        "remove_friend",
        AdapterError::Server {
            status: 500,
            message: "boom".into(),
        },
    );
    let outcome = h.orchestrator.remove_friend(2).await;

    let presented = match outcome {
        MutationOutcome::Failed(presented) => presented,
        other => panic!("expected failure, got {:?}", other),
    };
    assert_eq!(
        presented.technical_detail,
        "friends.remove_friend(id=2): server error 500: boom"
    );
    assert_eq!(h.orchestrator.state(), before);
    assert_eq!(h.orchestrator.presented_error(), Some(presented));
    assert!(!h.orchestrator.is_in_flight(2));

    assert!(h.orchestrator.dismiss_error());
    assert!(h.orchestrator.presented_error().is_none());
}

#[tokio::test]
async fn test_expected_mutation_error_is_swallowed() {
    let h = harness();
    h.orchestrator.refresh().await.unwrap();
    h.backend
        .fail("remove_friend", AdapterError::AlreadyApplied("not friends".into()));

    assert_eq!(h.orchestrator.remove_friend(1).await, MutationOutcome::Swallowed);
    assert!(h.orchestrator.presented_error().is_none());
    assert_eq!(h.orchestrator.state().kind(), StateKind::Loaded);
}

#[tokio::test]
async fn test_request_intents_patch_data() {
    let h = harness();
    h.orchestrator.refresh().await.unwrap();

    assert_eq!(h.orchestrator.accept_request(10).await, MutationOutcome::Applied);
    assert_eq!(h.orchestrator.cancel_request(20).await, MutationOutcome::Applied);
    assert_eq!(h.orchestrator.send_request(30).await, MutationOutcome::Applied);

    let data = h.orchestrator.data().unwrap();
    assert!(data.friend(10).is_some());
    assert!(!data.has_incoming(10));
    assert!(!data.has_outgoing(20));
    assert!(data.has_outgoing(30));
    assert_eq!(h.orchestrator.state().kind(), StateKind::Loaded);

    h.backend.incoming.lock().push(request(11));
    h.orchestrator.refresh().await.unwrap();
    assert_eq!(h.orchestrator.decline_request(11).await, MutationOutcome::Applied);
    assert!(!h.orchestrator.data().unwrap().has_incoming(11));
}

// ---------------------------------------------------------------
// Realtime
// ---------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_start_twice_keeps_one_subscription() {
    let h = harness();

    assert_eq!(h.orchestrator.start_realtime().await, RealtimeStart::Started);
    assert_eq!(h.orchestrator.start_realtime().await, RealtimeStart::Started);
    settle().await;

    assert_eq!(h.channel.opened.load(Ordering::SeqCst), 2);
    assert_eq!(h.channel.live(), 1);
    assert!(h.orchestrator.is_realtime_active());
}

#[tokio::test(start_paused = true)]
async fn test_event_burst_triggers_one_refresh() {
    let h = harness();
    h.orchestrator.refresh().await.unwrap();
    h.orchestrator.start_realtime().await;

    for _ in 0..8 {
        h.channel.emit("request_received").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(h.backend.calls("fetch_friends"), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.backend.calls("fetch_friends"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_start_is_noop_when_gate_closed() {
    let h = harness();
    h.policy
        .update_signal(SignalUpdate::default().power_saving(true));

    assert_eq!(h.orchestrator.start_realtime().await, RealtimeStart::SkippedByPolicy);
    assert_eq!(h.channel.opened.load(Ordering::SeqCst), 0);
    assert!(!h.orchestrator.is_realtime_active());
}

#[tokio::test(start_paused = true)]
async fn test_stop_releases_channel_and_cancels_refresh() {
    let h = harness();
    h.orchestrator.stop_realtime();

    h.orchestrator.refresh().await.unwrap();
    h.orchestrator.start_realtime().await;
    h.channel.emit("friend_removed").await;
    h.orchestrator.stop_realtime();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(h.channel.live(), 0);
    assert_eq!(h.backend.calls("fetch_friends"), 1);
    assert!(!h.orchestrator.is_realtime_active());
}

#[tokio::test(start_paused = true)]
async fn test_follow_policy_pauses_and_resumes_realtime() {
    let h = harness();
    let follower = h.orchestrator.follow_policy();
    h.orchestrator.start_realtime().await;

    h.policy
        .update_signal(SignalUpdate::default().thermal(ThermalLevel::Serious));
    settle().await;
    assert!(!h.orchestrator.is_realtime_active());
    assert_eq!(h.channel.live(), 0);

    h.policy
        .update_signal(SignalUpdate::default().thermal(ThermalLevel::Nominal));
    settle().await;
    assert!(h.orchestrator.is_realtime_active());
    assert_eq!(h.channel.opened.load(Ordering::SeqCst), 2);

    assert!(follower.is_running());
    drop(follower);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_open_releases_new_channel() {
    let h = harness();
    let gate = h.channel.hold_opens();

    let start = tokio::spawn({
        let orchestrator = Arc::clone(&h.orchestrator);
        async move { orchestrator.start_realtime().await }
    });
    settle().await;
    assert_eq!(h.channel.opened.load(Ordering::SeqCst), 0);

    h.orchestrator.stop_realtime();
    gate.notify_one();

    assert_eq!(start.await.unwrap(), RealtimeStart::Superseded);
    assert_eq!(h.channel.opened.load(Ordering::SeqCst), 1);
    assert_eq!(h.channel.live(), 0);
    assert!(!h.orchestrator.is_realtime_active());
}

#[tokio::test(start_paused = true)]
async fn test_gate_closing_during_open_skips_subscription() {
    let h = harness();
    let gate = h.channel.hold_opens();

    let start = tokio::spawn({
        let orchestrator = Arc::clone(&h.orchestrator);
        async move { orchestrator.start_realtime().await }
    });
    settle().await;

    h.policy
        .update_signal(SignalUpdate::default().power_saving(true));
    gate.notify_one();

    assert_eq!(start.await.unwrap(), RealtimeStart::SkippedByPolicy);
    assert_eq!(h.channel.live(), 0);
    assert!(!h.orchestrator.is_realtime_active());
}

#[tokio::test(start_paused = true)]
async fn test_follower_closing_gate_during_open_supersedes_it() {
    let h = harness();
    let _follower = h.orchestrator.follow_policy();
    let gate = h.channel.hold_opens();

    let start = tokio::spawn({
        let orchestrator = Arc::clone(&h.orchestrator);
        async move { orchestrator.start_realtime().await }
    });
    settle().await;

    h.policy
        .update_signal(SignalUpdate::default().power_saving(true));
    settle().await;
    gate.notify_one();

    assert_eq!(start.await.unwrap(), RealtimeStart::Superseded);
    settle().await;
    assert_eq!(h.channel.live(), 0);
    assert!(!h.orchestrator.is_realtime_active());
}

#[tokio::test(start_paused = true)]
async fn test_follow_policy_respects_stop() {
    let h = harness();
    let _follower = h.orchestrator.follow_policy();
    h.orchestrator.start_realtime().await;
    h.orchestrator.stop_realtime();

    h.policy
        .update_signal(SignalUpdate::default().network_expensive(true));
    settle().await;

    assert!(!h.orchestrator.is_realtime_active());
    assert_eq!(h.channel.opened.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------
// Registry
// ---------------------------------------------------------------

#[tokio::test]
async fn test_from_registry_uses_registered_components() {
    let root = Registry::new();
    let scope = root.scope();
    let backend = FakeBackend::seeded();
    let adapter: Arc<dyn FriendsAdapter> = backend.clone();
    scope.register(&keys::FRIENDS_ADAPTER, adapter);

    let orchestrator = FriendsOrchestrator::from_registry(&scope, &MeridianConfig::default());
    assert_eq!(orchestrator.refresh().await, Ok(RefreshOutcome::Loaded));
    assert_eq!(backend.calls("fetch_friends"), 1);

    // Realtime falls back to the unavailable default.
    assert!(matches!(
        orchestrator.start_realtime().await,
        RealtimeStart::Failed(_)
    ));

    let unconfigured = FriendsOrchestrator::from_registry(&root, &MeridianConfig::default());
    unconfigured.refresh().await.unwrap();
    assert_eq!(unconfigured.state().kind(), StateKind::Failed);
}
