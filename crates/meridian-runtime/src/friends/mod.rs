//! Friends orchestrator: friends list plus incoming and outgoing requests.

pub mod adapter;
pub mod types;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use meridian_core::{MeridianConfig, Registry};
use meridian_policy::PolicyCoordinator;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{AdapterError, PresentedError, TransitionError};
use crate::guard::InFlightGuardSet;
use crate::keys;
use crate::realtime::{RealtimeChannel, RealtimeSubscription, RealtimeTarget};
use crate::state::LoadState;
use crate::store::{FeatureStore, RefreshFailure, RefreshOutcome, StoreEvent};

pub use adapter::{FriendsAdapter, UnconfiguredFriendsAdapter};
pub use types::{Friend, FriendRequest, FriendsData, UserId};

/// Feature name used in logs and technical error details.
pub const FEATURE: &str = "friends";

/// Realtime topic carrying friend-graph changes.
pub const TOPIC: &str = "friends";

/// Result of a mutation intent.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// The adapter succeeded and the data was patched.
    Applied,
    /// A mutation on the same identifier was already in flight.
    Rejected,
    /// The adapter returned an expected error; nothing was shown.
    Swallowed,
    Failed(PresentedError),
}

/// Result of [`FriendsOrchestrator::start_realtime`].
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeStart {
    Started,
    /// The realtime gate is closed.
    SkippedByPolicy,
    /// A stop, a gate closure or a newer start happened while the channel
    /// was opening; the new channel was released.
    Superseded,
    Swallowed,
    Failed(PresentedError),
}

/// The live subscription and the epoch an opening channel must still match
/// to be installed. Every teardown bumps the epoch.
#[derive(Default)]
struct RealtimeSlot {
    subscription: Option<RealtimeSubscription>,
    epoch: u64,
}

/// Owns the friends feature state and its realtime subscription.
///
/// Cheap to share: consumers hold an `Arc` and go through the intents.
pub struct FriendsOrchestrator {
    me: Weak<Self>,
    adapter: Arc<dyn FriendsAdapter>,
    realtime: Arc<dyn RealtimeChannel>,
    policy: Arc<PolicyCoordinator>,
    store: FeatureStore<FriendsData>,
    guards: InFlightGuardSet<UserId>,
    realtime_slot: Mutex<RealtimeSlot>,
    /// The consumer asked for realtime and has not stopped it since.
    realtime_requested: AtomicBool,
    debounce: Duration,
}

impl FriendsOrchestrator {
    pub fn new(
        adapter: Arc<dyn FriendsAdapter>,
        realtime: Arc<dyn RealtimeChannel>,
        policy: Arc<PolicyCoordinator>,
        config: &MeridianConfig,
    ) -> Arc<Self> {
        let debounce = config.debounce();
        info!(
            "FriendsOrchestrator initialized: debounce={}ms, realtime_gate={}",
            debounce.as_millis(),
            policy.realtime_enabled()
        );
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            adapter,
            realtime,
            policy,
            store: FeatureStore::with_capacity(FEATURE, config.event_capacity),
            guards: InFlightGuardSet::new(),
            realtime_slot: Mutex::new(RealtimeSlot::default()),
            realtime_requested: AtomicBool::new(false),
            debounce,
        })
    }

    /// Build from whatever the registry hands out for the friends keys.
    pub fn from_registry(registry: &Registry, config: &MeridianConfig) -> Arc<Self> {
        Self::new(
            registry.resolve(&keys::FRIENDS_ADAPTER),
            registry.resolve(&keys::FRIENDS_REALTIME),
            registry.resolve(&keys::POLICY_COORDINATOR),
            config,
        )
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    pub fn state(&self) -> LoadState<FriendsData> {
        self.store.state()
    }

    pub fn data(&self) -> Option<FriendsData> {
        self.store.data()
    }

    pub fn presented_error(&self) -> Option<PresentedError> {
        self.store.presented_error()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    pub fn is_in_flight(&self, id: UserId) -> bool {
        self.guards.contains(&id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.guards.len()
    }

    pub fn is_realtime_active(&self) -> bool {
        self.realtime_slot
            .lock()
            .subscription
            .as_ref()
            .is_some_and(RealtimeSubscription::is_active)
    }

    // ---------------------------------------------------------------
    // Refresh
    // ---------------------------------------------------------------

    /// Fetch friends and both request lists concurrently.
    ///
    /// Any failure fails the whole refresh; when several fail, the first in
    /// the order friends, incoming, outgoing is reported.
    pub async fn refresh(&self) -> Result<RefreshOutcome, TransitionError> {
        let ticket = self.store.begin_refresh();
        debug!("Friends refresh gen={} started", ticket.generation());

        let (friends, incoming, outgoing) = tokio::join!(
            self.adapter.fetch_friends(),
            self.adapter.fetch_incoming_requests(),
            self.adapter.fetch_outgoing_requests(),
        );

        let result = match (friends, incoming, outgoing) {
            (Ok(friends), Ok(incoming), Ok(outgoing)) => Ok(FriendsData {
                friends,
                incoming,
                outgoing,
            }),
            (Err(e), _, _) => Err(RefreshFailure::new("fetch_friends", e)),
            (_, Err(e), _) => Err(RefreshFailure::new("fetch_incoming_requests", e)),
            (_, _, Err(e)) => Err(RefreshFailure::new("fetch_outgoing_requests", e)),
        };

        self.store.complete_refresh(ticket, result)
    }

    // ---------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------

    pub async fn remove_friend(&self, id: UserId) -> MutationOutcome {
        self.mutate(
            "remove_friend",
            id,
            || self.adapter.remove_friend(id),
            |data, ()| data.remove_friend(id),
        )
        .await
    }

    pub async fn accept_request(&self, id: UserId) -> MutationOutcome {
        self.mutate(
            "accept_request",
            id,
            || self.adapter.accept_request(id),
            |data, friend| data.accept(friend),
        )
        .await
    }

    pub async fn decline_request(&self, id: UserId) -> MutationOutcome {
        self.mutate(
            "decline_request",
            id,
            || self.adapter.decline_request(id),
            |data, ()| data.drop_incoming(id),
        )
        .await
    }

    pub async fn cancel_request(&self, id: UserId) -> MutationOutcome {
        self.mutate(
            "cancel_request",
            id,
            || self.adapter.cancel_request(id),
            |data, ()| data.drop_outgoing(id),
        )
        .await
    }

    pub async fn send_request(&self, id: UserId) -> MutationOutcome {
        self.mutate(
            "send_request",
            id,
            || self.adapter.send_request(id),
            |data, request| data.add_outgoing(request),
        )
        .await
    }

    /// Run one adapter mutation under the in-flight guard for `id`.
    ///
    /// The state variant never changes here: success patches the data,
    /// failure only sets the presented error.
    async fn mutate<T, F, Fut>(
        &self,
        call: &'static str,
        id: UserId,
        call_adapter: F,
        apply: impl FnOnce(&mut FriendsData, T),
    ) -> MutationOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let Some(_guard) = self.guards.try_acquire(id) else {
            debug!("Friends {}(id={}) rejected: already in flight", call, id);
            return MutationOutcome::Rejected;
        };

        match call_adapter().await {
            Ok(value) => {
                if !self.store.patch(move |data| apply(data, value)) {
                    debug!("Friends {}(id={}) applied before first load", call, id);
                }
                MutationOutcome::Applied
            }
            Err(e) if e.is_expected() => {
                debug!("Friends {}(id={}) swallowed: {}", call, id, e);
                MutationOutcome::Swallowed
            }
            Err(e) => {
                let target = format!("id={}", id);
                let presented = PresentedError::from_adapter(FEATURE, call, Some(&target), &e);
                warn!("Friends mutation failed: {}", presented.technical_detail);
                self.store.present_error(presented.clone());
                MutationOutcome::Failed(presented)
            }
        }
    }

    pub fn dismiss_error(&self) -> bool {
        self.store.dismiss_error()
    }

    // ---------------------------------------------------------------
    // Realtime
    // ---------------------------------------------------------------

    /// Open the live channel, replacing any existing subscription.
    ///
    /// A no-op while the policy's realtime gate is closed. The request is
    /// remembered, so a [`follow_policy`](Self::follow_policy) task starts
    /// the subscription once the gate opens.
    pub async fn start_realtime(&self) -> RealtimeStart {
        self.realtime_requested.store(true, Ordering::SeqCst);
        self.open_subscription().await
    }

    /// Stop listening. Safe to call when never started.
    pub fn stop_realtime(&self) {
        self.realtime_requested.store(false, Ordering::SeqCst);
        if self.close_subscription().1 {
            info!("Friends realtime stopped");
        }
    }

    /// Keep the subscription in line with the realtime gate until the
    /// returned follower is dropped.
    pub fn follow_policy(&self) -> PolicyFollower {
        let mut rx = self.policy.subscribe();
        let me = self.me.clone();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Friends policy follower skipped {} decisions", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
                let Some(this) = me.upgrade() else { break };
                // Always act on the latest decision, not the one received.
                let enabled = this.policy.realtime_enabled();
                this.apply_realtime_gate(enabled).await;
            }
        });
        PolicyFollower { handle }
    }

    async fn apply_realtime_gate(&self, enabled: bool) {
        if !enabled {
            // Also invalidates an open still in flight.
            if self.close_subscription().1 {
                info!("Friends realtime paused: gate closed");
            }
        } else if !self.is_realtime_active() && self.realtime_requested.load(Ordering::SeqCst) {
            info!("Friends realtime resuming: gate opened");
            let _ = self.open_subscription().await;
        }
    }

    async fn open_subscription(&self) -> RealtimeStart {
        if !self.policy.realtime_enabled() {
            debug!(
                "Friends realtime skipped: gate closed at level {}",
                self.policy.current_policy_level()
            );
            return RealtimeStart::SkippedByPolicy;
        }

        let (epoch, _) = self.close_subscription();

        let handle = match self.realtime.open(TOPIC).await {
            Ok(handle) => handle,
            Err(e) if e.is_expected() => {
                debug!("Friends realtime open swallowed: {}", e);
                return RealtimeStart::Swallowed;
            }
            Err(e) => {
                let presented = PresentedError::from_adapter(FEATURE, "open_realtime", None, &e);
                warn!("Friends realtime failed: {}", presented.technical_detail);
                self.store.present_error(presented.clone());
                return RealtimeStart::Failed(presented);
            }
        };

        // Dropping `handle` on the early returns releases the channel.
        let mut slot = self.realtime_slot.lock();
        if slot.epoch != epoch {
            debug!(
                "Friends realtime open superseded (epoch {} -> {})",
                epoch, slot.epoch
            );
            return RealtimeStart::Superseded;
        }
        if !self.policy.realtime_enabled() {
            debug!("Friends realtime skipped: gate closed while opening");
            return RealtimeStart::SkippedByPolicy;
        }

        let target: Weak<dyn RealtimeTarget> = self.me.clone();
        slot.subscription = Some(RealtimeSubscription::start(
            handle,
            TOPIC,
            self.debounce,
            target,
        ));
        RealtimeStart::Started
    }

    /// Tear down the current subscription and invalidate any open still in
    /// flight. Returns the new epoch and whether a subscription was torn down.
    fn close_subscription(&self) -> (u64, bool) {
        let mut slot = self.realtime_slot.lock();
        slot.epoch += 1;
        let closed = match slot.subscription.take() {
            Some(subscription) => {
                subscription.stop();
                true
            }
            None => false,
        };
        (slot.epoch, closed)
    }
}

#[async_trait]
impl RealtimeTarget for FriendsOrchestrator {
    async fn on_realtime_quiet(&self) {
        match self.refresh().await {
            Ok(outcome) => debug!("Friends realtime refresh: {:?}", outcome),
            Err(e) => error!("Friends realtime refresh rejected: {}", e),
        }
    }
}

/// Background task started by [`FriendsOrchestrator::follow_policy`].
/// Stops following when dropped.
pub struct PolicyFollower {
    handle: JoinHandle<()>,
}

impl PolicyFollower {
    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for PolicyFollower {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
