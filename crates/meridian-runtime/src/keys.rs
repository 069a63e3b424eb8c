//! Registry keys for the components orchestrators look up.

use std::sync::Arc;

use meridian_core::Key;
use meridian_policy::PolicyCoordinator;

use crate::friends::{FriendsAdapter, UnconfiguredFriendsAdapter};
use crate::realtime::{RealtimeChannel, UnavailableRealtimeChannel};

/// Process-wide coordinator, starting from the least-restrictive snapshot.
pub static POLICY_COORDINATOR: Key<PolicyCoordinator> =
    Key::new("policy.coordinator", default_policy_coordinator);

pub static FRIENDS_ADAPTER: Key<dyn FriendsAdapter> =
    Key::new("friends.adapter", default_friends_adapter);

pub static FRIENDS_REALTIME: Key<dyn RealtimeChannel> =
    Key::new("friends.realtime", default_friends_realtime);

fn default_policy_coordinator() -> Arc<PolicyCoordinator> {
    Arc::new(PolicyCoordinator::new())
}

fn default_friends_adapter() -> Arc<dyn FriendsAdapter> {
    Arc::new(UnconfiguredFriendsAdapter)
}

fn default_friends_realtime() -> Arc<dyn RealtimeChannel> {
    Arc::new(UnavailableRealtimeChannel)
}
