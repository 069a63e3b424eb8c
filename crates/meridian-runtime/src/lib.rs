//! Stateful feature orchestration.
//!
//! Each feature owns a [`FeatureStore`]: the load state machine, a refresh
//! generation counter, the presented error, and a change channel. Mutations
//! run under an [`InFlightGuardSet`] so one identifier never has two
//! concurrent calls. Realtime feeds are debounced into single refreshes and
//! only opened while the [`PolicyCoordinator`](meridian_policy::PolicyCoordinator)
//! allows it.

pub mod error;
pub mod friends;
pub mod guard;
pub mod keys;
pub mod realtime;
pub mod state;
pub mod store;

pub use error::{AdapterError, PresentedError, TransitionError};
pub use friends::{FriendsOrchestrator, MutationOutcome, PolicyFollower, RealtimeStart};
pub use guard::{InFlightGuard, InFlightGuardSet};
pub use realtime::{
    RealtimeChannel, RealtimeEvent, RealtimeHandle, RealtimeSubscription, RealtimeTarget,
};
pub use state::{LoadState, StateEvent, StateKind};
pub use store::{FeatureStore, RefreshFailure, RefreshOutcome, RefreshTicket, StoreEvent};
