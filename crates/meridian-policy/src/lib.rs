//! Policy coordinator: turns runtime signals into one decision surface.
//!
//! Signal sources push partial snapshots (power saving, thermal level,
//! data saving, network cost and reachability). The coordinator merges them,
//! derives a [`PolicyLevel`] and the [`FeatureGates`] features consult, and
//! notifies observers once per update.

pub mod coordinator;
pub mod gates;
pub mod types;

pub use coordinator::PolicyCoordinator;
pub use gates::FeatureGates;
pub use types::*;
