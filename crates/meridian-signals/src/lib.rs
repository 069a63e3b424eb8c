//! Signal sources feeding the policy coordinator.
//!
//! `HostSignalSource` reads power, thermal and network facts from a Linux
//! sysfs tree; `SignalPump` samples any [`SignalSource`] on an interval and
//! forwards only the fields that changed.

pub mod host;
pub mod pump;

pub use host::HostSignalSource;
pub use pump::SignalPump;

use meridian_policy::SignalUpdate;

/// Anything that can report the current value of some runtime signals.
///
/// Fields the source cannot observe are left `None`.
pub trait SignalSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Read the signals this source knows about. Must not fail; unreadable
    /// sensors are reported as `None`.
    fn sample(&self) -> SignalUpdate;
}
