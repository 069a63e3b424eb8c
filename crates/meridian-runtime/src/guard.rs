//! In-flight guard set: at most one outstanding mutation per identifier.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

/// Identifiers with a mutation currently in flight.
///
/// [`try_acquire`](Self::try_acquire) hands out an [`InFlightGuard`]; the
/// identifier leaves the set when the guard drops, whether the mutation
/// succeeded, failed, or its future was abandoned.
pub struct InFlightGuardSet<K> {
    ids: Arc<Mutex<HashSet<K>>>,
}

impl<K: Eq + Hash + Clone + Debug> InFlightGuardSet<K> {
    pub fn new() -> Self {
        Self {
            ids: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Claim `id`. Returns `None` if a mutation on it is already in flight.
    pub fn try_acquire(&self, id: K) -> Option<InFlightGuard<K>> {
        if !self.ids.lock().insert(id.clone()) {
            return None;
        }
        Some(InFlightGuard {
            ids: Arc::clone(&self.ids),
            id,
        })
    }

    pub fn contains(&self, id: &K) -> bool {
        self.ids.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }
}

impl<K: Eq + Hash + Clone + Debug> Default for InFlightGuardSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Membership of one identifier in an [`InFlightGuardSet`].
#[must_use = "the identifier is released as soon as the guard is dropped"]
pub struct InFlightGuard<K: Eq + Hash> {
    ids: Arc<Mutex<HashSet<K>>>,
    id: K,
}

impl<K: Eq + Hash> InFlightGuard<K> {
    pub fn id(&self) -> &K {
        &self.id
    }
}

impl<K: Eq + Hash> Drop for InFlightGuard<K> {
    fn drop(&mut self) {
        self.ids.lock().remove(&self.id);
    }
}
