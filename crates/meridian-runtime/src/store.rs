//! Feature store: one feature's load state, presented error, and observers.
//!
//! The store is the only place a [`LoadState`] changes. Every change happens
//! inside a short critical section (never across an `.await`) and publishes
//! its [`StoreEvent`]s before the lock is released, so observers see changes
//! in the order they were made.

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::error::{AdapterError, PresentedError, TransitionError};
use crate::state::{LoadState, StateKind, Transition};

/// Default observer channel capacity.
const DEFAULT_CAPACITY: usize = 64;

/// Change notification published by a [`FeatureStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Transitioned { from: StateKind, to: StateKind },
    DataPatched,
    ErrorPresented(PresentedError),
    ErrorDismissed,
}

/// Proof that a refresh was started, tagged with its generation.
#[derive(Debug)]
#[must_use = "a started refresh must be completed"]
pub struct RefreshTicket {
    generation: u64,
}

impl RefreshTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// A failed fetch inside a refresh, attributed to its adapter call.
#[derive(Debug, Clone)]
pub struct RefreshFailure {
    pub call: &'static str,
    pub error: AdapterError,
}

impl RefreshFailure {
    pub fn new(call: &'static str, error: AdapterError) -> Self {
        Self { call, error }
    }
}

/// How a completed refresh was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Loaded,
    Failed,
    /// A newer refresh was started; this result was discarded.
    Superseded,
}

struct StoreInner<D> {
    state: LoadState<D>,
    generation: u64,
    presented_error: Option<PresentedError>,
    /// The presented error came from a failed refresh, so the next
    /// successful refresh clears it.
    error_from_refresh: bool,
}

/// Owns the load state of one feature.
pub struct FeatureStore<D> {
    name: &'static str,
    inner: Mutex<StoreInner<D>>,
    tx: broadcast::Sender<StoreEvent>,
}

impl<D: Clone> FeatureStore<D> {
    pub fn new(name: &'static str) -> Self {
        Self::with_capacity(name, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(name: &'static str, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            name,
            inner: Mutex::new(StoreInner {
                state: LoadState::Loading,
                generation: 0,
                presented_error: None,
                error_from_refresh: false,
            }),
            tx,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    pub fn state(&self) -> LoadState<D> {
        self.inner.lock().state.clone()
    }

    pub fn kind(&self) -> StateKind {
        self.inner.lock().state.kind()
    }

    /// Most recent good data, retained across refreshes and failures.
    pub fn data(&self) -> Option<D> {
        self.inner.lock().state.data().cloned()
    }

    pub fn presented_error(&self) -> Option<PresentedError> {
        self.inner.lock().presented_error.clone()
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    // ---------------------------------------------------------------
    // Refresh
    // ---------------------------------------------------------------

    /// Start a refresh. Any refresh still in flight is superseded: only the
    /// completion carrying the newest ticket is applied.
    pub fn begin_refresh(&self) -> RefreshTicket {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        let generation = inner.generation;
        let from = inner.state.kind();

        match inner.state.apply(Transition::RefreshInvoked) {
            Ok(true) => self.publish(StoreEvent::Transitioned {
                from,
                to: inner.state.kind(),
            }),
            Ok(false) => debug!("{}: refresh gen={} joins pending {}", self.name, generation, from),
            // RefreshInvoked is legal from every state.
            Err(e) => self.contract_violation(&e),
        }

        RefreshTicket { generation }
    }

    /// Apply the result of the refresh identified by `ticket`.
    pub fn complete_refresh(
        &self,
        ticket: RefreshTicket,
        result: Result<D, RefreshFailure>,
    ) -> Result<RefreshOutcome, TransitionError> {
        let mut inner = self.inner.lock();
        if ticket.generation != inner.generation {
            debug!(
                "{}: discarding refresh gen={} (current gen={})",
                self.name, ticket.generation, inner.generation
            );
            return Ok(RefreshOutcome::Superseded);
        }

        let from = inner.state.kind();
        match result {
            Ok(data) => {
                if let Err(e) = inner.state.apply(Transition::Succeeded(data)) {
                    self.contract_violation(&e);
                    return Err(e);
                }
                self.publish(StoreEvent::Transitioned {
                    from,
                    to: StateKind::Loaded,
                });
                debug!("{}: refresh gen={} loaded", self.name, ticket.generation);

                if inner.error_from_refresh {
                    inner.error_from_refresh = false;
                    if inner.presented_error.take().is_some() {
                        debug!("{}: refresh recovered, error cleared", self.name);
                        self.publish(StoreEvent::ErrorDismissed);
                    }
                }
                Ok(RefreshOutcome::Loaded)
            }
            Err(failure) => {
                let presented =
                    PresentedError::from_adapter(self.name, failure.call, None, &failure.error);
                if let Err(e) = inner.state.apply(Transition::Failed(presented.clone())) {
                    self.contract_violation(&e);
                    return Err(e);
                }
                self.publish(StoreEvent::Transitioned {
                    from,
                    to: StateKind::Failed,
                });

                if failure.error.is_expected() {
                    debug!(
                        "{}: refresh gen={} ended quietly: {}",
                        self.name, ticket.generation, presented.technical_detail
                    );
                } else {
                    info!("{}: refresh failed: {}", self.name, presented.technical_detail);
                    inner.presented_error = Some(presented.clone());
                    inner.error_from_refresh = true;
                    self.publish(StoreEvent::ErrorPresented(presented));
                }
                Ok(RefreshOutcome::Failed)
            }
        }
    }

    // ---------------------------------------------------------------
    // Mutation support
    // ---------------------------------------------------------------

    /// Patch the current data in place without changing the state variant.
    ///
    /// Returns false (and publishes nothing) when there is no data yet.
    pub fn patch(&self, apply: impl FnOnce(&mut D)) -> bool {
        let mut inner = self.inner.lock();
        match inner.state.data_mut() {
            Some(data) => {
                apply(data);
                self.publish(StoreEvent::DataPatched);
                true
            }
            None => {
                debug!("{}: patch skipped, no data while {}", self.name, inner.state.kind());
                false
            }
        }
    }

    pub fn present_error(&self, presented: PresentedError) {
        let mut inner = self.inner.lock();
        inner.presented_error = Some(presented.clone());
        inner.error_from_refresh = false;
        self.publish(StoreEvent::ErrorPresented(presented));
    }

    /// Clear the presented error. Returns false if none was set.
    pub fn dismiss_error(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.presented_error.take().is_none() {
            return false;
        }
        self.publish(StoreEvent::ErrorDismissed);
        true
    }

    fn publish(&self, event: StoreEvent) {
        let _ = self.tx.send(event);
    }

    fn contract_violation(&self, e: &TransitionError) {
        error!("{}: contract violation: {}", self.name, e);
    }
}
