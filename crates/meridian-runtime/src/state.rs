//! Load state machine.
//!
//! ```text
//! Loading    --succeeded--> Loaded(data)
//! Loading    --failed-----> Failed(error, none)
//! Loaded     --invoked----> Refreshing(data)
//! Refreshing --succeeded--> Loaded(new)
//! Refreshing --failed-----> Failed(error, data)
//! Failed     --invoked----> Refreshing(last good)
//! ```
//!
//! A refresh invoked while `Loading` or `Refreshing` leaves the state as is.
//! Everything else is illegal and reported as a [`TransitionError`].

use serde::Serialize;

use crate::error::{PresentedError, TransitionError};

/// Observable load state of one feature.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadState<D> {
    Loading,
    Loaded(D),
    /// Previous data stays visible while the refresh runs.
    Refreshing(Option<D>),
    Failed {
        error: PresentedError,
        last_good: Option<D>,
    },
}

/// Variant of a [`LoadState`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StateKind {
    Loading,
    Loaded,
    Refreshing,
    Failed,
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loading => write!(f, "loading"),
            Self::Loaded => write!(f, "loaded"),
            Self::Refreshing => write!(f, "refreshing"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Event driving a transition, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateEvent {
    RefreshInvoked,
    RefreshSucceeded,
    RefreshFailed,
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RefreshInvoked => write!(f, "refresh invoked"),
            Self::RefreshSucceeded => write!(f, "refresh succeeded"),
            Self::RefreshFailed => write!(f, "refresh failed"),
        }
    }
}

/// Input to [`LoadState::apply`].
#[derive(Debug)]
pub(crate) enum Transition<D> {
    RefreshInvoked,
    Succeeded(D),
    Failed(PresentedError),
}

impl<D> Transition<D> {
    fn event(&self) -> StateEvent {
        match self {
            Self::RefreshInvoked => StateEvent::RefreshInvoked,
            Self::Succeeded(_) => StateEvent::RefreshSucceeded,
            Self::Failed(_) => StateEvent::RefreshFailed,
        }
    }
}

impl<D> LoadState<D> {
    pub fn kind(&self) -> StateKind {
        match self {
            Self::Loading => StateKind::Loading,
            Self::Loaded(_) => StateKind::Loaded,
            Self::Refreshing(_) => StateKind::Refreshing,
            Self::Failed { .. } => StateKind::Failed,
        }
    }

    /// Most recent good data, whatever the state.
    pub fn data(&self) -> Option<&D> {
        match self {
            Self::Loading => None,
            Self::Loaded(data) => Some(data),
            Self::Refreshing(data) => data.as_ref(),
            Self::Failed { last_good, .. } => last_good.as_ref(),
        }
    }

    pub(crate) fn data_mut(&mut self) -> Option<&mut D> {
        match self {
            Self::Loading => None,
            Self::Loaded(data) => Some(data),
            Self::Refreshing(data) => data.as_mut(),
            Self::Failed { last_good, .. } => last_good.as_mut(),
        }
    }

    /// A refresh is outstanding.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Loading | Self::Refreshing(_))
    }

    pub fn error(&self) -> Option<&PresentedError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Apply a transition in place. Returns whether the variant changed.
    ///
    /// On an illegal transition the state is left untouched.
    pub(crate) fn apply(&mut self, transition: Transition<D>) -> Result<bool, TransitionError> {
        let from = self.kind();
        let current = std::mem::replace(self, Self::Loading);

        let (next, changed) = match (current, transition) {
            (Self::Loading, Transition::RefreshInvoked) => (Self::Loading, false),
            (Self::Refreshing(data), Transition::RefreshInvoked) => (Self::Refreshing(data), false),
            (Self::Loaded(data), Transition::RefreshInvoked) => (Self::Refreshing(Some(data)), true),
            (Self::Failed { last_good, .. }, Transition::RefreshInvoked) => {
                (Self::Refreshing(last_good), true)
            }
            (Self::Loading | Self::Refreshing(_), Transition::Succeeded(data)) => {
                (Self::Loaded(data), true)
            }
            (Self::Loading, Transition::Failed(error)) => (
                Self::Failed {
                    error,
                    last_good: None,
                },
                true,
            ),
            (Self::Refreshing(last_good), Transition::Failed(error)) => {
                (Self::Failed { error, last_good }, true)
            }
            (current, transition) => {
                let event = transition.event();
                *self = current;
                return Err(TransitionError::Illegal { from, event });
            }
        };

        *self = next;
        Ok(changed)
    }
}

impl<D> Default for LoadState<D> {
    fn default() -> Self {
        Self::Loading
    }
}
