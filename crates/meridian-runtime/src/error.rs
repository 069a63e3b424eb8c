//! Boundary adapter errors and their user-facing projection.

use serde::Serialize;
use thiserror::Error;

use crate::state::{StateEvent, StateKind};

/// Failure returned by a boundary adapter call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("network error: {0}")]
    Network(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("adapter unavailable: {0}")]
    Unavailable(String),

    /// The user backed out of the action (e.g. dismissed a confirmation).
    #[error("cancelled")]
    Cancelled,

    /// The target is already in the requested state.
    #[error("already applied: {0}")]
    AlreadyApplied(String),
}

impl AdapterError {
    /// Expected errors are benign and never shown to the user.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::Cancelled | Self::AlreadyApplied(_))
    }

    fn headline(&self) -> (&'static str, String) {
        match self {
            Self::Network(_) => (
                "Connection problem",
                "We couldn't reach the server. Check your connection and try again.".into(),
            ),
            Self::Unauthorized => (
                "Signed out",
                "Your session has expired. Sign in again to continue.".into(),
            ),
            Self::NotFound(_) => (
                "Not found",
                "This item no longer exists. It may have been removed.".into(),
            ),
            Self::Conflict(_) => (
                "Out of date",
                "Something changed in the meantime. Refresh and try again.".into(),
            ),
            Self::RateLimited { retry_after_secs } => (
                "Slow down",
                match retry_after_secs {
                    Some(secs) => format!("Too many requests. Try again in {} seconds.", secs),
                    None => "Too many requests. Try again in a moment.".into(),
                },
            ),
            Self::Server { .. } | Self::Decode(_) => (
                "Something went wrong",
                "The server had a problem handling this request. Try again later.".into(),
            ),
            Self::Unavailable(_) => (
                "Unavailable",
                "This feature isn't available right now.".into(),
            ),
            Self::Cancelled | Self::AlreadyApplied(_) => (
                "Nothing to do",
                "The request didn't need to be sent.".into(),
            ),
        }
    }
}

/// UI-facing projection of a failure.
///
/// Lives beside the load state rather than inside it: a failed mutation sets
/// one without disturbing loaded content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresentedError {
    pub title: String,
    pub description: String,
    /// Identifies the originating call, for logs and bug reports.
    #[serde(rename = "technicalDetail")]
    pub technical_detail: String,
    #[serde(rename = "occurredAt")]
    pub occurred_at: chrono::DateTime<chrono::Utc>,
}

impl PresentedError {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        technical_detail: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            technical_detail: technical_detail.into(),
            occurred_at: chrono::Utc::now(),
        }
    }

    /// Map an adapter failure from `feature.call(target)`.
    pub fn from_adapter(
        feature: &str,
        call: &str,
        target: Option<&str>,
        error: &AdapterError,
    ) -> Self {
        let (title, description) = error.headline();
        let technical_detail = match target {
            Some(target) => format!("{}.{}({}): {}", feature, call, target, error),
            None => format!("{}.{}: {}", feature, call, error),
        };
        Self::new(title, description, technical_detail)
    }
}

impl std::fmt::Display for PresentedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.title, self.technical_detail)
    }
}

/// A state-dependent operation was invoked from a state that cannot reach it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    #[error("illegal transition: {event} while {from}")]
    Illegal { from: StateKind, event: StateEvent },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_errors() {
        assert!(AdapterError::Cancelled.is_expected());
        assert!(AdapterError::AlreadyApplied("not friends".into()).is_expected());
        assert!(!AdapterError::Network("timeout".into()).is_expected());
        assert!(!AdapterError::Unauthorized.is_expected());
    }

    #[test]
    fn test_technical_detail_names_the_call() {
        let err = AdapterError::Server {
            status: 503,
            message: "maintenance".into(),
        };
        let presented = PresentedError::from_adapter("friends", "remove_friend", Some("id=42"), &err);
        assert_eq!(presented.title, "Something went wrong");
        assert_eq!(
            presented.technical_detail,
            "friends.remove_friend(id=42): server error 503: maintenance"
        );

        let presented = PresentedError::from_adapter("friends", "fetch_friends", None, &err);
        assert!(presented.technical_detail.starts_with("friends.fetch_friends: "));
    }

    #[test]
    fn test_rate_limit_description() {
        let err = AdapterError::RateLimited {
            retry_after_secs: Some(30),
        };
        let presented = PresentedError::from_adapter("friends", "send_request", None, &err);
        assert!(presented.description.contains("30 seconds"));
    }
}
