//! # Failure classification.
//!
//! [`ErrorClassifier`] turns a [`ServiceError`] into a [`Disposition`] once;
//! every loop downstream switches on the disposition, never on the error.
//!
//! ## Session creation
//! ```text
//! Canceled                                   → Cancelled
//! TokenRevoked                               → Fatal
//! AgentNotFound | PoolNotFound |
//! AccessDenied  | Unauthorized               → Fatal
//! SessionConflict                            → tracker(conflict) → Retryable | CeilingReached
//! TokenRequest("…Current server time is…")   → tracker(skew)     → Retryable | CeilingReached
//! anything else                              → Retryable
//! ```
//!
//! ## Message polling
//! ```text
//! Canceled                                   → Cancelled
//! SessionExpired                             → RecreateSession (Fatal if recovery disabled)
//! TokenRevoked | AgentNotFound | PoolNotFound |
//! AccessDenied | Unauthorized                → Fatal
//! anything else                              → Retryable
//! ```

use std::time::Duration;

use crate::classify::tracker::{Budget, FailureCategory, SessionConflictTracker};
use crate::error::ServiceError;

/// Marker the token service puts in its rejection when clocks disagree.
pub const CLOCK_SKEW_MARKER: &str = "Current server time is";

/// What a loop should do about a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Stop and surface the error.
    Fatal,
    /// Stop: the category's wall-clock budget is spent.
    CeilingReached {
        category: FailureCategory,
        elapsed: Duration,
    },
    /// Back off and try the same operation again.
    Retryable,
    /// The session is gone; open a new one and resume polling.
    RecreateSession,
    /// Cancellation was requested; unwind without counting a failure.
    Cancelled,
}

impl Disposition {
    /// True for [`Disposition::Fatal`] and [`Disposition::CeilingReached`].
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Disposition::Fatal | Disposition::CeilingReached { .. }
        )
    }
}

/// Maps failures to dispositions; owns the conflict/skew budgets.
#[derive(Clone, Debug, Default)]
pub struct ErrorClassifier {
    tracker: SessionConflictTracker,
}

impl ErrorClassifier {
    pub fn new(tracker: SessionConflictTracker) -> Self {
        Self { tracker }
    }

    /// Classifies a session-creation failure, charging conflict/skew budgets.
    pub fn classify_create(&mut self, err: &ServiceError) -> Disposition {
        if let Some(d) = Self::terminal(err) {
            return d;
        }
        let category = match err {
            ServiceError::SessionConflict(_) => FailureCategory::SessionConflict,
            ServiceError::TokenRequest(text) if text.contains(CLOCK_SKEW_MARKER) => {
                FailureCategory::ClockSkew
            }
            _ => return Disposition::Retryable,
        };
        match self.tracker.record(category) {
            Budget::Within { .. } => Disposition::Retryable,
            Budget::Exhausted { elapsed } => Disposition::CeilingReached { category, elapsed },
        }
    }

    /// Classifies a get-next-message failure.
    pub fn classify_poll(&self, err: &ServiceError, recover_enabled: bool) -> Disposition {
        match err {
            ServiceError::SessionExpired(_) if recover_enabled => Disposition::RecreateSession,
            ServiceError::SessionExpired(_) => Disposition::Fatal,
            other => Self::terminal(other).unwrap_or(Disposition::Retryable),
        }
    }

    /// Successful session creation: clear both budgets.
    pub fn reset(&mut self) {
        self.tracker.reset();
    }

    pub fn tracker(&self) -> &SessionConflictTracker {
        &self.tracker
    }

    /// Dispositions shared by every operation.
    fn terminal(err: &ServiceError) -> Option<Disposition> {
        match err {
            ServiceError::Canceled => Some(Disposition::Cancelled),
            ServiceError::TokenRevoked(_)
            | ServiceError::AgentNotFound(_)
            | ServiceError::PoolNotFound(_)
            | ServiceError::AccessDenied(_)
            | ServiceError::Unauthorized(_) => Some(Disposition::Fatal),
            _ => None,
        }
    }
}
