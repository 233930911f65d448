//! Failure classification and retry budgets.
//!
//! - [`ErrorClassifier`] maps a [`ServiceError`](crate::ServiceError) to a [`Disposition`].
//! - [`SessionConflictTracker`] holds the wall-clock budgets for session
//!   conflicts and clock skew that the classifier consults during creation.

mod classifier;
mod tracker;

pub use classifier::{CLOCK_SKEW_MARKER, Disposition, ErrorClassifier};
pub use tracker::{Budget, FailureCategory, SessionConflictTracker, Stopwatch};
