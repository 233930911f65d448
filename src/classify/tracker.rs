//! # Wall-clock retry budgets for recurring session-creation failures.
//!
//! Two categories are tracked, each with its own [`Stopwatch`] and ceiling:
//! - [`FailureCategory::SessionConflict`]: another process holds the session;
//!   usually clears within minutes.
//! - [`FailureCategory::ClockSkew`]: token validation fails because the local
//!   clock drifted; needs time-sync intervention, so the budget is longer.
//!
//! ## Rules
//! - The budget is elapsed time, not attempt count: a burst of thousands of
//!   failures in a few seconds is still within budget.
//! - Observing one category stops the other category's clock; the two are
//!   competing explanations and must not accrue time together.
//! - A successful session creation resets both clocks.
//!
//! Time comes from [`tokio::time::Instant`], so paused-clock tests can drive it.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Recurring failure categories with a dedicated ceiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    SessionConflict,
    ClockSkew,
}

impl FailureCategory {
    pub fn as_label(&self) -> &'static str {
        match self {
            FailureCategory::SessionConflict => "session_conflict",
            FailureCategory::ClockSkew => "clock_skew",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Monotonic stopwatch that starts on first use.
#[derive(Clone, Copy, Debug, Default)]
pub struct Stopwatch {
    started: Option<Instant>,
}

impl Stopwatch {
    /// Starts the clock unless it is already running.
    pub fn start(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    /// Stops and clears the clock.
    pub fn reset(&mut self) {
        self.started = None;
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    /// Time since [`Stopwatch::start`]; zero while stopped.
    pub fn elapsed(&self) -> Duration {
        self.started.map_or(Duration::ZERO, |s| s.elapsed())
    }
}

/// Verdict for one recorded failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Budget {
    /// Still within the ceiling.
    Within { elapsed: Duration },
    /// Ceiling reached.
    Exhausted { elapsed: Duration },
}

/// Conflict and skew clocks with their ceilings.
#[derive(Clone, Debug)]
pub struct SessionConflictTracker {
    conflict: Stopwatch,
    skew: Stopwatch,
    conflict_ceiling: Duration,
    skew_ceiling: Duration,
}

impl SessionConflictTracker {
    /// Default conflict budget.
    pub const CONFLICT_CEILING: Duration = Duration::from_secs(4 * 60);
    /// Default clock-skew budget.
    pub const SKEW_CEILING: Duration = Duration::from_secs(30 * 60);

    pub fn new(conflict_ceiling: Duration, skew_ceiling: Duration) -> Self {
        Self {
            conflict: Stopwatch::default(),
            skew: Stopwatch::default(),
            conflict_ceiling,
            skew_ceiling,
        }
    }

    /// Records a failure in `category` and reports whether its budget remains.
    pub fn record(&mut self, category: FailureCategory) -> Budget {
        let (clock, other, ceiling) = match category {
            FailureCategory::SessionConflict => {
                (&mut self.conflict, &mut self.skew, self.conflict_ceiling)
            }
            FailureCategory::ClockSkew => (&mut self.skew, &mut self.conflict, self.skew_ceiling),
        };
        other.reset();
        clock.start();

        let elapsed = clock.elapsed();
        if elapsed >= ceiling {
            Budget::Exhausted { elapsed }
        } else {
            Budget::Within { elapsed }
        }
    }

    /// Clears both clocks (successful session creation).
    pub fn reset(&mut self) {
        self.conflict.reset();
        self.skew.reset();
    }

    pub fn elapsed(&self, category: FailureCategory) -> Duration {
        match category {
            FailureCategory::SessionConflict => self.conflict.elapsed(),
            FailureCategory::ClockSkew => self.skew.elapsed(),
        }
    }

    pub fn ceiling(&self, category: FailureCategory) -> Duration {
        match category {
            FailureCategory::SessionConflict => self.conflict_ceiling,
            FailureCategory::ClockSkew => self.skew_ceiling,
        }
    }
}

impl Default for SessionConflictTracker {
    fn default() -> Self {
        Self::new(Self::CONFLICT_CEILING, Self::SKEW_CEILING)
    }
}
