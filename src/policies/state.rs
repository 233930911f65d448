//! # Per-loop backoff state.
//!
//! [`BackoffState`] is owned by exactly one loop (session creation, polling,
//! idle polling, keep-alive). It remembers the consecutive-failure count and the
//! last interval, and resets to baseline on success.

use std::time::Duration;

use rand::{SeedableRng, rngs::StdRng};

use crate::policies::backoff::{BackoffPolicy, Operation};

/// Mutable retry bookkeeping for one operation.
#[derive(Debug)]
pub struct BackoffState {
    operation: Operation,
    policy: BackoffPolicy,
    interval: Duration,
    failures: u32,
    progressive: bool,
    rng: StdRng,
}

impl BackoffState {
    /// State for `op` using its preset schedule and an OS-seeded generator.
    pub fn new(op: Operation) -> Self {
        Self::with_rng(op, BackoffPolicy::for_operation(op), StdRng::from_os_rng())
    }

    /// Same as [`BackoffState::new`] but reproducible.
    pub fn seeded(op: Operation, seed: u64) -> Self {
        Self::with_rng(op, BackoffPolicy::for_operation(op), StdRng::seed_from_u64(seed))
    }

    /// State with a custom schedule.
    pub fn with_policy(op: Operation, policy: BackoffPolicy) -> Self {
        Self::with_rng(op, policy, StdRng::from_os_rng())
    }

    fn with_rng(operation: Operation, policy: BackoffPolicy, rng: StdRng) -> Self {
        Self {
            operation,
            policy,
            interval: Duration::ZERO,
            failures: 0,
            progressive: false,
            rng,
        }
    }

    /// Records one more failure and returns the wait before the next attempt.
    pub fn advance(&mut self, progressive: bool) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let prev = (self.failures > 1).then_some(self.interval);
        self.interval = self
            .policy
            .next(&mut self.rng, self.failures, progressive, prev);
        self.progressive = progressive;
        self.interval
    }

    /// Back to baseline after a success.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.interval = Duration::ZERO;
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Last computed interval (`0` after a reset).
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the last interval was computed in progressive mode.
    pub fn progressive(&self) -> bool {
        self.progressive
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}
