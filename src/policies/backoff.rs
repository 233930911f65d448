//! # Tiered backoff policy.
//!
//! [`BackoffPolicy`] maps a consecutive-failure count onto a [`BackoffBand`].
//! Each [`Operation`] has its own tiers because the acceptable staleness differs:
//! an idle poll re-arms in about a second, session creation waits minutes.
//!
//! Two schedules exist per operation:
//! - **progressive** (feature-gated): bands widen as the streak grows and the
//!   previous interval acts as a floor;
//! - **fixed** (gate off): a constant interval for session creation and
//!   keep-alive, a two-step schedule for message polling.
//!
//! ```text
//! failures:      1 ─ 5         6 ─ 10        11 ─ 20        21+
//! MessagePoll:  [15s,30s]  →  [30s,60s]  →  [60s,120s]  →  [120s,300s]   (progressive)
//!               [15s,30s]  →  [30s,60s] ─────────────────────────────►   (fixed)
//! ```
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use agent_listener::{BackoffPolicy, Operation};
//!
//! let policy = BackoffPolicy::for_operation(Operation::SessionCreate);
//! let band = policy.band_for(1, false);
//! assert_eq!(band.min, Duration::from_secs(30));
//! assert_eq!(band.max, Duration::from_secs(30));
//! ```

use std::fmt;
use std::time::Duration;

use rand::Rng;

use crate::policies::band::BackoffBand;

/// The logical operations that own a backoff schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Connect + create-session handshake.
    SessionCreate,
    /// Get-next-message after a failure.
    MessagePoll,
    /// Keep-alive heartbeat after a failure.
    KeepAlive,
    /// Get-next-message after an empty result.
    IdlePoll,
}

impl Operation {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Operation::SessionCreate => "session_create",
            Operation::MessagePoll => "message_poll",
            Operation::KeepAlive => "keep_alive",
            Operation::IdlePoll => "idle_poll",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// One step of a schedule: applies while `failures <= up_to`.
///
/// `up_to = None` marks the open-ended last tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffTier {
    pub up_to: Option<u32>,
    pub band: BackoffBand,
}

impl BackoffTier {
    pub const fn until(up_to: u32, band: BackoffBand) -> Self {
        Self {
            up_to: Some(up_to),
            band,
        }
    }

    pub const fn rest(band: BackoffBand) -> Self {
        Self { up_to: None, band }
    }
}

/// Tiered retry schedule for one operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Schedule used while progressive backoff is enabled.
    pub progressive: Vec<BackoffTier>,
    /// Schedule used while it is disabled.
    pub fixed: Vec<BackoffTier>,
}

impl BackoffPolicy {
    /// Builds the preset schedule for `op`.
    pub fn for_operation(op: Operation) -> Self {
        match op {
            Operation::SessionCreate => Self {
                progressive: vec![
                    BackoffTier::until(2, BackoffBand::secs(30, 60)),
                    BackoffTier::until(5, BackoffBand::secs(60, 120)),
                    BackoffTier::rest(BackoffBand::secs(120, 300)),
                ],
                fixed: vec![BackoffTier::rest(BackoffBand::secs(30, 30))],
            },
            Operation::MessagePoll => Self {
                progressive: vec![
                    BackoffTier::until(5, BackoffBand::secs(15, 30)),
                    BackoffTier::until(10, BackoffBand::secs(30, 60)),
                    BackoffTier::until(20, BackoffBand::secs(60, 120)),
                    BackoffTier::rest(BackoffBand::secs(120, 300)),
                ],
                fixed: vec![
                    BackoffTier::until(5, BackoffBand::secs(15, 30)),
                    BackoffTier::rest(BackoffBand::secs(30, 60)),
                ],
            },
            Operation::KeepAlive => Self {
                progressive: vec![
                    BackoffTier::until(3, BackoffBand::secs(5, 15)),
                    BackoffTier::until(10, BackoffBand::secs(15, 30)),
                    BackoffTier::rest(BackoffBand::secs(30, 60)),
                ],
                fixed: vec![BackoffTier::rest(BackoffBand::secs(30, 30))],
            },
            Operation::IdlePoll => Self {
                progressive: vec![
                    BackoffTier::until(10, BackoffBand::secs(1, 2)),
                    BackoffTier::until(60, BackoffBand::secs(2, 5)),
                    BackoffTier::rest(BackoffBand::secs(5, 10)),
                ],
                fixed: vec![BackoffTier::rest(BackoffBand::secs(1, 1))],
            },
        }
    }

    /// Returns the band for the `failures`-th consecutive failure (1-based).
    ///
    /// A count of `0` is treated as `1`. Past the last bounded tier the final
    /// tier applies. An empty schedule yields a zero band.
    pub fn band_for(&self, failures: u32, progressive: bool) -> BackoffBand {
        let tiers = if progressive {
            &self.progressive
        } else {
            &self.fixed
        };
        let n = failures.max(1);
        tiers
            .iter()
            .find(|t| t.up_to.is_none_or(|up_to| n <= up_to))
            .or_else(|| tiers.last())
            .map_or(BackoffBand::fixed(Duration::ZERO), |t| t.band)
    }

    /// Computes the next wait for the `failures`-th consecutive failure.
    ///
    /// In progressive mode `prev` (the last interval of this streak) is used as
    /// a floor; in fixed mode it is ignored.
    pub fn next<R: Rng>(
        &self,
        rng: &mut R,
        failures: u32,
        progressive: bool,
        prev: Option<Duration>,
    ) -> Duration {
        let band = self.band_for(failures, progressive);
        let floor = if progressive { prev } else { None };
        band.sample(rng, floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    const OPS: [Operation; 4] = [
        Operation::SessionCreate,
        Operation::MessagePoll,
        Operation::KeepAlive,
        Operation::IdlePoll,
    ];

    #[test]
    fn every_count_lands_in_its_tier() {
        let mut rng = StdRng::seed_from_u64(1);
        for op in OPS {
            let policy = BackoffPolicy::for_operation(op);
            for progressive in [false, true] {
                for n in 1..=80 {
                    let band = policy.band_for(n, progressive);
                    let d = policy.next(&mut rng, n, progressive, None);
                    assert!(
                        band.contains(d),
                        "{op} n={n} progressive={progressive}: {d:?} outside {band:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn poll_fixed_schedule_has_two_steps() {
        let policy = BackoffPolicy::for_operation(Operation::MessagePoll);
        assert_eq!(policy.band_for(1, false), BackoffBand::secs(15, 30));
        assert_eq!(policy.band_for(5, false), BackoffBand::secs(15, 30));
        assert_eq!(policy.band_for(6, false), BackoffBand::secs(30, 60));
        assert_eq!(policy.band_for(500, false), BackoffBand::secs(30, 60));
    }

    #[test]
    fn fixed_create_and_keep_alive_are_constant() {
        let mut rng = StdRng::seed_from_u64(5);
        for op in [Operation::SessionCreate, Operation::KeepAlive] {
            let policy = BackoffPolicy::for_operation(op);
            for n in 1..50 {
                assert_eq!(
                    policy.next(&mut rng, n, false, Some(Duration::from_secs(200))),
                    Duration::from_secs(30)
                );
            }
        }
    }

    #[test]
    fn progressive_streak_never_shrinks() {
        let policy = BackoffPolicy::for_operation(Operation::MessagePoll);
        let mut rng = StdRng::seed_from_u64(42);
        let mut prev = None;
        for n in 1..=40 {
            let d = policy.next(&mut rng, n, true, prev);
            if let Some(p) = prev {
                assert!(d >= p, "n={n}: {d:?} < previous {p:?}");
            }
            prev = Some(d);
        }
    }

    #[test]
    fn zero_failures_uses_first_tier() {
        let policy = BackoffPolicy::for_operation(Operation::KeepAlive);
        assert_eq!(policy.band_for(0, true), BackoffBand::secs(5, 15));
    }

    #[test]
    fn empty_schedule_is_zero() {
        let policy = BackoffPolicy {
            progressive: Vec::new(),
            fixed: Vec::new(),
        };
        assert_eq!(policy.band_for(3, true), BackoffBand::fixed(Duration::ZERO));
    }
}
