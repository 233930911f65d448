//! # Randomized wait bands.
//!
//! A [`BackoffBand`] is a closed interval `[min, max]`. Each retry waits for a
//! duration drawn uniformly from the band, which spreads reconnect storms when
//! many agents lose the service at the same moment.
//!
//! In progressive mode the previous interval acts as a floor: the draw never
//! goes below it (clamped to the band), so a failure streak never yields a
//! shorter wait than the one before it.

use rand::Rng;
use std::time::Duration;

/// Closed interval of wait durations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffBand {
    /// Shortest wait.
    pub min: Duration,
    /// Longest wait.
    pub max: Duration,
}

impl BackoffBand {
    /// Band spanning `[min_secs, max_secs]`.
    pub const fn secs(min_secs: u64, max_secs: u64) -> Self {
        Self {
            min: Duration::from_secs(min_secs),
            max: Duration::from_secs(max_secs),
        }
    }

    /// Degenerate band that always yields `d`.
    pub const fn fixed(d: Duration) -> Self {
        Self { min: d, max: d }
    }

    /// True when `d` lies inside the band.
    pub fn contains(&self, d: Duration) -> bool {
        d >= self.min && d <= self.max
    }

    /// Draws a wait uniformly from the band (millisecond resolution).
    ///
    /// `floor`, when given, raises the lower bound; it is clamped to the band
    /// so the result always satisfies [`BackoffBand::contains`].
    pub fn sample<R: Rng>(&self, rng: &mut R, floor: Option<Duration>) -> Duration {
        let (min, max) = if self.min <= self.max {
            (self.min, self.max)
        } else {
            (self.max, self.min)
        };
        let lo = floor.map_or(min, |f| f.clamp(min, max));

        let lo_ms = lo.as_millis() as u64;
        let hi_ms = max.as_millis() as u64;
        if lo_ms >= hi_ms {
            return lo;
        }
        Duration::from_millis(rng.random_range(lo_ms..=hi_ms))
    }
}
