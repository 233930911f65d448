//! Retry and wait policies.
//!
//! This module groups the knobs that control **how long** each loop waits
//! between attempts.
//!
//! ## Contents
//! - [`Operation`]      which loop a schedule belongs to
//! - [`BackoffBand`]    closed `[min, max]` interval sampled uniformly
//! - [`BackoffPolicy`]  tiered bands per failure count, progressive and fixed
//! - [`BackoffState`]   per-loop failure streak, last interval, seeded RNG
//!
//! ## Quick wiring
//! ```text
//! SessionManager ─► BackoffState(SessionCreate)
//! MessagePoller  ─► BackoffState(MessagePoll) + BackoffState(IdlePoll)
//! KeepAliveLoop  ─► BackoffState(KeepAlive)
//!      every loop: on failure → state.advance(flag.is_enabled(token)) → sleep (cancellable)
//!                  on success → state.reset()
//! ```

mod backoff;
mod band;
mod state;

pub use backoff::{BackoffPolicy, BackoffTier, Operation};
pub use band::BackoffBand;
pub use state::BackoffState;
