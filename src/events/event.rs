//! # Events emitted by the session manager, poller and keep-alive loop.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Session events**: creation attempts, creation, expiry, deletion
//! - **Connectivity events**: first failure of a streak, recovery, scheduled backoff
//! - **Message events**: delivery, deletion, decrypt failure, idle heartbeat, keep-alive
//!
//! Connectivity transitions are the operator-facing hooks: `ConnectionLost` is
//! published once at the start of a failure streak and `ConnectionRestored`
//! once when it ends, never per attempt.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use agent_listener::{Event, EventKind, Operation};
//!
//! let ev = Event::new(EventKind::BackoffScheduled)
//!     .with_operation(Operation::MessagePoll)
//!     .with_attempt(3)
//!     .with_delay(Duration::from_secs(20))
//!     .with_reason("connection reset");
//!
//! assert_eq!(ev.kind, EventKind::BackoffScheduled);
//! assert_eq!(ev.delay_ms, Some(20_000));
//! assert_eq!(ev.reason.as_deref(), Some("connection reset"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::policies::Operation;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of listener events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Session events ===
    /// A creation attempt is starting.
    ///
    /// Sets: `attempt`
    SessionCreating,

    /// Session established.
    ///
    /// Sets: `session`, `attempt`
    SessionCreated,

    /// Session creation stopped with a fatal outcome.
    ///
    /// Sets: `attempt`, `reason`
    SessionCreateFailed,

    /// The server evicted the session; recreation follows.
    ///
    /// Sets: `session`, `reason`
    SessionExpired,

    /// Session deleted (or the delete was attempted and gave up).
    ///
    /// Sets: `session`, `reason` (only when the delete failed)
    SessionDeleted,

    // === Connectivity events ===
    /// First failure of a streak for an operation.
    ///
    /// Sets: `operation`, `reason`
    ConnectionLost,

    /// First success after a failure streak.
    ///
    /// Sets: `operation`, `attempt` (failures in the streak)
    ConnectionRestored,

    /// Next attempt scheduled after a failure.
    ///
    /// Sets: `operation`, `attempt`, `delay_ms`, `reason`
    BackoffScheduled,

    // === Message events ===
    /// A message was delivered to the caller.
    ///
    /// Sets: `session`, `message_id`
    MessageReceived,

    /// A message was acknowledged.
    ///
    /// Sets: `session`, `message_id`, `reason` (only when the delete failed)
    MessageDeleted,

    /// A message body could not be decrypted.
    ///
    /// Sets: `session`, `message_id`, `reason`
    DecryptFailed,

    /// No message arrived within the idle heartbeat window.
    ///
    /// Sets: `session`, `delay_ms` (window length)
    IdleHeartbeat,

    /// Keep-alive round trip succeeded.
    ///
    /// Sets: `session`
    KeepAliveSent,

    /// Keep-alive round trip failed (retried indefinitely).
    ///
    /// Sets: `session`, `attempt`, `delay_ms`, `reason`
    KeepAliveFailed,

    // === Runtime events ===
    /// Shutdown requested (OS signal observed).
    ShutdownRequested,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `reason`
    SubscriberOverflow,

    /// Subscriber panicked during event processing.
    ///
    /// Sets: `reason`
    SubscriberPanicked,
}

/// Listener event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Operation the event belongs to.
    pub operation: Option<Operation>,
    /// Session identifier, if applicable.
    pub session: Option<Arc<str>>,
    /// Message identifier, if applicable.
    pub message_id: Option<u64>,
    /// Attempt or streak count (starting from 1).
    pub attempt: Option<u32>,
    /// Backoff delay or window in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            operation: None,
            session: None,
            message_id: None,
            attempt: None,
            delay_ms: None,
            reason: None,
        }
    }

    #[inline]
    pub fn with_operation(mut self, op: Operation) -> Self {
        self.operation = Some(op);
        self
    }

    #[inline]
    pub fn with_session(mut self, session: impl Into<Arc<str>>) -> Self {
        self.session = Some(session.into());
        self
    }

    #[inline]
    pub fn with_message(mut self, message_id: u64) -> Self {
        self.message_id = Some(message_id);
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds, saturating).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} panic={info}"))
    }

    /// Delay as a [`Duration`], if set.
    pub fn delay(&self) -> Option<Duration> {
        self.delay_ms.map(|ms| Duration::from_millis(u64::from(ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::new(EventKind::SessionCreating);
        let b = Event::new(EventKind::SessionCreated);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn delay_saturates() {
        let ev = Event::new(EventKind::BackoffScheduled).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
        let ev = Event::new(EventKind::IdleHeartbeat).with_delay(Duration::from_secs(1800));
        assert_eq!(ev.delay(), Some(Duration::from_secs(1800)));
    }
}
