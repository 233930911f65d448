//! # Keep-alive heartbeat.
//!
//! While a message is being handled nobody polls, so the server could evict
//! the session as idle. [`KeepAliveLoop`] issues a throw-away `get_message`
//! every `keep_alive_interval` against whatever session is currently
//! published.
//!
//! It never recreates a session and never gives up: failures are retried on
//! the keep-alive band until the token fires. A dead session is left for the
//! next real poll to discover.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ListenerConfig;
use crate::core::flag::ProgressiveFlag;
use crate::core::wait;
use crate::error::ServiceError;
use crate::events::{Bus, Event, EventKind};
use crate::policies::{BackoffState, Operation};
use crate::service::{AgentService, Session};

/// Periodic no-op poll that keeps the live session from idling out.
pub struct KeepAliveLoop {
    service: Arc<dyn AgentService>,
    session: watch::Receiver<Option<Arc<Session>>>,
    flag: Arc<ProgressiveFlag>,
    cfg: Arc<ListenerConfig>,
    bus: Bus,
    backoff: BackoffState,
}

impl KeepAliveLoop {
    pub fn new(
        service: Arc<dyn AgentService>,
        session: watch::Receiver<Option<Arc<Session>>>,
        flag: Arc<ProgressiveFlag>,
        cfg: Arc<ListenerConfig>,
        bus: Bus,
    ) -> Self {
        Self {
            service,
            session,
            flag,
            cfg,
            bus,
            backoff: BackoffState::new(Operation::KeepAlive),
        }
    }

    /// Replaces the keep-alive backoff (tests use a seeded one).
    pub fn with_backoff(mut self, backoff: BackoffState) -> Self {
        self.backoff = backoff;
        self
    }

    /// Runs until `token` is cancelled. The first ping happens one interval in;
    /// a zero interval disables the loop.
    pub async fn run(mut self, token: CancellationToken) {
        let mut delay = self.cfg.keep_alive_interval;
        if delay.is_zero() {
            return;
        }
        loop {
            if wait::sleep(delay, &token).await.is_err() {
                return;
            }
            delay = match self.ping(&token).await {
                Some(next) => next,
                None => return,
            };
        }
    }

    /// One round trip; returns the wait before the next one, `None` on cancellation.
    async fn ping(&mut self, token: &CancellationToken) -> Option<Duration> {
        let current = self.session.borrow_and_update().clone();
        let Some(session) = current.filter(|s| !s.session_id.is_empty()) else {
            debug!("keep-alive skipped; no live session");
            return Some(self.cfg.keep_alive_interval);
        };

        let res = wait::or_cancel(
            self.service
                .get_message(self.cfg.pool_id, &session.session_id, None, token),
            token,
        )
        .await?;

        match res {
            Ok(_) => {
                let streak = self.backoff.failures();
                if streak > 0 {
                    info!(session = %session.session_id, failures = streak, "keep-alive recovered");
                    self.bus.publish(
                        Event::new(EventKind::ConnectionRestored)
                            .with_operation(Operation::KeepAlive)
                            .with_attempt(streak),
                    );
                    self.backoff.reset();
                }
                debug!(session = %session.session_id, "keep-alive sent");
                self.bus.publish(
                    Event::new(EventKind::KeepAliveSent).with_session(session.session_id.as_str()),
                );
                Some(self.cfg.keep_alive_interval)
            }
            Err(ServiceError::Canceled) => None,
            Err(e) => {
                let first = self.backoff.failures() == 0;
                let progressive = self.flag.is_enabled(token).await?;
                let delay = self.backoff.advance(progressive);
                if first {
                    warn!(session = %session.session_id, error = %e, "keep-alive failed; retrying");
                } else {
                    debug!(
                        session = %session.session_id,
                        attempt = self.backoff.failures(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "keep-alive failed again"
                    );
                }
                self.bus.publish(
                    Event::new(EventKind::KeepAliveFailed)
                        .with_operation(Operation::KeepAlive)
                        .with_session(session.session_id.as_str())
                        .with_attempt(self.backoff.failures())
                        .with_delay(delay)
                        .with_reason(e.to_string()),
                );
                Some(delay)
            }
        }
    }
}
