//! # Get-next-message loop.
//!
//! [`MessagePoller`] long-polls the live session for the next message after the
//! last one it delivered. Each iteration has two suspension points, the remote
//! call and the backoff sleep; both abort as soon as the token fires.
//!
//! ```text
//! loop:
//!   cancelled? ──► Err(Canceled)
//!   get_message(session, last_id)
//!     ├─ Ok(Some(m)) ─► stale (id ≤ last)? same as Ok(None)
//!     │                 decrypt ──► Ok(m) | Err(Decrypt) | Err(SessionKey)
//!     ├─ Ok(None)    ─► idle band sleep (+ heartbeat note every idle window)
//!     └─ Err(e) ─► classify_poll
//!           ├─ RecreateSession ─► SessionManager::recreate_session, continue
//!           ├─ Fatal           ─► Err(Fatal)
//!           ├─ Cancelled       ─► Err(Canceled)
//!           └─ Retryable       ─► refresh_connection, poll band sleep, continue
//! ```
//!
//! The high-water mark survives session recreation, so a message id that was
//! already delivered is never handed out again. A session key that cannot be
//! recovered stops the poller without marking the message delivered.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cipher::MessageCipher;
use crate::classify::Disposition;
use crate::core::session::SessionManager;
use crate::core::wait;
use crate::error::{ListenerError, ServiceError};
use crate::events::{Event, EventKind};
use crate::policies::{BackoffState, Operation};
use crate::service::{Message, Session};

/// Pulls messages from the live session, recovering from expiry and outages.
pub struct MessagePoller {
    manager: SessionManager,
    cipher: MessageCipher,
    backoff: BackoffState,
    idle: BackoffState,
    last_message_id: Option<u64>,
    inactivity_start: Instant,
    watched: Option<Arc<Session>>,
}

impl MessagePoller {
    pub fn new(manager: SessionManager, cipher: MessageCipher) -> Self {
        Self {
            manager,
            cipher,
            backoff: BackoffState::new(Operation::MessagePoll),
            idle: BackoffState::new(Operation::IdlePoll),
            last_message_id: None,
            inactivity_start: Instant::now(),
            watched: None,
        }
    }

    /// Replaces the poll and idle backoffs (tests use seeded ones).
    pub fn with_backoff(mut self, poll: BackoffState, idle: BackoffState) -> Self {
        self.backoff = poll;
        self.idle = idle;
        self
    }

    /// Returns the next undelivered message.
    ///
    /// Never times out on its own; returns only with a message, a fatal
    /// error, [`ListenerError::Decrypt`] for an unreadable message (already
    /// counted as delivered), [`ListenerError::SessionKey`] when the session
    /// key is unusable, or [`ListenerError::Canceled`].
    pub async fn next_message(&mut self, token: &CancellationToken) -> Result<Message, ListenerError> {
        loop {
            if token.is_cancelled() {
                return Err(ListenerError::Canceled);
            }
            let session = self.active_session()?;
            self.watch(&session);

            let polled = wait::or_cancel(
                self.manager.service().get_message(
                    self.manager.config().pool_id,
                    &session.session_id,
                    self.last_message_id,
                    token,
                ),
                token,
            )
            .await
            .ok_or(ListenerError::Canceled)?;

            match polled {
                Ok(Some(message)) => {
                    self.on_success();
                    match self.accept(&session, message)? {
                        Some(m) => return Ok(m),
                        None => self.idle_wait(&session, token).await?,
                    }
                }
                Ok(None) => {
                    self.on_success();
                    self.idle_wait(&session, token).await?;
                }
                Err(err) => self.on_failure(&session, err, token).await?,
            }
        }
    }

    /// Acknowledges a message on the live session, bounded by the delete timeout.
    pub async fn delete_message(&self, message_id: u64) -> Result<(), ListenerError> {
        let session = self.active_session()?;
        let res = wait::bounded(
            "delete_message",
            self.manager.config().delete_bound(),
            self.manager.service().delete_message(
                self.manager.config().pool_id,
                message_id,
                &session.session_id,
            ),
        )
        .await;

        let mut ev = Event::new(EventKind::MessageDeleted)
            .with_session(session.session_id.as_str())
            .with_message(message_id);
        if let Err(e) = &res {
            warn!(session = %session.session_id, message_id, error = %e, "failed to delete message");
            ev = ev.with_reason(e.as_message());
        } else {
            debug!(session = %session.session_id, message_id, "message deleted");
        }
        self.manager.bus().publish(ev);
        res
    }

    /// Highest message id delivered so far.
    pub fn last_message_id(&self) -> Option<u64> {
        self.last_message_id
    }

    pub fn backoff(&self) -> &BackoffState {
        &self.backoff
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut SessionManager {
        &mut self.manager
    }

    fn active_session(&self) -> Result<Arc<Session>, ListenerError> {
        match self.manager.current() {
            Some(s) if !s.session_id.is_empty() => Ok(s),
            _ => Err(ListenerError::NoSession),
        }
    }

    /// A new session starts its own inactivity window.
    fn watch(&mut self, session: &Arc<Session>) {
        if self.watched.as_ref().is_some_and(|w| Arc::ptr_eq(w, session)) {
            return;
        }
        self.inactivity_start = Instant::now();
        self.watched = Some(Arc::clone(session));
    }

    /// Decrypts and advances the high-water mark. `Ok(None)` means the
    /// message was already delivered and is skipped.
    fn accept(&mut self, session: &Session, message: Message) -> Result<Option<Message>, ListenerError> {
        let message_id = message.message_id;
        if self.last_message_id.is_some_and(|last| message_id <= last) {
            debug!(message_id, last = ?self.last_message_id, "skipping already delivered message");
            return Ok(None);
        }

        let decrypted = self.cipher.decrypt(session, message);
        if let Err(e) = &decrypted {
            error!(session = %session.session_id, message_id, error = %e, "failed to decrypt message");
            self.manager.bus().publish(
                Event::new(EventKind::DecryptFailed)
                    .with_session(session.session_id.as_str())
                    .with_message(message_id)
                    .with_reason(e.to_string()),
            );
            if e.is_key_failure() {
                return Err(ListenerError::SessionKey {
                    message_id,
                    reason: e.to_string(),
                });
            }
        }

        self.last_message_id = Some(message_id);
        self.inactivity_start = Instant::now();
        self.idle.reset();

        match decrypted {
            Ok(message) => {
                debug!(session = %session.session_id, message_id, kind = %message.message_type, "message received");
                self.manager.bus().publish(
                    Event::new(EventKind::MessageReceived)
                        .with_session(session.session_id.as_str())
                        .with_message(message_id),
                );
                Ok(Some(message))
            }
            Err(e) => Err(ListenerError::Decrypt {
                message_id,
                reason: e.to_string(),
            }),
        }
    }

    /// Nothing new to deliver: note inactivity, then sleep on the idle band.
    async fn idle_wait(&mut self, session: &Session, token: &CancellationToken) -> Result<(), ListenerError> {
        self.heartbeat(session);
        let progressive = self
            .manager
            .flag()
            .is_enabled(token)
            .await
            .ok_or(ListenerError::Canceled)?;
        let delay = self.idle.advance(progressive);
        wait::sleep(delay, token).await
    }

    fn on_success(&mut self) {
        let streak = self.backoff.failures();
        if streak == 0 {
            return;
        }
        info!(failures = streak, "connection restored; polling resumed");
        self.manager.bus().publish(
            Event::new(EventKind::ConnectionRestored)
                .with_operation(Operation::MessagePoll)
                .with_attempt(streak),
        );
        self.backoff.reset();
    }

    fn heartbeat(&mut self, session: &Session) {
        let Some(window) = self.manager.config().idle_heartbeat_interval() else {
            return;
        };
        if self.inactivity_start.elapsed() < window {
            return;
        }
        info!(session = %session.session_id, window = ?window, "no messages received; still listening");
        self.manager.bus().publish(
            Event::new(EventKind::IdleHeartbeat)
                .with_session(session.session_id.as_str())
                .with_delay(window),
        );
        self.inactivity_start = Instant::now();
    }

    async fn on_failure(
        &mut self,
        session: &Session,
        err: ServiceError,
        token: &CancellationToken,
    ) -> Result<(), ListenerError> {
        let recover = self.manager.config().session_recover_enabled();
        match self.manager.classifier().classify_poll(&err, recover) {
            Disposition::Cancelled => Err(ListenerError::Canceled),
            Disposition::Fatal | Disposition::CeilingReached { .. } => {
                error!(session = %session.session_id, error = %err, "polling stopped");
                Err(ListenerError::Fatal { error: err })
            }
            Disposition::RecreateSession => {
                warn!(session = %session.session_id, error = %err, "session expired; recreating");
                self.manager.bus().publish(
                    Event::new(EventKind::SessionExpired)
                        .with_session(session.session_id.as_str())
                        .with_reason(err.to_string()),
                );
                self.manager.recreate_session(token).await?;
                Ok(())
            }
            Disposition::Retryable => {
                let delay = self.schedule_retry(&err, token).await?;
                self.refresh(token).await?;
                wait::sleep(delay, token).await
            }
        }
    }

    async fn schedule_retry(
        &mut self,
        err: &ServiceError,
        token: &CancellationToken,
    ) -> Result<Duration, ListenerError> {
        let first = self.backoff.failures() == 0;
        let progressive = self
            .manager
            .flag()
            .is_enabled(token)
            .await
            .ok_or(ListenerError::Canceled)?;
        let delay = self.backoff.advance(progressive);

        let bus = self.manager.bus();
        if first {
            warn!(error = %err, "lost connection while polling; retrying until reconnected");
            bus.publish(
                Event::new(EventKind::ConnectionLost)
                    .with_operation(Operation::MessagePoll)
                    .with_reason(err.to_string()),
            );
        }
        debug!(
            attempt = self.backoff.failures(),
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "poll retry scheduled"
        );
        bus.publish(
            Event::new(EventKind::BackoffScheduled)
                .with_operation(Operation::MessagePoll)
                .with_attempt(self.backoff.failures())
                .with_delay(delay)
                .with_reason(err.to_string()),
        );
        Ok(delay)
    }

    /// Forces a fresh transport connection before the next poll.
    async fn refresh(&self, token: &CancellationToken) -> Result<(), ListenerError> {
        let cfg = self.manager.config();
        let bound = (!cfg.refresh_timeout.is_zero()).then_some(cfg.refresh_timeout);
        let res = wait::or_cancel(
            wait::bounded("refresh_connection", bound, self.manager.service().refresh_connection()),
            token,
        )
        .await
        .ok_or(ListenerError::Canceled)?;

        match res {
            Ok(()) => Ok(()),
            Err(ListenerError::Canceled) => Err(ListenerError::Canceled),
            Err(e) => {
                debug!(error = %e, "connection refresh failed");
                Ok(())
            }
        }
    }
}
