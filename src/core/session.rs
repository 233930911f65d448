//! # Session lifecycle.
//!
//! [`SessionManager`] opens, recreates and deletes the single live session of
//! this process. It owns the session-creation backoff and the conflict/skew
//! budgets; nothing else mutates them.
//!
//! ```text
//!   Idle ──create_session()──► Creating ──ok──► Active
//!    ▲                           │   ▲            │  │
//!    │                  fatal/   │   │ retryable  │  └─recreate_session()─► Recreating ──ok──► Active
//!    │                  cancel   │   └─ backoff ──┘                          │
//!    └───────────────────────────┴───────────────────── fatal/cancel ─────────┘
//!    ▲
//!    └──── Deleting ◄──delete_session()── Active
//! ```
//!
//! `Recreating` runs the same attempt loop as `Creating` and holds for the
//! whole recreation, backoff sleeps included.
//!
//! The live session is published through a `watch` channel: readers (the
//! poller, the keep-alive loop) always see either the previous session or the
//! new one, never a mix. The lifecycle state is published the same way.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classify::{Disposition, ErrorClassifier, SessionConflictTracker};
use crate::config::ListenerConfig;
use crate::core::flag::ProgressiveFlag;
use crate::core::wait;
use crate::error::{ListenerError, ServiceError};
use crate::events::{Bus, Event, EventKind};
use crate::policies::{BackoffState, Operation};
use crate::service::{AgentService, CapabilitySource, CredentialProvider, Session, SessionDescriptor};

/// Where the manager is in the session lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Creating,
    Active,
    Deleting,
    Recreating,
}

/// Owns session creation, recreation and teardown.
///
/// Methods take `&mut self`: one flow drives the manager, so the failure
/// budgets need no lock.
pub struct SessionManager {
    cfg: Arc<ListenerConfig>,
    service: Arc<dyn AgentService>,
    credentials: Arc<dyn CredentialProvider>,
    capabilities: Arc<dyn CapabilitySource>,
    flag: Arc<ProgressiveFlag>,
    classifier: ErrorClassifier,
    backoff: BackoffState,
    slot: watch::Sender<Option<Arc<Session>>>,
    state: watch::Sender<SessionState>,
    bus: Bus,
}

impl SessionManager {
    pub fn new(
        cfg: Arc<ListenerConfig>,
        service: Arc<dyn AgentService>,
        credentials: Arc<dyn CredentialProvider>,
        capabilities: Arc<dyn CapabilitySource>,
        flag: Arc<ProgressiveFlag>,
        bus: Bus,
    ) -> Self {
        let tracker = SessionConflictTracker::new(cfg.conflict_ceiling, cfg.skew_ceiling);
        let (slot, _) = watch::channel(None);
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            cfg,
            service,
            credentials,
            capabilities,
            flag,
            classifier: ErrorClassifier::new(tracker),
            backoff: BackoffState::new(Operation::SessionCreate),
            slot,
            state,
            bus,
        }
    }

    /// Replaces the creation backoff (tests use a seeded one).
    pub fn with_backoff(mut self, backoff: BackoffState) -> Self {
        self.backoff = backoff;
        self
    }

    /// Creates a session, retrying transient failures until it succeeds,
    /// a fatal outcome is reached, or `token` is cancelled.
    pub async fn create_session(
        &mut self,
        token: &CancellationToken,
    ) -> Result<Arc<Session>, ListenerError> {
        self.enter(SessionState::Creating, token).await
    }

    /// Opens a replacement for a session the server has expired.
    ///
    /// The expired session stays visible to readers until the new one is in
    /// place; it is not deleted remotely.
    pub async fn recreate_session(
        &mut self,
        token: &CancellationToken,
    ) -> Result<Arc<Session>, ListenerError> {
        if let Some(old) = self.current() {
            info!(session = %old.session_id, "recreating expired session");
        }
        self.enter(SessionState::Recreating, token).await
    }

    /// Best-effort remote delete, bounded by the configured delete timeout.
    ///
    /// No-op when there is no session or its identifier is empty; calling it
    /// again after a delete does nothing.
    pub async fn delete_session(&mut self) {
        let Some(session) = self.slot.send_replace(None) else {
            return;
        };
        if session.session_id.is_empty() {
            self.state.send_replace(SessionState::Idle);
            return;
        }

        self.state.send_replace(SessionState::Deleting);
        let res = wait::bounded(
            "delete_session",
            self.cfg.delete_bound(),
            self.service
                .delete_session(self.cfg.pool_id, &session.session_id),
        )
        .await;

        let mut ev = Event::new(EventKind::SessionDeleted).with_session(session.session_id.as_str());
        match res {
            Ok(()) => info!(session = %session.session_id, "session deleted"),
            Err(e) => {
                warn!(session = %session.session_id, error = %e, "failed to delete session");
                ev = ev.with_reason(e.as_message());
            }
        }
        self.bus.publish(ev);
        self.state.send_replace(SessionState::Idle);
    }

    /// The live session, if any.
    pub fn current(&self) -> Option<Arc<Session>> {
        self.slot.borrow().clone()
    }

    /// A receiver that observes every session swap.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Session>>> {
        self.slot.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// A receiver that observes every lifecycle transition.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn backoff(&self) -> &BackoffState {
        &self.backoff
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn service(&self) -> &Arc<dyn AgentService> {
        &self.service
    }

    pub fn config(&self) -> &Arc<ListenerConfig> {
        &self.cfg
    }

    pub fn flag(&self) -> &Arc<ProgressiveFlag> {
        &self.flag
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Runs the attempt loop under `phase`, landing in `Active` or `Idle`.
    async fn enter(
        &mut self,
        phase: SessionState,
        token: &CancellationToken,
    ) -> Result<Arc<Session>, ListenerError> {
        self.state.send_replace(phase);
        let res = self.create_loop(token).await;
        self.state.send_replace(match res {
            Ok(_) => SessionState::Active,
            Err(_) => SessionState::Idle,
        });
        res
    }

    async fn create_loop(&mut self, token: &CancellationToken) -> Result<Arc<Session>, ListenerError> {
        let mut attempt: u32 = 0;
        loop {
            if token.is_cancelled() {
                return Err(ListenerError::Canceled);
            }
            attempt = attempt.saturating_add(1);
            self.bus
                .publish(Event::new(EventKind::SessionCreating).with_attempt(attempt));

            let outcome = wait::or_cancel(self.try_create(token), token).await;
            let err = match outcome {
                None => return Err(ListenerError::Canceled),
                Some(Ok(session)) => return Ok(self.activate(session, attempt)),
                Some(Err(e)) => e,
            };

            match self.classifier.classify_create(&err) {
                Disposition::Cancelled => return Err(ListenerError::Canceled),
                Disposition::Fatal => {
                    return Err(self.fail(attempt, ListenerError::Fatal { error: err }));
                }
                Disposition::CeilingReached { category, elapsed } => {
                    return Err(self.fail(
                        attempt,
                        ListenerError::RetryCeiling {
                            category,
                            elapsed,
                            error: err,
                        },
                    ));
                }
                Disposition::Retryable | Disposition::RecreateSession => {
                    let delay = self.schedule_retry(attempt, &err, token).await?;
                    wait::sleep(delay, token).await?;
                }
            }
        }
    }

    /// One attempt: fresh credentials and descriptor, connect, create.
    async fn try_create(&self, token: &CancellationToken) -> Result<Session, ServiceError> {
        let credentials = self.credentials.credentials().await?;
        let descriptor = SessionDescriptor {
            owner_name: self.cfg.owner_name.clone(),
            agent: self.capabilities.identity().await?,
            capabilities: self.capabilities.capabilities().await?,
        };

        self.service.connect(&self.cfg.endpoint, &credentials).await?;
        let session = self
            .service
            .create_session(self.cfg.pool_id, &descriptor, token)
            .await?;
        if session.session_id.is_empty() {
            return Err(ServiceError::Service(
                "server returned a session without an identifier".into(),
            ));
        }
        Ok(session)
    }

    fn activate(&mut self, session: Session, attempt: u32) -> Arc<Session> {
        let streak = self.backoff.failures();
        if streak > 0 {
            info!(attempts = attempt, "connection restored; session created after failures");
            self.bus.publish(
                Event::new(EventKind::ConnectionRestored)
                    .with_operation(Operation::SessionCreate)
                    .with_attempt(streak),
            );
        }
        self.backoff.reset();
        self.classifier.reset();

        let session = Arc::new(session);
        info!(
            session = %session.session_id,
            pool = session.pool_id,
            encrypted = session.has_key(),
            "session created"
        );
        self.bus.publish(
            Event::new(EventKind::SessionCreated)
                .with_session(session.session_id.as_str())
                .with_attempt(attempt),
        );
        self.slot.send_replace(Some(Arc::clone(&session)));
        session
    }

    fn fail(&mut self, attempt: u32, err: ListenerError) -> ListenerError {
        error!(attempts = attempt, error = %err, "session creation failed");
        self.bus.publish(
            Event::new(EventKind::SessionCreateFailed)
                .with_attempt(attempt)
                .with_reason(err.as_message()),
        );
        err
    }

    async fn schedule_retry(
        &mut self,
        attempt: u32,
        err: &ServiceError,
        token: &CancellationToken,
    ) -> Result<std::time::Duration, ListenerError> {
        let first = self.backoff.failures() == 0;
        let progressive = self
            .flag
            .is_enabled(token)
            .await
            .ok_or(ListenerError::Canceled)?;
        let delay = self.backoff.advance(progressive);

        if first {
            warn!(error = %err, "failed to create session; retrying until the service is reachable");
            self.bus.publish(
                Event::new(EventKind::ConnectionLost)
                    .with_operation(Operation::SessionCreate)
                    .with_reason(err.to_string()),
            );
        }
        debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "session creation retry scheduled"
        );
        self.bus.publish(
            Event::new(EventKind::BackoffScheduled)
                .with_operation(Operation::SessionCreate)
                .with_attempt(self.backoff.failures())
                .with_delay(delay)
                .with_reason(err.to_string()),
        );
        Ok(delay)
    }
}
