//! # Logging subscriber.
//!
//! [`LogWriter`] renders listener events through `tracing`, one line per event,
//! under the `agent_listener::events` target. Connectivity transitions are
//! logged at `warn`/`info`; per-attempt noise stays at `debug`.
//!
//! ## Output format
//! ```text
//! [session-created] session=5f1c attempt=3
//! [connection-lost] op=message_poll err="network error: connection reset"
//! [backoff] op=message_poll delay_ms=21873 attempt=2 err="..."
//! [connection-restored] op=message_poll after=4
//! [message] session=5f1c id=118
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

const TARGET: &str = "agent_listener::events";

/// `tracing`-backed event subscriber.
///
/// Enabled via the `logging` feature.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let session = e.session.as_deref().unwrap_or("-");
        let op = e.operation.map_or("-", |op| op.as_label());
        let err = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::SessionCreating => {
                tracing::debug!(target: TARGET, "[session-creating] attempt={:?}", e.attempt);
            }
            EventKind::SessionCreated => {
                tracing::info!(target: TARGET, "[session-created] session={session} attempt={:?}", e.attempt);
            }
            EventKind::SessionCreateFailed => {
                tracing::error!(target: TARGET, "[session-create-failed] attempt={:?} err={err:?}", e.attempt);
            }
            EventKind::SessionExpired => {
                tracing::warn!(target: TARGET, "[session-expired] session={session} err={err:?}");
            }
            EventKind::SessionDeleted => {
                tracing::info!(target: TARGET, "[session-deleted] session={session} err={err:?}");
            }
            EventKind::ConnectionLost => {
                tracing::warn!(target: TARGET, "[connection-lost] op={op} err={err:?}");
            }
            EventKind::ConnectionRestored => {
                tracing::info!(target: TARGET, "[connection-restored] op={op} after={:?}", e.attempt);
            }
            EventKind::BackoffScheduled => {
                tracing::debug!(
                    target: TARGET,
                    "[backoff] op={op} delay_ms={:?} attempt={:?} err={err:?}",
                    e.delay_ms,
                    e.attempt
                );
            }
            EventKind::MessageReceived => {
                tracing::debug!(target: TARGET, "[message] session={session} id={:?}", e.message_id);
            }
            EventKind::MessageDeleted => {
                tracing::debug!(target: TARGET, "[message-deleted] session={session} id={:?} err={err:?}", e.message_id);
            }
            EventKind::DecryptFailed => {
                tracing::error!(target: TARGET, "[decrypt-failed] session={session} id={:?} err={err:?}", e.message_id);
            }
            EventKind::IdleHeartbeat => {
                tracing::info!(target: TARGET, "[idle] session={session} no message within {:?}", e.delay());
            }
            EventKind::KeepAliveSent => {
                tracing::trace!(target: TARGET, "[keep-alive] session={session}");
            }
            EventKind::KeepAliveFailed => {
                tracing::debug!(target: TARGET, "[keep-alive-failed] session={session} attempt={:?} err={err:?}", e.attempt);
            }
            EventKind::ShutdownRequested => {
                tracing::info!(target: TARGET, "[shutdown-requested]");
            }
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => {
                tracing::warn!(target: TARGET, "[subscriber] {:?} {err}", e.kind);
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
