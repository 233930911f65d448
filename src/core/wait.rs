//! Cancellable suspension points shared by the loops.
//!
//! Every wait in the engine goes through these helpers so a cancellation
//! aborts it immediately instead of after it elapses.

use std::future::Future;
use std::time::Duration;

use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::error::{ListenerError, ServiceError};

/// Sleeps for `delay`, or returns [`ListenerError::Canceled`] as soon as `token` fires.
pub(crate) async fn sleep(delay: Duration, token: &CancellationToken) -> Result<(), ListenerError> {
    let sleep = time::sleep(delay);
    tokio::pin!(sleep);
    select! {
        biased;
        _ = token.cancelled() => Err(ListenerError::Canceled),
        _ = &mut sleep => Ok(()),
    }
}

/// Races `fut` against `token`; `None` means cancellation won.
pub(crate) async fn or_cancel<F: Future>(fut: F, token: &CancellationToken) -> Option<F::Output> {
    select! {
        biased;
        _ = token.cancelled() => None,
        out = fut => Some(out),
    }
}

/// Runs a best-effort request under an optional bound.
pub(crate) async fn bounded<T, F>(
    operation: &'static str,
    bound: Option<Duration>,
    fut: F,
) -> Result<T, ListenerError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    let res = match bound {
        Some(timeout) => time::timeout(timeout, fut)
            .await
            .map_err(|_| ListenerError::Timeout { operation, timeout })?,
        None => fut.await,
    };
    res.map_err(|error| match error {
        ServiceError::Canceled => ListenerError::Canceled,
        error => ListenerError::Request { operation, error },
    })
}
