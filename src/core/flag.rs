//! # Progressive-backoff gate.
//!
//! [`ProgressiveFlag`] reads a boolean feature flag at most once per process:
//! the first successful fetch is cached forever; a failed or slow fetch leaves
//! the gate at its default (`false`) and is retried on a later call.
//!
//! The fetch is raced against the caller's cancellation token, so a hanging
//! provider never holds a loop past shutdown.
//!
//! The cache is a tri-state atomic (unknown / off / on). Concurrent callers may
//! both fetch while it is unknown; the write is idempotent, so the race is benign.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::wait;
use crate::service::FeatureFlags;

const UNKNOWN: u8 = 0;
const OFF: u8 = 1;
const ON: u8 = 2;

/// Lazily fetched, write-once feature gate.
pub struct ProgressiveFlag {
    provider: Arc<dyn FeatureFlags>,
    name: String,
    timeout: Option<Duration>,
    state: AtomicU8,
}

impl ProgressiveFlag {
    pub fn new(provider: Arc<dyn FeatureFlags>, name: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            provider,
            name: name.into(),
            timeout,
            state: AtomicU8::new(UNKNOWN),
        }
    }

    /// Cached value, or `None` while it has never been fetched successfully.
    pub fn cached(&self) -> Option<bool> {
        match self.state.load(Ordering::Acquire) {
            ON => Some(true),
            OFF => Some(false),
            _ => None,
        }
    }

    /// Returns the gate, fetching it if it is still unknown.
    ///
    /// `None` means `token` fired before the fetch settled.
    pub async fn is_enabled(&self, token: &CancellationToken) -> Option<bool> {
        if let Some(v) = self.cached() {
            return Some(v);
        }

        let fetch = self.provider.get_flag(&self.name);
        let res = match self.timeout {
            Some(t) => match wait::or_cancel(tokio::time::timeout(t, fetch), token).await? {
                Ok(r) => r,
                Err(_elapsed) => {
                    tracing::debug!(flag = %self.name, timeout = ?t, "feature flag fetch timed out; using default");
                    return Some(false);
                }
            },
            None => wait::or_cancel(fetch, token).await?,
        };

        match res {
            Ok(state) => {
                let v = if state.effective_state { ON } else { OFF };
                self.state.store(v, Ordering::Release);
                tracing::debug!(flag = %self.name, enabled = state.effective_state, "feature flag resolved");
                Some(state.effective_state)
            }
            Err(e) => {
                tracing::debug!(flag = %self.name, error = %e, "feature flag fetch failed; using default");
                Some(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::service::FlagState;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct Scripted {
        calls: AtomicU32,
        fail_first: u32,
        value: bool,
    }

    #[async_trait]
    impl FeatureFlags for Scripted {
        async fn get_flag(&self, _name: &str) -> Result<FlagState, ServiceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(ServiceError::Network("flag service down".into()));
            }
            Ok(FlagState {
                effective_state: self.value,
            })
        }
    }

    struct Hangs;

    #[async_trait]
    impl FeatureFlags for Hangs {
        async fn get_flag(&self, _name: &str) -> Result<FlagState, ServiceError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn failure_keeps_default_then_caches_success() {
        let provider = Arc::new(Scripted {
            calls: AtomicU32::new(0),
            fail_first: 2,
            value: true,
        });
        let flag = ProgressiveFlag::new(provider.clone(), "gate", None);
        let token = CancellationToken::new();

        assert_eq!(flag.is_enabled(&token).await, Some(false));
        assert_eq!(flag.is_enabled(&token).await, Some(false));
        assert_eq!(flag.cached(), None);

        assert_eq!(flag.is_enabled(&token).await, Some(true));
        assert_eq!(flag.is_enabled(&token).await, Some(true));
        assert_eq!(flag.cached(), Some(true));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_does_not_block() {
        let flag = ProgressiveFlag::new(Arc::new(Hangs), "gate", Some(Duration::from_secs(10)));
        assert_eq!(flag.is_enabled(&CancellationToken::new()).await, Some(false));
        assert_eq!(flag.cached(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_unbounded_fetch() {
        let flag = ProgressiveFlag::new(Arc::new(Hangs), "gate", None);
        let token = CancellationToken::new();
        let t = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            t.cancel();
        });

        let started = tokio::time::Instant::now();
        assert_eq!(flag.is_enabled(&token).await, None);
        assert_eq!(started.elapsed(), Duration::from_millis(100));
        assert_eq!(flag.cached(), None);
    }
}
