//! Error types used by the listener engine and its collaborators.
//!
//! This module defines three enums:
//!
//! - [`ServiceError`]: failures reported by the remote orchestration service
//!   (and the other collaborators), mapped into a closed vocabulary.
//! - [`ListenerError`]: outcomes the engine surfaces to its caller.
//! - [`ConfigError`]: invalid or missing configuration values.
//!
//! All of them provide `as_label` for logs/metrics; [`ListenerError`] also has
//! `as_message` and predicates such as [`ListenerError::is_fatal`].

use std::time::Duration;
use thiserror::Error;

use crate::classify::FailureCategory;

/// # Failures reported by the remote service.
///
/// Transport implementations translate whatever their RPC layer throws into
/// one of these variants. The engine never inspects anything but the variant
/// (and, for [`ServiceError::TokenRequest`], the server-supplied text).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The agent registration no longer exists on the server.
    #[error("agent is not registered: {0}")]
    AgentNotFound(String),

    /// The agent pool (machine group) does not exist.
    #[error("agent pool not found: {0}")]
    PoolNotFound(String),

    /// The credentials are valid but lack permission.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The credentials were rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Another live session already exists for this agent.
    #[error("session conflict: {0}")]
    SessionConflict(String),

    /// The session was evicted server-side.
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// The OAuth token request failed; the text is whatever the server returned.
    #[error("token request failed: {0}")]
    TokenRequest(String),

    /// The access token was revoked or expired and cannot be refreshed here.
    #[error("access token revoked: {0}")]
    TokenRevoked(String),

    /// Connection-level failure (DNS, TCP, TLS, reset).
    #[error("network error: {0}")]
    Network(String),

    /// Any other server-side failure.
    #[error("service error: {0}")]
    Service(String),

    /// The call was abandoned because cancellation was requested.
    #[error("operation cancelled")]
    Canceled,
}

impl ServiceError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use agent_listener::ServiceError;
    ///
    /// let err = ServiceError::SessionConflict("held by host-a".into());
    /// assert_eq!(err.as_label(), "session_conflict");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceError::AgentNotFound(_) => "agent_not_found",
            ServiceError::PoolNotFound(_) => "pool_not_found",
            ServiceError::AccessDenied(_) => "access_denied",
            ServiceError::Unauthorized(_) => "unauthorized",
            ServiceError::SessionConflict(_) => "session_conflict",
            ServiceError::SessionExpired(_) => "session_expired",
            ServiceError::TokenRequest(_) => "token_request",
            ServiceError::TokenRevoked(_) => "token_revoked",
            ServiceError::Network(_) => "network",
            ServiceError::Service(_) => "service",
            ServiceError::Canceled => "canceled",
        }
    }
}

/// # Errors surfaced by the listener engine.
///
/// Retryable failures never appear here: the engine retries them internally.
/// What reaches the caller is either terminal for the current operation or a
/// cancellation, which callers treat as a graceful stop.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ListenerError {
    /// Non-recoverable service failure (no retry).
    #[error("fatal service error (no retry): {error}")]
    Fatal {
        /// The failure that was classified as fatal.
        error: ServiceError,
    },

    /// A recurring failure category used up its wall-clock retry budget.
    #[error("{category} retries exhausted after {elapsed:?}: {error}")]
    RetryCeiling {
        /// Category whose ceiling was reached.
        category: FailureCategory,
        /// Time accumulated in that category.
        elapsed: Duration,
        /// The last failure observed.
        error: ServiceError,
    },

    /// A message operation was attempted without an active session.
    #[error("no active session")]
    NoSession,

    /// A delivered message could not be decrypted.
    ///
    /// The message is not re-delivered; the session stays usable.
    #[error("message {message_id} could not be decrypted: {reason}")]
    Decrypt {
        /// Identifier of the poisoned message.
        message_id: u64,
        /// Why decryption failed.
        reason: String,
    },

    /// The session key could not be recovered; no message on the session is
    /// readable. The message is left undelivered.
    #[error("session key unusable at message {message_id}: {reason}")]
    SessionKey {
        /// Identifier of the message that exposed the failure.
        message_id: u64,
        /// Why the key was rejected.
        reason: String,
    },

    /// A best-effort request (delete session/message) failed.
    #[error("{operation} failed: {error}")]
    Request {
        /// Name of the operation.
        operation: &'static str,
        /// The service failure.
        error: ServiceError,
    },

    /// A bounded cleanup call did not finish in time.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Name of the operation.
        operation: &'static str,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// Cancellation was requested.
    #[error("operation cancelled")]
    Canceled,
}

impl ListenerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use agent_listener::ListenerError;
    ///
    /// assert_eq!(ListenerError::NoSession.as_label(), "listener_no_session");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ListenerError::Fatal { .. } => "listener_fatal",
            ListenerError::RetryCeiling { .. } => "listener_retry_ceiling",
            ListenerError::NoSession => "listener_no_session",
            ListenerError::Decrypt { .. } => "listener_decrypt",
            ListenerError::SessionKey { .. } => "listener_session_key",
            ListenerError::Request { .. } => "listener_request",
            ListenerError::Timeout { .. } => "listener_timeout",
            ListenerError::Canceled => "listener_canceled",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            ListenerError::Fatal { error } => format!("fatal: {error}"),
            ListenerError::RetryCeiling {
                category,
                elapsed,
                error,
            } => format!("{category} ceiling reached after {elapsed:?}: {error}"),
            ListenerError::NoSession => "no active session".to_string(),
            ListenerError::Decrypt { message_id, reason } => {
                format!("decrypt failed for message {message_id}: {reason}")
            }
            ListenerError::SessionKey { message_id, reason } => {
                format!("session key unusable at message {message_id}: {reason}")
            }
            ListenerError::Request { operation, error } => format!("{operation}: {error}"),
            ListenerError::Timeout { operation, timeout } => {
                format!("{operation} timed out after {timeout:?}")
            }
            ListenerError::Canceled => "cancelled".to_string(),
        }
    }

    /// True for [`ListenerError::Canceled`].
    pub fn is_canceled(&self) -> bool {
        matches!(self, ListenerError::Canceled)
    }

    /// True when the listener must stop: service rejection, exhausted ceiling
    /// or an unusable session key.
    ///
    /// # Example
    /// ```
    /// use agent_listener::{ListenerError, ServiceError};
    ///
    /// let fatal = ListenerError::Fatal { error: ServiceError::AccessDenied("pool 7".into()) };
    /// assert!(fatal.is_fatal());
    /// assert!(!ListenerError::Canceled.is_fatal());
    /// ```
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ListenerError::Fatal { .. }
                | ListenerError::RetryCeiling { .. }
                | ListenerError::SessionKey { .. }
        )
    }
}

/// # Configuration errors.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set but could not be parsed.
    #[error("invalid value for {key}: {message}")]
    InvalidValue {
        /// Environment variable name.
        key: String,
        /// Parser message.
        message: String,
    },

    /// A required variable was not set.
    #[error("missing required setting {0}")]
    Missing(String),
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::InvalidValue { .. } => "config_invalid_value",
            ConfigError::Missing(_) => "config_missing",
        }
    }
}
