//! # Collaborator contracts and the data they exchange.
//!
//! The engine consumes these traits and never implements them. A transport
//! crate supplies [`AgentService`]; the host process supplies credentials,
//! capabilities, feature flags and (optionally) a key unwrapper.
//!
//! ```text
//!   CredentialProvider ──► credentials ─┐
//!   CapabilitySource  ──► descriptor  ──┼──► AgentService::connect / create_session
//!                                       │
//!   AgentService::get_message ──► Message ──► MessageCipher (KeyUnwrap) ──► caller
//!   FeatureFlags::get_flag ──► progressive backoff gate
//! ```

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::cipher::CipherError;
use crate::error::ServiceError;

/// Symmetric key material attached to a session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey {
    /// Raw key bytes, or the wrapped form when `encrypted` is set.
    pub value: Vec<u8>,
    /// The value is wrapped with the agent's asymmetric key.
    pub encrypted: bool,
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("len", &self.value.len())
            .field("encrypted", &self.encrypted)
            .finish()
    }
}

/// A server-acknowledged work channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    /// Server-assigned identifier; empty means "no session".
    pub session_id: String,
    /// Name the session was opened under (usually the host name).
    pub owner_name: String,
    /// Pool the session belongs to.
    pub pool_id: u64,
    /// Present when the server encrypts message bodies.
    pub encryption_key: Option<SessionKey>,
}

impl Session {
    /// True when the session carries usable key material.
    pub fn has_key(&self) -> bool {
        self.encryption_key
            .as_ref()
            .is_some_and(|k| !k.value.is_empty())
    }
}

/// One unit of work delivered through a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Monotonic identifier within the pool.
    pub message_id: u64,
    /// Server-side message type tag (opaque to the engine).
    pub message_type: String,
    /// Body, base64 ciphertext while `iv` is set.
    pub body: String,
    /// Initialization vector for encrypted bodies.
    pub iv: Option<Vec<u8>>,
}

/// Who the agent claims to be.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AgentIdentity {
    pub id: u64,
    pub name: String,
    pub version: String,
    pub os: String,
}

/// Handshake payload for session creation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub owner_name: String,
    pub agent: AgentIdentity,
    pub capabilities: BTreeMap<String, String>,
}

/// Opaque credentials for [`AgentService::connect`].
#[derive(Clone)]
pub struct Credentials {
    pub scheme: String,
    pub token: Zeroizing<String>,
}

impl Credentials {
    pub fn new(scheme: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            token: Zeroizing::new(token.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("scheme", &self.scheme)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Result of a feature-flag lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlagState {
    pub effective_state: bool,
}

/// Remote orchestration service.
///
/// Implementations should honour `token` where they can; the engine also races
/// every call against cancellation, so an implementation that ignores it is
/// still abandoned promptly.
#[async_trait]
pub trait AgentService: Send + Sync + 'static {
    /// Establishes (or re-establishes) the underlying connection.
    async fn connect(&self, endpoint: &str, credentials: &Credentials) -> Result<(), ServiceError>;

    /// Opens a new session in `pool_id`.
    async fn create_session(
        &self,
        pool_id: u64,
        descriptor: &SessionDescriptor,
        token: &CancellationToken,
    ) -> Result<Session, ServiceError>;

    /// Closes a session. Bounded by the engine.
    async fn delete_session(&self, pool_id: u64, session_id: &str) -> Result<(), ServiceError>;

    /// Long-polls for the next message after `last_message_id`.
    ///
    /// `Ok(None)` means the server timed the poll out with nothing to deliver.
    async fn get_message(
        &self,
        pool_id: u64,
        session_id: &str,
        last_message_id: Option<u64>,
        token: &CancellationToken,
    ) -> Result<Option<Message>, ServiceError>;

    /// Acknowledges a message. Bounded by the engine.
    async fn delete_message(
        &self,
        pool_id: u64,
        message_id: u64,
        session_id: &str,
    ) -> Result<(), ServiceError>;

    /// Drops and re-opens the message-queue connection.
    async fn refresh_connection(&self) -> Result<(), ServiceError>;
}

/// Source of credentials for `connect`; called once per creation attempt.
#[async_trait]
pub trait CredentialProvider: Send + Sync + 'static {
    async fn credentials(&self) -> Result<Credentials, ServiceError>;
}

/// Agent identity and capability snapshot; called once per creation attempt.
#[async_trait]
pub trait CapabilitySource: Send + Sync + 'static {
    async fn identity(&self) -> Result<AgentIdentity, ServiceError>;
    async fn capabilities(&self) -> Result<BTreeMap<String, String>, ServiceError>;
}

/// Feature-flag lookup.
#[async_trait]
pub trait FeatureFlags: Send + Sync + 'static {
    async fn get_flag(&self, name: &str) -> Result<FlagState, ServiceError>;
}

/// Asymmetric key provider used to unwrap an encrypted session key.
pub trait KeyUnwrap: Send + Sync + 'static {
    fn unwrap_key(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, CipherError>;
}

/// Feature-flag provider that always reports the gate as off.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlagsDisabled;

#[async_trait]
impl FeatureFlags for FlagsDisabled {
    async fn get_flag(&self, _name: &str) -> Result<FlagState, ServiceError> {
        Ok(FlagState {
            effective_state: false,
        })
    }
}
