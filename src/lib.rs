//! # agent-listener
//!
//! **agent-listener** is the session/message protocol engine of a build agent.
//!
//! It opens a work session with a remote orchestration service, long-polls
//! that session for job messages, decrypts encrypted bodies, and keeps the
//! session alive while a job runs. Network outages, session conflicts, clock
//! skew and server-side session expiry are absorbed without operator action;
//! only registration/authorization failures and exhausted conflict/skew
//! budgets stop it.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  CredentialProvider   CapabilitySource   FeatureFlags     KeyUnwrap
//!          │                   │                │               │
//!          ▼                   ▼                ▼               ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Listener (facade)                                                │
//! │  - Bus (broadcast events)                                         │
//! │  - SubscriberSet (fans out to user subscribers)                   │
//! │  - MessagePoller ─► SessionManager ─► ErrorClassifier             │
//! │                         │                 └► SessionConflictTracker│
//! │                         └► watch<Session> ─► KeepAliveLoop         │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        │ SessionCreated   │ MessageReceived  │ KeepAliveSent │
//!        │ ConnectionLost   │ SessionExpired   │ KeepAlive     │
//!        │ BackoffSched.    │ DecryptFailed    │   Failed      │
//!        ▼                  ▼                  ▼               ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! │                 (capacity: ListenerConfig::bus_capacity)          │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                       ┌────────────────────────┐
//!                       │  subscriber_listener   │
//!                       │     (in Listener)      │
//!                       └───────────┬────────────┘
//!                                   ▼
//!                             SubscriberSet
//!                          ┌─────────┼─────────┐
//!                          ▼         ▼         ▼
//!                       worker1   worker2   workerN
//! ```
//!
//! ### Lifecycle
//! ```text
//! create_session:
//!   loop {
//!     ├─► gather credentials + descriptor, connect, create
//!     ├─ Ok  ──► reset backoff + budgets, publish SessionCreated
//!     └─ Err ──► ErrorClassifier::classify_create
//!                ├─ Fatal / ceiling reached ─► SessionCreateFailed, return Err
//!                ├─ Cancelled               ─► return Err(Canceled)
//!                └─ Retryable               ─► backoff, sleep (cancellable), continue
//!   }
//!
//! next_message:
//!   loop {
//!     ├─► get_message(session, last_id)
//!     ├─ message   ─► advance high-water, decrypt, return
//!     ├─ empty     ─► idle band sleep
//!     └─ Err ──► ErrorClassifier::classify_poll
//!                ├─ SessionExpired ─► recreate session, continue
//!                ├─ Fatal          ─► return Err
//!                └─ Retryable      ─► refresh connection, sleep, continue
//!   }
//! ```
//!
//! ## Features
//! | Area              | Description                                                     | Key types / traits                          |
//! |-------------------|-----------------------------------------------------------------|---------------------------------------------|
//! | **Collaborators** | Remote service, credentials, identity, flags, key unwrapping.   | [`AgentService`], [`CredentialProvider`]    |
//! | **Sessions**      | Create / recreate / delete with conflict and skew budgets.      | [`SessionManager`], [`ErrorClassifier`]     |
//! | **Messages**      | Long-poll loop, high-water mark, opportunistic decryption.      | [`MessagePoller`], [`MessageCipher`]        |
//! | **Keep-alive**    | Heartbeat while a message is handled.                           | [`KeepAliveLoop`]                           |
//! | **Policies**      | Tiered, jittered backoff per operation.                         | [`BackoffPolicy`], [`BackoffState`]         |
//! | **Subscriber API**| Hook into connectivity and message events.                      | [`Subscribe`], [`Event`]                    |
//! | **Errors**        | Typed service and listener errors.                              | [`ServiceError`], [`ListenerError`]         |
//! | **Configuration** | Defaults plus `AGENT_LISTENER_*` overrides.                     | [`ListenerConfig`]                          |
//!
//! ## Optional features
//! - `logging`: exports a `tracing`-backed [`LogWriter`] subscriber.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use agent_listener::{BackoffState, Operation};
//!
//! let mut poll = BackoffState::seeded(Operation::MessagePoll, 42);
//! let first = poll.advance(false);
//! assert!(first >= Duration::from_secs(15) && first <= Duration::from_secs(30));
//! poll.reset();
//! assert_eq!(poll.failures(), 0);
//! ```
mod cipher;
mod classify;
mod config;
mod core;
mod error;
mod events;
mod handler;
mod policies;
mod service;
mod subscribers;

// ---- Public re-exports ----

pub use cipher::{CipherError, IV_LEN, MessageCipher};
pub use classify::{
    Budget, CLOCK_SKEW_MARKER, Disposition, ErrorClassifier, FailureCategory,
    SessionConflictTracker, Stopwatch,
};
pub use config::ListenerConfig;
pub use core::{
    KeepAliveLoop, Listener, ListenerBuilder, MessagePoller, ProgressiveFlag, SessionManager,
    SessionState,
};
pub use error::{ConfigError, ListenerError, ServiceError};
pub use events::{Bus, Event, EventKind};
pub use handler::{HandlerFn, MessageHandler};
pub use policies::{BackoffBand, BackoffPolicy, BackoffState, BackoffTier, Operation};
pub use service::{
    AgentIdentity, AgentService, CapabilitySource, CredentialProvider, Credentials, FeatureFlags,
    FlagState, FlagsDisabled, KeyUnwrap, Message, Session, SessionDescriptor, SessionKey,
};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: a `tracing`-backed event subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
