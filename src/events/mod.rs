//! Listener events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `SessionManager`, `MessagePoller`, `KeepAliveLoop`,
//!   `Listener`, `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: `Listener::subscriber_listener()` (fans out to
//!   `SubscriberSet`), or any caller holding a `Bus::subscribe()` receiver.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
