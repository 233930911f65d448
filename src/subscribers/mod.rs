//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait and the [`SubscriberSet`]
//! fan-out used by the [`Listener`](crate::Listener) to deliver events
//! published on the [`Bus`](crate::Bus).
//!
//! ```text
//! Event flow:
//!   SessionManager / MessagePoller / KeepAliveLoop ── publish(Event) ──► Bus
//!                                                                        │
//!                                              Listener::subscriber_listener
//!                                                                        │
//!                                                              SubscriberSet::emit
//!                                                         ┌──────────┼──────────┐
//!                                                         ▼          ▼          ▼
//!                                                     LogWriter   Console    Metrics ...
//! ```

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
