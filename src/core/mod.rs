//! Runtime core: the protocol loops and the facade that wires them.
//!
//! Public surface:
//! - [`Listener`] / [`ListenerBuilder`]: end-to-end driver;
//! - [`SessionManager`]: create / recreate / delete the live session;
//! - [`MessagePoller`]: the get-next-message loop;
//! - [`KeepAliveLoop`]: heartbeat while a message is being handled;
//! - [`ProgressiveFlag`]: lazily fetched progressive-backoff gate.
//!
//! Internal modules:
//! - [`wait`]: cancellable sleeps and bounded requests;
//! - [`shutdown`]: cross-platform termination signals.

mod flag;
mod keepalive;
mod listener;
mod poller;
mod session;
mod shutdown;
mod wait;

pub use flag::ProgressiveFlag;
pub use keepalive::KeepAliveLoop;
pub use listener::{Listener, ListenerBuilder};
pub use poller::MessagePoller;
pub use session::{SessionManager, SessionState};
