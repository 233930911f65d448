//! # Core subscriber trait
//!
//! `Subscribe` is the extension point for plugging operator-facing handlers
//! (console notices, metrics, alerting) into the listener. Each subscriber is
//! driven by a dedicated worker loop fed by a bounded queue owned by the
//! [`SubscriberSet`](crate::SubscriberSet).
//!
//! ## Contract
//! - Implementations may be slow (I/O, batching) – they do **not** block the
//!   polling loop nor other subscribers.
//! - Each subscriber **declares** its preferred queue capacity via
//!   [`Subscribe::queue_capacity`]. If a queue overflows, events for that
//!   subscriber are **dropped** and a `SubscriberOverflow` event is published.
//!
//! ## Example
//! ```rust
//! use agent_listener::{Event, EventKind, Subscribe};
//!
//! struct Console;
//!
//! #[async_trait::async_trait]
//! impl Subscribe for Console {
//!     async fn on_event(&self, ev: &Event) {
//!         match ev.kind {
//!             EventKind::ConnectionLost => eprintln!("lost connection, retrying until reconnected"),
//!             EventKind::ConnectionRestored => eprintln!("connection restored"),
//!             _ => {}
//!         }
//!     }
//!     fn name(&self) -> &'static str { "console" }
//! }
//! ```

use crate::events::Event;
use async_trait::async_trait;

/// Contract for event subscribers.
///
/// Called from a subscriber-dedicated worker task. Implementations should avoid
/// blocking the async runtime (prefer async I/O and cooperative waits).
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handle a single event for this subscriber.
    async fn on_event(&self, event: &Event);

    /// Human-readable name (for logs/metrics).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this subscriber's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
