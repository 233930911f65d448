//! # Message handler and closure-backed implementation.
//!
//! [`MessageHandler`] is what the [`Listener`](crate::Listener) hands each
//! delivered message to. [`HandlerFn`] wraps a closure
//! `F: Fn(Message, CancellationToken) -> Fut`, producing a fresh future per
//! message; shared state goes behind an explicit `Arc` inside the closure.
//!
//! A handler returns [`ControlFlow::Continue`] to keep listening or
//! [`ControlFlow::Break`] to stop the listener after this message is acknowledged.
//!
//! ## Example
//! ```rust
//! use std::ops::ControlFlow;
//! use tokio_util::sync::CancellationToken;
//! use agent_listener::{HandlerFn, Message, MessageHandler};
//!
//! let h = HandlerFn::arc("echo", |msg: Message, _ctx: CancellationToken| async move {
//!     println!("{}: {}", msg.message_type, msg.body);
//!     ControlFlow::Continue(())
//! });
//! assert_eq!(h.name(), "echo");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::service::Message;

/// Processes one delivered message.
///
/// `ctx` is cancelled when the listener shuts down; long-running handlers
/// should watch it and return promptly.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Stable, human-readable name for logs.
    fn name(&self) -> &str {
        "handler"
    }

    async fn handle(&self, message: Message, ctx: CancellationToken) -> ControlFlow<()>;
}

/// Closure-backed handler.
#[derive(Debug)]
pub struct HandlerFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> HandlerFn<F> {
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { name: name.into(), f }
    }

    /// Creates the handler behind an `Arc`.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(Message, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ControlFlow<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, message: Message, ctx: CancellationToken) -> ControlFlow<()> {
        (self.f)(message, ctx).await
    }
}
