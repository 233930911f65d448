//! # Listener: session + poll loop + keep-alive, wired together.
//!
//! The [`Listener`] owns the event bus, the subscribers and a [`MessagePoller`]
//! (which owns the [`SessionManager`]). It opens a session, hands each message
//! to a [`MessageHandler`] while a [`KeepAliveLoop`] guards the session, then
//! acknowledges the message.
//!
//! ```text
//! Listener::run(handler, token)
//!   ├─ subscriber_listener(): Bus.subscribe() ─► SubscriberSet::emit(&Event)
//!   ├─ SessionManager::create_session()          (Fatal → Err, Canceled → Ok)
//!   ├─ loop:
//!   │    MessagePoller::next_message()
//!   │      ├─ Ok(m)            ─► KeepAliveLoop on child token
//!   │      │                      handler.handle(m) ─► cancel keep-alive
//!   │      │                      delete_message(m.id)   (bounded, best-effort)
//!   │      │                      Break / cancelled ─► leave loop
//!   │      ├─ Err(Decrypt{id}) ─► delete_message(id), continue
//!   │      ├─ Err(Canceled)    ─► leave loop
//!   │      └─ Err(fatal)       ─► leave loop with error
//!   │         (SessionKey included; the message is not acknowledged)
//!   └─ SessionManager::delete_session()          (always)
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use std::ops::ControlFlow;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use agent_listener::{
//!     AgentService, CapabilitySource, CredentialProvider, HandlerFn, Listener, ListenerConfig,
//!     Message,
//! };
//!
//! async fn serve(
//!     service: Arc<dyn AgentService>,
//!     credentials: Arc<dyn CredentialProvider>,
//!     capabilities: Arc<dyn CapabilitySource>,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut listener = Listener::builder(ListenerConfig::from_env()?)
//!         .with_service(service)
//!         .with_credentials(credentials)
//!         .with_capabilities(capabilities)
//!         .build()?;
//!
//!     let handler = HandlerFn::arc("jobs", |msg: Message, _ctx: CancellationToken| async move {
//!         println!("job {}", msg.message_id);
//!         ControlFlow::Continue(())
//!     });
//!     listener.run_until_signal(handler).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cipher::MessageCipher;
use crate::config::ListenerConfig;
use crate::core::flag::ProgressiveFlag;
use crate::core::keepalive::KeepAliveLoop;
use crate::core::poller::MessagePoller;
use crate::core::session::SessionManager;
use crate::core::shutdown;
use crate::error::{ConfigError, ListenerError};
use crate::events::{Bus, Event, EventKind};
use crate::handler::MessageHandler;
use crate::service::{
    AgentService, CapabilitySource, CredentialProvider, FeatureFlags, FlagsDisabled, KeyUnwrap,
    Message,
};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Collects collaborators for a [`Listener`].
pub struct ListenerBuilder {
    cfg: ListenerConfig,
    service: Option<Arc<dyn AgentService>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    capabilities: Option<Arc<dyn CapabilitySource>>,
    flags: Arc<dyn FeatureFlags>,
    key_unwrap: Option<Arc<dyn KeyUnwrap>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl ListenerBuilder {
    pub fn with_service(mut self, service: Arc<dyn AgentService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Arc<dyn CapabilitySource>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Feature-flag provider for the progressive backoff gate (default: always off).
    pub fn with_flags(mut self, flags: Arc<dyn FeatureFlags>) -> Self {
        self.flags = flags;
        self
    }

    /// Unwrapper for session keys delivered in wrapped form.
    pub fn with_key_unwrap(mut self, unwrap: Arc<dyn KeyUnwrap>) -> Self {
        self.key_unwrap = Some(unwrap);
        self
    }

    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the listener. Service, credentials and capabilities are required.
    pub fn build(self) -> Result<Listener, ConfigError> {
        let service = self
            .service
            .ok_or_else(|| ConfigError::Missing("agent service".into()))?;
        let credentials = self
            .credentials
            .ok_or_else(|| ConfigError::Missing("credential provider".into()))?;
        let capabilities = self
            .capabilities
            .ok_or_else(|| ConfigError::Missing("capability source".into()))?;

        let cfg = Arc::new(self.cfg);
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let flag = Arc::new(ProgressiveFlag::new(
            self.flags,
            cfg.flag_name.clone(),
            cfg.flag_bound(),
        ));
        let manager = SessionManager::new(
            Arc::clone(&cfg),
            service,
            credentials,
            capabilities,
            flag,
            bus.clone(),
        );
        let poller = MessagePoller::new(manager, MessageCipher::new(self.key_unwrap));

        Ok(Listener {
            cfg,
            bus,
            subscribers: self.subscribers,
            poller,
        })
    }
}

/// Drives the session/message protocol for one agent.
pub struct Listener {
    cfg: Arc<ListenerConfig>,
    bus: Bus,
    subscribers: Vec<Arc<dyn Subscribe>>,
    poller: MessagePoller,
}

impl Listener {
    pub fn builder(cfg: ListenerConfig) -> ListenerBuilder {
        ListenerBuilder {
            cfg,
            service: None,
            credentials: None,
            capabilities: None,
            flags: Arc::new(FlagsDisabled),
            key_unwrap: None,
            subscribers: Vec::new(),
        }
    }

    /// Runs until `token` is cancelled, the handler breaks, or a fatal error.
    ///
    /// Cancellation is a clean exit. The session is deleted on every exit
    /// path, and subscribers have seen every event by the time this returns.
    pub async fn run(
        &mut self,
        handler: Arc<dyn MessageHandler>,
        token: CancellationToken,
    ) -> Result<(), ListenerError> {
        let stop = CancellationToken::new();
        let forwarder = self.subscriber_listener(stop.clone());

        let res = self.drive(handler.as_ref(), &token).await;
        self.poller.manager_mut().delete_session().await;

        stop.cancel();
        if let Some(h) = forwarder {
            let _ = h.await;
        }
        match res {
            Err(ListenerError::Canceled) => Ok(()),
            other => other,
        }
    }

    /// Like [`Listener::run`], cancelled by SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere).
    pub async fn run_until_signal(
        &mut self,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), ListenerError> {
        let token = CancellationToken::new();
        let signal = {
            let token = token.clone();
            let bus = self.bus.clone();
            tokio::spawn(async move {
                match shutdown::wait_for_shutdown_signal().await {
                    Ok(()) => {
                        info!("shutdown signal received");
                        bus.publish(Event::new(EventKind::ShutdownRequested));
                        token.cancel();
                    }
                    Err(e) => warn!(error = %e, "failed to install signal handlers"),
                }
            })
        };

        let res = self.run(handler, token).await;
        signal.abort();
        res
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.cfg
    }

    pub fn poller(&self) -> &MessagePoller {
        &self.poller
    }

    async fn drive(
        &mut self,
        handler: &dyn MessageHandler,
        token: &CancellationToken,
    ) -> Result<(), ListenerError> {
        self.poller.manager_mut().create_session(token).await?;

        loop {
            let message = match self.poller.next_message(token).await {
                Ok(m) => m,
                Err(ListenerError::Decrypt { message_id, reason }) => {
                    warn!(message_id, %reason, "discarding message that cannot be decrypted");
                    let _ = self.poller.delete_message(message_id).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let message_id = message.message_id;
            let flow = self.dispatch(handler, message, token).await;
            let _ = self.poller.delete_message(message_id).await;

            if flow.is_break() {
                info!(handler = handler.name(), "handler asked to stop listening");
                return Ok(());
            }
            if token.is_cancelled() {
                return Err(ListenerError::Canceled);
            }
        }
    }

    /// Runs the handler with a keep-alive loop guarding the session.
    async fn dispatch(
        &self,
        handler: &dyn MessageHandler,
        message: Message,
        token: &CancellationToken,
    ) -> std::ops::ControlFlow<()> {
        let manager = self.poller.manager();
        let keep_alive = KeepAliveLoop::new(
            Arc::clone(manager.service()),
            manager.subscribe(),
            Arc::clone(manager.flag()),
            Arc::clone(&self.cfg),
            self.bus.clone(),
        );
        let ka_token = token.child_token();
        let ka = tokio::spawn(keep_alive.run(ka_token.clone()));

        let flow = handler.handle(message, token.child_token()).await;

        ka_token.cancel();
        let _ = ka.await;
        flow
    }

    /// Forwards bus events to the subscribers until `stop` fires, then drains.
    fn subscriber_listener(&self, stop: CancellationToken) -> Option<JoinHandle<()>> {
        if self.subscribers.is_empty() {
            return None;
        }
        let mut rx = self.bus.subscribe();
        let set = SubscriberSet::new(self.subscribers.clone(), self.bus.clone());

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    ev = rx.recv() => match ev {
                        Ok(ev) => set.emit(&ev),
                        Err(RecvError::Lagged(n)) => {
                            warn!(skipped = n, "subscriber listener lagged; events dropped");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = stop.cancelled() => break,
                }
            }
            loop {
                match rx.try_recv() {
                    Ok(ev) => set.emit(&ev),
                    Err(TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
            set.shutdown().await;
        }))
    }
}
