//! Scripted in-memory collaborators shared by the integration suites.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use agent_listener::{
    AgentIdentity, AgentService, Bus, CapabilitySource, CredentialProvider, Credentials,
    FeatureFlags, FlagState, FlagsDisabled, ListenerConfig, Message, MessageCipher, MessagePoller, ProgressiveFlag,
    ServiceError, Session, SessionDescriptor, SessionKey, SessionManager,
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use tokio_util::sync::CancellationToken;

pub const POOL: u64 = 7;
pub const KEY: [u8; 32] = [0x5a; 32];
pub const IV: [u8; 12] = [3; 12];

/// Installs a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Records every call and answers from per-operation scripts.
///
/// An exhausted get-message script blocks until the call's token fires.
#[derive(Default)]
pub struct FakeService {
    creates: Mutex<VecDeque<Result<Session, ServiceError>>>,
    polls: Mutex<VecDeque<Result<Option<Message>, ServiceError>>>,
    pub create_calls: AtomicUsize,
    pub poll_calls: AtomicUsize,
    pub refreshes: AtomicUsize,
    pub connects: AtomicUsize,
    pub poll_args: Mutex<Vec<(String, Option<u64>)>>,
    pub deleted_sessions: Mutex<Vec<String>>,
    pub deleted_messages: Mutex<Vec<(u64, String)>>,
}

impl FakeService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn create(&self, res: Result<Session, ServiceError>) -> &Self {
        self.creates.lock().unwrap().push_back(res);
        self
    }

    pub fn poll(&self, res: Result<Option<Message>, ServiceError>) -> &Self {
        self.polls.lock().unwrap().push_back(res);
        self
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn deleted_message_ids(&self) -> Vec<u64> {
        self.deleted_messages
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| *id)
            .collect()
    }
}

#[async_trait]
impl AgentService for FakeService {
    async fn connect(&self, _endpoint: &str, _credentials: &Credentials) -> Result<(), ServiceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_session(
        &self,
        _pool_id: u64,
        _descriptor: &SessionDescriptor,
        _token: &CancellationToken,
    ) -> Result<Session, ServiceError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.creates.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(ServiceError::Network("create script exhausted".into())))
    }

    async fn delete_session(&self, _pool_id: u64, session_id: &str) -> Result<(), ServiceError> {
        self.deleted_sessions
            .lock()
            .unwrap()
            .push(session_id.to_string());
        Ok(())
    }

    async fn get_message(
        &self,
        _pool_id: u64,
        session_id: &str,
        last_message_id: Option<u64>,
        token: &CancellationToken,
    ) -> Result<Option<Message>, ServiceError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        self.poll_args
            .lock()
            .unwrap()
            .push((session_id.to_string(), last_message_id));
        let next = self.polls.lock().unwrap().pop_front();
        match next {
            Some(res) => res,
            None => {
                token.cancelled().await;
                Err(ServiceError::Canceled)
            }
        }
    }

    async fn delete_message(
        &self,
        _pool_id: u64,
        message_id: u64,
        session_id: &str,
    ) -> Result<(), ServiceError> {
        self.deleted_messages
            .lock()
            .unwrap()
            .push((message_id, session_id.to_string()));
        Ok(())
    }

    async fn refresh_connection(&self) -> Result<(), ServiceError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Credentials and identity; counts how often each snapshot is taken.
#[derive(Default)]
pub struct Host {
    pub credential_calls: AtomicUsize,
}

#[async_trait]
impl CredentialProvider for Host {
    async fn credentials(&self) -> Result<Credentials, ServiceError> {
        self.credential_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Credentials::new("Bearer", "agent-token"))
    }
}

#[async_trait]
impl CapabilitySource for Host {
    async fn identity(&self) -> Result<AgentIdentity, ServiceError> {
        Ok(AgentIdentity {
            id: 12,
            name: "builder-01".into(),
            version: "3.2.0".into(),
            os: "linux".into(),
        })
    }

    async fn capabilities(&self) -> Result<BTreeMap<String, String>, ServiceError> {
        Ok(BTreeMap::from([("docker".to_string(), "24.0".to_string())]))
    }
}

/// Feature-flag provider that either answers `value` or never answers.
pub struct Flags {
    value: Option<bool>,
    pub fetches: AtomicUsize,
}

impl Flags {
    pub fn on() -> Arc<Self> {
        Arc::new(Self {
            value: Some(true),
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn hanging() -> Arc<Self> {
        Arc::new(Self {
            value: None,
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeatureFlags for Flags {
    async fn get_flag(&self, _name: &str) -> Result<FlagState, ServiceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match self.value {
            Some(effective_state) => Ok(FlagState { effective_state }),
            None => std::future::pending().await,
        }
    }
}

pub fn config() -> ListenerConfig {
    ListenerConfig {
        pool_id: POOL,
        owner_name: "builder-01".into(),
        ..ListenerConfig::default()
    }
}

pub fn session(id: &str) -> Session {
    Session {
        session_id: id.into(),
        owner_name: "builder-01".into(),
        pool_id: POOL,
        encryption_key: None,
    }
}

pub fn encrypted_session(id: &str) -> Session {
    Session {
        encryption_key: Some(SessionKey {
            value: KEY.to_vec(),
            encrypted: false,
        }),
        ..session(id)
    }
}

pub fn message(id: u64, body: &str) -> Message {
    Message {
        message_id: id,
        message_type: "JobRequest".into(),
        body: body.into(),
        iv: None,
    }
}

/// A message whose body is `plaintext` sealed with [`KEY`] and [`IV`].
pub fn sealed(id: u64, plaintext: &str) -> Message {
    let cipher = Aes256Gcm::new_from_slice(&KEY).unwrap();
    let ct = cipher
        .encrypt(Nonce::from_slice(&IV), plaintext.as_bytes())
        .unwrap();
    Message {
        body: STANDARD.encode(ct),
        iv: Some(IV.to_vec()),
        ..message(id, "")
    }
}

pub fn manager(cfg: ListenerConfig, svc: Arc<FakeService>, host: Arc<Host>) -> SessionManager {
    manager_with_flags(cfg, svc, host, Arc::new(FlagsDisabled))
}

pub fn manager_with_flags(
    cfg: ListenerConfig,
    svc: Arc<FakeService>,
    host: Arc<Host>,
    flags: Arc<dyn FeatureFlags>,
) -> SessionManager {
    let flag = Arc::new(ProgressiveFlag::new(
        flags,
        cfg.flag_name.clone(),
        cfg.flag_bound(),
    ));
    SessionManager::new(
        Arc::new(cfg),
        svc,
        host.clone(),
        host,
        flag,
        Bus::new(1024),
    )
}

pub fn poller(cfg: ListenerConfig, svc: Arc<FakeService>) -> MessagePoller {
    MessagePoller::new(manager(cfg, svc, Arc::new(Host::default())), MessageCipher::default())
}

pub fn poller_with_flags(
    cfg: ListenerConfig,
    svc: Arc<FakeService>,
    flags: Arc<dyn FeatureFlags>,
) -> MessagePoller {
    let mgr = manager_with_flags(cfg, svc, Arc::new(Host::default()), flags);
    MessagePoller::new(mgr, MessageCipher::default())
}

/// Cancels `token` after `after` of (virtual) time.
pub fn cancel_after(token: &CancellationToken, after: std::time::Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        token.cancel();
    });
}
