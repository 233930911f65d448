mod common;

use std::sync::Arc;
use std::time::Duration;

use agent_listener::{
    CipherError, EventKind, KeyUnwrap, ListenerError, MessageCipher, MessagePoller, ServiceError,
    Session, SessionKey,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use common::{
    FakeService, Flags, Host, IV, KEY, cancel_after, config, encrypted_session, manager, message,
    poller, poller_with_flags, sealed, session,
};

async fn started(p: &mut MessagePoller, token: &CancellationToken) {
    p.manager_mut().create_session(token).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn delivers_in_order_and_skips_stale_ids() {
    common::init_tracing();
    let svc = FakeService::new();
    svc.create(Ok(session("s-1")));
    svc.poll(Ok(Some(message(1, "a"))))
        .poll(Ok(Some(message(2, "b"))))
        .poll(Ok(Some(message(2, "b"))))
        .poll(Ok(Some(message(1, "a"))))
        .poll(Ok(Some(message(3, "c"))));
    let mut p = poller(config(), svc.clone());
    let token = CancellationToken::new();
    started(&mut p, &token).await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(p.next_message(&token).await.unwrap().message_id);
    }

    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(p.last_message_id(), Some(3));
    let lasts: Vec<_> = svc.poll_args.lock().unwrap().iter().map(|(_, l)| *l).collect();
    assert_eq!(lasts, vec![None, Some(1), Some(2), Some(2), Some(2)]);
}

#[tokio::test(start_paused = true)]
async fn expired_session_is_recreated_transparently() {
    let svc = FakeService::new();
    svc.create(Ok(session("s-1"))).create(Ok(session("s-2")));
    svc.poll(Ok(Some(message(1, "a"))))
        .poll(Err(ServiceError::SessionExpired("session s-1 expired".into())))
        .poll(Ok(Some(message(2, "b"))));
    let mut p = poller(config(), svc.clone());
    let mut events = p.manager().bus().subscribe();
    let token = CancellationToken::new();
    started(&mut p, &token).await;

    assert_eq!(p.next_message(&token).await.unwrap().message_id, 1);
    assert_eq!(p.next_message(&token).await.unwrap().message_id, 2);

    assert_eq!(svc.creates(), 2);
    assert_eq!(svc.refreshes(), 0);
    assert_eq!(p.manager().current().unwrap().session_id, "s-2");
    // The high-water mark carries over to the new session.
    let args = svc.poll_args.lock().unwrap().clone();
    assert_eq!(args[2], ("s-2".to_string(), Some(1)));

    let mut expired = 0;
    while let Ok(ev) = events.try_recv() {
        if ev.kind == EventKind::SessionExpired {
            assert_eq!(ev.session.as_deref(), Some("s-1"));
            expired += 1;
        }
    }
    assert_eq!(expired, 1);
}

#[tokio::test(start_paused = true)]
async fn expired_session_is_fatal_when_recovery_disabled() {
    let svc = FakeService::new();
    svc.create(Ok(session("s-1")));
    svc.poll(Err(ServiceError::SessionExpired("gone".into())));
    let mut cfg = config();
    cfg.disable_session_recover = true;
    let mut p = poller(cfg, svc.clone());
    let token = CancellationToken::new();
    started(&mut p, &token).await;

    let err = p.next_message(&token).await.unwrap_err();
    assert!(matches!(
        err,
        ListenerError::Fatal {
            error: ServiceError::SessionExpired(_)
        }
    ));
    assert_eq!(svc.creates(), 1);
}

#[tokio::test(start_paused = true)]
async fn access_denied_is_fatal_without_retry() {
    let svc = FakeService::new();
    svc.create(Ok(session("s-1")));
    svc.poll(Err(ServiceError::AccessDenied("pool 7".into())));
    let mut p = poller(config(), svc.clone());
    let token = CancellationToken::new();
    started(&mut p, &token).await;

    let err = p.next_message(&token).await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(svc.polls(), 1);
    assert_eq!(svc.refreshes(), 0);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_refreshes_and_retries() {
    let svc = FakeService::new();
    svc.create(Ok(session("s-1")));
    svc.poll(Err(ServiceError::Network("connection reset".into())))
        .poll(Ok(Some(message(1, "a"))));
    let mut p = poller(config(), svc.clone());
    let token = CancellationToken::new();
    started(&mut p, &token).await;

    let t0 = Instant::now();
    let m = p.next_message(&token).await.unwrap();

    assert_eq!(m.message_id, 1);
    assert_eq!(svc.refreshes(), 1);
    assert_eq!(svc.polls(), 2);
    assert_eq!(p.backoff().failures(), 0);
    let waited = t0.elapsed();
    assert!(waited >= Duration::from_secs(15) && waited <= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn cancel_during_poll_backoff_unwinds_immediately() {
    let svc = FakeService::new();
    svc.create(Ok(session("s-1")));
    svc.poll(Err(ServiceError::Network("reset".into())));
    let mut p = poller(config(), svc.clone());
    let token = CancellationToken::new();
    started(&mut p, &token).await;
    cancel_after(&token, Duration::from_secs(5));

    let t0 = Instant::now();
    let err = p.next_message(&token).await.unwrap_err();

    assert!(matches!(err, ListenerError::Canceled));
    assert_eq!(t0.elapsed(), Duration::from_secs(5));
    assert_eq!(svc.polls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_long_poll_unwinds() {
    let svc = FakeService::new();
    svc.create(Ok(session("s-1")));
    let mut p = poller(config(), svc.clone());
    let token = CancellationToken::new();
    started(&mut p, &token).await;
    cancel_after(&token, Duration::from_secs(90));

    let err = p.next_message(&token).await.unwrap_err();
    assert!(err.is_canceled());
    assert_eq!(svc.polls(), 1);
}

#[tokio::test(start_paused = true)]
async fn idle_polling_emits_heartbeat() {
    let svc = FakeService::new();
    svc.create(Ok(session("s-1")));
    for _ in 0..8 {
        svc.poll(Ok(None));
    }
    svc.poll(Ok(Some(message(1, "a"))));
    let mut cfg = config();
    cfg.idle_heartbeat = Duration::from_secs(5);
    let mut p = poller(cfg, svc.clone());
    let mut events = p.manager().bus().subscribe();
    let token = CancellationToken::new();
    started(&mut p, &token).await;

    let t0 = Instant::now();
    let m = p.next_message(&token).await.unwrap();

    assert_eq!(m.message_id, 1);
    // Fixed idle schedule: one second between empty polls.
    assert_eq!(t0.elapsed(), Duration::from_secs(8));
    let mut heartbeats = 0;
    while let Ok(ev) = events.try_recv() {
        if ev.kind == EventKind::IdleHeartbeat {
            heartbeats += 1;
        }
    }
    assert_eq!(heartbeats, 1);
}

#[tokio::test(start_paused = true)]
async fn encrypted_bodies_are_decrypted() {
    let svc = FakeService::new();
    svc.create(Ok(encrypted_session("s-1")));
    svc.poll(Ok(Some(sealed(1, "{\"job\":\"build\"}"))))
        .poll(Ok(Some(message(2, "plain text"))));
    let mut p = poller(config(), svc.clone());
    let token = CancellationToken::new();
    started(&mut p, &token).await;

    let first = p.next_message(&token).await.unwrap();
    assert_eq!(first.body, "{\"job\":\"build\"}");
    assert!(first.iv.is_none());

    let second = p.next_message(&token).await.unwrap();
    assert_eq!(second, message(2, "plain text"));
}

struct Invert;

impl KeyUnwrap for Invert {
    fn unwrap_key(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, CipherError> {
        Ok(Zeroizing::new(wrapped.iter().map(|b| !b).collect()))
    }
}

#[tokio::test(start_paused = true)]
async fn wrapped_session_key_is_unwrapped() {
    let svc = FakeService::new();
    svc.create(Ok(Session {
        encryption_key: Some(SessionKey {
            value: KEY.iter().map(|b| !b).collect(),
            encrypted: true,
        }),
        ..session("s-1")
    }));
    svc.poll(Ok(Some(sealed(4, "secret"))));
    let mgr = manager(config(), svc.clone(), Arc::new(Host::default()));
    let mut p = MessagePoller::new(mgr, MessageCipher::new(Some(Arc::new(Invert))));
    let token = CancellationToken::new();
    started(&mut p, &token).await;

    assert_eq!(p.next_message(&token).await.unwrap().body, "secret");
}

#[tokio::test(start_paused = true)]
async fn undecryptable_message_fails_alone() {
    let svc = FakeService::new();
    svc.create(Ok(encrypted_session("s-1")));
    let mut corrupt = sealed(1, "lost");
    corrupt.body = "not base64 at all!".into();
    svc.poll(Ok(Some(corrupt))).poll(Ok(Some(sealed(2, "ok"))));
    let mut p = poller(config(), svc.clone());
    let token = CancellationToken::new();
    started(&mut p, &token).await;

    let err = p.next_message(&token).await.unwrap_err();
    assert!(matches!(err, ListenerError::Decrypt { message_id: 1, .. }));
    assert_eq!(p.last_message_id(), Some(1));

    assert_eq!(p.next_message(&token).await.unwrap().body, "ok");
    assert_eq!(svc.creates(), 1);
}

#[tokio::test(start_paused = true)]
async fn short_iv_passes_through() {
    let svc = FakeService::new();
    svc.create(Ok(encrypted_session("s-1")));
    let mut odd = message(1, "opaque");
    odd.iv = Some(IV[..8].to_vec());
    svc.poll(Ok(Some(odd.clone())));
    let mut p = poller(config(), svc);
    let token = CancellationToken::new();
    started(&mut p, &token).await;

    assert_eq!(p.next_message(&token).await.unwrap(), odd);
}

#[tokio::test(start_paused = true)]
async fn polling_requires_a_session() {
    let svc = FakeService::new();
    let mut p = poller(config(), svc.clone());
    let err = p.next_message(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ListenerError::NoSession));
    assert_eq!(svc.polls(), 0);
}

#[tokio::test(start_paused = true)]
async fn delete_message_targets_the_live_session() {
    let svc = FakeService::new();
    svc.create(Ok(session("s-9")));
    let mut p = poller(config(), svc.clone());
    started(&mut p, &CancellationToken::new()).await;

    p.delete_message(41).await.unwrap();
    assert_eq!(
        *svc.deleted_messages.lock().unwrap(),
        vec![(41, "s-9".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn stale_redelivery_waits_on_the_idle_band() {
    let svc = FakeService::new();
    svc.create(Ok(session("s-1")));
    svc.poll(Ok(Some(message(5, "a"))));
    for _ in 0..20 {
        svc.poll(Ok(Some(message(5, "a"))));
    }
    svc.poll(Ok(Some(message(6, "b"))));
    let mut p = poller(config(), svc.clone());
    let token = CancellationToken::new();
    started(&mut p, &token).await;
    assert_eq!(p.next_message(&token).await.unwrap().message_id, 5);

    let t0 = Instant::now();
    assert_eq!(p.next_message(&token).await.unwrap().message_id, 6);

    // Each stale answer costs one idle interval, like an empty poll.
    assert_eq!(t0.elapsed(), Duration::from_secs(20));
    assert_eq!(svc.polls(), 22);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_window_starts_with_the_session() {
    let svc = FakeService::new();
    svc.create(Ok(session("s-1")));
    for _ in 0..3 {
        svc.poll(Ok(None));
    }
    svc.poll(Ok(Some(message(1, "a"))));
    let mut cfg = config();
    cfg.idle_heartbeat = Duration::from_secs(5);
    let mut p = poller(cfg, svc.clone());
    let mut events = p.manager().bus().subscribe();
    let token = CancellationToken::new();

    // The poller exists long before it has a session to watch.
    tokio::time::sleep(Duration::from_secs(60)).await;
    started(&mut p, &token).await;
    assert_eq!(p.next_message(&token).await.unwrap().message_id, 1);

    while let Ok(ev) = events.try_recv() {
        assert_ne!(ev.kind, EventKind::IdleHeartbeat);
    }
}

#[tokio::test(start_paused = true)]
async fn unusable_session_key_stops_without_delivering() {
    let svc = FakeService::new();
    svc.create(Ok(Session {
        encryption_key: Some(SessionKey {
            value: KEY.to_vec(),
            encrypted: true,
        }),
        ..session("s-1")
    }));
    svc.poll(Ok(Some(sealed(1, "job"))));
    let mut p = poller(config(), svc.clone());
    let token = CancellationToken::new();
    started(&mut p, &token).await;

    let err = p.next_message(&token).await.unwrap_err();

    assert!(matches!(err, ListenerError::SessionKey { message_id: 1, .. }));
    assert!(err.is_fatal());
    assert_eq!(p.last_message_id(), None);
}

#[tokio::test(start_paused = true)]
async fn cancel_interrupts_a_hanging_flag_fetch() {
    for flag_timeout in [Duration::from_secs(10), Duration::ZERO] {
        let svc = FakeService::new();
        svc.create(Ok(session("s-1")));
        svc.poll(Err(ServiceError::Network("reset".into())));
        let mut cfg = config();
        cfg.flag_timeout = flag_timeout;
        let flags = Flags::hanging();
        let mut p = poller_with_flags(cfg, svc.clone(), flags.clone());
        let token = CancellationToken::new();
        started(&mut p, &token).await;
        cancel_after(&token, Duration::from_millis(100));

        let t0 = Instant::now();
        let err = p.next_message(&token).await.unwrap_err();

        assert!(err.is_canceled());
        assert_eq!(t0.elapsed(), Duration::from_millis(100));
        assert_eq!(flags.fetches(), 1);
        assert_eq!(svc.refreshes(), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn progressive_gate_widens_poll_retries() {
    let svc = FakeService::new();
    svc.create(Ok(session("s-1")));
    for _ in 0..12 {
        svc.poll(Err(ServiceError::Network("reset".into())));
    }
    svc.poll(Ok(Some(message(1, "a"))));
    let flags = Flags::on();
    let mut p = poller_with_flags(config(), svc.clone(), flags.clone());
    let mut events = p.manager().bus().subscribe();
    let token = CancellationToken::new();
    started(&mut p, &token).await;

    assert_eq!(p.next_message(&token).await.unwrap().message_id, 1);

    let mut delays = Vec::new();
    while let Ok(ev) = events.try_recv() {
        if ev.kind == EventKind::BackoffScheduled {
            delays.push(Duration::from_millis(u64::from(ev.delay_ms.unwrap())));
        }
    }
    assert_eq!(delays.len(), 12);
    // The previous interval is the floor for the next one.
    assert!(delays.windows(2).all(|w| w[0] <= w[1]), "{delays:?}");
    assert!(delays[..5].iter().all(|d| *d >= Duration::from_secs(15) && *d <= Duration::from_secs(30)));
    assert!(delays[5..10].iter().all(|d| *d >= Duration::from_secs(30) && *d <= Duration::from_secs(60)));
    assert!(delays[10..].iter().all(|d| *d >= Duration::from_secs(60) && *d <= Duration::from_secs(120)));
    assert_eq!(flags.fetches(), 1);
}
