//! End-to-end supervisor behavior against a scripted transport.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use courier_domain::config::ReconnectConfig;
use courier_store::{CredentialStore, Database, Direction};
use courier_supervisor::{ReconnectPolicy, SessionState, SessionSupervisor, SupervisorError};
use courier_transport::{
    AuthState, CredsUpdate, KeyEntry, MessageContent, MessageEnvelope, OpenedSession, Transport,
    TransportError, TransportEvent, TransportSession, CLOSE_LOGGED_OUT,
};

const SUFFIX: &str = "wire.courier";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Control surface for one opened session: the test injects events and
/// inspects what was sent.
#[derive(Clone)]
struct Control {
    tenant: String,
    events: mpsc::Sender<TransportEvent>,
    sent: Arc<Mutex<Vec<(String, String)>>>,
    closed: Arc<AtomicBool>,
}

struct ScriptedTransport {
    open_delay: Duration,
    opens: AtomicUsize,
    fail_opens: AtomicUsize,
    controls: Mutex<Vec<Control>>,
}

impl ScriptedTransport {
    fn new() -> Arc<Self> {
        Self::with_open_delay(Duration::ZERO)
    }

    fn with_open_delay(open_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            open_delay,
            opens: AtomicUsize::new(0),
            fail_opens: AtomicUsize::new(0),
            controls: Mutex::new(Vec::new()),
        })
    }

    fn fail_next_opens(&self, n: usize) {
        self.fail_opens.store(n, Ordering::SeqCst);
    }

    fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn control(&self, index: usize) -> Control {
        self.controls.lock()[index].clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, tenant: &str, _auth: AuthState) -> Result<OpenedSession, TransportError> {
        if self.open_delay > Duration::ZERO {
            tokio::time::sleep(self.open_delay).await;
        }
        if self.fail_opens.load(Ordering::SeqCst) > 0 {
            self.fail_opens.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::Open("scripted open failure".into()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(16);
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        self.controls.lock().push(Control {
            tenant: tenant.to_string(),
            events: tx,
            sent: sent.clone(),
            closed: closed.clone(),
        });
        Ok(OpenedSession {
            session: Box::new(ScriptedSession { sent, closed }),
            events: rx,
        })
    }

    fn address_suffix(&self) -> &str {
        SUFFIX
    }
}

struct ScriptedSession {
    sent: Arc<Mutex<Vec<(String, String)>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl TransportSession for ScriptedSession {
    async fn send(&self, address: &str, body: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Send("closed".into()));
        }
        self.sent.lock().push((address.to_string(), body.to_string()));
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy::from_config(&ReconnectConfig {
        base_delay_ms: 50,
        multiplier: 1.0,
        max_delay_ms: 200,
        jitter_ms: 0,
    })
}

fn supervisor(transport: Arc<ScriptedTransport>) -> (Arc<SessionSupervisor>, Database) {
    let db = Database::open_in_memory().unwrap();
    (
        SessionSupervisor::new(transport, db.clone(), fast_policy()),
        db,
    )
}

/// Poll until a condition holds; event handling runs on spawned tasks.
async fn eventually(what: &str, f: impl Fn() -> bool) {
    for _ in 0..200 {
        if f() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

fn inbound(id: Option<&str>, body: &str) -> TransportEvent {
    TransportEvent::Message(MessageEnvelope {
        id: id.map(str::to_string),
        remote: format!("15550100@{SUFFIX}"),
        from_me: false,
        content: MessageContent::Text { text: body.into() },
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_ensure_opens_exactly_one_session() {
    let transport = ScriptedTransport::with_open_delay(Duration::from_millis(50));
    let (sup, _db) = supervisor(transport.clone());

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let sup = sup.clone();
        tasks.push(tokio::spawn(async move {
            sup.ensure_session("acme").await.map(|_| ())
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test]
async fn pairing_artifact_is_stored_then_cleared_on_connect() {
    let transport = ScriptedTransport::new();
    let (sup, _db) = supervisor(transport.clone());
    sup.ensure_session("acme").await.unwrap();
    let ctl = transport.control(0);
    assert_eq!(ctl.tenant, "acme");

    ctl.events
        .send(TransportEvent::Pairing("code-1".into()))
        .await
        .unwrap();
    eventually("pairing artifact stored", || {
        sup.pairing_artifact("acme").unwrap() == Some("code-1".into())
    })
    .await;
    assert_eq!(sup.session_state("acme"), SessionState::Connecting);

    ctl.events.send(TransportEvent::Connected).await.unwrap();
    eventually("connected state", || {
        sup.session_state("acme") == SessionState::Connected
    })
    .await;
    assert!(sup.pairing_artifact("acme").unwrap().is_none());

    let overview = sup.list_sessions().unwrap();
    assert_eq!(overview.len(), 1);
    assert!(overview[0].record.connected_at.is_some());
}

#[tokio::test]
async fn credential_updates_are_persisted() {
    let transport = ScriptedTransport::new();
    let (sup, db) = supervisor(transport.clone());
    sup.ensure_session("acme").await.unwrap();
    let ctl = transport.control(0);

    ctl.events
        .send(TransportEvent::CredsUpdated(CredsUpdate {
            credentials: Some(b"blob-1".to_vec()),
            keys: vec![KeyEntry {
                key_type: "session".into(),
                id: "7".into(),
                value: b"key-7".to_vec(),
            }],
        }))
        .await
        .unwrap();

    let creds = CredentialStore::new(db);
    eventually("credentials persisted", || {
        creds.credentials("acme").unwrap() == Some(b"blob-1".to_vec())
    })
    .await;
    let keys = creds.keys("acme", "session", &["7".into()]).unwrap();
    assert_eq!(keys["7"], b"key-7");
}

#[tokio::test]
async fn terminal_close_purges_credentials_and_does_not_reconnect() {
    let transport = ScriptedTransport::new();
    let (sup, db) = supervisor(transport.clone());
    sup.ensure_session("acme").await.unwrap();
    let ctl = transport.control(0);
    ctl.events.send(TransportEvent::Connected).await.unwrap();
    ctl.events
        .send(TransportEvent::CredsUpdated(CredsUpdate {
            credentials: Some(b"blob".to_vec()),
            keys: Vec::new(),
        }))
        .await
        .unwrap();

    let creds = CredentialStore::new(db);
    eventually("credentials persisted", || {
        creds.credentials("acme").unwrap().is_some()
    })
    .await;

    ctl.events
        .send(TransportEvent::Closed {
            code: CLOSE_LOGGED_OUT,
        })
        .await
        .unwrap();
    eventually("terminated state", || {
        sup.session_state("acme") == SessionState::Terminated
    })
    .await;
    assert!(creds.credentials("acme").unwrap().is_none());

    // Well past the retry delay: still exactly one open.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test]
async fn transient_close_reconnects_once() {
    let transport = ScriptedTransport::new();
    let (sup, _db) = supervisor(transport.clone());
    sup.ensure_session("acme").await.unwrap();
    let ctl = transport.control(0);
    ctl.events.send(TransportEvent::Connected).await.unwrap();
    eventually("connected", || {
        sup.session_state("acme") == SessionState::Connected
    })
    .await;

    ctl.events
        .send(TransportEvent::Closed { code: 500 })
        .await
        .unwrap();
    eventually("reopened", || transport.open_count() == 2).await;

    // The new session connects; no further opens happen.
    transport
        .control(1)
        .events
        .send(TransportEvent::Connected)
        .await
        .unwrap();
    eventually("reconnected", || {
        sup.session_state("acme") == SessionState::Connected
    })
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.open_count(), 2);
}

#[tokio::test]
async fn reconnect_retries_after_failed_open() {
    let transport = ScriptedTransport::new();
    let (sup, _db) = supervisor(transport.clone());
    sup.ensure_session("acme").await.unwrap();
    let ctl = transport.control(0);
    ctl.events.send(TransportEvent::Connected).await.unwrap();

    // First reconnect attempt fails at open; the timer re-arms.
    transport.fail_next_opens(1);
    ctl.events
        .send(TransportEvent::Closed { code: 500 })
        .await
        .unwrap();
    eventually("reopened after failed attempt", || {
        transport.open_count() == 2
    })
    .await;
}

#[tokio::test]
async fn send_normalizes_the_address_and_logs_outbound() {
    let transport = ScriptedTransport::new();
    let (sup, _db) = supervisor(transport.clone());
    sup.ensure_session("acme").await.unwrap();
    let ctl = transport.control(0);
    ctl.events.send(TransportEvent::Connected).await.unwrap();
    eventually("connected", || {
        sup.session_state("acme") == SessionState::Connected
    })
    .await;

    let address = sup.send_message("acme", "+1 555-0100", "hello").await.unwrap();
    assert_eq!(address, format!("15550100@{SUFFIX}"));
    assert_eq!(
        ctl.sent.lock().as_slice(),
        &[(format!("15550100@{SUFFIX}"), "hello".to_string())]
    );

    let page = sup.list_messages("acme", 10, 0).unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].direction, Direction::Out);
    assert_eq!(page[0].remote, format!("15550100@{SUFFIX}"));
    assert_eq!(page[0].body, "hello");
}

#[tokio::test]
async fn send_with_unparseable_address_fails_without_sending() {
    let transport = ScriptedTransport::new();
    let (sup, _db) = supervisor(transport.clone());
    sup.ensure_session("acme").await.unwrap();
    let ctl = transport.control(0);
    ctl.events.send(TransportEvent::Connected).await.unwrap();

    let err = sup.send_message("acme", "not-a-number", "hi").await.unwrap_err();
    assert!(matches!(err, SupervisorError::SendFailed { .. }));
    assert!(ctl.sent.lock().is_empty());
    assert!(sup.list_messages("acme", 10, 0).unwrap().is_empty());
}

#[tokio::test]
async fn failed_open_leaves_no_phantom_connecting_state() {
    let transport = ScriptedTransport::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("courier.db");
    let db = Database::open(&path).unwrap();
    let sup = SessionSupervisor::new(transport.clone(), db, fast_policy());

    // Break the credential table out from under the supervisor.
    rusqlite::Connection::open(&path)
        .unwrap()
        .execute("DROP TABLE credentials", [])
        .unwrap();

    let err = sup.ensure_session("acme").await.unwrap_err();
    assert!(matches!(err, SupervisorError::CredentialLoad { .. }));
    assert_eq!(sup.session_state("acme"), SessionState::Absent);
    assert_eq!(transport.open_count(), 0);
}

#[tokio::test]
async fn failed_open_surfaces_as_session_unavailable_on_send() {
    let transport = ScriptedTransport::new();
    let (sup, _db) = supervisor(transport.clone());
    transport.fail_next_opens(1);

    let err = sup.send_message("acme", "5550100", "hi").await.unwrap_err();
    assert!(matches!(err, SupervisorError::SessionUnavailable { .. }));
}

#[tokio::test]
async fn inbound_messages_are_logged_and_echoes_skipped() {
    let transport = ScriptedTransport::new();
    let (sup, _db) = supervisor(transport.clone());
    sup.ensure_session("acme").await.unwrap();
    let ctl = transport.control(0);
    ctl.events.send(TransportEvent::Connected).await.unwrap();

    ctl.events
        .send(TransportEvent::Message(MessageEnvelope {
            id: Some("own-1".into()),
            remote: format!("15550100@{SUFFIX}"),
            from_me: true,
            content: MessageContent::Text { text: "mine".into() },
        }))
        .await
        .unwrap();
    ctl.events.send(inbound(Some("mid-1"), "theirs")).await.unwrap();

    eventually("inbound logged", || {
        sup.list_messages("acme", 10, 0).unwrap().len() == 1
    })
    .await;
    let page = sup.list_messages("acme", 10, 0).unwrap();
    assert_eq!(page[0].direction, Direction::In);
    assert_eq!(page[0].body, "theirs");
}

#[tokio::test]
async fn redelivered_inbound_message_is_stored_once() {
    let transport = ScriptedTransport::new();
    let (sup, _db) = supervisor(transport.clone());
    sup.ensure_session("acme").await.unwrap();
    let ctl = transport.control(0);
    ctl.events.send(TransportEvent::Connected).await.unwrap();

    ctl.events.send(inbound(Some("mid-1"), "hello")).await.unwrap();
    ctl.events.send(inbound(Some("mid-1"), "hello")).await.unwrap();
    ctl.events.send(inbound(Some("mid-2"), "world")).await.unwrap();

    eventually("both distinct messages logged", || {
        sup.list_messages("acme", 10, 0).unwrap().len() == 2
    })
    .await;
}

#[tokio::test]
async fn reset_drops_credentials_and_is_idempotent() {
    let transport = ScriptedTransport::new();
    let (sup, db) = supervisor(transport.clone());
    sup.ensure_session("acme").await.unwrap();
    let ctl = transport.control(0);
    ctl.events.send(TransportEvent::Connected).await.unwrap();
    ctl.events
        .send(TransportEvent::CredsUpdated(CredsUpdate {
            credentials: Some(b"blob".to_vec()),
            keys: Vec::new(),
        }))
        .await
        .unwrap();
    ctl.events.send(inbound(None, "kept")).await.unwrap();

    let creds = CredentialStore::new(db);
    eventually("state settled", || {
        creds.credentials("acme").unwrap().is_some()
            && sup.list_messages("acme", 10, 0).unwrap().len() == 1
    })
    .await;

    sup.reset_session("acme", false).await.unwrap();
    assert_eq!(sup.session_state("acme"), SessionState::Absent);
    assert!(creds.credentials("acme").unwrap().is_none());
    assert!(sup.list_sessions().unwrap().is_empty());
    // History survives a plain reset.
    assert_eq!(sup.list_messages("acme", 10, 0).unwrap().len(), 1);

    sup.reset_session("acme", true).await.unwrap();
    assert!(sup.list_messages("acme", 10, 0).unwrap().is_empty());
}

#[tokio::test]
async fn reset_cancels_a_pending_reconnect() {
    let transport = ScriptedTransport::new();
    let (sup, _db) = supervisor(transport.clone());
    sup.ensure_session("acme").await.unwrap();
    let ctl = transport.control(0);
    ctl.events.send(TransportEvent::Connected).await.unwrap();

    ctl.events
        .send(TransportEvent::Closed { code: 500 })
        .await
        .unwrap();
    eventually("reconnect pending", || {
        sup.session_state("acme") == SessionState::ReconnectPending
    })
    .await;

    sup.reset_session("acme", false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.open_count(), 1);
    assert_eq!(sup.session_state("acme"), SessionState::Absent);
}

#[tokio::test(flavor = "multi_thread")]
async fn close_racing_reset_does_not_resurrect_the_tenant() {
    let transport = ScriptedTransport::new();
    let (sup, _db) = supervisor(transport.clone());

    // Several rounds to cover different interleavings of the close
    // event and the reset.
    for round in 0..5 {
        sup.ensure_session("acme").await.unwrap();
        let ctl = transport.control(round);
        ctl.events.send(TransportEvent::Connected).await.unwrap();
        eventually("connected", || {
            sup.session_state("acme") == SessionState::Connected
        })
        .await;

        // When the reset wins, it aborts the event loop and the send
        // may land on a dropped receiver. That is fine.
        let (_, reset) = tokio::join!(
            ctl.events.send(TransportEvent::Closed { code: 500 }),
            sup.reset_session("acme", false)
        );
        reset.unwrap();

        // Past the retry delay: the reset must hold either way.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(transport.open_count(), round + 1);
        assert_eq!(sup.session_state("acme"), SessionState::Absent);
        assert!(sup.list_sessions().unwrap().is_empty());
    }
}

#[tokio::test]
async fn restart_replaces_the_live_session() {
    let transport = ScriptedTransport::new();
    let (sup, _db) = supervisor(transport.clone());
    sup.ensure_session("acme").await.unwrap();
    transport
        .control(0)
        .events
        .send(TransportEvent::Connected)
        .await
        .unwrap();

    sup.restart_session("acme").await.unwrap();
    assert_eq!(transport.open_count(), 2);
    assert!(transport.control(0).closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn start_all_reopens_known_tenants() {
    let transport = ScriptedTransport::new();
    let db = Database::open_in_memory().unwrap();
    {
        let sup = SessionSupervisor::new(transport.clone(), db.clone(), fast_policy());
        sup.ensure_session("acme").await.unwrap();
        sup.ensure_session("globex").await.unwrap();
        sup.shutdown().await;
    }

    // Fresh supervisor over the same database, as after a restart.
    let sup = SessionSupervisor::new(transport.clone(), db, fast_policy());
    sup.start_all().await.unwrap();
    assert_eq!(transport.open_count(), 4);
    assert_eq!(sup.list_sessions().unwrap().len(), 2);
}

#[tokio::test]
async fn shutdown_refuses_new_sessions() {
    let transport = ScriptedTransport::new();
    let (sup, _db) = supervisor(transport.clone());
    sup.ensure_session("acme").await.unwrap();

    sup.shutdown().await;
    assert!(transport.control(0).closed.load(Ordering::SeqCst));
    let err = sup.ensure_session("globex").await.unwrap_err();
    assert!(matches!(err, SupervisorError::SessionUnavailable { .. }));
}
