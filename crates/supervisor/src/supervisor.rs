//! The session supervisor.
//!
//! Single owner of session lifecycle: it opens at most one transport
//! session per tenant, runs one event loop per live session, reacts to
//! closes by either terminating (logout) or arming a reconnect timer,
//! and funnels credential updates and inbound messages into the stores.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;

use courier_domain::trace::TraceEvent;
use courier_store::{
    CredentialStore, Database, Direction, MessageLog, MessageRecord, NewMessage, SessionStore,
    StoreError, TenantRecord,
};
use courier_transport::{
    normalize_address, AuthState, CredsUpdate, Disconnect, Transport, TransportError,
    TransportEvent, CLOSE_UNKNOWN,
};

use crate::handle::SessionHandle;
use crate::keys::TenantKeyProvider;
use crate::reconnect::ReconnectPolicy;
use crate::registry::{SessionRegistry, SessionState, TenantSlot};

/// Supervisor error.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("tenant {tenant}: credential load failed: {source}")]
    CredentialLoad {
        tenant: String,
        #[source]
        source: StoreError,
    },

    #[error("tenant {tenant}: transport open failed: {source}")]
    TransportOpen {
        tenant: String,
        #[source]
        source: TransportError,
    },

    #[error("tenant {tenant}: session unavailable: {reason}")]
    SessionUnavailable { tenant: String, reason: String },

    #[error("tenant {tenant}: send failed: {source}")]
    SendFailed {
        tenant: String,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A tenant's durable record joined with its in-memory session state.
#[derive(Debug, Clone, Serialize)]
pub struct SessionOverview {
    #[serde(flatten)]
    pub record: TenantRecord,
    pub state: SessionState,
}

pub struct SessionSupervisor {
    transport: Arc<dyn Transport>,
    sessions: SessionStore,
    credentials: CredentialStore,
    messages: MessageLog,
    registry: SessionRegistry,
    policy: ReconnectPolicy,
    shutting_down: AtomicBool,
}

impl SessionSupervisor {
    pub fn new(transport: Arc<dyn Transport>, db: Database, policy: ReconnectPolicy) -> Arc<Self> {
        Arc::new(Self {
            transport,
            sessions: SessionStore::new(db.clone()),
            credentials: CredentialStore::new(db.clone()),
            messages: MessageLog::new(db),
            registry: SessionRegistry::new(),
            policy,
            shutting_down: AtomicBool::new(false),
        })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Session lifecycle
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Return the tenant's live session, opening one if necessary.
    ///
    /// Concurrent calls for the same tenant collapse into a single
    /// transport open; the losers of the race get the winner's handle.
    pub async fn ensure_session(
        self: &Arc<Self>,
        tenant: &str,
    ) -> Result<Arc<SessionHandle>, SupervisorError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(SupervisorError::SessionUnavailable {
                tenant: tenant.to_string(),
                reason: "supervisor is shutting down".into(),
            });
        }

        let slot = self.registry.slot(tenant);
        if let Some(handle) = slot.live() {
            return Ok(handle);
        }

        let _guard = slot.create_lock.lock().await;
        if let Some(handle) = slot.live() {
            return Ok(handle);
        }
        self.open_session(&slot).await
    }

    /// Open a fresh session for the slot. Caller holds the create lock.
    ///
    /// Any failure leaves the slot back in `Absent`; `Connecting` must
    /// never outlive the open attempt that set it.
    async fn open_session(
        self: &Arc<Self>,
        slot: &Arc<TenantSlot>,
    ) -> Result<Arc<SessionHandle>, SupervisorError> {
        slot.set_state(SessionState::Connecting);
        match self.try_open(slot).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                slot.set_state(SessionState::Absent);
                Err(e)
            }
        }
    }

    async fn try_open(
        self: &Arc<Self>,
        slot: &Arc<TenantSlot>,
    ) -> Result<Arc<SessionHandle>, SupervisorError> {
        let tenant = slot.tenant().to_string();
        self.sessions.upsert(&tenant)?;

        let credentials =
            self.credentials
                .credentials(&tenant)
                .map_err(|source| SupervisorError::CredentialLoad {
                    tenant: tenant.clone(),
                    source,
                })?;
        let had_credentials = credentials.is_some();
        let auth = AuthState {
            credentials,
            keys: Arc::new(TenantKeyProvider::new(
                tenant.clone(),
                self.credentials.clone(),
            )),
        };

        let opened = self
            .transport
            .open(&tenant, auth)
            .await
            .map_err(|source| SupervisorError::TransportOpen {
                tenant: tenant.clone(),
                source,
            })?;

        let handle = Arc::new(SessionHandle::new(tenant.clone(), opened.session));
        slot.install(handle.clone());
        TraceEvent::SessionOpened {
            tenant,
            had_credentials,
        }
        .emit();

        let task = tokio::spawn(Self::run_events(
            Arc::downgrade(self),
            slot.clone(),
            handle.clone(),
            opened.events,
        ));
        handle.attach_event_task(task);
        Ok(handle)
    }

    /// Open sessions for every known tenant. Used at boot so tenants
    /// that were live before a restart come back without a request.
    pub async fn start_all(self: &Arc<Self>) -> Result<(), SupervisorError> {
        for record in self.sessions.list()? {
            if let Err(e) = self.ensure_session(&record.tenant_id).await {
                tracing::warn!(tenant = %record.tenant_id, error = %e, "boot session open failed");
            }
        }
        Ok(())
    }

    /// Tear down any live session and open a fresh one.
    pub async fn restart_session(self: &Arc<Self>, tenant: &str) -> Result<(), SupervisorError> {
        let slot = self.registry.slot(tenant);
        {
            let _guard = slot.create_lock.lock().await;
            if let Some(handle) = slot.take_live() {
                handle.shutdown().await;
            }
            slot.set_state(SessionState::Absent);
            slot.reset_attempts();
        }
        self.ensure_session(tenant).await.map(|_| ())
    }

    /// Tear down the session and delete the tenant's durable state.
    ///
    /// Credentials and the tenant record always go; the message log is
    /// kept unless `purge_messages` is set. Idempotent.
    pub async fn reset_session(
        self: &Arc<Self>,
        tenant: &str,
        purge_messages: bool,
    ) -> Result<(), SupervisorError> {
        let slot = self.registry.slot(tenant);
        let _guard = slot.create_lock.lock().await;

        if let Some(handle) = slot.take_live() {
            handle.shutdown().await;
        }
        slot.set_state(SessionState::Absent);
        slot.reset_attempts();

        self.credentials.delete_all(tenant)?;
        self.sessions.remove(tenant)?;
        if purge_messages {
            self.messages.purge(tenant)?;
        }
        TraceEvent::SessionReset {
            tenant: tenant.to_string(),
            purged_messages: purge_messages,
        }
        .emit();
        Ok(())
    }

    /// Stop accepting session opens and close every live session.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        for slot in self.registry.slots() {
            if let Some(handle) = slot.take_live() {
                handle.shutdown().await;
            }
            slot.set_state(SessionState::Absent);
            if let Err(e) = self.sessions.mark_disconnected(slot.tenant()) {
                tracing::warn!(tenant = %slot.tenant(), error = %e, "disconnect mark failed");
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Queries and sending
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Send a text message, normalizing the recipient address first.
    /// Returns the normalized address the message went to.
    pub async fn send_message(
        self: &Arc<Self>,
        tenant: &str,
        to: &str,
        body: &str,
    ) -> Result<String, SupervisorError> {
        let handle = self.ensure_session(tenant).await.map_err(|e| match e {
            e @ SupervisorError::SessionUnavailable { .. } => e,
            other => SupervisorError::SessionUnavailable {
                tenant: tenant.to_string(),
                reason: other.to_string(),
            },
        })?;

        let address = normalize_address(to, self.transport.address_suffix()).map_err(|source| {
            SupervisorError::SendFailed {
                tenant: tenant.to_string(),
                source,
            }
        })?;
        handle
            .send(&address, body)
            .await
            .map_err(|source| SupervisorError::SendFailed {
                tenant: tenant.to_string(),
                source,
            })?;

        // The send already happened; a log failure must not fail it.
        match self.messages.append(NewMessage {
            tenant_id: tenant,
            message_id: None,
            direction: Direction::Out,
            remote: &address,
            body,
        }) {
            Ok(_) => TraceEvent::MessageLogged {
                tenant: tenant.to_string(),
                direction: "out".into(),
                remote: address.clone(),
            }
            .emit(),
            Err(e) => tracing::warn!(tenant, error = %e, "outbound message log failed"),
        }
        Ok(address)
    }

    /// Current pairing artifact, if the tenant is awaiting pairing.
    pub fn pairing_artifact(&self, tenant: &str) -> Result<Option<String>, SupervisorError> {
        Ok(self.sessions.pairing(tenant)?)
    }

    /// Message history for a tenant, most recent first.
    pub fn list_messages(
        &self,
        tenant: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<MessageRecord>, SupervisorError> {
        Ok(self.messages.list(tenant, limit, offset)?)
    }

    /// All known tenants with their current session state.
    pub fn list_sessions(&self) -> Result<Vec<SessionOverview>, SupervisorError> {
        let records = self.sessions.list()?;
        Ok(records
            .into_iter()
            .map(|record| {
                let state = self
                    .registry
                    .peek(&record.tenant_id)
                    .map(|slot| slot.state())
                    .unwrap_or(SessionState::Absent);
                SessionOverview { record, state }
            })
            .collect())
    }

    /// One tenant's record and state, `None` for unknown tenants.
    pub fn session_overview(&self, tenant: &str) -> Result<Option<SessionOverview>, SupervisorError> {
        let Some(record) = self.sessions.get(tenant)? else {
            return Ok(None);
        };
        Ok(Some(SessionOverview {
            state: self.session_state(&record.tenant_id),
            record,
        }))
    }

    /// One tenant's session state, `Absent` when nothing is tracked.
    pub fn session_state(&self, tenant: &str) -> SessionState {
        self.registry
            .peek(tenant)
            .map(|slot| slot.state())
            .unwrap_or(SessionState::Absent)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Event handling
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Per-session event loop. One task per live session, so events for
    /// a tenant are handled strictly in delivery order.
    async fn run_events(
        weak: Weak<Self>,
        slot: Arc<TenantSlot>,
        handle: Arc<SessionHandle>,
        mut events: mpsc::Receiver<TransportEvent>,
    ) {
        loop {
            let event = events.recv().await;
            let Some(sup) = weak.upgrade() else { return };
            match event {
                Some(TransportEvent::Pairing(artifact)) => sup.on_pairing(&slot, artifact),
                Some(TransportEvent::Connected) => sup.on_connected(&slot),
                Some(TransportEvent::CredsUpdated(update)) => sup.on_creds_updated(&slot, update),
                Some(TransportEvent::Message(envelope)) => sup.on_message(&slot, envelope),
                Some(TransportEvent::Closed { code }) => {
                    sup.handle_close(&slot, &handle, code).await;
                    return;
                }
                None => {
                    // Event channel dropped without a close event.
                    sup.handle_close(&slot, &handle, CLOSE_UNKNOWN).await;
                    return;
                }
            }
        }
    }

    fn on_pairing(&self, slot: &TenantSlot, artifact: String) {
        let tenant = slot.tenant();
        if let Err(e) = self.sessions.set_pairing(tenant, &artifact) {
            tracing::warn!(tenant, error = %e, "pairing artifact store failed");
            return;
        }
        TraceEvent::PairingIssued {
            tenant: tenant.to_string(),
        }
        .emit();
    }

    fn on_connected(&self, slot: &TenantSlot) {
        let tenant = slot.tenant();
        slot.set_state(SessionState::Connected);
        slot.reset_attempts();
        if let Err(e) = self.sessions.mark_connected(tenant, Utc::now()) {
            tracing::warn!(tenant, error = %e, "connect mark failed");
        }
        // The artifact is single-use; once connected it is stale.
        if let Err(e) = self.sessions.clear_pairing(tenant) {
            tracing::warn!(tenant, error = %e, "pairing clear failed");
        }
        TraceEvent::SessionConnected {
            tenant: tenant.to_string(),
        }
        .emit();
    }

    fn on_creds_updated(&self, slot: &TenantSlot, update: CredsUpdate) {
        let tenant = slot.tenant();
        let mut entries = update.keys.len();
        if let Some(blob) = &update.credentials {
            entries += 1;
            if let Err(e) = self.credentials.set_credentials(tenant, blob) {
                tracing::warn!(tenant, error = %e, "credential blob persist failed");
                return;
            }
        }
        if !update.keys.is_empty() {
            let rows: Vec<(String, String, Vec<u8>)> = update
                .keys
                .into_iter()
                .map(|e| (e.key_type, e.id, e.value))
                .collect();
            if let Err(e) = self.credentials.set_keys(tenant, &rows) {
                tracing::warn!(tenant, error = %e, "key material persist failed");
                return;
            }
        }
        TraceEvent::CredentialsPersisted {
            tenant: tenant.to_string(),
            entries,
        }
        .emit();
    }

    fn on_message(&self, slot: &TenantSlot, envelope: courier_transport::MessageEnvelope) {
        // Echoes of our own outbound messages are already logged.
        if envelope.from_me {
            return;
        }
        let tenant = slot.tenant();
        let body = envelope.extract_text();
        match self.messages.append(NewMessage {
            tenant_id: tenant,
            message_id: envelope.id.as_deref(),
            direction: Direction::In,
            remote: &envelope.remote,
            body: &body,
        }) {
            Ok(true) => TraceEvent::MessageLogged {
                tenant: tenant.to_string(),
                direction: "in".into(),
                remote: envelope.remote,
            }
            .emit(),
            Ok(false) => {
                tracing::debug!(tenant, message_id = ?envelope.id, "duplicate message dropped")
            }
            Err(e) => tracing::warn!(tenant, error = %e, "inbound message log failed"),
        }
    }

    /// React to a session close: terminal closes purge credentials and
    /// park the tenant; transient closes arm the reconnect timer.
    ///
    /// Runs under the slot's create lock so it cannot interleave with a
    /// reset or restart: whichever side wins the lock sees the other's
    /// completed effects, and a reset that wins aborts this event task
    /// at the lock await below.
    async fn handle_close(
        self: &Arc<Self>,
        slot: &Arc<TenantSlot>,
        handle: &Arc<SessionHandle>,
        code: u16,
    ) {
        let _guard = slot.create_lock.lock().await;
        // A replaced or reset session must not touch the state machine.
        if !slot.take_live_if(handle) {
            return;
        }
        handle.close_transport().await;

        let tenant = slot.tenant();
        let terminal = Disconnect::classify(code) == Disconnect::Terminal;
        TraceEvent::SessionClosed {
            tenant: tenant.to_string(),
            code,
            terminal,
        }
        .emit();
        if let Err(e) = self.sessions.mark_disconnected(tenant) {
            tracing::warn!(tenant, error = %e, "disconnect mark failed");
        }

        if terminal {
            // Logged out: the stored credentials are dead. Drop them so
            // the next open starts a clean pairing flow.
            if let Err(e) = self.credentials.delete_all(tenant) {
                tracing::warn!(tenant, error = %e, "credential purge failed");
            }
            if let Err(e) = self.sessions.clear_pairing(tenant) {
                tracing::warn!(tenant, error = %e, "pairing clear failed");
            }
            slot.set_state(SessionState::Terminated);
            return;
        }

        if self.shutting_down.load(Ordering::Acquire) {
            slot.set_state(SessionState::Absent);
            return;
        }
        self.schedule_reconnect(slot);
    }

    /// Arm a reconnect timer for the slot. The timer task holds only a
    /// weak reference, so supervisor drop cancels all pending retries.
    fn schedule_reconnect(self: &Arc<Self>, slot: &Arc<TenantSlot>) {
        let attempt = slot.bump_attempt();
        slot.set_state(SessionState::ReconnectPending);
        let mut delay = self.policy.delay(slot.tenant(), attempt);
        TraceEvent::ReconnectScheduled {
            tenant: slot.tenant().to_string(),
            attempt,
            delay_ms: delay.as_millis() as u64,
        }
        .emit();

        let weak = Arc::downgrade(self);
        let slot = slot.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(delay).await;
                let Some(sup) = weak.upgrade() else { return };
                if sup.shutting_down.load(Ordering::Acquire) {
                    return;
                }
                // Check the slot under the create lock: a reset, restart
                // or manual open that won the lock first must disarm the
                // timer, not race it.
                let guard = slot.create_lock.lock().await;
                if slot.state() != SessionState::ReconnectPending || slot.live().is_some() {
                    return;
                }
                match sup.open_session(&slot).await {
                    Ok(_) => return,
                    Err(e) => {
                        tracing::warn!(tenant = %slot.tenant(), error = %e, "reconnect failed");
                        let attempt = slot.bump_attempt();
                        slot.set_state(SessionState::ReconnectPending);
                        delay = sup.policy.delay(slot.tenant(), attempt);
                        TraceEvent::ReconnectScheduled {
                            tenant: slot.tenant().to_string(),
                            attempt,
                            delay_ms: delay.as_millis() as u64,
                        }
                        .emit();
                        drop(guard);
                    }
                }
            }
        });
    }
}
