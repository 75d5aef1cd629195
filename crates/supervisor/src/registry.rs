//! In-memory session registry.
//!
//! One slot per tenant, created on demand and kept for the process
//! lifetime. The slot carries the session state machine, the live
//! handle (when connected), and the per-tenant creation lock that makes
//! concurrent session creation collapse into a single open.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;

use crate::handle::SessionHandle;

/// Lifecycle state of one tenant's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session and no pending activity.
    Absent,
    /// A transport open is in flight.
    Connecting,
    /// The session is live and fully established.
    Connected,
    /// The session dropped transiently; a retry timer is armed.
    ReconnectPending,
    /// The transport logged the tenant out. No automatic retry; an
    /// explicit ensure or restart revives the tenant through a fresh
    /// pairing flow.
    Terminated,
}

struct SlotInner {
    state: SessionState,
    live: Option<Arc<SessionHandle>>,
    attempt: u32,
}

/// Per-tenant registry slot.
pub struct TenantSlot {
    tenant: String,
    /// Serializes session creation (and teardown) for this tenant only.
    pub(crate) create_lock: AsyncMutex<()>,
    inner: Mutex<SlotInner>,
}

impl TenantSlot {
    fn new(tenant: String) -> Arc<Self> {
        Arc::new(Self {
            tenant,
            create_lock: AsyncMutex::new(()),
            inner: Mutex::new(SlotInner {
                state: SessionState::Absent,
                live: None,
                attempt: 0,
            }),
        })
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.inner.lock().state = state;
    }

    /// The live handle, if one is installed.
    pub(crate) fn live(&self) -> Option<Arc<SessionHandle>> {
        self.inner.lock().live.clone()
    }

    /// Install a freshly opened handle. State stays `Connecting` until
    /// the transport reports `Connected`.
    pub(crate) fn install(&self, handle: Arc<SessionHandle>) {
        let mut inner = self.inner.lock();
        inner.live = Some(handle);
        inner.state = SessionState::Connecting;
    }

    pub(crate) fn take_live(&self) -> Option<Arc<SessionHandle>> {
        self.inner.lock().live.take()
    }

    /// Remove the live handle only if it is the given one. A stale
    /// handle from an already-replaced session must not disturb the
    /// state machine.
    pub(crate) fn take_live_if(&self, handle: &Arc<SessionHandle>) -> bool {
        let mut inner = self.inner.lock();
        match &inner.live {
            Some(live) if Arc::ptr_eq(live, handle) => {
                inner.live = None;
                true
            }
            _ => false,
        }
    }

    /// Increment and return the reconnect attempt counter.
    pub(crate) fn bump_attempt(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.attempt += 1;
        inner.attempt
    }

    pub(crate) fn reset_attempts(&self) {
        self.inner.lock().attempt = 0;
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    slots: Mutex<HashMap<String, Arc<TenantSlot>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot for a tenant, creating it on first use.
    pub fn slot(&self, tenant: &str) -> Arc<TenantSlot> {
        self.slots
            .lock()
            .entry(tenant.to_string())
            .or_insert_with(|| TenantSlot::new(tenant.to_string()))
            .clone()
    }

    /// The slot for a tenant if one exists, without creating it.
    pub fn peek(&self, tenant: &str) -> Option<Arc<TenantSlot>> {
        self.slots.lock().get(tenant).cloned()
    }

    pub fn slots(&self) -> Vec<Arc<TenantSlot>> {
        self.slots.lock().values().cloned().collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use courier_transport::{TransportError, TransportSession};

    struct NoopSession;

    #[async_trait]
    impl TransportSession for NoopSession {
        async fn send(&self, _address: &str, _body: &str) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&self) {}
    }

    fn handle() -> Arc<SessionHandle> {
        Arc::new(SessionHandle::new("acme".into(), Box::new(NoopSession)))
    }

    #[test]
    fn slot_is_created_once_per_tenant() {
        let registry = SessionRegistry::new();
        let a = registry.slot("acme");
        let b = registry.slot("acme");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.peek("globex").is_none());
    }

    #[test]
    fn fresh_slot_is_absent() {
        let registry = SessionRegistry::new();
        let slot = registry.slot("acme");
        assert_eq!(slot.state(), SessionState::Absent);
        assert!(slot.live().is_none());
    }

    #[test]
    fn install_moves_slot_to_connecting() {
        let registry = SessionRegistry::new();
        let slot = registry.slot("acme");
        slot.install(handle());
        assert_eq!(slot.state(), SessionState::Connecting);
        assert!(slot.live().is_some());
    }

    #[test]
    fn take_live_if_ignores_stale_handles() {
        let registry = SessionRegistry::new();
        let slot = registry.slot("acme");
        let current = handle();
        let stale = handle();
        slot.install(current.clone());

        assert!(!slot.take_live_if(&stale));
        assert!(slot.live().is_some());
        assert!(slot.take_live_if(&current));
        assert!(slot.live().is_none());
    }

    #[test]
    fn attempt_counter_bumps_and_resets() {
        let registry = SessionRegistry::new();
        let slot = registry.slot("acme");
        assert_eq!(slot.bump_attempt(), 1);
        assert_eq!(slot.bump_attempt(), 2);
        slot.reset_attempts();
        assert_eq!(slot.bump_attempt(), 1);
    }
}
