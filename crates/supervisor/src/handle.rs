//! Live session handle.

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use courier_transport::{TransportError, TransportSession};

/// One live transport session plus its event-loop task.
///
/// The handle is shared between the registry slot, the event loop, and
/// in-flight send calls; the transport connection itself is owned here.
pub struct SessionHandle {
    tenant: String,
    transport: Box<dyn TransportSession>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("tenant", &self.tenant)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub(crate) fn new(tenant: String, transport: Box<dyn TransportSession>) -> Self {
        Self {
            tenant,
            transport,
            event_task: Mutex::new(None),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub(crate) fn attach_event_task(&self, task: JoinHandle<()>) {
        *self.event_task.lock() = Some(task);
    }

    pub(crate) async fn send(&self, address: &str, body: &str) -> Result<(), TransportError> {
        self.transport.send(address, body).await
    }

    /// Close the transport connection. Used from the event loop, which
    /// must keep running to finish its own teardown.
    pub(crate) async fn close_transport(&self) {
        self.transport.close().await;
    }

    /// Close the transport and stop the event loop. Used from reset,
    /// restart, and shutdown paths, never from the event loop itself.
    pub(crate) async fn shutdown(&self) {
        self.transport.close().await;
        if let Some(task) = self.event_task.lock().take() {
            task.abort();
        }
    }
}
