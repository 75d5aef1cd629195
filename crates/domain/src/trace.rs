use serde::Serialize;

/// Structured trace events emitted across all Courier crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionOpened {
        tenant: String,
        had_credentials: bool,
    },
    PairingIssued {
        tenant: String,
    },
    SessionConnected {
        tenant: String,
    },
    SessionClosed {
        tenant: String,
        code: u16,
        terminal: bool,
    },
    ReconnectScheduled {
        tenant: String,
        attempt: u32,
        delay_ms: u64,
    },
    CredentialsPersisted {
        tenant: String,
        entries: usize,
    },
    MessageLogged {
        tenant: String,
        direction: String,
        remote: String,
    },
    SessionReset {
        tenant: String,
        purged_messages: bool,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "courier_event");
    }
}
