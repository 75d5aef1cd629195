//! Transport collaborator boundary.
//!
//! The actual messaging protocol (handshake, wire encoding, end-to-end
//! encryption) lives behind the [`Transport`] and [`TransportSession`]
//! traits. Courier consumes the transport through an event stream and a
//! send primitive, and supplies auth material through [`AuthState`].
//! The [`loopback`] module ships a development transport so the gateway
//! runs without a real protocol library.

pub mod address;
pub mod envelope;
pub mod loopback;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use address::normalize_address;
pub use envelope::{MessageContent, MessageEnvelope};

/// Opaque error type for the key-provider seam; the transport does not
/// care what failed, only that persistence did not complete.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Transport error.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("open failed: {0}")]
    Open(String),

    #[error("send rejected: {0}")]
    Send(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth material
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Durable key-material access handed to the transport at open time.
///
/// The transport reads and writes named key entries during its
/// handshake; the provider must persist synchronously — when `set`
/// returns, the entries are durable.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Fetch key entries of one type by id. Absent ids are omitted.
    async fn get(
        &self,
        key_type: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<u8>>, BoxError>;

    /// Persist a batch of key entries.
    async fn set(&self, entries: &[KeyEntry]) -> Result<(), BoxError>;

    /// Persist the long-term credential blob.
    async fn save_credentials(&self, blob: &[u8]) -> Result<(), BoxError>;
}

/// Auth material for opening a session.
pub struct AuthState {
    /// Long-term credential blob from a previous session, if any.
    /// `None` means the tenant has never paired (or was reset) and the
    /// transport should start a fresh pairing flow.
    pub credentials: Option<Vec<u8>>,
    pub keys: Arc<dyn KeyProvider>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event stream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single named key-material entry.
#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub key_type: String,
    pub id: String,
    pub value: Vec<u8>,
}

/// Incremental credential update pushed by the transport.
#[derive(Debug, Clone, Default)]
pub struct CredsUpdate {
    /// New long-term credential blob, when it changed.
    pub credentials: Option<Vec<u8>>,
    pub keys: Vec<KeyEntry>,
}

/// Events a live session delivers, in order, over its event channel.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A pairing artifact the tenant must present out-of-band.
    Pairing(String),
    /// The connection is fully established.
    Connected,
    /// The connection closed with the transport's reason code.
    Closed { code: u16 },
    /// Credential material changed and must be persisted before the
    /// session proceeds.
    CredsUpdated(CredsUpdate),
    /// An inbound message arrived.
    Message(MessageEnvelope),
}

/// Close code for an explicit logout / deauthorization.
pub const CLOSE_LOGGED_OUT: u16 = 401;

/// Close code used when the event channel dropped without a close event.
pub const CLOSE_UNKNOWN: u16 = 0;

/// Disconnect classification driving the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// Explicit logout or deauthorization. Credentials are dead; do not
    /// reconnect.
    Terminal,
    /// Network drop, server restart, or unknown. Eligible for retry.
    Transient,
}

impl Disconnect {
    pub fn classify(code: u16) -> Self {
        if code == CLOSE_LOGGED_OUT {
            Self::Terminal
        } else {
            Self::Transient
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A freshly opened session: the handle plus its event stream.
pub struct OpenedSession {
    pub session: Box<dyn TransportSession>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Factory for per-tenant transport sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, tenant: &str, auth: AuthState) -> Result<OpenedSession, TransportError>;

    /// Domain suffix for normalized addresses (`{digits}@{suffix}`).
    fn address_suffix(&self) -> &str;
}

/// One live connection.
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Send a text message to an already-normalized address.
    async fn send(&self, address: &str, body: &str) -> Result<(), TransportError>;

    /// Best-effort close. Idempotent.
    async fn close(&self);
}
