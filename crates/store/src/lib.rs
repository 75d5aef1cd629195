//! Durable stores for Courier, backed by a single SQLite database.
//!
//! Four relations: `tenants` (session record + pairing-artifact slot),
//! `messages` (append-only log), and `credentials` (per-tenant key
//! material). All statements go through one connection guarded by a
//! mutex, which also serializes credential writes per tenant.

mod credentials;
mod db;
mod messages;
mod sessions;

pub use credentials::CredentialStore;
pub use db::Database;
pub use messages::{Direction, MessageLog, MessageRecord, NewMessage};
pub use sessions::{SessionStore, TenantRecord};

/// Store error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
