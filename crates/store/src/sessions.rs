//! Tenant session records and the single pairing-artifact slot.
//!
//! One row per tenant that has ever been started. The pairing column
//! holds at most one artifact; each pairing event overwrites it and a
//! successful connection clears it.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::Serialize;

use crate::{Database, Result, StoreError};

/// Durable per-tenant session record.
#[derive(Debug, Clone, Serialize)]
pub struct TenantRecord {
    pub tenant_id: String,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    /// Current pairing artifact, if the tenant is awaiting pairing.
    pub pairing: Option<String>,
}

#[derive(Clone)]
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register a tenant if it is not already known. Existing records
    /// keep their original `created_at`.
    pub fn upsert(&self, tenant: &str) -> Result<()> {
        self.db.with(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO tenants(tenant_id, created_at) VALUES (?1, ?2)",
                params![tenant, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Overwrite the pairing artifact for a tenant.
    pub fn set_pairing(&self, tenant: &str, artifact: &str) -> Result<()> {
        self.db.with(|conn| {
            conn.execute(
                "UPDATE tenants SET pairing = ?2 WHERE tenant_id = ?1",
                params![tenant, artifact],
            )?;
            Ok(())
        })
    }

    /// Clear the pairing artifact (it is no longer needed once connected).
    pub fn clear_pairing(&self, tenant: &str) -> Result<()> {
        self.db.with(|conn| {
            conn.execute(
                "UPDATE tenants SET pairing = NULL WHERE tenant_id = ?1",
                params![tenant],
            )?;
            Ok(())
        })
    }

    /// Current pairing artifact, if any.
    pub fn pairing(&self, tenant: &str) -> Result<Option<String>> {
        self.db.with(|conn| {
            let mut stmt = conn
                .prepare_cached("SELECT pairing FROM tenants WHERE tenant_id = ?1")?;
            let mut rows = stmt.query(params![tenant])?;
            match rows.next()? {
                Some(row) => row.get(0),
                None => Ok(None),
            }
        })
    }

    pub fn mark_connected(&self, tenant: &str, at: DateTime<Utc>) -> Result<()> {
        self.db.with(|conn| {
            conn.execute(
                "UPDATE tenants SET connected_at = ?2 WHERE tenant_id = ?1",
                params![tenant, at.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    pub fn mark_disconnected(&self, tenant: &str) -> Result<()> {
        self.db.with(|conn| {
            conn.execute(
                "UPDATE tenants SET connected_at = NULL WHERE tenant_id = ?1",
                params![tenant],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, tenant: &str) -> Result<Option<TenantRecord>> {
        let row = self.db.with(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT tenant_id, created_at, connected_at, pairing
                 FROM tenants WHERE tenant_id = ?1",
            )?;
            let mut rows = stmt.query(params![tenant])?;
            match rows.next()? {
                Some(row) => Ok(Some(raw_record(row)?)),
                None => Ok(None),
            }
        })?;
        row.map(TenantRecord::try_from).transpose()
    }

    /// All known tenants, most recently created first.
    pub fn list(&self) -> Result<Vec<TenantRecord>> {
        let raw = self.db.with(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT tenant_id, created_at, connected_at, pairing
                 FROM tenants ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map([], raw_record)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
        })?;
        raw.into_iter().map(TenantRecord::try_from).collect()
    }

    /// Remove the tenant record (and with it the pairing slot).
    pub fn remove(&self, tenant: &str) -> Result<()> {
        self.db.with(|conn| {
            conn.execute("DELETE FROM tenants WHERE tenant_id = ?1", params![tenant])?;
            Ok(())
        })
    }
}

// Raw row before timestamp parsing; rusqlite closures cannot return
// our StoreError, so parsing happens outside the connection lock.
struct RawRecord {
    tenant_id: String,
    created_at: String,
    connected_at: Option<String>,
    pairing: Option<String>,
}

fn raw_record(row: &Row<'_>) -> std::result::Result<RawRecord, rusqlite::Error> {
    Ok(RawRecord {
        tenant_id: row.get(0)?,
        created_at: row.get(1)?,
        connected_at: row.get(2)?,
        pairing: row.get(3)?,
    })
}

impl TryFrom<RawRecord> for TenantRecord {
    type Error = StoreError;

    fn try_from(raw: RawRecord) -> Result<Self> {
        Ok(Self {
            created_at: parse_ts(&raw.tenant_id, &raw.created_at)?,
            connected_at: raw
                .connected_at
                .as_deref()
                .map(|ts| parse_ts(&raw.tenant_id, ts))
                .transpose()?,
            tenant_id: raw.tenant_id,
            pairing: raw.pairing,
        })
    }
}

fn parse_ts(tenant: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("tenant {tenant}: bad timestamp {raw:?}: {e}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
