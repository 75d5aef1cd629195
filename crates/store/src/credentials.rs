//! Credential bundle store.
//!
//! The transport owns the internal structure of its key material; this
//! store only maps `(tenant, key-name)` to opaque blobs. Key names are
//! the literal `creds` entry for the long-term credential blob plus
//! `{key_type}-{id}` entries for individual key-material items.

use std::collections::HashMap;

use rusqlite::params;

use crate::{Database, Result};

/// Key name under which the long-term credential blob is stored.
const CREDS_KEY: &str = "creds";

#[derive(Clone)]
pub struct CredentialStore {
    db: Database,
}

impl CredentialStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Fetch the long-term credential blob, if the tenant has one.
    pub fn credentials(&self, tenant: &str) -> Result<Option<Vec<u8>>> {
        self.get(tenant, CREDS_KEY)
    }

    /// Overwrite the long-term credential blob.
    pub fn set_credentials(&self, tenant: &str, blob: &[u8]) -> Result<()> {
        self.db.with(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO credentials(tenant_id, key, value) VALUES (?1, ?2, ?3)",
                params![tenant, CREDS_KEY, blob],
            )?;
            Ok(())
        })
    }

    /// Fetch key-material entries of one type by id.
    ///
    /// Ids absent from the store are omitted from the result — callers
    /// must treat absence as "not yet known", not as an error.
    pub fn keys(
        &self,
        tenant: &str,
        key_type: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<u8>>> {
        self.db.with(|conn| {
            let mut out = HashMap::new();
            let mut stmt = conn.prepare_cached(
                "SELECT value FROM credentials WHERE tenant_id = ?1 AND key = ?2",
            )?;
            for id in ids {
                let key = key_name(key_type, id);
                let mut rows = stmt.query(params![tenant, key])?;
                if let Some(row) = rows.next()? {
                    out.insert(id.clone(), row.get(0)?);
                }
            }
            Ok(out)
        })
    }

    /// Persist a batch of key-material entries in one transaction.
    ///
    /// Each entry is `(key_type, id, value)`. An existing entry with the
    /// same name is overwritten.
    pub fn set_keys(&self, tenant: &str, entries: &[(String, String, Vec<u8>)]) -> Result<()> {
        self.db.with(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR REPLACE INTO credentials(tenant_id, key, value) VALUES (?1, ?2, ?3)",
                )?;
                for (key_type, id, value) in entries {
                    stmt.execute(params![tenant, key_name(key_type, id), value])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Delete the entire credential bundle for a tenant.
    pub fn delete_all(&self, tenant: &str) -> Result<()> {
        self.db.with(|conn| {
            conn.execute("DELETE FROM credentials WHERE tenant_id = ?1", params![tenant])?;
            Ok(())
        })
    }

    /// True when the tenant has no stored credential entries at all.
    pub fn is_empty(&self, tenant: &str) -> Result<bool> {
        self.db.with(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM credentials WHERE tenant_id = ?1",
                params![tenant],
                |row| row.get(0),
            )?;
            Ok(count == 0)
        })
    }

    fn get(&self, tenant: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT value FROM credentials WHERE tenant_id = ?1 AND key = ?2",
            )?;
            let mut rows = stmt.query(params![tenant, key])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
    }
}

fn key_name(key_type: &str, id: &str) -> String {
    format!("{key_type}-{id}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
