//! Append-only message log.
//!
//! Rows are never mutated; the only deletion is a bulk purge on tenant
//! reset. Queries return newest-first by insertion order. When the
//! transport supplies a message id, inserts are idempotent per
//! `(tenant, message id)` so redelivered messages are stored once.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::{Database, Result, StoreError};

/// Message direction relative to the tenant's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "in" => Some(Self::In),
            "out" => Some(Self::Out),
            _ => None,
        }
    }
}

/// A stored message, immutable once written.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub seq: i64,
    pub tenant_id: String,
    pub message_id: Option<String>,
    pub direction: Direction,
    pub remote: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A message about to be appended.
#[derive(Debug)]
pub struct NewMessage<'a> {
    pub tenant_id: &'a str,
    pub message_id: Option<&'a str>,
    pub direction: Direction,
    pub remote: &'a str,
    pub body: &'a str,
}

#[derive(Clone)]
pub struct MessageLog {
    db: Database,
}

impl MessageLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message. Returns `false` when the insert was dropped as
    /// a duplicate of an already-stored `(tenant, message id)` pair.
    pub fn append(&self, msg: NewMessage<'_>) -> Result<bool> {
        self.db.with(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO messages(tenant_id, message_id, direction, remote, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    msg.tenant_id,
                    msg.message_id,
                    msg.direction.as_str(),
                    msg.remote,
                    msg.body,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(changed == 1)
        })
    }

    /// Messages for one tenant, most recent first.
    pub fn list(&self, tenant: &str, limit: u32, offset: u32) -> Result<Vec<MessageRecord>> {
        let raw = self.db.with(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT seq, tenant_id, message_id, direction, remote, body, created_at
                 FROM messages WHERE tenant_id = ?1
                 ORDER BY seq DESC LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt.query_map(params![tenant, limit, offset], raw_record)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
        })?;
        raw.into_iter().map(MessageRecord::try_from).collect()
    }

    /// Delete every message for a tenant. Returns the number removed.
    pub fn purge(&self, tenant: &str) -> Result<usize> {
        self.db.with(|conn| {
            conn.execute("DELETE FROM messages WHERE tenant_id = ?1", params![tenant])
        })
    }
}

struct RawRecord {
    seq: i64,
    tenant_id: String,
    message_id: Option<String>,
    direction: String,
    remote: String,
    body: String,
    created_at: String,
}

fn raw_record(row: &Row<'_>) -> std::result::Result<RawRecord, rusqlite::Error> {
    Ok(RawRecord {
        seq: row.get(0)?,
        tenant_id: row.get(1)?,
        message_id: row.get(2)?,
        direction: row.get(3)?,
        remote: row.get(4)?,
        body: row.get(5)?,
        created_at: row.get(6)?,
    })
}

impl TryFrom<RawRecord> for MessageRecord {
    type Error = StoreError;

    fn try_from(raw: RawRecord) -> Result<Self> {
        let direction = Direction::parse(&raw.direction)
            .ok_or_else(|| StoreError::Corrupt(format!("bad direction {:?}", raw.direction)))?;
        let created_at = DateTime::parse_from_rfc3339(&raw.created_at)
            .map_err(|e| StoreError::Corrupt(format!("bad timestamp {:?}: {e}", raw.created_at)))?
            .with_timezone(&Utc);
        Ok(Self {
            seq: raw.seq,
            tenant_id: raw.tenant_id,
            message_id: raw.message_id,
            direction,
            remote: raw.remote,
            body: raw.body,
            created_at,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> MessageLog {
        MessageLog::new(Database::open_in_memory().unwrap())
    }

    fn inbound<'a>(tenant: &'a str, id: Option<&'a str>, body: &'a str) -> NewMessage<'a> {
        NewMessage {
            tenant_id: tenant,
            message_id: id,
            direction: Direction::In,
            remote: "15550100@wire.courier",
            body,
        }
    }

    #[test]
    fn list_is_most_recent_first() {
        let log = log();
        log.append(inbound("acme", None, "m1")).unwrap();
        log.append(inbound("acme", None, "m2")).unwrap();
        log.append(inbound("acme", None, "m3")).unwrap();

        let page = log.list("acme", 2, 0).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].body, "m3");
        assert_eq!(page[1].body, "m2");

        let next = log.list("acme", 2, 2).unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].body, "m1");
    }

    #[test]
    fn duplicate_message_ids_are_stored_once() {
        let log = log();
        assert!(log.append(inbound("acme", Some("mid-1"), "hello")).unwrap());
        assert!(!log.append(inbound("acme", Some("mid-1"), "hello again")).unwrap());

        let page = log.list("acme", 10, 0).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].body, "hello");
    }

    #[test]
    fn same_message_id_for_different_tenants_is_not_a_duplicate() {
        let log = log();
        assert!(log.append(inbound("acme", Some("mid-1"), "a")).unwrap());
        assert!(log.append(inbound("globex", Some("mid-1"), "b")).unwrap());
    }

    #[test]
    fn messages_without_ids_are_at_least_once() {
        let log = log();
        assert!(log.append(inbound("acme", None, "same")).unwrap());
        assert!(log.append(inbound("acme", None, "same")).unwrap());
        assert_eq!(log.list("acme", 10, 0).unwrap().len(), 2);
    }

    #[test]
    fn purge_removes_only_that_tenant() {
        let log = log();
        log.append(inbound("acme", None, "a")).unwrap();
        log.append(inbound("globex", None, "b")).unwrap();

        assert_eq!(log.purge("acme").unwrap(), 1);
        assert!(log.list("acme", 10, 0).unwrap().is_empty());
        assert_eq!(log.list("globex", 10, 0).unwrap().len(), 1);
    }

    #[test]
    fn direction_survives_roundtrip() {
        let log = log();
        log.append(NewMessage {
            tenant_id: "acme",
            message_id: None,
            direction: Direction::Out,
            remote: "15550100@wire.courier",
            body: "hi",
        })
        .unwrap();
        assert_eq!(log.list("acme", 1, 0).unwrap()[0].direction, Direction::Out);
    }
}
