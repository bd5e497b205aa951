//! Append-only audit ledger.
//!
//! # Responsibility
//! - Append one entry per accepted mutation.
//! - Stream entries per domain in append order.
//!
//! # Invariants
//! - No update or delete path exists; SQLite triggers reject both.
//! - `recorded_at` never decreases within one domain, so append order is also
//!   time order.
//! - A stream is bounded by the highest `seq` that existed when it was opened.

use crate::clock::not_before;
use crate::model::audit::{AuditEntry, NewAuditEntry, OperationKind};
use crate::repo::{parse_uuid, version_from_db, version_to_db, RepoError, RepoResult};
use rusqlite::{params, Connection, Row};
use std::collections::VecDeque;
use uuid::Uuid;

const AUDIT_PAGE_SIZE: u32 = 128;

const AUDIT_SELECT_SQL: &str = "SELECT
    seq,
    entry_id,
    actor,
    domain,
    record_key,
    prior_version,
    new_version,
    operation,
    recorded_at
FROM audit_log";

pub struct SqliteAuditRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAuditRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Appends one entry and returns it with its assigned `seq`.
    pub fn append(&self, entry: &NewAuditEntry<'_>, now_ms: i64) -> RepoResult<AuditEntry> {
        let floor: Option<i64> = self.conn.query_row(
            "SELECT MAX(recorded_at) FROM audit_log WHERE domain = ?1;",
            [entry.domain],
            |row| row.get(0),
        )?;
        let recorded_at = not_before(now_ms, floor);
        let entry_id = Uuid::new_v4();

        self.conn.execute(
            "INSERT INTO audit_log (
                entry_id,
                actor,
                domain,
                record_key,
                prior_version,
                new_version,
                operation,
                recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                entry_id.to_string(),
                entry.actor,
                entry.domain,
                entry.record_key,
                version_to_db(entry.prior_version)?,
                version_to_db(entry.new_version)?,
                entry.operation.as_str(),
                recorded_at,
            ],
        )?;

        Ok(AuditEntry {
            seq: self.conn.last_insert_rowid(),
            entry_id,
            actor: entry.actor.to_string(),
            domain: entry.domain.to_string(),
            record_key: entry.record_key.to_string(),
            prior_version: entry.prior_version,
            new_version: entry.new_version,
            operation: entry.operation,
            recorded_at,
        })
    }

    /// Entries of `domain` with `recorded_at >= since_ms`.
    pub fn entries_since(&self, domain: &str, since_ms: i64) -> RepoResult<AuditEntries<'conn>> {
        AuditEntries::open(self.conn, domain, since_ms, 0)
    }

    /// Entries of `domain` appended after `seq`.
    pub fn entries_after(&self, domain: &str, seq: i64) -> RepoResult<AuditEntries<'conn>> {
        AuditEntries::open(self.conn, domain, i64::MIN, seq)
    }

    /// Number of entries for one record key; used by invariant checks.
    pub fn count_for_record(&self, domain: &str, record_key: &str) -> RepoResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM audit_log WHERE domain = ?1 AND record_key = ?2;",
            params![domain, record_key],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

/// Lazy forward stream over one domain's ledger.
///
/// Rows are fetched in pages on demand. Entries appended after the stream was
/// opened are not yielded; reopen with [`AuditEntries::resume_after`] as the
/// `seq` to continue.
pub struct AuditEntries<'conn> {
    conn: &'conn Connection,
    domain: String,
    since_ms: i64,
    after_seq: i64,
    high_water: i64,
    buffer: VecDeque<AuditEntry>,
    exhausted: bool,
}

impl<'conn> AuditEntries<'conn> {
    fn open(
        conn: &'conn Connection,
        domain: &str,
        since_ms: i64,
        after_seq: i64,
    ) -> RepoResult<Self> {
        let high_water: i64 = conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM audit_log WHERE domain = ?1;",
            [domain],
            |row| row.get(0),
        )?;
        Ok(Self {
            conn,
            domain: domain.to_string(),
            since_ms,
            after_seq,
            high_water,
            buffer: VecDeque::new(),
            exhausted: high_water <= after_seq,
        })
    }

    /// `seq` of the last yielded entry; pass to `entries_after` to restart.
    pub fn resume_after(&self) -> i64 {
        self.after_seq
    }

    fn fill(&mut self) -> RepoResult<()> {
        let conn = self.conn;
        let mut stmt = conn.prepare_cached(&format!(
            "{AUDIT_SELECT_SQL}
             WHERE domain = ?1
               AND seq > ?2
               AND seq <= ?3
               AND recorded_at >= ?4
             ORDER BY seq ASC
             LIMIT ?5;"
        ))?;
        let mut rows = stmt.query(params![
            self.domain,
            self.after_seq,
            self.high_water,
            self.since_ms,
            AUDIT_PAGE_SIZE,
        ])?;
        let mut fetched = 0u32;
        while let Some(row) = rows.next()? {
            self.buffer.push_back(parse_audit_row(row)?);
            fetched += 1;
        }
        if fetched < AUDIT_PAGE_SIZE {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl Iterator for AuditEntries<'_> {
    type Item = RepoResult<AuditEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fill() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        let entry = self.buffer.pop_front()?;
        self.after_seq = entry.seq;
        Some(Ok(entry))
    }
}

fn parse_audit_row(row: &Row<'_>) -> RepoResult<AuditEntry> {
    let entry_id_text: String = row.get("entry_id")?;
    let operation_text: String = row.get("operation")?;
    let operation = OperationKind::parse(&operation_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid operation `{operation_text}` in audit_log.operation"
        ))
    })?;

    Ok(AuditEntry {
        seq: row.get("seq")?,
        entry_id: parse_uuid(&entry_id_text, "audit_log.entry_id")?,
        actor: row.get("actor")?,
        domain: row.get("domain")?,
        record_key: row.get("record_key")?,
        prior_version: version_from_db(row.get("prior_version")?, "audit_log.prior_version")?,
        new_version: version_from_db(row.get("new_version")?, "audit_log.new_version")?,
        operation,
        recorded_at: row.get("recorded_at")?,
    })
}
