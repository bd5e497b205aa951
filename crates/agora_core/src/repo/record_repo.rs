//! Record store contract and SQLite implementation.
//!
//! # Invariants
//! - `put_record` with `expected_version == 0` only creates; any other value
//!   only updates a row stored at exactly that version.
//! - A rejected put leaves the row untouched.
//! - `kind`, `domain` and `created_at` are never rewritten.

use crate::model::ids::RecordRef;
use crate::model::record::{Record, RecordDraft, RecordKind, TaskStatus};
use crate::repo::{version_from_db, version_to_db, RepoError, RepoResult};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;

const RECORD_SELECT_SQL: &str = "SELECT
    domain,
    record_key,
    kind,
    version,
    payload,
    task_status,
    created_at,
    updated_at
FROM records";

/// Listing options for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordListQuery {
    pub domain: String,
    pub kind: Option<RecordKind>,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl RecordListQuery {
    pub fn domain(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            kind: None,
            limit: None,
            offset: 0,
        }
    }
}

/// Durable keyed storage for typed, versioned records.
pub trait RecordRepository {
    fn get_record(&self, target: &RecordRef) -> RepoResult<Option<Record>>;
    /// Creates or updates payload under optimistic concurrency; returns the new
    /// version. `initial_status` is applied on creation only.
    fn put_record(
        &self,
        target: &RecordRef,
        draft: &RecordDraft,
        expected_version: u64,
        initial_status: Option<TaskStatus>,
        now_ms: i64,
    ) -> RepoResult<u64>;
    /// Sets a task status and bumps the version. Used for graph mutations.
    fn put_task_status(
        &self,
        target: &RecordRef,
        status: TaskStatus,
        expected_version: u64,
        now_ms: i64,
    ) -> RepoResult<u64>;
    fn list_records(&self, query: &RecordListQuery) -> RepoResult<Vec<Record>>;
    /// Tasks in `status`, ordered by `created_at, key, domain`.
    fn list_tasks_by_status(&self, status: TaskStatus) -> RepoResult<Vec<Record>>;
    fn count_tasks_by_status(&self) -> RepoResult<BTreeMap<TaskStatus, usize>>;
    /// Distinct domains that hold at least one record.
    fn stored_domains(&self) -> RepoResult<Vec<String>>;
}

/// SQLite-backed record store.
pub struct SqliteRecordRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRecordRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn stored_version(&self, target: &RecordRef) -> RepoResult<Option<u64>> {
        let version: Option<i64> = self
            .conn
            .query_row(
                "SELECT version FROM records WHERE domain = ?1 AND record_key = ?2;",
                params![target.domain, target.key],
                |row| row.get(0),
            )
            .optional()?;
        version
            .map(|value| version_from_db(value, "records.version"))
            .transpose()
    }

    fn conflict(&self, target: &RecordRef, expected_version: u64) -> RepoError {
        match self.stored_version(target) {
            Ok(actual) => RepoError::VersionConflict {
                record: target.clone(),
                expected: expected_version,
                actual: actual.unwrap_or(0),
            },
            Err(err) => err,
        }
    }
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn get_record(&self, target: &RecordRef) -> RepoResult<Option<Record>> {
        let mut stmt = self.conn.prepare(&format!(
            "{RECORD_SELECT_SQL} WHERE domain = ?1 AND record_key = ?2;"
        ))?;
        let mut rows = stmt.query(params![target.domain, target.key])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_record_row(row)?));
        }
        Ok(None)
    }

    fn put_record(
        &self,
        target: &RecordRef,
        draft: &RecordDraft,
        expected_version: u64,
        initial_status: Option<TaskStatus>,
        now_ms: i64,
    ) -> RepoResult<u64> {
        let payload = serde_json::to_string(&draft.payload)
            .map_err(|err| RepoError::InvalidData(format!("unserializable payload: {err}")))?;

        if expected_version == 0 {
            let inserted = self.conn.execute(
                "INSERT INTO records (
                    domain,
                    record_key,
                    kind,
                    version,
                    payload,
                    task_status,
                    created_at,
                    updated_at
                ) VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?6)
                ON CONFLICT (domain, record_key) DO NOTHING;",
                params![
                    target.domain,
                    target.key,
                    draft.kind.as_str(),
                    payload,
                    initial_status.map(TaskStatus::as_str),
                    now_ms,
                ],
            )?;
            if inserted == 0 {
                return Err(self.conflict(target, expected_version));
            }
            return Ok(1);
        }

        let changed = self.conn.execute(
            "UPDATE records
             SET payload = ?4,
                 version = version + 1,
                 updated_at = ?5
             WHERE domain = ?1
               AND record_key = ?2
               AND version = ?3;",
            params![
                target.domain,
                target.key,
                version_to_db(expected_version)?,
                payload,
                now_ms,
            ],
        )?;
        if changed == 0 {
            return Err(self.conflict(target, expected_version));
        }
        Ok(expected_version + 1)
    }

    fn put_task_status(
        &self,
        target: &RecordRef,
        status: TaskStatus,
        expected_version: u64,
        now_ms: i64,
    ) -> RepoResult<u64> {
        let changed = self.conn.execute(
            "UPDATE records
             SET task_status = ?4,
                 version = version + 1,
                 updated_at = ?5
             WHERE domain = ?1
               AND record_key = ?2
               AND version = ?3
               AND task_status IS NOT NULL;",
            params![
                target.domain,
                target.key,
                version_to_db(expected_version)?,
                status.as_str(),
                now_ms,
            ],
        )?;
        if changed == 0 {
            return Err(self.conflict(target, expected_version));
        }
        Ok(expected_version + 1)
    }

    fn list_records(&self, query: &RecordListQuery) -> RepoResult<Vec<Record>> {
        let mut sql = format!("{RECORD_SELECT_SQL} WHERE domain = ?");
        let mut bind_values: Vec<SqlValue> = vec![SqlValue::Text(query.domain.clone())];

        if let Some(kind) = query.kind {
            sql.push_str(" AND kind = ?");
            bind_values.push(SqlValue::Text(kind.as_str().to_string()));
        }

        sql.push_str(" ORDER BY created_at ASC, record_key ASC");

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(SqlValue::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(SqlValue::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(SqlValue::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(row)?);
        }
        Ok(records)
    }

    fn list_tasks_by_status(&self, status: TaskStatus) -> RepoResult<Vec<Record>> {
        let mut stmt = self.conn.prepare(&format!(
            "{RECORD_SELECT_SQL}
             WHERE task_status = ?1
             ORDER BY created_at ASC, record_key ASC, domain ASC;"
        ))?;
        let mut rows = stmt.query([status.as_str()])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(row)?);
        }
        Ok(records)
    }

    fn count_tasks_by_status(&self) -> RepoResult<BTreeMap<TaskStatus, usize>> {
        let mut counts: BTreeMap<TaskStatus, usize> =
            TaskStatus::ALL.into_iter().map(|status| (status, 0)).collect();
        let mut stmt = self.conn.prepare(
            "SELECT task_status, COUNT(*)
             FROM records
             WHERE task_status IS NOT NULL
             GROUP BY task_status;",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let status_text: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            let status = parse_status(&status_text)?;
            counts.insert(status, usize::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }

    fn stored_domains(&self) -> RepoResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT domain FROM records ORDER BY domain ASC;")?;
        let mut rows = stmt.query([])?;
        let mut domains = Vec::new();
        while let Some(row) = rows.next()? {
            domains.push(row.get(0)?);
        }
        Ok(domains)
    }
}

fn parse_record_row(row: &Row<'_>) -> RepoResult<Record> {
    let kind_text: String = row.get("kind")?;
    let kind = RecordKind::parse(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid record kind `{kind_text}` in records.kind"))
    })?;

    let payload_text: String = row.get("payload")?;
    let payload = serde_json::from_str(&payload_text)
        .map_err(|err| RepoError::InvalidData(format!("invalid json in records.payload: {err}")))?;

    let task_status = row
        .get::<_, Option<String>>("task_status")?
        .map(|value| parse_status(&value))
        .transpose()?;

    Ok(Record {
        domain: row.get("domain")?,
        key: row.get("record_key")?,
        kind,
        version: version_from_db(row.get("version")?, "records.version")?,
        payload,
        task_status,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_status(value: &str) -> RepoResult<TaskStatus> {
    TaskStatus::parse(value).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid task status `{value}` in records.task_status"))
    })
}

#[cfg(test)]
mod tests {
    use super::{RecordListQuery, RecordRepository, SqliteRecordRepository};
    use crate::db::open_db_in_memory;
    use crate::model::ids::RecordRef;
    use crate::model::record::{RecordDraft, RecordKind, TaskStatus};
    use crate::repo::RepoError;
    use serde_json::json;

    fn spec_draft(title: &str) -> RecordDraft {
        RecordDraft::new(RecordKind::Specification, json!({ "title": title }))
    }

    #[test]
    fn create_then_update_bumps_version() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteRecordRepository::new(&conn);
        let target = RecordRef::new("specs", "S1");

        assert_eq!(repo.put_record(&target, &spec_draft("v1"), 0, None, 10).unwrap(), 1);
        assert_eq!(repo.put_record(&target, &spec_draft("v2"), 1, None, 20).unwrap(), 2);

        let stored = repo.get_record(&target).unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.payload["title"], "v2");
        assert_eq!(stored.created_at, 10);
        assert_eq!(stored.updated_at, 20);
        assert_eq!(stored.task_status, None);
    }

    #[test]
    fn stale_version_is_rejected_without_mutation() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteRecordRepository::new(&conn);
        let target = RecordRef::new("specs", "S1");
        repo.put_record(&target, &spec_draft("v1"), 0, None, 10).unwrap();
        repo.put_record(&target, &spec_draft("v2"), 1, None, 20).unwrap();

        let err = repo
            .put_record(&target, &spec_draft("stale"), 1, None, 30)
            .unwrap_err();
        assert!(matches!(
            err,
            RepoError::VersionConflict { expected: 1, actual: 2, .. }
        ));
        assert_eq!(repo.get_record(&target).unwrap().unwrap().payload["title"], "v2");
    }

    #[test]
    fn create_over_existing_row_conflicts() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteRecordRepository::new(&conn);
        let target = RecordRef::new("specs", "S1");
        repo.put_record(&target, &spec_draft("v1"), 0, None, 10).unwrap();

        let err = repo.put_record(&target, &spec_draft("again"), 0, None, 11).unwrap_err();
        assert!(matches!(
            err,
            RepoError::VersionConflict { expected: 0, actual: 1, .. }
        ));
    }

    #[test]
    fn update_of_missing_row_reports_version_zero() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteRecordRepository::new(&conn);
        let err = repo
            .put_record(&RecordRef::new("specs", "ghost"), &spec_draft("x"), 3, None, 10)
            .unwrap_err();
        assert!(matches!(
            err,
            RepoError::VersionConflict { expected: 3, actual: 0, .. }
        ));
    }

    #[test]
    fn task_status_updates_require_task_rows() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteRecordRepository::new(&conn);
        let spec = RecordRef::new("specs", "S1");
        repo.put_record(&spec, &spec_draft("v1"), 0, None, 10).unwrap();
        assert!(repo.put_task_status(&spec, TaskStatus::Ready, 1, 11).is_err());

        let task = RecordRef::new("orchestrator", "T1");
        let draft = RecordDraft::new(RecordKind::Task, json!({"title": "t"}));
        repo.put_record(&task, &draft, 0, Some(TaskStatus::Ready), 10).unwrap();
        assert_eq!(
            repo.put_task_status(&task, TaskStatus::InProgress, 1, 12).unwrap(),
            2
        );
        let counts = repo.count_tasks_by_status().unwrap();
        assert_eq!(counts[&TaskStatus::InProgress], 1);
        assert_eq!(counts[&TaskStatus::Ready], 0);
    }

    #[test]
    fn list_filters_by_kind_and_paginates_in_creation_order() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteRecordRepository::new(&conn);
        for (index, key) in ["B", "A", "C"].iter().enumerate() {
            repo.put_record(
                &RecordRef::new("review", *key),
                &RecordDraft::new(RecordKind::Bug, json!({"title": key})),
                0,
                None,
                100 + index as i64,
            )
            .unwrap();
        }
        repo.put_record(
            &RecordRef::new("review", "R1"),
            &RecordDraft::new(RecordKind::CodeReview, json!({"target": "B"})),
            0,
            None,
            50,
        )
        .unwrap();

        let bugs = repo
            .list_records(&RecordListQuery {
                kind: Some(RecordKind::Bug),
                ..RecordListQuery::domain("review")
            })
            .unwrap();
        let keys: Vec<&str> = bugs.iter().map(|record| record.key.as_str()).collect();
        assert_eq!(keys, vec!["B", "A", "C"]);

        let page = repo
            .list_records(&RecordListQuery {
                limit: Some(2),
                offset: 1,
                ..RecordListQuery::domain("review")
            })
            .unwrap();
        let keys: Vec<&str> = page.iter().map(|record| record.key.as_str()).collect();
        assert_eq!(keys, vec!["B", "A"]);
    }
}
