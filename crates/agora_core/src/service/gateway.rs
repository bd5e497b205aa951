//! Access control gateway.
//!
//! # Responsibility
//! - Enforce the single-writer-per-domain policy and record schemas.
//! - Turn one accepted mutation into a store write, one audit entry and one
//!   notification.
//!
//! # Invariants
//! - The gateway never opens transactions; the caller runs it inside one
//!   `IMMEDIATE` transaction so the three effects commit together.
//! - Task status is never written here; see `graph_service`.

use crate::config::Registry;
use crate::model::agent::AgentState;
use crate::model::audit::{NewAuditEntry, OperationKind};
use crate::model::ids::{is_valid_record_key, RecordRef};
use crate::model::record::{Record, RecordDraft, RecordKind, TaskStatus};
use crate::repo::agent_repo::SqliteAgentRepository;
use crate::repo::audit_repo::SqliteAuditRepository;
use crate::repo::notification_repo::NewNotification;
use crate::repo::record_repo::{RecordListQuery, RecordRepository, SqliteRecordRepository};
use crate::service::error::{CoordError, CoordResult};
use crate::service::fanout_service::FanOut;
use rusqlite::Connection;
use uuid::Uuid;

/// One accepted mutation, ready to be audited and fanned out.
#[derive(Debug, Clone, Copy)]
pub struct Change<'c> {
    pub actor: &'c str,
    pub target: &'c RecordRef,
    pub kind: RecordKind,
    pub prior_version: u64,
    pub new_version: u64,
    pub operation: OperationKind,
}

/// Result of one accepted write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub record: RecordRef,
    pub version: u64,
    pub audit_seq: i64,
    pub notification_id: Uuid,
}

pub struct Gateway<'a> {
    conn: &'a Connection,
    registry: &'a Registry,
}

impl<'a> Gateway<'a> {
    pub fn new(conn: &'a Connection, registry: &'a Registry) -> Self {
        Self { conn, registry }
    }

    /// Resolves a read: both domain and actor must be configured.
    pub fn authorize_read(&self, actor: &str, domain: &str) -> CoordResult<()> {
        if !self.registry.ownership().contains(domain) {
            return Err(CoordError::UnknownDomain(domain.to_string()));
        }
        if !self.registry.has_agent(actor) {
            return Err(CoordError::UnknownAgent(actor.to_string()));
        }
        Ok(())
    }

    /// Single-writer check. Terminated agents lose write access everywhere.
    pub fn authorize_write(&self, actor: &str, domain: &str) -> CoordResult<()> {
        self.authorize_read(actor, domain)?;
        if SqliteAgentRepository::new(self.conn).state(actor)? == Some(AgentState::Terminated) {
            return Err(CoordError::AgentTerminated(actor.to_string()));
        }
        if !self.registry.ownership().may_write(actor, domain) {
            return Err(CoordError::PermissionDenied {
                actor: actor.to_string(),
                domain: domain.to_string(),
            });
        }
        Ok(())
    }

    pub fn read(&self, actor: &str, target: &RecordRef) -> CoordResult<Record> {
        self.authorize_read(actor, &target.domain)?;
        SqliteRecordRepository::new(self.conn)
            .get_record(target)?
            .ok_or_else(|| CoordError::NotFound(target.clone()))
    }

    pub fn list(&self, actor: &str, query: &RecordListQuery) -> CoordResult<Vec<Record>> {
        self.authorize_read(actor, &query.domain)?;
        SqliteRecordRepository::new(self.conn)
            .list_records(query)
            .map_err(Into::into)
    }

    /// Authorised, schema-checked create (`expected_version == 0`) or payload
    /// update.
    pub fn write(
        &self,
        actor: &str,
        target: &RecordRef,
        draft: &RecordDraft,
        expected_version: u64,
        now_ms: i64,
    ) -> CoordResult<WriteReceipt> {
        self.authorize_write(actor, &target.domain)?;
        let initial_status = self.check_schema(target, draft, expected_version)?;

        let version = SqliteRecordRepository::new(self.conn).put_record(
            target,
            draft,
            expected_version,
            initial_status,
            now_ms,
        )?;
        let operation = if expected_version == 0 {
            OperationKind::Create
        } else {
            OperationKind::Update
        };
        self.record_change(
            Change {
                actor,
                target,
                kind: draft.kind,
                prior_version: expected_version,
                new_version: version,
                operation,
            },
            now_ms,
        )
    }

    /// Appends the audit entry and enqueues the notification for a mutation
    /// already applied to the store.
    pub fn record_change(&self, change: Change<'_>, now_ms: i64) -> CoordResult<WriteReceipt> {
        let entry = SqliteAuditRepository::new(self.conn).append(
            &NewAuditEntry {
                actor: change.actor,
                domain: &change.target.domain,
                record_key: &change.target.key,
                prior_version: change.prior_version,
                new_version: change.new_version,
                operation: change.operation,
            },
            now_ms,
        )?;
        let notification = FanOut::new(self.conn, self.registry).enqueue(
            &NewNotification {
                actor: change.actor,
                domain: &change.target.domain,
                record_key: &change.target.key,
                record_kind: change.kind,
                record_version: change.new_version,
                operation: change.operation,
            },
            now_ms,
        )?;
        Ok(WriteReceipt {
            record: change.target.clone(),
            version: change.new_version,
            audit_seq: entry.seq,
            notification_id: notification.notification_id,
        })
    }

    /// Returns the status a newly created record starts with.
    fn check_schema(
        &self,
        target: &RecordRef,
        draft: &RecordDraft,
        expected_version: u64,
    ) -> CoordResult<Option<TaskStatus>> {
        if !is_valid_record_key(&target.key) {
            return Err(CoordError::SchemaViolation(format!(
                "malformed record key `{}`",
                target.key
            )));
        }
        let schema = self.registry.schemas().get(draft.kind).ok_or_else(|| {
            CoordError::SchemaViolation(format!(
                "record kind `{}` is not declared",
                draft.kind.as_str()
            ))
        })?;
        if schema.domain != target.domain {
            return Err(CoordError::SchemaViolation(format!(
                "{} records belong to domain `{}`, not `{}`",
                draft.kind.as_str(),
                schema.domain,
                target.domain
            )));
        }
        schema
            .check_payload(&draft.payload)
            .map_err(CoordError::SchemaViolation)?;

        if expected_version != 0 {
            if let Some(existing) = SqliteRecordRepository::new(self.conn).get_record(target)? {
                if existing.kind != draft.kind {
                    return Err(CoordError::SchemaViolation(format!(
                        "{target} is a {}, cannot rewrite it as {}",
                        existing.kind.as_str(),
                        draft.kind.as_str()
                    )));
                }
            }
        }

        Ok(schema.dependency_graph.then_some(TaskStatus::Ready))
    }
}

#[cfg(test)]
mod tests {
    use super::Gateway;
    use crate::config::Registry;
    use crate::db::open_db_in_memory;
    use crate::model::ids::RecordRef;
    use crate::model::record::{RecordDraft, RecordKind, TaskStatus};
    use crate::service::error::CoordError;
    use serde_json::json;

    #[test]
    fn shared_domain_accepts_any_configured_agent() {
        let conn = open_db_in_memory().expect("open db");
        let registry = Registry::builtin().expect("builtin");
        let gateway = Gateway::new(&conn, &registry);

        gateway
            .authorize_write("implementer", "system")
            .expect("shared domain");
        let err = gateway
            .authorize_write("intruder", "system")
            .expect_err("unknown agent");
        assert!(matches!(err, CoordError::UnknownAgent(agent) if agent == "intruder"));
    }

    #[test]
    fn task_kind_starts_ready() {
        let conn = open_db_in_memory().expect("open db");
        let registry = Registry::builtin().expect("builtin");
        let gateway = Gateway::new(&conn, &registry);
        let target = RecordRef::new("orchestrator", "T1");

        gateway
            .write(
                "orchestrator",
                &target,
                &RecordDraft::new(RecordKind::Task, json!({"title": "wire it"})),
                0,
                10,
            )
            .expect("create task");
        let stored = gateway.read("planner", &target).expect("read task");
        assert_eq!(stored.task_status, Some(TaskStatus::Ready));
        assert_eq!(stored.version, 1);
    }

    #[test]
    fn kind_must_match_declared_domain() {
        let conn = open_db_in_memory().expect("open db");
        let registry = Registry::builtin().expect("builtin");
        let gateway = Gateway::new(&conn, &registry);

        let err = gateway
            .write(
                "code_reviewer",
                &RecordRef::new("review", "T1"),
                &RecordDraft::new(RecordKind::Task, json!({"title": "misplaced"})),
                0,
                10,
            )
            .expect_err("task outside orchestrator domain");
        assert!(matches!(err, CoordError::SchemaViolation(_)));
    }
}
