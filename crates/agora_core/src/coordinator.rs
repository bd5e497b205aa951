//! Agent-facing operation surface.
//!
//! # Responsibility
//! - Bundle one SQLite connection with one validated [`Registry`].
//! - Run every mutation inside a single `IMMEDIATE` transaction, so the store
//!   write, the audit entry and the notification commit or roll back together.
//!
//! # Invariants
//! - Each agent process or thread owns its own `Coordinator`; the database
//!   file is the only shared state.
//! - Rejected operations leave no trace: the transaction is dropped before
//!   commit.

use crate::clock::now_epoch_ms;
use crate::config::{ConfigError, CoordinationConfig, Registry};
use crate::db::{open_db, open_db_in_memory};
use crate::model::agent::AgentState;
use crate::model::ids::RecordRef;
use crate::model::notification::{Notification, RecipientDelivery};
use crate::model::record::{Record, RecordDraft};
use crate::repo::agent_repo::SqliteAgentRepository;
use crate::repo::audit_repo::{AuditEntries, SqliteAuditRepository};
use crate::repo::record_repo::{RecordListQuery, RecordRepository, SqliteRecordRepository};
use crate::service::error::{CoordError, CoordResult};
use crate::service::fanout_service::FanOut;
use crate::service::gateway::{Gateway, WriteReceipt};
use crate::service::graph_service::GraphEngine;
use crate::service::lifecycle_service::{LifecycleTracker, Transition};
use crate::service::status::{collect_status, StatusSnapshot};
use log::{error, info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Instant;
use uuid::Uuid;

pub struct Coordinator {
    conn: Connection,
    registry: Registry,
}

impl Coordinator {
    /// Opens (or creates) the shared database file.
    ///
    /// # Errors
    /// - `Config` when the configuration is invalid or the database holds
    ///   records in a domain the configuration does not declare.
    /// - `Db` when the file cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>, config: &CoordinationConfig) -> CoordResult<Self> {
        let registry = Registry::from_config(config)?;
        let conn = open_db(path)?;
        Self::boot(conn, registry)
    }

    /// Private in-memory store. Used by tests and single-process embedding.
    pub fn open_in_memory(config: &CoordinationConfig) -> CoordResult<Self> {
        let registry = Registry::from_config(config)?;
        let conn = open_db_in_memory()?;
        Self::boot(conn, registry)
    }

    fn boot(conn: Connection, registry: Registry) -> CoordResult<Self> {
        let now_ms = now_epoch_ms();
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)?;

        for domain in SqliteRecordRepository::new(&tx).stored_domains()? {
            if !registry.ownership().contains(&domain) {
                error!(
                    "event=coordinator_boot module=coordinator status=error error_code=unknown_persisted_domain domain={}",
                    domain
                );
                return Err(ConfigError::UnknownPersistedDomain(domain).into());
            }
        }
        let agents = SqliteAgentRepository::new(&tx);
        for agent in registry.agents() {
            agents.seed(agent, now_ms)?;
        }
        tx.commit()?;

        info!(
            "event=coordinator_boot module=coordinator status=ok agents={} domains={}",
            registry.agents().count(),
            registry.ownership().domains().count()
        );
        Ok(Self { conn, registry })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn read(&self, actor: &str, domain: &str, key: &str) -> CoordResult<Record> {
        Gateway::new(&self.conn, &self.registry).read(actor, &RecordRef::new(domain, key))
    }

    pub fn list(&self, actor: &str, query: &RecordListQuery) -> CoordResult<Vec<Record>> {
        Gateway::new(&self.conn, &self.registry).list(actor, query)
    }

    /// Creates (`expected_version == 0`) or updates one record.
    pub fn write(
        &self,
        actor: &str,
        domain: &str,
        key: &str,
        draft: &RecordDraft,
        expected_version: u64,
    ) -> CoordResult<WriteReceipt> {
        let target = RecordRef::new(domain, key);
        self.in_write_tx("record_write", actor, |conn, registry, now_ms| {
            Gateway::new(conn, registry).write(actor, &target, draft, expected_version, now_ms)
        })
    }

    pub fn add_dependency(
        &self,
        actor: &str,
        task: &RecordRef,
        depends_on: &RecordRef,
    ) -> CoordResult<Record> {
        self.in_write_tx("graph_add_dependency", actor, |conn, registry, now_ms| {
            GraphEngine::new(conn, registry).add_dependency(actor, task, depends_on, now_ms)
        })
    }

    pub fn remove_dependency(
        &self,
        actor: &str,
        task: &RecordRef,
        depends_on: &RecordRef,
    ) -> CoordResult<Record> {
        self.in_write_tx("graph_remove_dependency", actor, |conn, registry, now_ms| {
            GraphEngine::new(conn, registry).remove_dependency(actor, task, depends_on, now_ms)
        })
    }

    pub fn start_task(&self, actor: &str, task: &RecordRef) -> CoordResult<Record> {
        self.in_write_tx("graph_start_task", actor, |conn, registry, now_ms| {
            GraphEngine::new(conn, registry).start_task(actor, task, now_ms)
        })
    }

    pub fn mark_completed(&self, actor: &str, task: &RecordRef) -> CoordResult<Record> {
        self.in_write_tx("graph_mark_completed", actor, |conn, registry, now_ms| {
            GraphEngine::new(conn, registry).mark_completed(actor, task, now_ms)
        })
    }

    pub fn cancel(&self, actor: &str, task: &RecordRef) -> CoordResult<Record> {
        self.in_write_tx("graph_cancel", actor, |conn, registry, now_ms| {
            GraphEngine::new(conn, registry).cancel(actor, task, now_ms)
        })
    }

    pub fn ready_tasks(&self) -> CoordResult<Vec<Record>> {
        GraphEngine::new(&self.conn, &self.registry).ready_tasks()
    }

    pub fn dependencies(&self, task: &RecordRef) -> CoordResult<Vec<RecordRef>> {
        GraphEngine::new(&self.conn, &self.registry).dependencies(task)
    }

    pub fn dependents(&self, task: &RecordRef) -> CoordResult<Vec<RecordRef>> {
        GraphEngine::new(&self.conn, &self.registry).dependents(task)
    }

    /// Moves `agent` to `to`; `actor` must own the lifecycle domain.
    pub fn transition(&self, actor: &str, agent: &str, to: AgentState) -> CoordResult<Transition> {
        self.in_write_tx("agent_transition", actor, |conn, registry, now_ms| {
            LifecycleTracker::new(conn, registry).transition(actor, agent, to, now_ms)
        })
    }

    pub fn agent_state(&self, agent: &str) -> CoordResult<AgentState> {
        LifecycleTracker::new(&self.conn, &self.registry).state(agent)
    }

    /// Pending notifications for `agent`, oldest first. Nothing is removed
    /// until acknowledged.
    pub fn deliver(&self, agent: &str) -> CoordResult<Vec<Notification>> {
        FanOut::new(&self.conn, &self.registry).deliver(agent)
    }

    /// Returns `true` when this call moved the copy to delivered.
    pub fn acknowledge(&self, agent: &str, notification_id: Uuid) -> CoordResult<bool> {
        self.in_write_tx("notification_ack", agent, |conn, registry, now_ms| {
            FanOut::new(conn, registry).acknowledge(agent, notification_id, now_ms)
        })
    }

    /// Who a notification went to and which copies are still pending.
    pub fn notification_recipients(
        &self,
        notification_id: Uuid,
    ) -> CoordResult<Vec<RecipientDelivery>> {
        FanOut::new(&self.conn, &self.registry).delivery_status(notification_id)
    }

    /// Lazy forward read of `domain`'s audit entries recorded at or after
    /// `since_ms`, bounded by the entries present now.
    pub fn entries_since(&self, domain: &str, since_ms: i64) -> CoordResult<AuditEntries<'_>> {
        self.ensure_domain(domain)?;
        SqliteAuditRepository::new(&self.conn)
            .entries_since(domain, since_ms)
            .map_err(Into::into)
    }

    /// Restarts a read right after the entry with sequence number `seq`.
    pub fn entries_after(&self, domain: &str, seq: i64) -> CoordResult<AuditEntries<'_>> {
        self.ensure_domain(domain)?;
        SqliteAuditRepository::new(&self.conn)
            .entries_after(domain, seq)
            .map_err(Into::into)
    }

    /// Consistent read-only view across agents, tasks and queues.
    pub fn status_snapshot(&self) -> CoordResult<StatusSnapshot> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Deferred)?;
        let snapshot = collect_status(&tx, &self.registry, now_epoch_ms())?;
        tx.finish()?;
        Ok(snapshot)
    }

    fn ensure_domain(&self, domain: &str) -> CoordResult<()> {
        if self.registry.ownership().contains(domain) {
            Ok(())
        } else {
            Err(CoordError::UnknownDomain(domain.to_string()))
        }
    }

    fn in_write_tx<T>(
        &self,
        event: &'static str,
        actor: &str,
        body: impl FnOnce(&Connection, &Registry, i64) -> CoordResult<T>,
    ) -> CoordResult<T> {
        let started_at = Instant::now();
        let now_ms = now_epoch_ms();
        let outcome = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .map_err(CoordError::from)
            .and_then(|tx| {
                let conn: &Connection = &tx;
                let value = body(conn, &self.registry, now_ms)?;
                tx.commit()?;
                Ok(value)
            });

        match outcome {
            Ok(value) => {
                info!(
                    "event={} module=coordinator status=ok actor={} duration_ms={}",
                    event,
                    actor,
                    started_at.elapsed().as_millis()
                );
                Ok(value)
            }
            Err(err) => {
                log_failure(event, actor, &err, started_at);
                Err(err)
            }
        }
    }
}

fn log_failure(event: &str, actor: &str, err: &CoordError, started_at: Instant) {
    match err {
        CoordError::Db(_) | CoordError::Repo(_) | CoordError::Config(_) => error!(
            "event={} module=coordinator status=error actor={} duration_ms={} error={}",
            event,
            actor,
            started_at.elapsed().as_millis(),
            err
        ),
        _ => warn!(
            "event={} module=coordinator status=rejected actor={} duration_ms={} reason={}",
            event,
            actor,
            started_at.elapsed().as_millis(),
            err
        ),
    }
}
