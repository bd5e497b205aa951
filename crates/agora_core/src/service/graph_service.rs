//! Dependency graph engine.
//!
//! # Responsibility
//! - Maintain task dependency edges and derived task readiness.
//! - Drive explicit task status changes and their cascades.
//!
//! # Invariants
//! - The graph restricted to non-cancelled tasks stays acyclic.
//! - An open task (`pending`, `ready`, `blocked`) is `ready` only when every
//!   dependency is `completed`, and `blocked` when any dependency is missing,
//!   cancelled or blocked.
//! - Dependencies are frozen once a task is `in_progress`, `completed` or
//!   `cancelled`.
//! - Every status change is one versioned write with its own audit entry and
//!   notification.

use crate::config::Registry;
use crate::model::audit::OperationKind;
use crate::model::ids::RecordRef;
use crate::model::record::{Record, TaskStatus};
use crate::repo::dependency_repo::{DependencyRepository, SqliteDependencyRepository};
use crate::repo::record_repo::{RecordRepository, SqliteRecordRepository};
use crate::service::error::{CoordError, CoordResult};
use crate::service::gateway::{Change, Gateway};
use log::debug;
use rusqlite::Connection;
use std::collections::{HashSet, VecDeque};

/// Graph engine bound to one open transaction.
pub struct GraphEngine<'a> {
    conn: &'a Connection,
    registry: &'a Registry,
}

impl<'a> GraphEngine<'a> {
    pub fn new(conn: &'a Connection, registry: &'a Registry) -> Self {
        Self { conn, registry }
    }

    fn gateway(&self) -> Gateway<'a> {
        Gateway::new(self.conn, self.registry)
    }

    fn records(&self) -> SqliteRecordRepository<'a> {
        SqliteRecordRepository::new(self.conn)
    }

    fn edges(&self) -> SqliteDependencyRepository<'a> {
        SqliteDependencyRepository::new(self.conn)
    }

    /// Adds `task -> depends_on`. Returns the task after the change; an edge
    /// that already exists leaves it untouched.
    pub fn add_dependency(
        &self,
        actor: &str,
        task: &RecordRef,
        depends_on: &RecordRef,
        now_ms: i64,
    ) -> CoordResult<Record> {
        self.gateway().authorize_write(actor, &task.domain)?;
        let (record, status) = self.load_task(task)?;
        self.load_task(depends_on)?;
        if !status.is_open() {
            return Err(CoordError::DependencyLocked {
                task: task.clone(),
                status,
            });
        }
        if task == depends_on || self.would_create_cycle(task, depends_on)? {
            return Err(CoordError::CycleDetected {
                task: task.clone(),
                depends_on: depends_on.clone(),
            });
        }
        if !self.edges().insert_edge(task, depends_on, now_ms)? {
            return Ok(record);
        }
        self.apply_derived(actor, &record, status, OperationKind::AddDependency, now_ms)
    }

    /// Removes `task -> depends_on` and recomputes readiness downstream.
    pub fn remove_dependency(
        &self,
        actor: &str,
        task: &RecordRef,
        depends_on: &RecordRef,
        now_ms: i64,
    ) -> CoordResult<Record> {
        self.gateway().authorize_write(actor, &task.domain)?;
        let (record, status) = self.load_task(task)?;
        if !status.is_open() {
            return Err(CoordError::DependencyLocked {
                task: task.clone(),
                status,
            });
        }
        if !self.edges().delete_edge(task, depends_on)? {
            return Err(CoordError::DependencyNotFound {
                task: task.clone(),
                depends_on: depends_on.clone(),
            });
        }
        self.apply_derived(
            actor,
            &record,
            status,
            OperationKind::RemoveDependency,
            now_ms,
        )
    }

    /// `ready -> in_progress`.
    pub fn start_task(&self, actor: &str, task: &RecordRef, now_ms: i64) -> CoordResult<Record> {
        self.explicit_transition(actor, task, TaskStatus::InProgress, now_ms, |from| {
            from == TaskStatus::Ready
        })
    }

    /// Completes a `ready` or `in_progress` task and unblocks dependents.
    pub fn mark_completed(
        &self,
        actor: &str,
        task: &RecordRef,
        now_ms: i64,
    ) -> CoordResult<Record> {
        self.explicit_transition(actor, task, TaskStatus::Completed, now_ms, |from| {
            matches!(from, TaskStatus::Ready | TaskStatus::InProgress)
        })
    }

    /// Cancels an unfinished task; its open dependents become `blocked`.
    pub fn cancel(&self, actor: &str, task: &RecordRef, now_ms: i64) -> CoordResult<Record> {
        self.explicit_transition(actor, task, TaskStatus::Cancelled, now_ms, |from| {
            !matches!(from, TaskStatus::Completed | TaskStatus::Cancelled)
        })
    }

    /// Ready tasks by creation time, then key, then domain.
    pub fn ready_tasks(&self) -> CoordResult<Vec<Record>> {
        self.records()
            .list_tasks_by_status(TaskStatus::Ready)
            .map_err(Into::into)
    }

    pub fn dependencies(&self, task: &RecordRef) -> CoordResult<Vec<RecordRef>> {
        self.load_task(task)?;
        self.edges().dependencies_of(task).map_err(Into::into)
    }

    pub fn dependents(&self, task: &RecordRef) -> CoordResult<Vec<RecordRef>> {
        self.load_task(task)?;
        self.edges().dependents_of(task).map_err(Into::into)
    }

    fn load_task(&self, target: &RecordRef) -> CoordResult<(Record, TaskStatus)> {
        let record = self
            .records()
            .get_record(target)?
            .ok_or_else(|| CoordError::NotFound(target.clone()))?;
        match record.task_status {
            Some(status) => Ok((record, status)),
            None => Err(CoordError::NotATask(target.clone())),
        }
    }

    fn explicit_transition(
        &self,
        actor: &str,
        task: &RecordRef,
        to: TaskStatus,
        now_ms: i64,
        allowed: impl Fn(TaskStatus) -> bool,
    ) -> CoordResult<Record> {
        self.gateway().authorize_write(actor, &task.domain)?;
        let (record, from) = self.load_task(task)?;
        if !allowed(from) {
            return Err(CoordError::InvalidTaskTransition {
                task: task.clone(),
                from,
                to,
            });
        }
        let updated = self.write_status(actor, &record, to, OperationKind::StatusChange, now_ms)?;
        self.cascade(actor, task, now_ms)?;
        Ok(updated)
    }

    /// Writes the edge change as one version bump carrying the recomputed
    /// status, then cascades when the status moved.
    fn apply_derived(
        &self,
        actor: &str,
        record: &Record,
        before: TaskStatus,
        operation: OperationKind,
        now_ms: i64,
    ) -> CoordResult<Record> {
        let task = record.record_ref();
        let derived = self.derive_status(&task)?;
        let updated = self.write_status(actor, record, derived, operation, now_ms)?;
        if derived != before {
            self.cascade(actor, &task, now_ms)?;
        }
        Ok(updated)
    }

    fn derive_status(&self, task: &RecordRef) -> CoordResult<TaskStatus> {
        let records = self.records();
        let mut all_completed = true;
        for dependency in self.edges().dependencies_of(task)? {
            match records
                .get_record(&dependency)?
                .and_then(|record| record.task_status)
            {
                None | Some(TaskStatus::Cancelled) | Some(TaskStatus::Blocked) => {
                    return Ok(TaskStatus::Blocked)
                }
                Some(TaskStatus::Completed) => {}
                Some(_) => all_completed = false,
            }
        }
        Ok(if all_completed {
            TaskStatus::Ready
        } else {
            TaskStatus::Pending
        })
    }

    /// Whether `task` is reachable from `depends_on` through non-cancelled
    /// tasks. O(V + E).
    fn would_create_cycle(&self, task: &RecordRef, depends_on: &RecordRef) -> CoordResult<bool> {
        let records = self.records();
        let edges = self.edges();
        let mut visited = HashSet::new();
        let mut stack = vec![depends_on.clone()];

        while let Some(current) = stack.pop() {
            if &current == task {
                return Ok(true);
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            let status = records
                .get_record(&current)?
                .and_then(|record| record.task_status);
            if matches!(status, None | Some(TaskStatus::Cancelled)) {
                continue;
            }
            stack.extend(edges.dependencies_of(&current)?);
        }
        Ok(false)
    }

    /// Re-derives open dependents breadth-first, each level in
    /// `created_at, key` order.
    fn cascade(&self, actor: &str, origin: &RecordRef, now_ms: i64) -> CoordResult<usize> {
        let mut queue = VecDeque::from([origin.clone()]);
        let mut changed = 0;

        while let Some(current) = queue.pop_front() {
            for dependent in self.ordered_dependents(&current)? {
                let Some(status) = dependent.task_status else {
                    continue;
                };
                if !status.is_open() {
                    continue;
                }
                let task = dependent.record_ref();
                let derived = self.derive_status(&task)?;
                if derived == status {
                    continue;
                }
                self.write_status(actor, &dependent, derived, OperationKind::Cascade, now_ms)?;
                changed += 1;
                queue.push_back(task);
            }
        }

        if changed > 0 {
            debug!(
                "event=graph_cascade module=graph status=ok origin={} changed={}",
                origin, changed
            );
        }
        Ok(changed)
    }

    fn ordered_dependents(&self, task: &RecordRef) -> CoordResult<Vec<Record>> {
        let records = self.records();
        let mut dependents = Vec::new();
        for dependent in self.edges().dependents_of(task)? {
            if let Some(record) = records.get_record(&dependent)? {
                dependents.push(record);
            }
        }
        dependents.sort_by(|left, right| {
            (left.created_at, &left.key, &left.domain).cmp(&(
                right.created_at,
                &right.key,
                &right.domain,
            ))
        });
        Ok(dependents)
    }

    fn write_status(
        &self,
        actor: &str,
        record: &Record,
        status: TaskStatus,
        operation: OperationKind,
        now_ms: i64,
    ) -> CoordResult<Record> {
        let target = record.record_ref();
        let version = self
            .records()
            .put_task_status(&target, status, record.version, now_ms)?;
        self.gateway().record_change(
            Change {
                actor,
                target: &target,
                kind: record.kind,
                prior_version: record.version,
                new_version: version,
                operation,
            },
            now_ms,
        )?;

        let mut updated = record.clone();
        updated.version = version;
        updated.task_status = Some(status);
        updated.updated_at = now_ms;
        Ok(updated)
    }
}
