//! Task dependency edges.
//!
//! # Invariants
//! - Edges reference existing records (foreign keys).
//! - Edge listings are deterministic: `domain ASC, key ASC`.

use crate::model::ids::RecordRef;
use crate::repo::RepoResult;
use rusqlite::{params, Connection};

/// Edge storage for the dependency graph.
pub trait DependencyRepository {
    /// Inserts `task -> depends_on`; returns `false` when already present.
    fn insert_edge(&self, task: &RecordRef, depends_on: &RecordRef, now_ms: i64)
        -> RepoResult<bool>;
    /// Removes `task -> depends_on`; returns `false` when absent.
    fn delete_edge(&self, task: &RecordRef, depends_on: &RecordRef) -> RepoResult<bool>;
    /// Prerequisites of `task`.
    fn dependencies_of(&self, task: &RecordRef) -> RepoResult<Vec<RecordRef>>;
    /// Tasks listing `task` as a prerequisite.
    fn dependents_of(&self, task: &RecordRef) -> RepoResult<Vec<RecordRef>>;
    fn edge_count(&self) -> RepoResult<usize>;
}

pub struct SqliteDependencyRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteDependencyRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn collect_refs(&self, sql: &str, target: &RecordRef) -> RepoResult<Vec<RecordRef>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params![target.domain, target.key])?;
        let mut refs = Vec::new();
        while let Some(row) = rows.next()? {
            refs.push(RecordRef::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?));
        }
        Ok(refs)
    }
}

impl DependencyRepository for SqliteDependencyRepository<'_> {
    fn insert_edge(
        &self,
        task: &RecordRef,
        depends_on: &RecordRef,
        now_ms: i64,
    ) -> RepoResult<bool> {
        let inserted = self.conn.execute(
            "INSERT INTO task_dependencies (
                task_domain,
                task_key,
                dep_domain,
                dep_key,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT DO NOTHING;",
            params![
                task.domain,
                task.key,
                depends_on.domain,
                depends_on.key,
                now_ms
            ],
        )?;
        Ok(inserted == 1)
    }

    fn delete_edge(&self, task: &RecordRef, depends_on: &RecordRef) -> RepoResult<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM task_dependencies
             WHERE task_domain = ?1
               AND task_key = ?2
               AND dep_domain = ?3
               AND dep_key = ?4;",
            params![task.domain, task.key, depends_on.domain, depends_on.key],
        )?;
        Ok(deleted == 1)
    }

    fn dependencies_of(&self, task: &RecordRef) -> RepoResult<Vec<RecordRef>> {
        self.collect_refs(
            "SELECT dep_domain, dep_key
             FROM task_dependencies
             WHERE task_domain = ?1
               AND task_key = ?2
             ORDER BY dep_domain ASC, dep_key ASC;",
            task,
        )
    }

    fn dependents_of(&self, task: &RecordRef) -> RepoResult<Vec<RecordRef>> {
        self.collect_refs(
            "SELECT task_domain, task_key
             FROM task_dependencies
             WHERE dep_domain = ?1
               AND dep_key = ?2
             ORDER BY task_domain ASC, task_key ASC;",
            task,
        )
    }

    fn edge_count(&self) -> RepoResult<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM task_dependencies;", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
