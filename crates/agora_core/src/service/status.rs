//! Read-only status snapshot for monitors.

use crate::config::Registry;
use crate::model::agent::AgentState;
use crate::model::record::TaskStatus;
use crate::repo::agent_repo::SqliteAgentRepository;
use crate::repo::dependency_repo::{DependencyRepository, SqliteDependencyRepository};
use crate::repo::notification_repo::SqliteNotificationRepository;
use crate::repo::record_repo::{RecordRepository, SqliteRecordRepository};
use crate::service::error::CoordResult;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentStatus {
    pub state: AgentState,
    /// Domains this agent exclusively writes.
    pub owns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub agents: BTreeMap<String, AgentStatus>,
    /// Every status is present, `0` when no task holds it.
    pub tasks: BTreeMap<TaskStatus, usize>,
    pub ready_tasks: usize,
    pub dependency_edges: usize,
    /// Pending copies per configured agent.
    pub pending_notifications: BTreeMap<String, usize>,
    pub taken_at: i64,
}

/// Collects the snapshot. Never writes.
pub fn collect_status(
    conn: &Connection,
    registry: &Registry,
    now_ms: i64,
) -> CoordResult<StatusSnapshot> {
    let agents = SqliteAgentRepository::new(conn)
        .list_states()?
        .into_iter()
        .filter(|(agent, _)| registry.has_agent(agent))
        .map(|(agent, state)| {
            let owns = registry
                .ownership()
                .owned_by(&agent)
                .into_iter()
                .map(str::to_string)
                .collect();
            (agent, AgentStatus { state, owns })
        })
        .collect();
    let tasks = SqliteRecordRepository::new(conn).count_tasks_by_status()?;
    let ready_tasks = tasks.get(&TaskStatus::Ready).copied().unwrap_or(0);
    let dependency_edges = SqliteDependencyRepository::new(conn).edge_count()?;

    let stored = SqliteNotificationRepository::new(conn).pending_counts()?;
    let pending_notifications = registry
        .agents()
        .map(|agent| (agent.to_string(), stored.get(agent).copied().unwrap_or(0)))
        .collect();

    Ok(StatusSnapshot {
        agents,
        tasks,
        ready_tasks,
        dependency_edges,
        pending_notifications,
        taken_at: now_ms,
    })
}
