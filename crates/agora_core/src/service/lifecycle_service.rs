//! Agent lifecycle tracker.
//!
//! # Invariants
//! - Only the transitions in [`AgentState::can_transition_to`] are accepted;
//!   `terminated` is absorbing.
//! - Each accepted transition writes one `lifecycle_event` record through the
//!   gateway and swaps the state row in the same transaction.

use crate::config::Registry;
use crate::model::agent::AgentState;
use crate::model::ids::RecordRef;
use crate::model::record::{RecordDraft, RecordKind};
use crate::repo::agent_repo::SqliteAgentRepository;
use crate::repo::RepoError;
use crate::service::error::{CoordError, CoordResult};
use crate::service::gateway::Gateway;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

/// Accepted lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub agent: String,
    pub from: AgentState,
    pub to: AgentState,
    /// The `lifecycle_event` record written for it.
    pub event: RecordRef,
}

pub struct LifecycleTracker<'a> {
    conn: &'a Connection,
    registry: &'a Registry,
}

impl<'a> LifecycleTracker<'a> {
    pub fn new(conn: &'a Connection, registry: &'a Registry) -> Self {
        Self { conn, registry }
    }

    pub fn state(&self, agent: &str) -> CoordResult<AgentState> {
        if !self.registry.has_agent(agent) {
            return Err(CoordError::UnknownAgent(agent.to_string()));
        }
        // Agents are seeded at boot; a missing row means the database was
        // modified outside the coordinator.
        SqliteAgentRepository::new(self.conn)
            .state(agent)?
            .ok_or_else(|| {
                CoordError::Repo(RepoError::InvalidData(format!(
                    "no lifecycle state stored for agent `{agent}`"
                )))
            })
    }

    /// Moves `agent` to `to`, recorded on behalf of `actor`.
    pub fn transition(
        &self,
        actor: &str,
        agent: &str,
        to: AgentState,
        now_ms: i64,
    ) -> CoordResult<Transition> {
        if !self.registry.has_agent(actor) {
            return Err(CoordError::UnknownAgent(actor.to_string()));
        }
        let from = self.state(agent)?;
        if !from.can_transition_to(to) {
            return Err(CoordError::InvalidTransition {
                agent: agent.to_string(),
                from,
                to,
            });
        }

        let event = RecordRef::new(
            self.registry.lifecycle_domain(),
            format!("lifecycle-{}", Uuid::new_v4()),
        );
        let draft = RecordDraft::new(
            RecordKind::LifecycleEvent,
            json!({
                "agent": agent,
                "from": from.as_str(),
                "to": to.as_str(),
            }),
        );
        Gateway::new(self.conn, self.registry).write(actor, &event, &draft, 0, now_ms)?;

        if !SqliteAgentRepository::new(self.conn).swap_state(agent, from, to, now_ms)? {
            return Err(CoordError::InvalidTransition {
                agent: agent.to_string(),
                from: self.state(agent)?,
                to,
            });
        }

        Ok(Transition {
            agent: agent.to_string(),
            from,
            to,
            event,
        })
    }
}
