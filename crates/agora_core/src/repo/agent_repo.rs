//! Agent lifecycle state rows.

use crate::model::agent::AgentState;
use crate::repo::{RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension};

pub struct SqliteAgentRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAgentRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Registers `agent` as `idle` unless a state row already exists.
    pub fn seed(&self, agent: &str, now_ms: i64) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO agent_states (agent_id, state, updated_at)
             VALUES (?1, 'idle', ?2)
             ON CONFLICT (agent_id) DO NOTHING;",
            params![agent, now_ms],
        )?;
        Ok(())
    }

    pub fn state(&self, agent: &str) -> RepoResult<Option<AgentState>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT state FROM agent_states WHERE agent_id = ?1;",
                [agent],
                |row| row.get(0),
            )
            .optional()?;
        value.as_deref().map(parse_state).transpose()
    }

    /// Compare-and-set on the stored state; returns `false` when `from` no
    /// longer matches.
    pub fn swap_state(
        &self,
        agent: &str,
        from: AgentState,
        to: AgentState,
        now_ms: i64,
    ) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE agent_states
             SET state = ?3,
                 updated_at = ?4
             WHERE agent_id = ?1
               AND state = ?2;",
            params![agent, from.as_str(), to.as_str(), now_ms],
        )?;
        Ok(changed == 1)
    }

    /// All rows ordered by agent id.
    pub fn list_states(&self) -> RepoResult<Vec<(String, AgentState)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT agent_id, state FROM agent_states ORDER BY agent_id ASC;")?;
        let mut rows = stmt.query([])?;
        let mut states = Vec::new();
        while let Some(row) = rows.next()? {
            let agent: String = row.get(0)?;
            let state: String = row.get(1)?;
            states.push((agent, parse_state(&state)?));
        }
        Ok(states)
    }
}

fn parse_state(value: &str) -> RepoResult<AgentState> {
    AgentState::parse(value).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid agent state `{value}` in agent_states.state"))
    })
}
