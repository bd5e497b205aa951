//! Agent lifecycle state machine.

use serde::{Deserialize, Serialize};

/// Run state of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Active,
    Blocked,
    /// Absorbing: no transition leaves this state.
    Terminated,
}

impl AgentState {
    pub const ALL: [AgentState; 4] = [Self::Idle, Self::Active, Self::Blocked, Self::Terminated];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Blocked => "blocked",
            Self::Terminated => "terminated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == value)
    }

    /// Transition table: `idle -> active -> (blocked | idle) -> terminated`,
    /// `blocked -> active`.
    pub fn can_transition_to(self, next: AgentState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Active)
                | (Self::Active, Self::Blocked)
                | (Self::Active, Self::Idle)
                | (Self::Blocked, Self::Active)
                | (Self::Idle, Self::Terminated)
                | (Self::Blocked, Self::Terminated)
        )
    }
}
