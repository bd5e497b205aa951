//! Record and task model.
//!
//! # Invariants
//! - `version` starts at 1 and grows by exactly one per accepted write.
//! - `kind` and `domain` never change after creation.
//! - `task_status` is `Some` exactly for kinds that participate in the
//!   dependency graph.

use crate::model::ids::RecordRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bounded set of record kinds known to the coordination store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    PriorityItem,
    Specification,
    Task,
    Bug,
    CodeReview,
    Commit,
    LifecycleEvent,
    Message,
}

impl RecordKind {
    pub const ALL: [RecordKind; 8] = [
        Self::PriorityItem,
        Self::Specification,
        Self::Task,
        Self::Bug,
        Self::CodeReview,
        Self::Commit,
        Self::LifecycleEvent,
        Self::Message,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PriorityItem => "priority_item",
            Self::Specification => "specification",
            Self::Task => "task",
            Self::Bug => "bug",
            Self::CodeReview => "code_review",
            Self::Commit => "commit",
            Self::LifecycleEvent => "lifecycle_event",
            Self::Message => "message",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

/// Task lifecycle state, managed by the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting on at least one dependency that is not completed yet.
    Pending,
    /// Every dependency is completed.
    Ready,
    InProgress,
    /// A dependency was cancelled or is itself blocked.
    Blocked,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        Self::Pending,
        Self::Ready,
        Self::InProgress,
        Self::Blocked,
        Self::Completed,
        Self::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == value)
    }

    /// Open tasks have their readiness derived from dependencies.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::Ready | Self::Blocked)
    }
}

/// Caller-supplied content for one write.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDraft {
    pub kind: RecordKind,
    /// JSON object; required fields are declared per kind in configuration.
    pub payload: Value,
}

impl RecordDraft {
    pub fn new(kind: RecordKind, payload: Value) -> Self {
        Self { kind, payload }
    }
}

/// Stored record snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub domain: String,
    pub key: String,
    pub kind: RecordKind,
    pub version: u64,
    pub payload: Value,
    pub task_status: Option<TaskStatus>,
    /// Epoch ms.
    pub created_at: i64,
    /// Epoch ms.
    pub updated_at: i64,
}

impl Record {
    pub fn record_ref(&self) -> RecordRef {
        RecordRef::new(self.domain.clone(), self.key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::{RecordKind, TaskStatus};

    #[test]
    fn kind_strings_match_serde_names() {
        for kind in RecordKind::ALL {
            let json = serde_json::to_string(&kind).expect("serialize kind");
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(RecordKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RecordKind::parse("audit_entry"), None);
    }

    #[test]
    fn only_pending_ready_blocked_are_open() {
        let open: Vec<TaskStatus> = TaskStatus::ALL
            .into_iter()
            .filter(|status| status.is_open())
            .collect();
        assert_eq!(
            open,
            vec![TaskStatus::Pending, TaskStatus::Ready, TaskStatus::Blocked]
        );
        assert_eq!(TaskStatus::parse("in_progress"), Some(TaskStatus::InProgress));
    }
}
