//! Audit ledger entries.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mutation kind recorded for every accepted write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    AddDependency,
    RemoveDependency,
    /// Explicit task or lifecycle status change.
    StatusChange,
    /// Task status derived from a dependency change.
    Cascade,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        Self::Create,
        Self::Update,
        Self::AddDependency,
        Self::RemoveDependency,
        Self::StatusChange,
        Self::Cascade,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::AddDependency => "add_dependency",
            Self::RemoveDependency => "remove_dependency",
            Self::StatusChange => "status_change",
            Self::Cascade => "cascade",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == value)
    }
}

/// One immutable ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    /// Store-wide append order; resume token for `entries_after`.
    pub seq: i64,
    pub entry_id: Uuid,
    pub actor: String,
    pub domain: String,
    pub record_key: String,
    /// `0` for creations.
    pub prior_version: u64,
    pub new_version: u64,
    pub operation: OperationKind,
    /// Epoch ms, non-decreasing within one domain.
    pub recorded_at: i64,
}

/// Entry content before the ledger assigns `seq` and a timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEntry<'a> {
    pub actor: &'a str,
    pub domain: &'a str,
    pub record_key: &'a str,
    pub prior_version: u64,
    pub new_version: u64,
    pub operation: OperationKind,
}
