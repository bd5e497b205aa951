//! Shared coordination store for cooperating agents.
//!
//! Agents read and write typed records partitioned into domains. Every domain
//! has one writer (or is shared), every accepted write is audited and fanned
//! out as a notification, and task records carry dependency-derived status.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, CoordinationConfig, Registry};
pub use coordinator::Coordinator;
pub use logging::{default_log_level, init_logging, init_logging_from, logging_status, LoggingError};
pub use model::agent::AgentState;
pub use model::audit::{AuditEntry, OperationKind};
pub use model::ids::RecordRef;
pub use model::notification::{Notification, RecipientDelivery};
pub use model::record::{Record, RecordDraft, RecordKind, TaskStatus};
pub use repo::audit_repo::AuditEntries;
pub use repo::record_repo::RecordListQuery;
pub use service::error::{CoordError, CoordResult};
pub use service::gateway::WriteReceipt;
pub use service::lifecycle_service::Transition;
pub use service::retry::retry_on_conflict;
pub use service::status::StatusSnapshot;
