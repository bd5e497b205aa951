//! Error taxonomy for the agent-facing operations.

use crate::config::ConfigError;
use crate::db::DbError;
use crate::model::agent::AgentState;
use crate::model::ids::RecordRef;
use crate::model::record::TaskStatus;
use crate::repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type CoordResult<T> = Result<T, CoordError>;

/// Errors returned by coordination operations.
///
/// Every variant is returned before commit; the store, the audit log and the
/// graph are unchanged when one surfaces.
#[derive(Debug)]
pub enum CoordError {
    /// Actor does not own the target domain.
    PermissionDenied { actor: String, domain: String },
    UnknownDomain(String),
    UnknownAgent(String),
    NotFound(RecordRef),
    /// `actual == 0` means the record does not exist yet.
    VersionConflict {
        record: RecordRef,
        expected: u64,
        actual: u64,
    },
    /// Edge would close a cycle among non-cancelled tasks.
    CycleDetected {
        task: RecordRef,
        depends_on: RecordRef,
    },
    InvalidTransition {
        agent: String,
        from: AgentState,
        to: AgentState,
    },
    InvalidTaskTransition {
        task: RecordRef,
        from: TaskStatus,
        to: TaskStatus,
    },
    NotATask(RecordRef),
    /// Dependencies are frozen once work started or the task closed.
    DependencyLocked { task: RecordRef, status: TaskStatus },
    DependencyNotFound {
        task: RecordRef,
        depends_on: RecordRef,
    },
    AgentTerminated(String),
    SchemaViolation(String),
    NotificationNotFound(Uuid),
    Config(ConfigError),
    Db(DbError),
    Repo(RepoError),
}

impl CoordError {
    /// Whether a caller may retry after re-reading the record.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl Display for CoordError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied { actor, domain } => {
                write!(f, "agent `{actor}` may not write domain `{domain}`")
            }
            Self::UnknownDomain(domain) => write!(f, "unknown domain: {domain}"),
            Self::UnknownAgent(agent) => write!(f, "unknown agent: {agent}"),
            Self::NotFound(record) => write!(f, "record not found: {record}"),
            Self::VersionConflict {
                record,
                expected,
                actual,
            } => write!(
                f,
                "version conflict on {record}: expected {expected}, stored {actual}"
            ),
            Self::CycleDetected { task, depends_on } => write!(
                f,
                "dependency {task} -> {depends_on} would create a cycle"
            ),
            Self::InvalidTransition { agent, from, to } => write!(
                f,
                "agent `{agent}` cannot move from {} to {}",
                from.as_str(),
                to.as_str()
            ),
            Self::InvalidTaskTransition { task, from, to } => write!(
                f,
                "task {task} cannot move from {} to {}",
                from.as_str(),
                to.as_str()
            ),
            Self::NotATask(record) => write!(f, "record is not a task: {record}"),
            Self::DependencyLocked { task, status } => write!(
                f,
                "dependencies of {task} are locked while {}",
                status.as_str()
            ),
            Self::DependencyNotFound { task, depends_on } => {
                write!(f, "no dependency {task} -> {depends_on}")
            }
            Self::AgentTerminated(agent) => write!(f, "agent `{agent}` is terminated"),
            Self::SchemaViolation(message) => write!(f, "schema violation: {message}"),
            Self::NotificationNotFound(id) => write!(f, "notification not found: {id}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CoordError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for CoordError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(record) => Self::NotFound(record),
            RepoError::VersionConflict {
                record,
                expected,
                actual,
            } => Self::VersionConflict {
                record,
                expected,
                actual,
            },
            RepoError::Db(err) => Self::Db(err),
            other => Self::Repo(other),
        }
    }
}

impl From<DbError> for CoordError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for CoordError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::from(value))
    }
}

impl From<ConfigError> for CoordError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

#[cfg(test)]
mod tests {
    use super::CoordError;
    use crate::model::ids::RecordRef;
    use crate::repo::RepoError;

    #[test]
    fn repo_conflicts_lift_into_the_service_taxonomy() {
        let lifted = CoordError::from(RepoError::VersionConflict {
            record: RecordRef::new("specs", "auth"),
            expected: 1,
            actual: 2,
        });
        assert!(lifted.is_version_conflict());

        let missing = CoordError::from(RepoError::NotFound(RecordRef::new("specs", "auth")));
        assert!(matches!(missing, CoordError::NotFound(record) if record.key == "auth"));
    }

    #[test]
    fn invalid_data_stays_wrapped() {
        let wrapped = CoordError::from(RepoError::InvalidData("bad row".to_string()));
        assert!(matches!(wrapped, CoordError::Repo(_)));
        assert!(std::error::Error::source(&wrapped).is_some());
    }
}
