//! Repository layer over the coordination database.
//!
//! # Responsibility
//! - Keep SQL inside the persistence boundary.
//! - Return semantic errors (`NotFound`, `VersionConflict`) next to transport
//!   errors.
//!
//! # Invariants
//! - Repositories never open transactions themselves; callers pass a
//!   connection or an open transaction and own commit/rollback.
//! - Read paths reject undecodable persisted state instead of masking it.

pub mod agent_repo;
pub mod audit_repo;
pub mod dependency_repo;
pub mod notification_repo;
pub mod record_repo;

use crate::db::DbError;
use crate::model::ids::RecordRef;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for coordination persistence.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound(RecordRef),
    /// Stored version differs from the caller's expectation. `actual == 0`
    /// means the record does not exist.
    VersionConflict {
        record: RecordRef,
        expected: u64,
        actual: u64,
    },
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(record) => write!(f, "record not found: {record}"),
            Self::VersionConflict {
                record,
                expected,
                actual,
            } => write!(
                f,
                "version conflict on {record}: expected {expected}, stored {actual}"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::NotFound(_) => None,
            Self::VersionConflict { .. } => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::from(value))
    }
}

fn version_from_db(value: i64, column: &'static str) -> RepoResult<u64> {
    u64::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("negative version `{value}` in {column}")))
}

fn version_to_db(value: u64) -> RepoResult<i64> {
    i64::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("version `{value}` exceeds storage range")))
}

fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}
