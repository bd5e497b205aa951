//! Bounded retry around optimistic version conflicts.

use crate::service::error::{CoordError, CoordResult};
use log::debug;

/// Runs `op` until it succeeds, fails with something other than
/// `VersionConflict`, or `max_attempts` is spent. `op` receives the 1-based
/// attempt number and must re-read the record it writes.
///
/// `max_attempts == 0` is treated as a single attempt.
pub fn retry_on_conflict<T, F>(max_attempts: u32, mut op: F) -> CoordResult<T>
where
    F: FnMut(u32) -> CoordResult<T>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Err(err @ CoordError::VersionConflict { .. }) if attempt < max_attempts => {
                debug!(
                    "event=write_retry module=retry status=rejected attempt={} reason={}",
                    attempt, err
                );
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::retry_on_conflict;
    use crate::model::ids::RecordRef;
    use crate::service::error::CoordError;

    fn conflict() -> CoordError {
        CoordError::VersionConflict {
            record: RecordRef::new("specs", "auth"),
            expected: 1,
            actual: 2,
        }
    }

    #[test]
    fn retries_conflicts_until_success() {
        let result = retry_on_conflict(3, |attempt| {
            if attempt < 3 {
                Err(conflict())
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.expect("third attempt succeeds"), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), _> = retry_on_conflict(2, |_| {
            calls += 1;
            Err(conflict())
        });
        assert!(result.expect_err("still conflicting").is_version_conflict());
        assert_eq!(calls, 2);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = retry_on_conflict(5, |_| {
            calls += 1;
            Err(CoordError::UnknownAgent("ghost".to_string()))
        });
        assert!(matches!(result, Err(CoordError::UnknownAgent(_))));
        assert_eq!(calls, 1);
    }
}
