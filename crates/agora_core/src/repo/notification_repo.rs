//! Notification queue with per-recipient delivery flags.
//!
//! # Invariants
//! - A recipient's `delivered_at` is written once; later acknowledgements
//!   leave it untouched.
//! - A notification is retired once no recipient is pending.

use crate::model::audit::OperationKind;
use crate::model::notification::{Notification, RecipientDelivery};
use crate::model::record::RecordKind;
use crate::repo::{parse_uuid, version_from_db, version_to_db, RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Event content before the queue assigns ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification<'a> {
    pub actor: &'a str,
    pub domain: &'a str,
    pub record_key: &'a str,
    pub record_kind: RecordKind,
    pub record_version: u64,
    pub operation: OperationKind,
}

/// Outcome of marking one recipient copy delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMark {
    NewlyDelivered,
    AlreadyDelivered,
    NoSuchRecipient,
}

pub struct SqliteNotificationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteNotificationRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Inserts the event with one pending row per recipient.
    pub fn insert(
        &self,
        event: &NewNotification<'_>,
        recipients: &[&str],
        now_ms: i64,
    ) -> RepoResult<Notification> {
        let notification_id = Uuid::new_v4();
        self.conn.execute(
            "INSERT INTO notifications (
                notification_id,
                actor,
                domain,
                record_key,
                record_kind,
                record_version,
                operation,
                created_at,
                retired_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                notification_id.to_string(),
                event.actor,
                event.domain,
                event.record_key,
                event.record_kind.as_str(),
                version_to_db(event.record_version)?,
                event.operation.as_str(),
                now_ms,
                recipients.is_empty().then_some(now_ms),
            ],
        )?;
        let seq = self.conn.last_insert_rowid();

        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO notification_recipients (notification_id, agent_id, delivered_at)
             VALUES (?1, ?2, NULL);",
        )?;
        for agent in recipients {
            stmt.execute(params![notification_id.to_string(), agent])?;
        }

        Ok(Notification {
            notification_id,
            seq,
            actor: event.actor.to_string(),
            domain: event.domain.to_string(),
            record_key: event.record_key.to_string(),
            record_kind: event.record_kind,
            record_version: event.record_version,
            operation: event.operation,
            created_at: now_ms,
        })
    }

    /// Pending copies for `agent` in enqueue order.
    pub fn pending_for(&self, agent: &str) -> RepoResult<Vec<Notification>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                n.seq AS seq,
                n.notification_id AS notification_id,
                n.actor AS actor,
                n.domain AS domain,
                n.record_key AS record_key,
                n.record_kind AS record_kind,
                n.record_version AS record_version,
                n.operation AS operation,
                n.created_at AS created_at
             FROM notifications n
             INNER JOIN notification_recipients r ON r.notification_id = n.notification_id
             WHERE r.agent_id = ?1
               AND r.delivered_at IS NULL
             ORDER BY n.seq ASC;",
        )?;
        let mut rows = stmt.query([agent])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_notification_row(row)?);
        }
        Ok(items)
    }

    pub fn mark_delivered(
        &self,
        notification_id: Uuid,
        agent: &str,
        now_ms: i64,
    ) -> RepoResult<DeliveryMark> {
        let delivered_at: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT delivered_at
                 FROM notification_recipients
                 WHERE notification_id = ?1
                   AND agent_id = ?2;",
                params![notification_id.to_string(), agent],
                |row| row.get(0),
            )
            .optional()?;

        match delivered_at {
            None => Ok(DeliveryMark::NoSuchRecipient),
            Some(Some(_)) => Ok(DeliveryMark::AlreadyDelivered),
            Some(None) => {
                self.conn.execute(
                    "UPDATE notification_recipients
                     SET delivered_at = ?3
                     WHERE notification_id = ?1
                       AND agent_id = ?2
                       AND delivered_at IS NULL;",
                    params![notification_id.to_string(), agent, now_ms],
                )?;
                Ok(DeliveryMark::NewlyDelivered)
            }
        }
    }

    /// Sets `retired_at` when every recipient has acknowledged. Returns whether
    /// the notification is retired afterwards.
    pub fn retire_if_delivered(&self, notification_id: Uuid, now_ms: i64) -> RepoResult<bool> {
        self.conn.execute(
            "UPDATE notifications
             SET retired_at = ?2
             WHERE notification_id = ?1
               AND retired_at IS NULL
               AND NOT EXISTS (
                 SELECT 1
                 FROM notification_recipients
                 WHERE notification_id = ?1
                   AND delivered_at IS NULL
               );",
            params![notification_id.to_string(), now_ms],
        )?;
        let retired: Option<i64> = self.conn.query_row(
            "SELECT retired_at FROM notifications WHERE notification_id = ?1;",
            [notification_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(retired.is_some())
    }

    pub fn exists(&self, notification_id: Uuid) -> RepoResult<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM notifications WHERE notification_id = ?1;",
                [notification_id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn recipients(&self, notification_id: Uuid) -> RepoResult<Vec<RecipientDelivery>> {
        let mut stmt = self.conn.prepare(
            "SELECT agent_id, delivered_at
             FROM notification_recipients
             WHERE notification_id = ?1
             ORDER BY agent_id ASC;",
        )?;
        let mut rows = stmt.query([notification_id.to_string()])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(RecipientDelivery {
                agent_id: row.get(0)?,
                delivered_at: row.get(1)?,
            });
        }
        Ok(items)
    }

    /// Pending copy count per agent; agents with none are absent.
    pub fn pending_counts(&self) -> RepoResult<BTreeMap<String, usize>> {
        let mut stmt = self.conn.prepare(
            "SELECT agent_id, COUNT(*)
             FROM notification_recipients
             WHERE delivered_at IS NULL
             GROUP BY agent_id
             ORDER BY agent_id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut counts = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let agent: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            counts.insert(agent, usize::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }

    /// Total notifications referencing one record version.
    pub fn count_for_record(&self, domain: &str, record_key: &str) -> RepoResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE domain = ?1 AND record_key = ?2;",
            params![domain, record_key],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

fn parse_notification_row(row: &Row<'_>) -> RepoResult<Notification> {
    let id_text: String = row.get("notification_id")?;
    let kind_text: String = row.get("record_kind")?;
    let record_kind = RecordKind::parse(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid record kind `{kind_text}` in notifications.record_kind"
        ))
    })?;
    let operation_text: String = row.get("operation")?;
    let operation = OperationKind::parse(&operation_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid operation `{operation_text}` in notifications.operation"
        ))
    })?;

    Ok(Notification {
        notification_id: parse_uuid(&id_text, "notifications.notification_id")?,
        seq: row.get("seq")?,
        actor: row.get("actor")?,
        domain: row.get("domain")?,
        record_key: row.get("record_key")?,
        record_kind,
        record_version: version_from_db(row.get("record_version")?, "notifications.record_version")?,
        operation,
        created_at: row.get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::{DeliveryMark, NewNotification, SqliteNotificationRepository};
    use crate::db::open_db_in_memory;
    use crate::model::audit::OperationKind;
    use crate::model::record::RecordKind;

    fn event(version: u64) -> NewNotification<'static> {
        NewNotification {
            actor: "architect",
            domain: "specs",
            record_key: "S1",
            record_kind: RecordKind::Specification,
            record_version: version,
            operation: OperationKind::Update,
        }
    }

    #[test]
    fn retires_once_every_recipient_acknowledged() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteNotificationRepository::new(&conn);
        let queued = repo.insert(&event(1), &["planner", "implementer"], 10).unwrap();
        let id = queued.notification_id;

        assert_eq!(
            repo.mark_delivered(id, "planner", 20).unwrap(),
            DeliveryMark::NewlyDelivered
        );
        assert!(!repo.retire_if_delivered(id, 20).unwrap());
        assert_eq!(
            repo.mark_delivered(id, "planner", 25).unwrap(),
            DeliveryMark::AlreadyDelivered
        );

        repo.mark_delivered(id, "implementer", 30).unwrap();
        assert!(repo.retire_if_delivered(id, 30).unwrap());

        let recipients = repo.recipients(id).unwrap();
        assert_eq!(recipients.len(), 2);
        assert!(recipients.iter().all(|recipient| recipient.is_delivered()));
        // First acknowledgement wins.
        assert_eq!(recipients[1].agent_id, "planner");
        assert_eq!(recipients[1].delivered_at, Some(20));
    }

    #[test]
    fn no_recipients_means_retired_on_insert() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteNotificationRepository::new(&conn);
        let queued = repo.insert(&event(1), &[], 10).unwrap();

        assert!(repo.retire_if_delivered(queued.notification_id, 11).unwrap());
        assert!(repo.recipients(queued.notification_id).unwrap().is_empty());
        assert_eq!(repo.count_for_record("specs", "S1").unwrap(), 1);
    }

    #[test]
    fn pending_is_per_agent_in_enqueue_order() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteNotificationRepository::new(&conn);
        let first = repo.insert(&event(1), &["planner"], 10).unwrap();
        let second = repo.insert(&event(2), &["planner", "implementer"], 11).unwrap();
        repo.mark_delivered(first.notification_id, "planner", 12).unwrap();

        let pending = repo.pending_for("planner").unwrap();
        assert_eq!(pending, vec![second]);
        assert_eq!(
            repo.mark_delivered(first.notification_id, "architect", 13).unwrap(),
            DeliveryMark::NoSuchRecipient
        );

        let counts = repo.pending_counts().unwrap();
        assert_eq!(counts.get("planner"), Some(&1));
        assert_eq!(counts.get("implementer"), Some(&1));
        assert_eq!(counts.get("architect"), None);
    }
}
