//! Notification fan-out.
//!
//! # Responsibility
//! - Compute recipients for one accepted write.
//! - Hand out pending notifications and record acknowledgements.
//!
//! # Invariants
//! - The actor never receives its own notification.
//! - A copy moves from pending to delivered at most once; delivery is
//!   at-least-once because `deliver` never removes anything.

use crate::config::Registry;
use crate::model::notification::{Notification, RecipientDelivery};
use crate::model::record::RecordKind;
use crate::repo::notification_repo::{DeliveryMark, NewNotification, SqliteNotificationRepository};
use crate::service::error::{CoordError, CoordResult};
use log::debug;
use rusqlite::Connection;
use uuid::Uuid;

/// Fan-out bound to one connection or open transaction.
pub struct FanOut<'a> {
    conn: &'a Connection,
    registry: &'a Registry,
}

impl<'a> FanOut<'a> {
    pub fn new(conn: &'a Connection, registry: &'a Registry) -> Self {
        Self { conn, registry }
    }

    /// Recipients for a change to a record of `kind` made by `actor`, in
    /// ascending agent order.
    ///
    /// Broadcast to every configured agent unless the kind declares
    /// `subscribers`.
    pub fn recipients(&self, kind: RecordKind, actor: &str) -> Vec<&'a str> {
        let registry = self.registry;
        match registry
            .schemas()
            .get(kind)
            .and_then(|schema| schema.subscribers.as_ref())
        {
            Some(subscribers) => subscribers
                .iter()
                .map(String::as_str)
                .filter(|agent| *agent != actor)
                .collect(),
            None => registry.agents().filter(|agent| *agent != actor).collect(),
        }
    }

    /// Enqueues one notification for an accepted write.
    pub fn enqueue(&self, event: &NewNotification<'_>, now_ms: i64) -> CoordResult<Notification> {
        let recipients = self.recipients(event.record_kind, event.actor);
        let notification =
            SqliteNotificationRepository::new(self.conn).insert(event, &recipients, now_ms)?;
        debug!(
            "event=notification_enqueue module=fanout status=ok domain={} op={} recipients={}",
            event.domain,
            event.operation.as_str(),
            recipients.len()
        );
        Ok(notification)
    }

    /// Pending notifications for `agent` in enqueue order, without removing
    /// them.
    pub fn deliver(&self, agent: &str) -> CoordResult<Vec<Notification>> {
        self.ensure_agent(agent)?;
        SqliteNotificationRepository::new(self.conn)
            .pending_for(agent)
            .map_err(Into::into)
    }

    /// Marks `agent`'s copy delivered. Returns `false` when it already was.
    pub fn acknowledge(
        &self,
        agent: &str,
        notification_id: Uuid,
        now_ms: i64,
    ) -> CoordResult<bool> {
        self.ensure_agent(agent)?;
        let repo = SqliteNotificationRepository::new(self.conn);
        match repo.mark_delivered(notification_id, agent, now_ms)? {
            DeliveryMark::NoSuchRecipient => Err(CoordError::NotificationNotFound(notification_id)),
            DeliveryMark::AlreadyDelivered => Ok(false),
            DeliveryMark::NewlyDelivered => {
                repo.retire_if_delivered(notification_id, now_ms)?;
                Ok(true)
            }
        }
    }

    /// Delivery flag of every recipient, ordered by agent id.
    pub fn delivery_status(&self, notification_id: Uuid) -> CoordResult<Vec<RecipientDelivery>> {
        let repo = SqliteNotificationRepository::new(self.conn);
        if !repo.exists(notification_id)? {
            return Err(CoordError::NotificationNotFound(notification_id));
        }
        repo.recipients(notification_id).map_err(Into::into)
    }

    fn ensure_agent(&self, agent: &str) -> CoordResult<()> {
        if self.registry.has_agent(agent) {
            Ok(())
        } else {
            Err(CoordError::UnknownAgent(agent.to_string()))
        }
    }
}
