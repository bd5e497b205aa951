//! Fan-out notifications.

use crate::model::audit::OperationKind;
use crate::model::record::RecordKind;
use serde::Serialize;
use uuid::Uuid;

/// Change event awaiting delivery to one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub notification_id: Uuid,
    /// Enqueue order across the store.
    pub seq: i64,
    pub actor: String,
    pub domain: String,
    pub record_key: String,
    pub record_kind: RecordKind,
    pub record_version: u64,
    pub operation: OperationKind,
    pub created_at: i64,
}

/// Per-recipient delivery flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientDelivery {
    pub agent_id: String,
    /// `None` while pending.
    pub delivered_at: Option<i64>,
}

impl RecipientDelivery {
    pub fn is_delivered(&self) -> bool {
        self.delivered_at.is_some()
    }
}
