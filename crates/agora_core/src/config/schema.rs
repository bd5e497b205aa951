//! Record schema declarations.

use crate::model::ids::{AgentId, DomainName};
use crate::model::record::RecordKind;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Validated declaration for one record kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    pub kind: RecordKind,
    pub domain: DomainName,
    pub required_fields: Vec<String>,
    /// Records of this kind are tasks.
    pub dependency_graph: bool,
    pub subscribers: Option<BTreeSet<AgentId>>,
}

impl RecordSchema {
    /// Checks payload shape: a JSON object carrying every required field with a
    /// non-null value.
    pub fn check_payload(&self, payload: &Value) -> Result<(), String> {
        let Some(object) = payload.as_object() else {
            return Err(format!("{} payload must be a JSON object", self.kind.as_str()));
        };
        for field in &self.required_fields {
            match object.get(field) {
                Some(value) if !value.is_null() => {}
                _ => {
                    return Err(format!(
                        "{} payload missing required field `{field}`",
                        self.kind.as_str()
                    ))
                }
            }
        }
        Ok(())
    }
}

/// Declared schemas keyed by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaTable {
    by_kind: BTreeMap<RecordKind, RecordSchema>,
}

impl SchemaTable {
    pub fn new(by_kind: BTreeMap<RecordKind, RecordSchema>) -> Self {
        Self { by_kind }
    }

    pub fn get(&self, kind: RecordKind) -> Option<&RecordSchema> {
        self.by_kind.get(&kind)
    }

    pub fn is_task_kind(&self, kind: RecordKind) -> bool {
        self.get(kind).is_some_and(|schema| schema.dependency_graph)
    }
}
