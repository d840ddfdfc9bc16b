//! Persisted entities (spec §3), minus step/init executions which live in
//! [`crate::execution`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::status::{BatchStatus, MemberStatus, OverdueBehavior, PhaseStatus};

/// An immutable versioned runbook definition.
///
/// Never mutated except for `is_active`, `ignore_overdue_applied`, and
/// `last_error`, per spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runbook {
    pub id: Uuid,
    pub name: String,
    pub version: i32,
    pub raw_yaml: String,
    pub data_table_name: String,
    pub is_active: bool,
    pub overdue_behavior: OverdueBehavior,
    pub rerun_init: bool,
    pub ignore_overdue_applied: bool,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Runbook {
    /// `runbook_{sanitized_name}_v{version}`, the dynamic data table name.
    pub fn derive_data_table_name(name: &str, version: i32) -> String {
        let sanitized: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        format!("runbook_{sanitized}_v{version}")
    }
}

/// A group of members sharing a batch-anchor time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub runbook_id: Uuid,
    pub batch_start_time: DateTime<Utc>,
    pub status: BatchStatus,
    pub is_manual: bool,
    pub created_by: Option<String>,
    pub current_phase: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub init_dispatched_at: Option<DateTime<Utc>>,
}

/// One migration candidate inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMember {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub member_key: String,
    /// Snapshot of the source row at insertion time; never mutated.
    pub data_json: Value,
    /// Accumulating map of outputs captured from successful steps.
    pub worker_data_json: Value,
    pub status: MemberStatus,
    pub added_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub add_dispatched_at: Option<DateTime<Utc>>,
    pub remove_dispatched_at: Option<DateTime<Utc>>,
}

impl BatchMember {
    /// Merge a step's declared output params into `worker_data_json`.
    /// Monotonic: existing keys are overwritten, nothing is ever removed.
    pub fn merge_worker_data(&mut self, updates: serde_json::Map<String, Value>) {
        let obj = self
            .worker_data_json
            .as_object_mut()
            .expect("worker_data_json is always a JSON object");
        for (k, v) in updates {
            obj.insert(k, v);
        }
    }

    /// Binds special variables plus every key of `data_json` and
    /// `worker_data_json` (worker data wins on collision), per §4.1.
    pub fn template_scope(&self, batch_id: Uuid, batch_start_time: DateTime<Utc>) -> serde_json::Map<String, Value> {
        let mut scope = serde_json::Map::new();
        scope.insert("_batch_id".into(), Value::String(batch_id.to_string()));
        scope.insert(
            "_batch_start_time".into(),
            Value::String(batch_start_time.to_rfc3339()),
        );
        if let Some(obj) = self.data_json.as_object() {
            scope.extend(obj.clone());
        }
        if let Some(obj) = self.worker_data_json.as_object() {
            scope.extend(obj.clone());
        }
        scope
    }
}

/// Instance of a phase definition for one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseExecution {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub phase_name: String,
    pub offset_minutes: i64,
    pub due_at: DateTime<Utc>,
    pub runbook_version: i32,
    pub status: PhaseStatus,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_sanitized_table_name() {
        assert_eq!(
            Runbook::derive_data_table_name("Mailbox Migration", 3),
            "runbook_mailbox_migration_v3"
        );
    }

    #[test]
    fn template_scope_prefers_worker_data_on_collision() {
        let member = BatchMember {
            id: Uuid::nil(),
            batch_id: Uuid::nil(),
            member_key: "u1".into(),
            data_json: serde_json::json!({"uid": "u1", "region": "eu"}),
            worker_data_json: serde_json::json!({"region": "eu-overridden"}),
            status: MemberStatus::Active,
            added_at: Utc::now(),
            removed_at: None,
            failed_at: None,
            add_dispatched_at: None,
            remove_dispatched_at: None,
        };
        let scope = member.template_scope(Uuid::nil(), Utc::now());
        assert_eq!(scope.get("region").unwrap(), "eu-overridden");
        assert_eq!(scope.get("uid").unwrap(), "u1");
    }
}
