//! PostgreSQL-backed `MigrationStore`.
//!
//! Schema is created with embedded `CREATE TABLE IF NOT EXISTS` DDL on
//! construction (`ensure_schema`) rather than a separate migrations tool —
//! the same approach `durable::persistence::postgres` documents, since no
//! migration-runner crate is part of this dependency set.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migeng_core::{
    execution::{PollState, RetryState},
    Batch, BatchMember, BatchStatus, InitExecution, MemberStatus, OverdueBehavior, PhaseExecution,
    PhaseStatus, Runbook, StepExecution, StepStatus,
};
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::MigrationStore;
use crate::types::{
    ExecutionRecord, ExecutionRef, NewBatch, NewInitExecution, NewPhaseExecution,
    NewStepExecution, RunbookLockGuard, TerminalOutcome,
};

#[derive(Clone)]
pub struct PostgresMigrationStore {
    pool: PgPool,
}

impl PostgresMigrationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the persisted schema described in SPEC_FULL.md §6 if it does
    /// not already exist. Safe to call on every startup.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA_DDL)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }
}

const SCHEMA_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS runbooks (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    version INT NOT NULL,
    raw_yaml TEXT NOT NULL,
    data_table_name TEXT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    overdue_behavior TEXT NOT NULL,
    rerun_init BOOLEAN NOT NULL DEFAULT FALSE,
    ignore_overdue_applied BOOLEAN NOT NULL DEFAULT FALSE,
    last_error TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (name, version)
);

CREATE TABLE IF NOT EXISTS runbook_locks (
    runbook_id UUID PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS batches (
    id UUID PRIMARY KEY,
    runbook_id UUID NOT NULL REFERENCES runbooks(id),
    batch_start_time TIMESTAMPTZ NOT NULL,
    status TEXT NOT NULL,
    is_manual BOOLEAN NOT NULL DEFAULT FALSE,
    created_by TEXT,
    current_phase TEXT,
    detected_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    init_dispatched_at TIMESTAMPTZ,
    UNIQUE (runbook_id, batch_start_time)
);

CREATE TABLE IF NOT EXISTS batch_members (
    id UUID PRIMARY KEY,
    batch_id UUID NOT NULL REFERENCES batches(id),
    member_key TEXT NOT NULL,
    data_json JSONB NOT NULL,
    worker_data_json JSONB NOT NULL DEFAULT '{}',
    status TEXT NOT NULL,
    added_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    removed_at TIMESTAMPTZ,
    failed_at TIMESTAMPTZ,
    add_dispatched_at TIMESTAMPTZ,
    remove_dispatched_at TIMESTAMPTZ,
    UNIQUE (batch_id, member_key)
);

CREATE TABLE IF NOT EXISTS phase_executions (
    id UUID PRIMARY KEY,
    batch_id UUID NOT NULL REFERENCES batches(id),
    phase_name TEXT NOT NULL,
    offset_minutes BIGINT NOT NULL,
    due_at TIMESTAMPTZ NOT NULL,
    runbook_version INT NOT NULL,
    status TEXT NOT NULL,
    dispatched_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    UNIQUE (batch_id, phase_name)
);

CREATE TABLE IF NOT EXISTS step_executions (
    id UUID PRIMARY KEY,
    phase_execution_id UUID NOT NULL REFERENCES phase_executions(id),
    batch_member_id UUID NOT NULL REFERENCES batch_members(id),
    step_name TEXT NOT NULL,
    step_index INT NOT NULL,
    runbook_version INT NOT NULL,
    worker_id TEXT NOT NULL,
    function_name TEXT NOT NULL,
    params_json JSONB NOT NULL,
    status TEXT NOT NULL,
    job_id TEXT,
    result_json JSONB,
    error_message TEXT,
    output_params JSONB NOT NULL DEFAULT '{}',
    on_failure TEXT,
    dispatched_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    is_poll_step BOOLEAN NOT NULL DEFAULT FALSE,
    poll_interval_sec BIGINT NOT NULL DEFAULT 0,
    poll_timeout_sec BIGINT NOT NULL DEFAULT 0,
    poll_started_at TIMESTAMPTZ,
    last_polled_at TIMESTAMPTZ,
    poll_count INT NOT NULL DEFAULT 0,
    max_retries INT NOT NULL DEFAULT 0,
    retry_interval_sec BIGINT NOT NULL DEFAULT 0,
    retry_count INT NOT NULL DEFAULT 0,
    retry_after TIMESTAMPTZ,
    UNIQUE (phase_execution_id, batch_member_id, step_index)
);

CREATE TABLE IF NOT EXISTS init_executions (
    id UUID PRIMARY KEY,
    batch_id UUID NOT NULL REFERENCES batches(id),
    step_name TEXT NOT NULL,
    step_index INT NOT NULL,
    runbook_version INT NOT NULL,
    worker_id TEXT NOT NULL,
    function_name TEXT NOT NULL,
    params_json JSONB NOT NULL,
    status TEXT NOT NULL,
    job_id TEXT,
    result_json JSONB,
    error_message TEXT,
    output_params JSONB NOT NULL DEFAULT '{}',
    on_failure TEXT,
    dispatched_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    is_poll_step BOOLEAN NOT NULL DEFAULT FALSE,
    poll_interval_sec BIGINT NOT NULL DEFAULT 0,
    poll_timeout_sec BIGINT NOT NULL DEFAULT 0,
    poll_started_at TIMESTAMPTZ,
    last_polled_at TIMESTAMPTZ,
    poll_count INT NOT NULL DEFAULT 0,
    max_retries INT NOT NULL DEFAULT 0,
    retry_interval_sec BIGINT NOT NULL DEFAULT 0,
    retry_count INT NOT NULL DEFAULT 0,
    retry_after TIMESTAMPTZ,
    UNIQUE (batch_id, runbook_version, step_name, step_index)
);
"#;

struct PgLockGuard {
    runbook_id: Uuid,
    pool: PgPool,
}

impl RunbookLockGuard for PgLockGuard {
    fn runbook_id(&self) -> Uuid {
        self.runbook_id
    }
}

impl Drop for PgLockGuard {
    fn drop(&mut self) {
        let pool = self.pool.clone();
        let id = self.runbook_id;
        tokio::spawn(async move {
            let _ = sqlx::query("DELETE FROM runbook_locks WHERE runbook_id = $1")
                .bind(id)
                .execute(&pool)
                .await;
        });
    }
}

fn overdue_behavior_to_str(b: OverdueBehavior) -> &'static str {
    match b {
        OverdueBehavior::Rerun => "rerun",
        OverdueBehavior::Ignore => "ignore",
    }
}

fn parse_overdue_behavior(s: &str) -> Result<OverdueBehavior, StoreError> {
    match s {
        "rerun" => Ok(OverdueBehavior::Rerun),
        "ignore" => Ok(OverdueBehavior::Ignore),
        other => Err(StoreError::Serialization(format!("unknown overdue_behavior: {other}"))),
    }
}

fn batch_status_to_str(s: BatchStatus) -> &'static str {
    match s {
        BatchStatus::Detected => "detected",
        BatchStatus::InitDispatched => "init_dispatched",
        BatchStatus::Active => "active",
        BatchStatus::Completed => "completed",
        BatchStatus::Failed => "failed",
    }
}

fn parse_batch_status(s: &str) -> Result<BatchStatus, StoreError> {
    Ok(match s {
        "detected" => BatchStatus::Detected,
        "init_dispatched" => BatchStatus::InitDispatched,
        "active" => BatchStatus::Active,
        "completed" => BatchStatus::Completed,
        "failed" => BatchStatus::Failed,
        other => return Err(StoreError::Serialization(format!("unknown batch status: {other}"))),
    })
}

fn parse_member_status(s: &str) -> Result<MemberStatus, StoreError> {
    Ok(match s {
        "active" => MemberStatus::Active,
        "removed" => MemberStatus::Removed,
        "failed" => MemberStatus::Failed,
        other => return Err(StoreError::Serialization(format!("unknown member status: {other}"))),
    })
}

fn phase_status_to_str(s: PhaseStatus) -> &'static str {
    match s {
        PhaseStatus::Pending => "pending",
        PhaseStatus::Dispatched => "dispatched",
        PhaseStatus::Completed => "completed",
        PhaseStatus::Failed => "failed",
        PhaseStatus::Skipped => "skipped",
    }
}

fn parse_phase_status(s: &str) -> Result<PhaseStatus, StoreError> {
    Ok(match s {
        "pending" => PhaseStatus::Pending,
        "dispatched" => PhaseStatus::Dispatched,
        "completed" => PhaseStatus::Completed,
        "failed" => PhaseStatus::Failed,
        "skipped" => PhaseStatus::Skipped,
        other => return Err(StoreError::Serialization(format!("unknown phase status: {other}"))),
    })
}

fn parse_step_status(s: &str) -> Result<StepStatus, StoreError> {
    Ok(match s {
        "pending" => StepStatus::Pending,
        "dispatched" => StepStatus::Dispatched,
        "succeeded" => StepStatus::Succeeded,
        "failed" => StepStatus::Failed,
        "polling" => StepStatus::Polling,
        "poll_timeout" => StepStatus::PollTimeout,
        "cancelled" => StepStatus::Cancelled,
        other => return Err(StoreError::Serialization(format!("unknown step status: {other}"))),
    })
}

fn row_to_runbook(row: &sqlx::postgres::PgRow) -> Result<Runbook, StoreError> {
    Ok(Runbook {
        id: row.get("id"),
        name: row.get("name"),
        version: row.get("version"),
        raw_yaml: row.get("raw_yaml"),
        data_table_name: row.get("data_table_name"),
        is_active: row.get("is_active"),
        overdue_behavior: parse_overdue_behavior(row.get("overdue_behavior"))?,
        rerun_init: row.get("rerun_init"),
        ignore_overdue_applied: row.get("ignore_overdue_applied"),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
    })
}

fn row_to_batch(row: &sqlx::postgres::PgRow) -> Result<Batch, StoreError> {
    Ok(Batch {
        id: row.get("id"),
        runbook_id: row.get("runbook_id"),
        batch_start_time: row.get("batch_start_time"),
        status: parse_batch_status(row.get("status"))?,
        is_manual: row.get("is_manual"),
        created_by: row.get("created_by"),
        current_phase: row.get("current_phase"),
        detected_at: row.get("detected_at"),
        init_dispatched_at: row.get("init_dispatched_at"),
    })
}

fn row_to_member(row: &sqlx::postgres::PgRow) -> Result<BatchMember, StoreError> {
    Ok(BatchMember {
        id: row.get("id"),
        batch_id: row.get("batch_id"),
        member_key: row.get("member_key"),
        data_json: row.get("data_json"),
        worker_data_json: row.get("worker_data_json"),
        status: parse_member_status(row.get("status"))?,
        added_at: row.get("added_at"),
        removed_at: row.get("removed_at"),
        failed_at: row.get("failed_at"),
        add_dispatched_at: row.get("add_dispatched_at"),
        remove_dispatched_at: row.get("remove_dispatched_at"),
    })
}

fn row_to_phase(row: &sqlx::postgres::PgRow) -> Result<PhaseExecution, StoreError> {
    Ok(PhaseExecution {
        id: row.get("id"),
        batch_id: row.get("batch_id"),
        phase_name: row.get("phase_name"),
        offset_minutes: row.get("offset_minutes"),
        due_at: row.get("due_at"),
        runbook_version: row.get("runbook_version"),
        status: parse_phase_status(row.get("status"))?,
        dispatched_at: row.get("dispatched_at"),
        completed_at: row.get("completed_at"),
    })
}

fn row_to_step(row: &sqlx::postgres::PgRow) -> Result<StepExecution, StoreError> {
    let output_params_json: serde_json::Value = row.get("output_params");
    let output_params = serde_json::from_value(output_params_json)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(StepExecution {
        id: row.get("id"),
        phase_execution_id: row.get("phase_execution_id"),
        batch_member_id: row.get("batch_member_id"),
        step_name: row.get("step_name"),
        step_index: row.get::<i32, _>("step_index") as u32,
        runbook_version: row.get("runbook_version"),
        worker_id: row.get("worker_id"),
        function_name: row.get("function_name"),
        params_json: row.get("params_json"),
        status: parse_step_status(row.get("status"))?,
        job_id: row.get("job_id"),
        result_json: row.get("result_json"),
        error_message: row.get("error_message"),
        output_params,
        on_failure: row.get("on_failure"),
        dispatched_at: row.get("dispatched_at"),
        completed_at: row.get("completed_at"),
        poll: PollState {
            is_poll_step: row.get("is_poll_step"),
            poll_interval_sec: row.get::<i64, _>("poll_interval_sec") as u64,
            poll_timeout_sec: row.get::<i64, _>("poll_timeout_sec") as u64,
            poll_started_at: row.get("poll_started_at"),
            last_polled_at: row.get("last_polled_at"),
            poll_count: row.get::<i32, _>("poll_count") as u32,
        },
        retry: RetryState {
            max_retries: row.get::<i32, _>("max_retries") as u32,
            retry_interval_sec: row.get::<i64, _>("retry_interval_sec") as u64,
            retry_count: row.get::<i32, _>("retry_count") as u32,
            retry_after: row.get("retry_after"),
        },
    })
}

fn row_to_init(row: &sqlx::postgres::PgRow) -> Result<InitExecution, StoreError> {
    let output_params_json: serde_json::Value = row.get("output_params");
    let output_params = serde_json::from_value(output_params_json)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(InitExecution {
        id: row.get("id"),
        batch_id: row.get("batch_id"),
        step_name: row.get("step_name"),
        step_index: row.get::<i32, _>("step_index") as u32,
        runbook_version: row.get("runbook_version"),
        worker_id: row.get("worker_id"),
        function_name: row.get("function_name"),
        params_json: row.get("params_json"),
        status: parse_step_status(row.get("status"))?,
        job_id: row.get("job_id"),
        result_json: row.get("result_json"),
        error_message: row.get("error_message"),
        output_params,
        on_failure: row.get("on_failure"),
        dispatched_at: row.get("dispatched_at"),
        completed_at: row.get("completed_at"),
        poll: PollState {
            is_poll_step: row.get("is_poll_step"),
            poll_interval_sec: row.get::<i64, _>("poll_interval_sec") as u64,
            poll_timeout_sec: row.get::<i64, _>("poll_timeout_sec") as u64,
            poll_started_at: row.get("poll_started_at"),
            last_polled_at: row.get("last_polled_at"),
            poll_count: row.get::<i32, _>("poll_count") as u32,
        },
        retry: RetryState {
            max_retries: row.get::<i32, _>("max_retries") as u32,
            retry_interval_sec: row.get::<i64, _>("retry_interval_sec") as u64,
            retry_count: row.get::<i32, _>("retry_count") as u32,
            retry_after: row.get("retry_after"),
        },
    })
}

#[async_trait]
impl MigrationStore for PostgresMigrationStore {
    #[instrument(skip(self))]
    async fn list_active_runbooks(&self) -> Result<Vec<Runbook>, StoreError> {
        let rows = sqlx::query("SELECT * FROM runbooks WHERE is_active = TRUE")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("failed to list active runbooks: {e}");
                StoreError::Database(e.to_string())
            })?;
        rows.iter().map(row_to_runbook).collect()
    }

    #[instrument(skip(self))]
    async fn get_runbook(&self, id: Uuid) -> Result<Runbook, StoreError> {
        let row = sqlx::query("SELECT * FROM runbooks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or(StoreError::RunbookNotFound(id))?;
        row_to_runbook(&row)
    }

    #[instrument(skip(self, message))]
    async fn record_runbook_error(&self, id: Uuid, message: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE runbooks SET last_error = $2 WHERE id = $1")
            .bind(id)
            .bind(message)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn try_lock_runbook(
        &self,
        id: Uuid,
    ) -> Result<Option<Box<dyn RunbookLockGuard>>, StoreError> {
        let result = sqlx::query("INSERT INTO runbook_locks (runbook_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        debug!(%id, "acquired runbook advisory lock");
        Ok(Some(Box::new(PgLockGuard {
            runbook_id: id,
            pool: self.pool.clone(),
        })))
    }

    #[instrument(skip(self))]
    async fn find_batch(
        &self,
        runbook_id: Uuid,
        batch_start_time: DateTime<Utc>,
    ) -> Result<Option<Batch>, StoreError> {
        let row = sqlx::query("SELECT * FROM batches WHERE runbook_id = $1 AND batch_start_time = $2")
            .bind(runbook_id)
            .bind(batch_start_time)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        row.as_ref().map(row_to_batch).transpose()
    }

    #[instrument(skip(self))]
    async fn get_batch(&self, id: Uuid) -> Result<Batch, StoreError> {
        let row = sqlx::query("SELECT * FROM batches WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or(StoreError::BatchNotFound(id))?;
        row_to_batch(&row)
    }

    #[instrument(skip(self, new))]
    async fn create_batch(&self, new: NewBatch) -> Result<Batch, StoreError> {
        let id = Uuid::now_v7();
        let row = sqlx::query(
            r#"
            INSERT INTO batches (id, runbook_id, batch_start_time, status, is_manual, created_by)
            VALUES ($1, $2, $3, 'detected', $4, $5)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(new.runbook_id)
        .bind(new.batch_start_time)
        .bind(new.is_manual)
        .bind(&new.created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        row_to_batch(&row)
    }

    #[instrument(skip(self))]
    async fn set_batch_status(&self, id: Uuid, status: BatchStatus) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE batches
            SET status = $2,
                init_dispatched_at = CASE WHEN $2 = 'init_dispatched' THEN NOW() ELSE init_dispatched_at END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(batch_status_to_str(status))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_nonterminal_batches(&self, runbook_id: Uuid) -> Result<Vec<Batch>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM batches WHERE runbook_id = $1 AND status NOT IN ('completed', 'failed')",
        )
        .bind(runbook_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        rows.iter().map(row_to_batch).collect()
    }

    #[instrument(skip(self))]
    async fn complete_batch_if_ready(
        &self,
        batch_id: Uuid,
        outcome: TerminalOutcome,
    ) -> Result<bool, StoreError> {
        let remaining: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM phase_executions WHERE batch_id = $1 AND status NOT IN ('completed', 'failed', 'skipped')",
        )
        .bind(batch_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        if remaining > 0 {
            return Ok(false);
        }
        let result = sqlx::query(
            "UPDATE batches SET status = $2 WHERE id = $1 AND status NOT IN ('completed', 'failed')",
        )
        .bind(batch_id)
        .bind(batch_status_to_str(outcome.as_batch_status()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn get_member(&self, id: Uuid) -> Result<BatchMember, StoreError> {
        let row = sqlx::query("SELECT * FROM batch_members WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or(StoreError::MemberNotFound(id))?;
        row_to_member(&row)
    }

    #[instrument(skip(self))]
    async fn list_members(&self, batch_id: Uuid) -> Result<Vec<BatchMember>, StoreError> {
        let rows = sqlx::query("SELECT * FROM batch_members WHERE batch_id = $1")
            .bind(batch_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        rows.iter().map(row_to_member).collect()
    }

    #[instrument(skip(self))]
    async fn list_active_members(&self, batch_id: Uuid) -> Result<Vec<BatchMember>, StoreError> {
        let rows = sqlx::query("SELECT * FROM batch_members WHERE batch_id = $1 AND status = 'active'")
            .bind(batch_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        rows.iter().map(row_to_member).collect()
    }

    #[instrument(skip(self))]
    async fn find_member_by_key(
        &self,
        batch_id: Uuid,
        member_key: &str,
    ) -> Result<Option<BatchMember>, StoreError> {
        let row = sqlx::query("SELECT * FROM batch_members WHERE batch_id = $1 AND member_key = $2")
            .bind(batch_id)
            .bind(member_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        row.as_ref().map(row_to_member).transpose()
    }

    #[instrument(skip(self))]
    async fn find_active_membership(
        &self,
        runbook_id: Uuid,
        member_key: &str,
    ) -> Result<Option<(Uuid, Uuid)>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT m.batch_id, m.id AS member_id
            FROM batch_members m
            JOIN batches b ON b.id = m.batch_id
            WHERE b.runbook_id = $1
              AND m.member_key = $2
              AND m.status = 'active'
              AND b.status NOT IN ('completed', 'failed')
            LIMIT 1
            "#,
        )
        .bind(runbook_id)
        .bind(member_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(row.map(|r| (r.get("batch_id"), r.get("member_id"))))
    }

    #[instrument(skip(self, data_json))]
    async fn insert_member(
        &self,
        batch_id: Uuid,
        member_key: &str,
        data_json: serde_json::Value,
    ) -> Result<BatchMember, StoreError> {
        let id = Uuid::now_v7();
        let row = sqlx::query(
            r#"
            INSERT INTO batch_members (id, batch_id, member_key, data_json, worker_data_json, status)
            VALUES ($1, $2, $3, $4, '{}', 'active')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(batch_id)
        .bind(member_key)
        .bind(&data_json)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        row_to_member(&row)
    }

    #[instrument(skip(self))]
    async fn mark_member_removed(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE batch_members SET status = 'removed', removed_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_member_failed(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE batch_members SET status = 'failed', failed_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self, updates))]
    async fn merge_member_worker_data(
        &self,
        id: Uuid,
        updates: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), StoreError> {
        let patch = serde_json::Value::Object(updates);
        sqlx::query("UPDATE batch_members SET worker_data_json = worker_data_json || $2 WHERE id = $1")
            .bind(id)
            .bind(&patch)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self, new))]
    async fn create_phase_execution(
        &self,
        new: NewPhaseExecution,
    ) -> Result<PhaseExecution, StoreError> {
        let id = Uuid::now_v7();
        let row = sqlx::query(
            r#"
            INSERT INTO phase_executions (id, batch_id, phase_name, offset_minutes, due_at, runbook_version, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(new.batch_id)
        .bind(&new.phase_name)
        .bind(new.offset_minutes)
        .bind(new.due_at)
        .bind(new.runbook_version)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        row_to_phase(&row)
    }

    #[instrument(skip(self))]
    async fn get_phase_execution(&self, id: Uuid) -> Result<PhaseExecution, StoreError> {
        let row = sqlx::query("SELECT * FROM phase_executions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or(StoreError::PhaseExecutionNotFound(id))?;
        row_to_phase(&row)
    }

    #[instrument(skip(self))]
    async fn list_phase_executions(&self, batch_id: Uuid) -> Result<Vec<PhaseExecution>, StoreError> {
        let rows = sqlx::query("SELECT * FROM phase_executions WHERE batch_id = $1")
            .bind(batch_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        rows.iter().map(row_to_phase).collect()
    }

    #[instrument(skip(self))]
    async fn list_due_phases(
        &self,
        batch_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<PhaseExecution>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM phase_executions
            WHERE batch_id = $1 AND status = 'pending' AND due_at <= $2
            ORDER BY offset_minutes ASC
            "#,
        )
        .bind(batch_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        rows.iter().map(row_to_phase).collect()
    }

    #[instrument(skip(self))]
    async fn set_phase_dispatched(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE phase_executions SET status = 'dispatched', dispatched_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_phase_skipped(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE phase_executions SET status = 'skipped' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn complete_phase_if_dispatched(
        &self,
        id: Uuid,
        outcome: TerminalOutcome,
    ) -> Result<bool, StoreError> {
        let remaining: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM step_executions WHERE phase_execution_id = $1 AND status NOT IN ('succeeded', 'failed', 'cancelled', 'poll_timeout')",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        if remaining > 0 {
            return Ok(false);
        }
        let result = sqlx::query(
            "UPDATE phase_executions SET status = $2, completed_at = NOW() WHERE id = $1 AND status = 'dispatched'",
        )
        .bind(id)
        .bind(phase_status_to_str(outcome.as_phase_status()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, new))]
    async fn create_step_execution(
        &self,
        new: NewStepExecution,
    ) -> Result<StepExecution, StoreError> {
        let id = Uuid::now_v7();
        let output_params = serde_json::to_value(&new.output_params)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let row = sqlx::query(
            r#"
            INSERT INTO step_executions (
                id, phase_execution_id, batch_member_id, step_name, step_index, runbook_version,
                worker_id, function_name, params_json, status, output_params, on_failure,
                is_poll_step, poll_interval_sec, poll_timeout_sec,
                max_retries, retry_interval_sec, retry_count
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,'pending',$10,$11,$12,$13,$14,$15,$16,0)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(new.phase_execution_id)
        .bind(new.batch_member_id)
        .bind(&new.step_name)
        .bind(new.step_index as i32)
        .bind(new.runbook_version)
        .bind(&new.worker_id)
        .bind(&new.function_name)
        .bind(&new.params_json)
        .bind(&output_params)
        .bind(&new.on_failure)
        .bind(new.poll.is_poll_step)
        .bind(new.poll.poll_interval_sec as i64)
        .bind(new.poll.poll_timeout_sec as i64)
        .bind(new.retry.max_retries as i32)
        .bind(new.retry.retry_interval_sec as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        row_to_step(&row)
    }

    #[instrument(skip(self))]
    async fn find_step_execution(
        &self,
        phase_execution_id: Uuid,
        batch_member_id: Uuid,
        step_index: u32,
    ) -> Result<Option<StepExecution>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM step_executions WHERE phase_execution_id = $1 AND batch_member_id = $2 AND step_index = $3",
        )
        .bind(phase_execution_id)
        .bind(batch_member_id)
        .bind(step_index as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        row.as_ref().map(row_to_step).transpose()
    }

    #[instrument(skip(self))]
    async fn list_step_executions_for_phase(
        &self,
        phase_execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, StoreError> {
        let rows = sqlx::query("SELECT * FROM step_executions WHERE phase_execution_id = $1")
            .bind(phase_execution_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        rows.iter().map(row_to_step).collect()
    }

    #[instrument(skip(self))]
    async fn list_step_executions_for_member(
        &self,
        batch_member_id: Uuid,
    ) -> Result<Vec<StepExecution>, StoreError> {
        let rows = sqlx::query("SELECT * FROM step_executions WHERE batch_member_id = $1")
            .bind(batch_member_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        rows.iter().map(row_to_step).collect()
    }

    #[instrument(skip(self))]
    async fn first_pending_step_for_member(
        &self,
        phase_execution_id: Uuid,
        batch_member_id: Uuid,
    ) -> Result<Option<StepExecution>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM step_executions
            WHERE phase_execution_id = $1 AND batch_member_id = $2 AND status = 'pending'
            ORDER BY step_index ASC LIMIT 1
            "#,
        )
        .bind(phase_execution_id)
        .bind(batch_member_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        row.as_ref().map(row_to_step).transpose()
    }

    #[instrument(skip(self, new))]
    async fn create_init_execution(
        &self,
        new: NewInitExecution,
    ) -> Result<InitExecution, StoreError> {
        let id = Uuid::now_v7();
        let output_params = serde_json::to_value(&new.output_params)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let row = sqlx::query(
            r#"
            INSERT INTO init_executions (
                id, batch_id, step_name, step_index, runbook_version,
                worker_id, function_name, params_json, status, output_params, on_failure,
                is_poll_step, poll_interval_sec, poll_timeout_sec,
                max_retries, retry_interval_sec, retry_count
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,'pending',$9,$10,$11,$12,$13,$14,$15,0)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(new.batch_id)
        .bind(&new.step_name)
        .bind(new.step_index as i32)
        .bind(new.runbook_version)
        .bind(&new.worker_id)
        .bind(&new.function_name)
        .bind(&new.params_json)
        .bind(&output_params)
        .bind(&new.on_failure)
        .bind(new.poll.is_poll_step)
        .bind(new.poll.poll_interval_sec as i64)
        .bind(new.poll.poll_timeout_sec as i64)
        .bind(new.retry.max_retries as i32)
        .bind(new.retry.retry_interval_sec as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        row_to_init(&row)
    }

    #[instrument(skip(self))]
    async fn find_init_execution(
        &self,
        batch_id: Uuid,
        runbook_version: i32,
        step_name: &str,
        step_index: u32,
    ) -> Result<Option<InitExecution>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM init_executions WHERE batch_id = $1 AND runbook_version = $2 AND step_name = $3 AND step_index = $4",
        )
        .bind(batch_id)
        .bind(runbook_version)
        .bind(step_name)
        .bind(step_index as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        row.as_ref().map(row_to_init).transpose()
    }

    #[instrument(skip(self))]
    async fn list_init_executions(&self, batch_id: Uuid) -> Result<Vec<InitExecution>, StoreError> {
        let rows = sqlx::query("SELECT * FROM init_executions WHERE batch_id = $1 ORDER BY step_index ASC")
            .bind(batch_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        rows.iter().map(row_to_init).collect()
    }

    #[instrument(skip(self))]
    async fn first_pending_init(&self, batch_id: Uuid) -> Result<Option<InitExecution>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM init_executions WHERE batch_id = $1 AND status = 'pending' ORDER BY step_index ASC LIMIT 1",
        )
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        row.as_ref().map(row_to_init).transpose()
    }

    #[instrument(skip(self))]
    async fn get_execution(&self, r: ExecutionRef) -> Result<ExecutionRecord, StoreError> {
        match r {
            ExecutionRef::Step(id) => {
                let row = sqlx::query("SELECT * FROM step_executions WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| StoreError::Database(e.to_string()))?
                    .ok_or(StoreError::ExecutionNotFound(id))?;
                Ok(ExecutionRecord::Step(row_to_step(&row)?))
            }
            ExecutionRef::Init(id) => {
                let row = sqlx::query("SELECT * FROM init_executions WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| StoreError::Database(e.to_string()))?
                    .ok_or(StoreError::ExecutionNotFound(id))?;
                Ok(ExecutionRecord::Init(row_to_init(&row)?))
            }
        }
    }

    #[instrument(skip(self))]
    async fn set_execution_dispatched(
        &self,
        r: ExecutionRef,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let table = table_for(r);
        sqlx::query(&format!(
            "UPDATE {table} SET status = 'dispatched', job_id = $2, dispatched_at = $3 WHERE id = $1"
        ))
        .bind(r.id())
        .bind(job_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self, result_json))]
    async fn set_execution_succeeded(
        &self,
        r: ExecutionRef,
        result_json: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let table = table_for(r);
        sqlx::query(&format!(
            "UPDATE {table} SET status = 'succeeded', result_json = $2, completed_at = $3 WHERE id = $1"
        ))
        .bind(r.id())
        .bind(&result_json)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_execution_polling(
        &self,
        r: ExecutionRef,
        poll_started_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let table = table_for(r);
        sqlx::query(&format!(
            r#"
            UPDATE {table}
            SET status = 'polling',
                poll_started_at = COALESCE(poll_started_at, $2),
                last_polled_at = $2
            WHERE id = $1
            "#
        ))
        .bind(r.id())
        .bind(poll_started_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_execution_poll(
        &self,
        r: ExecutionRef,
        last_polled_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let table = table_for(r);
        sqlx::query(&format!(
            "UPDATE {table} SET last_polled_at = $2, poll_count = poll_count + 1 WHERE id = $1"
        ))
        .bind(r.id())
        .bind(last_polled_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_execution_poll_timeout(&self, r: ExecutionRef) -> Result<(), StoreError> {
        let table = table_for(r);
        sqlx::query(&format!(
            "UPDATE {table} SET status = 'poll_timeout', completed_at = NOW() WHERE id = $1"
        ))
        .bind(r.id())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_execution_retry_pending(
        &self,
        r: ExecutionRef,
        retry_after: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let table = table_for(r);
        sqlx::query(&format!(
            r#"
            UPDATE {table}
            SET status = 'pending', retry_count = retry_count + 1, retry_after = $2,
                job_id = NULL, completed_at = NULL
            WHERE id = $1
            "#
        ))
        .bind(r.id())
        .bind(retry_after)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self, error_message))]
    async fn set_execution_failed(
        &self,
        r: ExecutionRef,
        error_message: &str,
    ) -> Result<(), StoreError> {
        let table = table_for(r);
        sqlx::query(&format!(
            "UPDATE {table} SET status = 'failed', error_message = $2, completed_at = NOW() WHERE id = $1"
        ))
        .bind(r.id())
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cancel_execution_if_nonterminal(&self, r: ExecutionRef) -> Result<bool, StoreError> {
        let table = table_for(r);
        let result = sqlx::query(&format!(
            r#"
            UPDATE {table} SET status = 'cancelled', completed_at = NOW()
            WHERE id = $1 AND status NOT IN ('succeeded', 'failed', 'cancelled', 'poll_timeout')
            "#
        ))
        .bind(r.id())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn cancel_all_nonterminal_for_member(
        &self,
        batch_member_id: Uuid,
    ) -> Result<Vec<ExecutionRef>, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE step_executions SET status = 'cancelled', completed_at = NOW()
            WHERE batch_member_id = $1 AND status IN ('pending', 'dispatched', 'polling')
            RETURNING id
            "#,
        )
        .bind(batch_member_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(rows.iter().map(|r| ExecutionRef::Step(r.get("id"))).collect())
    }

    #[instrument(skip(self))]
    async fn list_pollable_executions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExecutionRef>, StoreError> {
        let mut out = Vec::new();
        let step_rows = sqlx::query(
            r#"
            SELECT id FROM step_executions
            WHERE status = 'polling'
              AND (last_polled_at IS NULL OR last_polled_at + (poll_interval_sec || ' seconds')::interval <= $1)
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        out.extend(step_rows.iter().map(|r| ExecutionRef::Step(r.get("id"))));

        let init_rows = sqlx::query(
            r#"
            SELECT id FROM init_executions
            WHERE status = 'polling'
              AND (last_polled_at IS NULL OR last_polled_at + (poll_interval_sec || ' seconds')::interval <= $1)
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        out.extend(init_rows.iter().map(|r| ExecutionRef::Init(r.get("id"))));
        Ok(out)
    }

    #[instrument(skip(self))]
    async fn list_retryable_executions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExecutionRef>, StoreError> {
        let mut out = Vec::new();
        let step_rows = sqlx::query(
            "SELECT id FROM step_executions WHERE status = 'pending' AND retry_count > 0 AND retry_after <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        out.extend(step_rows.iter().map(|r| ExecutionRef::Step(r.get("id"))));

        let init_rows = sqlx::query(
            "SELECT id FROM init_executions WHERE status = 'pending' AND retry_count > 0 AND retry_after <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        out.extend(init_rows.iter().map(|r| ExecutionRef::Init(r.get("id"))));
        Ok(out)
    }
}

fn table_for(r: ExecutionRef) -> &'static str {
    match r {
        ExecutionRef::Step(_) => "step_executions",
        ExecutionRef::Init(_) => "init_executions",
    }
}
