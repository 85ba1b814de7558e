//! SQLite simulation repository implementation.
//!
//! Implements `SimulationRepository` from `simcrm-core` using sqlx with the
//! split read/write pool. The atomic step claim is a guarded UPDATE; the
//! due-step query joins on job status so a stopped job's steps are excluded
//! at selection time, not after fetch. Timestamps are stored as
//! fixed-precision RFC 3339 strings so lexicographic comparison matches
//! chronological order.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

use simcrm_core::repository::SimulationRepository;
use simcrm_types::error::RepositoryError;
use simcrm_types::job::{Job, JobStatus, Step, StepStatus};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `SimulationRepository`.
pub struct SqliteSimulationRepository {
    pool: DatabasePool,
}

impl SqliteSimulationRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct JobRow {
    id: String,
    outcome: String,
    theme: String,
    industry: String,
    sequence: i64,
    template_id: Option<String>,
    owner_id: Option<String>,
    scaling_factor: f64,
    base_cycle_days: f64,
    started_at: String,
    status: String,
    metadata: String,
}

impl JobRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            outcome: row.try_get("outcome")?,
            theme: row.try_get("theme")?,
            industry: row.try_get("industry")?,
            sequence: row.try_get("sequence")?,
            template_id: row.try_get("template_id")?,
            owner_id: row.try_get("owner_id")?,
            scaling_factor: row.try_get("scaling_factor")?,
            base_cycle_days: row.try_get("base_cycle_days")?,
            started_at: row.try_get("started_at")?,
            status: row.try_get("status")?,
            metadata: row.try_get("metadata")?,
        })
    }

    fn into_job(self) -> Result<Job, RepositoryError> {
        let metadata: HashMap<String, Value> = serde_json::from_str(&self.metadata)
            .map_err(|e| RepositoryError::Query(format!("invalid job metadata JSON: {e}")))?;
        Ok(Job {
            id: parse_uuid(&self.id)?,
            outcome: self.outcome,
            theme: self.theme,
            industry: self.industry,
            sequence: self.sequence as u32,
            template_id: self.template_id,
            owner_id: self.owner_id,
            scaling_factor: self.scaling_factor,
            base_cycle_days: self.base_cycle_days,
            started_at: parse_datetime(&self.started_at)?,
            status: parse_status::<JobStatus>(&self.status)?,
            metadata,
        })
    }
}

struct StepRow {
    id: String,
    job_id: String,
    step_index: i64,
    template_day: f64,
    scaled_day: f64,
    scheduled_at: String,
    action_type: String,
    record_type: String,
    record_id_template: Option<String>,
    associations_template: Option<String>,
    action_template: Option<String>,
    reason_template: Option<String>,
    status: String,
    attempt: i64,
    result: Option<String>,
}

impl StepRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            step_index: row.try_get("step_index")?,
            template_day: row.try_get("template_day")?,
            scaled_day: row.try_get("scaled_day")?,
            scheduled_at: row.try_get("scheduled_at")?,
            action_type: row.try_get("action_type")?,
            record_type: row.try_get("record_type")?,
            record_id_template: row.try_get("record_id_template")?,
            associations_template: row.try_get("associations_template")?,
            action_template: row.try_get("action_template")?,
            reason_template: row.try_get("reason_template")?,
            status: row.try_get("status")?,
            attempt: row.try_get("attempt")?,
            result: row.try_get("result")?,
        })
    }

    fn into_step(self) -> Result<Step, RepositoryError> {
        Ok(Step {
            id: parse_uuid(&self.id)?,
            job_id: parse_uuid(&self.job_id)?,
            step_index: self.step_index as u32,
            template_day: self.template_day,
            scaled_day: self.scaled_day,
            scheduled_at: parse_datetime(&self.scheduled_at)?,
            action_type: self
                .action_type
                .parse()
                .map_err(RepositoryError::Query)?,
            record_type: self
                .record_type
                .parse()
                .map_err(RepositoryError::Query)?,
            record_id_template: self.record_id_template,
            associations_template: parse_json_opt(self.associations_template.as_deref())?,
            action_template: parse_json_opt(self.action_template.as_deref())?,
            reason_template: self.reason_template,
            status: parse_status::<StepStatus>(&self.status)?,
            attempt: self.attempt as u32,
            result: parse_json_opt(self.result.as_deref())?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-precision format so string comparison in SQL equals time order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_status<T: std::str::FromStr<Err = String>>(s: &str) -> Result<T, RepositoryError> {
    s.parse().map_err(RepositoryError::Query)
}

fn parse_json_opt(s: Option<&str>) -> Result<Option<Value>, RepositoryError> {
    s.map(|raw| {
        serde_json::from_str(raw)
            .map_err(|e| RepositoryError::Query(format!("invalid JSON column: {e}")))
    })
    .transpose()
}

fn json_opt_to_string(value: &Option<Value>) -> Option<String> {
    value.as_ref().map(|v| v.to_string())
}

fn map_sqlx(e: sqlx::Error) -> RepositoryError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => RepositoryError::Connection,
        other => RepositoryError::Query(other.to_string()),
    }
}

fn rows_to_steps(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<Step>, RepositoryError> {
    let mut steps = Vec::with_capacity(rows.len());
    for row in rows {
        steps.push(StepRow::from_row(row).map_err(map_sqlx)?.into_step()?);
    }
    Ok(steps)
}

const DUE_STEPS_SQL: &str = "\
    SELECT s.* FROM steps s \
    JOIN jobs j ON j.id = s.job_id \
    WHERE s.status = 'pending' \
      AND s.scheduled_at <= ?1 \
      AND j.status IN ('pending', 'processing') \
    ORDER BY s.scheduled_at ASC, s.step_index ASC \
    LIMIT ?2";

// ---------------------------------------------------------------------------
// Trait implementation
// ---------------------------------------------------------------------------

impl SimulationRepository for SqliteSimulationRepository {
    async fn create_job_with_steps(
        &self,
        job: &Job,
        steps: &[Step],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(map_sqlx)?;

        sqlx::query(
            "INSERT INTO jobs (id, outcome, theme, industry, sequence, template_id, owner_id, \
             scaling_factor, base_cycle_days, started_at, status, metadata) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id.to_string())
        .bind(&job.outcome)
        .bind(&job.theme)
        .bind(&job.industry)
        .bind(job.sequence as i64)
        .bind(&job.template_id)
        .bind(&job.owner_id)
        .bind(job.scaling_factor)
        .bind(job.base_cycle_days)
        .bind(format_datetime(&job.started_at))
        .bind(job.status.as_str())
        .bind(serde_json::to_string(&job.metadata).unwrap_or_else(|_| "{}".to_string()))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        for step in steps {
            sqlx::query(
                "INSERT INTO steps (id, job_id, step_index, template_day, scaled_day, \
                 scheduled_at, action_type, record_type, record_id_template, \
                 associations_template, action_template, reason_template, status, attempt, result) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(step.id.to_string())
            .bind(step.job_id.to_string())
            .bind(step.step_index as i64)
            .bind(step.template_day)
            .bind(step.scaled_day)
            .bind(format_datetime(&step.scheduled_at))
            .bind(step.action_type.as_str())
            .bind(step.record_type.as_str())
            .bind(&step.record_id_template)
            .bind(json_opt_to_string(&step.associations_template))
            .bind(json_opt_to_string(&step.action_template))
            .bind(&step.reason_template)
            .bind(step.status.as_str())
            .bind(step.attempt as i64)
            .bind(json_opt_to_string(&step.result))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn get_job(&self, id: &Uuid) -> Result<Option<Job>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;
        match row {
            Some(row) => {
                let job = JobRow::from_row(&row).map_err(map_sqlx)?.into_job()?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn update_job_status(
        &self,
        id: &Uuid,
        status: JobStatus,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE jobs SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn due_steps(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Step>, RepositoryError> {
        let rows = sqlx::query(DUE_STEPS_SQL)
            .bind(format_datetime(&now))
            .bind(limit as i64)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;
        rows_to_steps(&rows)
    }

    async fn claim_step(&self, step_id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE steps SET status = 'processing', attempt = attempt + 1 \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(step_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_step(&self, step_id: &Uuid, result: &Value) -> Result<(), RepositoryError> {
        let outcome = sqlx::query(
            "UPDATE steps SET status = 'completed', result = ? WHERE id = ? AND status = 'processing'",
        )
        .bind(result.to_string())
        .bind(step_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;
        if outcome.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "step {step_id} is not processing"
            )));
        }
        Ok(())
    }

    async fn fail_step(
        &self,
        step_id: &Uuid,
        status: StepStatus,
        result: &Value,
    ) -> Result<(), RepositoryError> {
        let outcome = sqlx::query(
            "UPDATE steps SET status = ?, result = ? WHERE id = ? AND status = 'processing'",
        )
        .bind(status.as_str())
        .bind(result.to_string())
        .bind(step_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;
        if outcome.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "step {step_id} is not processing"
            )));
        }
        Ok(())
    }

    async fn requeue_failed_step(
        &self,
        step_id: &Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE steps SET status = 'pending', scheduled_at = ? \
             WHERE id = ? AND status = 'failed'",
        )
        .bind(format_datetime(&scheduled_at))
        .bind(step_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_steps(&self, job_id: &Uuid) -> Result<Vec<Step>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM steps WHERE job_id = ? ORDER BY step_index ASC")
            .bind(job_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;
        rows_to_steps(&rows)
    }

    async fn list_steps_by_status(
        &self,
        job_id: &Uuid,
        status: StepStatus,
    ) -> Result<Vec<Step>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM steps WHERE job_id = ? AND status = ? ORDER BY step_index ASC",
        )
        .bind(job_id.to_string())
        .bind(status.as_str())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;
        rows_to_steps(&rows)
    }

    async fn bulk_transition_steps(
        &self,
        job_id: &Uuid,
        from: &[StepStatus],
        to: StepStatus,
    ) -> Result<u64, RepositoryError> {
        if from.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = format!(
            "UPDATE steps SET status = ? WHERE job_id = ? AND status IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(job_id.to_string());
        for status in from {
            query = query.bind(status.as_str());
        }
        let result = query.execute(&self.pool.writer).await.map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn has_unsettled_steps(&self, job_id: &Uuid) -> Result<bool, RepositoryError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM steps WHERE job_id = ? \
             AND status IN ('pending', 'processing', 'paused')) AS unsettled",
        )
        .bind(job_id.to_string())
        .fetch_one(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;
        let unsettled: i64 = row.try_get("unsettled").map_err(map_sqlx)?;
        Ok(unsettled != 0)
    }

    async fn put_context_entry(
        &self,
        job_id: &Uuid,
        symbol: &str,
        real_id: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO job_context (job_id, symbol, real_id, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(job_id, symbol) DO UPDATE SET \
             real_id = excluded.real_id, updated_at = excluded.updated_at",
        )
        .bind(job_id.to_string())
        .bind(symbol)
        .bind(real_id)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get_context(
        &self,
        job_id: &Uuid,
    ) -> Result<HashMap<String, String>, RepositoryError> {
        let rows = sqlx::query("SELECT symbol, real_id FROM job_context WHERE job_id = ?")
            .bind(job_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;
        let mut context = HashMap::new();
        for row in rows {
            let symbol: String = row.try_get("symbol").map_err(map_sqlx)?;
            let real_id: String = row.try_get("real_id").map_err(map_sqlx)?;
            context.insert(symbol, real_id);
        }
        Ok(context)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
