//! SQLite Job Store
//!
//! 任务状态的唯一事实来源。状态迁移在事务内做 read-modify-write：
//! 先读当前状态，按领域状态机校验，再写回。重复上报同一状态是安全的。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::DbPool;
use crate::application::ports::{JobStoreError, JobStorePort};
use crate::domain::book::{
    Architecture, BookParams, ChunkResult, GenerationJob, JobFailure, JobId, JobStatus,
    UsageMetrics,
};

/// SQLite Job Store
pub struct SqliteJobStore {
    pool: DbPool,
}

impl SqliteJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct JobRow {
    id: String,
    user_id: String,
    status: String,
    params: String,
    retry_count: i64,
    error: Option<String>,
    page_shortfall: Option<f64>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, JobStoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| JobStoreError::SerializationError(e.to_string()))
}

impl TryFrom<JobRow> for GenerationJob {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| JobStoreError::SerializationError(e.to_string()))?;
        let status = JobStatus::from_str(&row.status).ok_or_else(|| {
            JobStoreError::SerializationError(format!("unknown status: {}", row.status))
        })?;
        let params: BookParams = serde_json::from_str(&row.params)
            .map_err(|e| JobStoreError::SerializationError(e.to_string()))?;
        let error: Option<JobFailure> = row
            .error
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| JobStoreError::SerializationError(e.to_string()))?;

        Ok(GenerationJob::restore(
            JobId::from_uuid(id),
            row.user_id,
            status,
            params,
            row.retry_count as u32,
            error,
            row.page_shortfall,
            parse_timestamp(&row.created_at)?,
            row.started_at.as_deref().map(parse_timestamp).transpose()?,
            row.completed_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
        ))
    }
}

#[derive(FromRow)]
struct ChunkRow {
    chunk_index: i64,
    content: String,
    reasoning: Option<String>,
    measured_pages: f64,
    measured_words: i64,
    duplicate_headers: String,
    expansion_attempts: i64,
    created_at: String,
}

impl TryFrom<ChunkRow> for ChunkResult {
    type Error = JobStoreError;

    fn try_from(row: ChunkRow) -> Result<Self, Self::Error> {
        Ok(ChunkResult {
            chunk_index: row.chunk_index as usize,
            content: row.content,
            reasoning: row.reasoning,
            measured_pages: row.measured_pages,
            measured_words: row.measured_words as u64,
            duplicate_headers: serde_json::from_str(&row.duplicate_headers)
                .map_err(|e| JobStoreError::SerializationError(e.to_string()))?,
            expansion_attempts: row.expansion_attempts as u32,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

#[async_trait]
impl JobStorePort for SqliteJobStore {
    async fn create(&self, job: &GenerationJob) -> Result<(), JobStoreError> {
        let params = serde_json::to_string(job.params())
            .map_err(|e| JobStoreError::SerializationError(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO generation_jobs
                (id, user_id, status, params, retry_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id().to_string())
        .bind(job.user_id())
        .bind(job.status().as_str())
        .bind(params)
        .bind(job.retry_count() as i64)
        .bind(job.created_at().to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(JobStoreError::Duplicate(*job.id().as_uuid()))
            }
            Err(e) => Err(JobStoreError::DatabaseError(e.to_string())),
        }
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<GenerationJob>, JobStoreError> {
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, status, params, retry_count, error, page_shortfall,
                   created_at, started_at, completed_at
            FROM generation_jobs WHERE id = ?
            "#,
        )
        .bind(job_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| JobStoreError::DatabaseError(e.to_string()))?;

        row.map(GenerationJob::try_from).transpose()
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<GenerationJob>, JobStoreError> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, status, params, retry_count, error, page_shortfall,
                   created_at, started_at, completed_at
            FROM generation_jobs WHERE user_id = ? ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| JobStoreError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(GenerationJob::try_from).collect()
    }

    async fn update_status(&self, job_id: Uuid, status: JobStatus) -> Result<bool, JobStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| JobStoreError::DatabaseError(e.to_string()))?;

        let current: Option<(String,)> =
            sqlx::query_as("SELECT status FROM generation_jobs WHERE id = ?")
                .bind(job_id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| JobStoreError::DatabaseError(e.to_string()))?;

        let current = current
            .ok_or(JobStoreError::NotFound(job_id))
            .and_then(|(s,)| {
                JobStatus::from_str(&s).ok_or_else(|| {
                    JobStoreError::SerializationError(format!("unknown status: {}", s))
                })
            })?;

        // 幂等：重复写同一状态视为成功但未发生迁移
        if current == status {
            return Ok(false);
        }
        if !current.can_transition_to(status) {
            return Err(JobStoreError::InvalidTransition {
                job_id,
                from: current.as_str(),
                to: status.as_str(),
            });
        }

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE generation_jobs SET
                status = ?,
                started_at = CASE WHEN ? = 'architecture' AND started_at IS NULL
                                  THEN ? ELSE started_at END,
                completed_at = CASE WHEN ? IN ('completed', 'failed', 'cancelled')
                                    THEN ? ELSE completed_at END
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(status.as_str())
        .bind(&now)
        .bind(status.as_str())
        .bind(&now)
        .bind(job_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| JobStoreError::DatabaseError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| JobStoreError::DatabaseError(e.to_string()))?;

        tracing::debug!(
            job_id = %job_id,
            from = current.as_str(),
            to = status.as_str(),
            "Job status transitioned"
        );
        Ok(true)
    }

    async fn record_failure(
        &self,
        job_id: Uuid,
        failure: &JobFailure,
    ) -> Result<bool, JobStoreError> {
        let applied = self.update_status(job_id, JobStatus::Failed).await?;
        if applied {
            let payload = serde_json::to_string(failure)
                .map_err(|e| JobStoreError::SerializationError(e.to_string()))?;
            sqlx::query("UPDATE generation_jobs SET error = ? WHERE id = ?")
                .bind(payload)
                .bind(job_id.to_string())
                .execute(&self.pool)
                .await
                .map_err(|e| JobStoreError::DatabaseError(e.to_string()))?;
        }
        Ok(applied)
    }

    async fn record_shortfall(
        &self,
        job_id: Uuid,
        shortfall_pages: f64,
    ) -> Result<(), JobStoreError> {
        let result = sqlx::query("UPDATE generation_jobs SET page_shortfall = ? WHERE id = ?")
            .bind(shortfall_pages)
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| JobStoreError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(job_id));
        }
        Ok(())
    }

    async fn add_retries(&self, job_id: Uuid, count: u32) -> Result<(), JobStoreError> {
        if count == 0 {
            return Ok(());
        }
        let result =
            sqlx::query("UPDATE generation_jobs SET retry_count = retry_count + ? WHERE id = ?")
                .bind(count as i64)
                .bind(job_id.to_string())
                .execute(&self.pool)
                .await
                .map_err(|e| JobStoreError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(job_id));
        }
        Ok(())
    }

    async fn append_usage(&self, job_id: Uuid, usage: &UsageMetrics) -> Result<(), JobStoreError> {
        // 只做加法，永不覆盖
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs SET
                prompt_tokens = prompt_tokens + ?,
                completion_tokens = completion_tokens + ?,
                reasoning_tokens = reasoning_tokens + ?,
                estimated_cost = estimated_cost + ?
            WHERE id = ?
            "#,
        )
        .bind(usage.prompt_tokens as i64)
        .bind(usage.completion_tokens as i64)
        .bind(usage.reasoning_tokens as i64)
        .bind(usage.estimated_cost)
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| JobStoreError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(job_id));
        }
        Ok(())
    }

    async fn get_usage(&self, job_id: Uuid) -> Result<UsageMetrics, JobStoreError> {
        let row: Option<(i64, i64, i64, f64)> = sqlx::query_as(
            r#"
            SELECT prompt_tokens, completion_tokens, reasoning_tokens, estimated_cost
            FROM generation_jobs WHERE id = ?
            "#,
        )
        .bind(job_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| JobStoreError::DatabaseError(e.to_string()))?;

        let (prompt, completion, reasoning, cost) =
            row.ok_or(JobStoreError::NotFound(job_id))?;
        Ok(UsageMetrics {
            prompt_tokens: prompt as u64,
            completion_tokens: completion as u64,
            reasoning_tokens: reasoning as u64,
            estimated_cost: cost,
        })
    }

    async fn save_architecture(
        &self,
        job_id: Uuid,
        architecture: &Architecture,
    ) -> Result<(), JobStoreError> {
        let payload = serde_json::to_string(architecture)
            .map_err(|e| JobStoreError::SerializationError(e.to_string()))?;

        sqlx::query(
            "INSERT INTO architectures (id, job_id, payload, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(architecture.id.to_string())
        .bind(job_id.to_string())
        .bind(payload)
        .bind(architecture.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| JobStoreError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn latest_architecture(
        &self,
        job_id: Uuid,
    ) -> Result<Option<Architecture>, JobStoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT payload FROM architectures
            WHERE job_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1
            "#,
        )
        .bind(job_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| JobStoreError::DatabaseError(e.to_string()))?;

        row.map(|(payload,)| {
            serde_json::from_str(&payload)
                .map_err(|e| JobStoreError::SerializationError(e.to_string()))
        })
        .transpose()
    }

    async fn save_chunk(&self, job_id: Uuid, chunk: &ChunkResult) -> Result<(), JobStoreError> {
        let duplicate_headers = serde_json::to_string(&chunk.duplicate_headers)
            .map_err(|e| JobStoreError::SerializationError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO chunk_results
                (job_id, chunk_index, content, reasoning, measured_pages, measured_words,
                 duplicate_headers, expansion_attempts, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id, chunk_index) DO UPDATE SET
                content = excluded.content,
                reasoning = excluded.reasoning,
                measured_pages = excluded.measured_pages,
                measured_words = excluded.measured_words,
                duplicate_headers = excluded.duplicate_headers,
                expansion_attempts = excluded.expansion_attempts
            "#,
        )
        .bind(job_id.to_string())
        .bind(chunk.chunk_index as i64)
        .bind(&chunk.content)
        .bind(&chunk.reasoning)
        .bind(chunk.measured_pages)
        .bind(chunk.measured_words as i64)
        .bind(duplicate_headers)
        .bind(chunk.expansion_attempts as i64)
        .bind(chunk.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| JobStoreError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn chunks_for_job(&self, job_id: Uuid) -> Result<Vec<ChunkResult>, JobStoreError> {
        let rows: Vec<ChunkRow> = sqlx::query_as(
            r#"
            SELECT chunk_index, content, reasoning, measured_pages, measured_words,
                   duplicate_headers, expansion_attempts, created_at
            FROM chunk_results WHERE job_id = ? ORDER BY chunk_index ASC
            "#,
        )
        .bind(job_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| JobStoreError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(ChunkResult::try_from).collect()
    }
}
