//! PostgreSQL implementation of JobQueue
//!
//! Claiming relies on `FOR UPDATE SKIP LOCKED`: concurrent dispatchers each lock a
//! disjoint set of `CREATED` rows without blocking on one another.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::job::{ClaimedJob, Job, JobState, NewJob};

/// PostgreSQL implementation of JobQueue
///
/// # Example
///
/// ```ignore
/// use jobdispatch::PostgresJobQueue;
///
/// let queue = PostgresJobQueue::connect_lazy("postgres://localhost/jobs", 5)?;
/// ```
#[derive(Clone)]
pub struct PostgresJobQueue {
    pool: PgPool,
}

impl PostgresJobQueue {
    /// Create a queue over an existing connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a queue whose connections are opened on first use
    ///
    /// An unreachable database therefore surfaces as a per-tick
    /// [`StoreError::Database`] instead of a startup failure.
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(database_url)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    #[instrument(skip(self))]
    async fn claim_jobs(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClaimedJob>, StoreError> {
        if limit == 0 {
            return Ok(vec![]);
        }

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // Rows already locked by another dispatcher's open claim are skipped, not
        // waited on. The locks are held until commit.
        let rows = sqlx::query(
            r#"
            SELECT id, type, input_data, created
            FROM jobs
            WHERE state = 'CREATED'
            ORDER BY created ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to select claimable jobs: {}", e);
            db_error(e)
        })?;

        if rows.is_empty() {
            tx.commit().await.map_err(db_error)?;
            return Ok(vec![]);
        }

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            claimed.push(ClaimedJob {
                id: row.try_get("id").map_err(corrupt)?,
                job_type: row.try_get("type").map_err(corrupt)?,
                input_data: row
                    .try_get::<Option<String>, _>("input_data")
                    .map_err(corrupt)?
                    .unwrap_or_default(),
                created: row.try_get("created").map_err(corrupt)?,
                started: now,
            });
        }

        let ids: Vec<Uuid> = claimed.iter().map(|j| j.id).collect();
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'RUNNING',
                started = $2,
                last_modified = $2
            WHERE id = ANY($1)
            "#,
        )
        .bind(&ids)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to mark claimed jobs as running: {}", e);
            db_error(e)
        })?;

        tx.commit().await.map_err(db_error)?;

        debug!(count = claimed.len(), "claimed jobs");
        Ok(claimed)
    }

    #[instrument(skip(self))]
    async fn finish_job(
        &self,
        job_id: Uuid,
        state: JobState,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if !state.is_terminal() {
            return Err(StoreError::NotTerminal(state));
        }

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = $2,
                finished = $3,
                last_modified = $3
            WHERE id = $1 AND state = 'RUNNING'
            "#,
        )
        .bind(job_id)
        .bind(state.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to persist terminal job state: {}", e);
            db_error(e)
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotRunning(job_id));
        }

        debug!(%job_id, %state, "finished job");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn pending_kill_requests(&self) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query("SELECT job_id FROM job_kill_requests")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to read kill requests: {}", e);
                db_error(e)
            })?;

        rows.iter()
            .map(|row| row.try_get("job_id").map_err(corrupt))
            .collect()
    }

    #[instrument(skip(self))]
    async fn delete_kill_request(&self, job_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM job_kill_requests WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to delete kill request: {}", e);
                db_error(e)
            })?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, job), fields(job_type = %job.job_type))]
    async fn submit_job(&self, job: NewJob) -> Result<Uuid, StoreError> {
        let job_id = Uuid::now_v7();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO jobs (id, type, input_data, state, created, last_modified)
            VALUES ($1, $2, $3, 'CREATED', $4, $4)
            "#,
        )
        .bind(job_id)
        .bind(&job.job_type)
        .bind(&job.input_data)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to submit job: {}", e);
            db_error(e)
        })?;

        debug!(%job_id, "submitted job");
        Ok(job_id)
    }

    #[instrument(skip(self))]
    async fn request_kill(&self, job_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO job_kill_requests (job_id) VALUES ($1)")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to request kill: {}", e);
                db_error(e)
            })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_job(&self, job_id: Uuid) -> Result<Job, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, type, input_data, state, created, started, finished, last_modified
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or(StoreError::JobNotFound(job_id))?;

        job_from_row(&row)
    }
}

// Helper functions

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let state: String = row.try_get("state").map_err(corrupt)?;
    Ok(Job {
        id: row.try_get("id").map_err(corrupt)?,
        job_type: row.try_get("type").map_err(corrupt)?,
        input_data: row
            .try_get::<Option<String>, _>("input_data")
            .map_err(corrupt)?
            .unwrap_or_default(),
        state: state
            .parse()
            .map_err(|e: crate::job::UnknownJobState| StoreError::Corrupt(e.to_string()))?,
        created: row.try_get("created").map_err(corrupt)?,
        started: row.try_get("started").map_err(corrupt)?,
        finished: row.try_get("finished").map_err(corrupt)?,
        last_modified: row.try_get("last_modified").map_err(corrupt)?,
    })
}

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn corrupt(e: sqlx::Error) -> StoreError {
    StoreError::Corrupt(e.to_string())
}
