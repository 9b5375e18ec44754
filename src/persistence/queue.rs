//! Durable job broker.
//!
//! A "key-value store used only as a durable job broker" is implemented
//! here as a Postgres table (`jobs`) rather than a second storage
//! technology, following the teacher's single-datastore posture. It
//! supports delayed dispatch, per-job dedup, exponential backoff retry,
//! and a `FOR UPDATE SKIP LOCKED` poll/claim primitive so N workers can
//! drain the same queue without coordinating among themselves.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{LeadflowError, Result};

pub const QUEUE_EVENTS: &str = "events";
pub const QUEUE_ROUTING: &str = "routing";
pub const QUEUE_SYNC: &str = "sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// A claimed unit of work. `payload` is deserialized by the caller into
/// the queue-specific envelope type (`EventJob`, `RoutingJob`, ...).
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub queue: String,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub max_attempts: i32,
}

impl Job {
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(LeadflowError::Json)
    }
}

/// Retry policy shared by every queue: `{attempts, backoff.base, backoff.cap}`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
}

impl RetryPolicy {
    /// Exponential backoff, doubling per attempt and capped — the same
    /// shape as the teacher's `DLQProcessorConfig::backoff_duration`.
    pub fn backoff_for_attempt(&self, attempt: i32) -> Duration {
        let exp = attempt.max(0) as u32;
        let delay = self
            .backoff_base_secs
            .saturating_mul(2u64.saturating_pow(exp));
        Duration::from_secs(delay.min(self.backoff_cap_secs))
    }
}

impl From<&crate::config::RetryConfig> for RetryPolicy {
    fn from(c: &crate::config::RetryConfig) -> Self {
        Self {
            max_attempts: c.max_attempts,
            backoff_base_secs: c.backoff_base_secs,
            backoff_cap_secs: c.backoff_cap_secs,
        }
    }
}

/// Durable broker backed by the `jobs` table.
#[derive(Clone)]
pub struct JobBroker {
    pool: PgPool,
}

impl JobBroker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue a job for immediate dispatch. A job with the same
    /// `(queue, dedup_key)` already `queued` or `running` is a no-op —
    /// this is how the event worker's per-lead routing dedup
    /// (`routing-{lead_id}-{ms}`) and the ingest endpoint's idempotent
    /// re-enqueue guard are implemented.
    pub async fn enqueue<T: Serialize>(
        &self,
        queue: &str,
        payload: &T,
        dedup_key: Option<&str>,
    ) -> Result<Uuid> {
        self.enqueue_delayed(queue, payload, dedup_key, ChronoDuration::zero())
            .await
    }

    pub async fn enqueue_delayed<T: Serialize>(
        &self,
        queue: &str,
        payload: &T,
        dedup_key: Option<&str>,
        delay: ChronoDuration,
    ) -> Result<Uuid> {
        let payload = serde_json::to_value(payload)?;
        let run_at = Utc::now() + delay;

        let row = sqlx::query(
            r#"
            INSERT INTO jobs (queue, dedup_key, payload, run_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (queue, dedup_key) WHERE dedup_key IS NOT NULL AND status IN ('queued', 'running')
            DO NOTHING
            RETURNING id
            "#,
        )
        .bind(queue)
        .bind(dedup_key)
        .bind(&payload)
        .bind(run_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => {
                let id: Uuid = r.get("id");
                debug!(queue, job_id = %id, "enqueued job");
                Ok(id)
            }
            None => {
                // Dedup hit: an identical pending job already exists. Return its id.
                let existing = sqlx::query(
                    "SELECT id FROM jobs WHERE queue = $1 AND dedup_key = $2 AND status IN ('queued', 'running') ORDER BY created_at DESC LIMIT 1",
                )
                .bind(queue)
                .bind(dedup_key)
                .fetch_one(&self.pool)
                .await?;
                Ok(existing.get("id"))
            }
        }
    }

    /// Claim up to `batch_size` queued, due jobs for this queue using
    /// `SELECT ... FOR UPDATE SKIP LOCKED`, so concurrently-polling
    /// workers (this process or others) never double-claim a row.
    /// Delivery is at-least-once; the queue broker is the only
    /// coordination mechanism between processes.
    pub async fn claim_batch(&self, queue: &str, worker_id: &str, batch_size: i64) -> Result<Vec<Job>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, queue, payload, attempts, max_attempts
            FROM jobs
            WHERE queue = $1 AND status = 'queued' AND run_at <= now()
            ORDER BY run_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT $2
            "#,
        )
        .bind(queue)
        .bind(batch_size)
        .fetch_all(&mut *tx)
        .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: Uuid = row.get("id");
            sqlx::query(
                r#"
                UPDATE jobs SET status = 'running', locked_at = now(), locked_by = $2, updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(worker_id)
            .execute(&mut *tx)
            .await?;

            claimed.push(Job {
                id,
                queue: row.get("queue"),
                payload: row.get("payload"),
                attempts: row.get("attempts"),
                max_attempts: row.get("max_attempts"),
            });
        }

        tx.commit().await?;
        Ok(claimed)
    }

    /// Mark a job permanently done. Idempotent: a replayed completion of
    /// an already-done job is a silent no-op.
    pub async fn complete(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = 'done', updated_at = now() WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a failed attempt. Re-queues with exponential backoff (base
    /// 1s, cap 5m, max 5 attempts by default) until `max_attempts` is
    /// exhausted, then marks the job terminally failed. Returns `true`
    /// when this attempt was the terminal one (dead-lettered).
    pub async fn fail_and_retry(&self, job: &Job, policy: &RetryPolicy, error: &str) -> Result<bool> {
        let next_attempt = job.attempts + 1;
        if next_attempt >= job.max_attempts.max(policy.max_attempts) {
            warn!(job_id = %job.id, queue = %job.queue, error, "job exhausted retries, marking failed");
            sqlx::query(
                "UPDATE jobs SET status = 'failed', attempts = $2, last_error = $3, updated_at = now() WHERE id = $1",
            )
            .bind(job.id)
            .bind(next_attempt)
            .bind(error)
            .execute(&self.pool)
            .await?;
            return Ok(true);
        }

        let backoff = policy.backoff_for_attempt(next_attempt);
        let run_at: DateTime<Utc> = Utc::now() + ChronoDuration::from_std(backoff).unwrap_or_default();

        info!(job_id = %job.id, queue = %job.queue, attempt = next_attempt, backoff_secs = backoff.as_secs(), "retrying job");
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'queued', attempts = $2, run_at = $3, last_error = $4,
                locked_at = NULL, locked_by = NULL, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(next_attempt)
        .bind(run_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(false)
    }

    /// Re-queue a job claimed longer than `timeout` ago without
    /// completing — the recovery path for a worker that crashed or timed
    /// out mid-job.
    pub async fn reclaim_stale(&self, queue: &str, timeout: Duration) -> Result<u64> {
        let cutoff = Utc::now() - ChronoDuration::from_std(timeout).unwrap_or_default();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'queued', locked_at = NULL, locked_by = NULL, updated_at = now()
            WHERE queue = $1 AND status = 'running' AND locked_at < $2
            "#,
        )
        .bind(queue)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Number of jobs still waiting to be claimed on `queue`, surfaced on
    /// the health/metrics endpoints as a backlog gauge.
    pub async fn queue_depth(&self, queue: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs WHERE queue = $1 AND status = 'queued'")
            .bind(queue)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    #[allow(dead_code)]
    fn status_label(s: JobStatus) -> &'static str {
        s.as_str()
    }
}

/// Token-bucket rate limiter shared across the concurrent pollers of a
/// single worker: `{max, duration}`. Grounded on the teacher's
/// `platform/queue.rs` bookkeeping style, adapted to a simple
/// async-friendly counter since the broker itself (not an in-memory
/// heap) owns ordering here.
pub struct RateLimiter {
    max: u32,
    duration: Duration,
    tokens: tokio::sync::Mutex<(u32, std::time::Instant)>,
}

impl RateLimiter {
    pub fn new(max: u32, duration: Duration) -> Self {
        Self {
            max,
            duration,
            tokens: tokio::sync::Mutex::new((max, std::time::Instant::now())),
        }
    }

    /// Block until a token is available, refilling the bucket once per
    /// `duration` window.
    pub async fn acquire(&self) {
        loop {
            {
                let mut guard = self.tokens.lock().await;
                let (count, since) = *guard;
                if since.elapsed() >= self.duration {
                    *guard = (self.max, std::time::Instant::now());
                } else if count > 0 {
                    guard.0 -= 1;
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff_base_secs: 1,
            backoff_cap_secs: 300,
        };
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.backoff_for_attempt(10), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn rate_limiter_drains_and_refills() {
        let limiter = RateLimiter::new(2, Duration::from_millis(50));
        let start = std::time::Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        // third acquire must wait for refill
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
