//! Queue consumers: the event worker and the routing worker, plus the
//! poll-loop scaffolding shared by both. Each is a
//! `tokio::task` that claims a batch from its queue, runs jobs under a
//! concurrency-bounded `Semaphore`, and retries failures through the
//! broker's backoff policy — the same `tokio::spawn` + `Semaphore` shape
//! the teacher uses for its concurrent quote/order pipelines.

pub mod event_worker;
pub mod routing_worker;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use crate::persistence::{Job, JobBroker, RateLimiter, RetryPolicy, QUEUE_EVENTS};
use crate::services::Metrics;

pub use event_worker::{EventJob, EventWorker};
pub use routing_worker::{RoutingJob, RoutingWorker};

/// Runtime knobs for a single queue's poll loop.
#[derive(Debug, Clone, Copy)]
pub struct WorkerRuntimeConfig {
    pub concurrency: usize,
    pub rate_limit_max: u32,
    pub rate_limit_duration: Duration,
    pub job_timeout: Duration,
    pub poll_interval: Duration,
}

/// Anything that can process one claimed job. Implemented by
/// [`EventWorker`] and [`RoutingWorker`].
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> crate::error::Result<()>;
    fn queue_name(&self) -> &'static str;
}

/// Drive a handler's queue until `cancel` fires, then drain in-flight jobs
/// up to the shutdown grace period.
pub async fn run_poll_loop<H: JobHandler + 'static>(
    handler: Arc<H>,
    broker: JobBroker,
    worker_id: String,
    config: WorkerRuntimeConfig,
    retry_policy: RetryPolicy,
    metrics: Arc<Metrics>,
    mut cancel: watch::Receiver<bool>,
) {
    let queue = handler.queue_name();
    let permits = Arc::new(Semaphore::new(config.concurrency));
    let limiter = Arc::new(RateLimiter::new(config.rate_limit_max, config.rate_limit_duration));
    let mut in_flight = tokio::task::JoinSet::new();

    info!(queue, worker_id = %worker_id, concurrency = config.concurrency, "worker poll loop starting");

    loop {
        if *cancel.borrow() {
            break;
        }

        let available = permits.available_permits();
        if available == 0 {
            tokio::select! {
                _ = cancel.changed() => break,
                _ = tokio::time::sleep(config.poll_interval) => {}
            }
            continue;
        }

        let claimed = match broker.claim_batch(queue, &worker_id, available as i64).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(queue, error = %e, "failed to claim job batch");
                tokio::time::sleep(config.poll_interval).await;
                continue;
            }
        };

        if claimed.is_empty() {
            tokio::select! {
                _ = cancel.changed() => break,
                _ = tokio::time::sleep(config.poll_interval) => {}
            }
            continue;
        }

        for job in claimed {
            limiter.acquire().await;
            let permit = permits.clone().acquire_owned().await.expect("semaphore never closed");
            let handler = handler.clone();
            let broker = broker.clone();
            let policy = retry_policy;
            let timeout = config.job_timeout;
            let metrics = metrics.clone();

            in_flight.spawn(async move {
                let _permit = permit;
                let result = tokio::time::timeout(timeout, handler.handle(&job)).await;
                match result {
                    Ok(Ok(())) => {
                        if let Err(e) = broker.complete(job.id).await {
                            error!(job_id = %job.id, error = %e, "failed to mark job complete");
                        }
                    }
                    Ok(Err(e)) => {
                        warn!(job_id = %job.id, error = %e, "job handler failed");
                        record_retry_outcome(&broker, &job, &policy, &e.to_string(), &metrics).await;
                    }
                    Err(_) => {
                        warn!(job_id = %job.id, timeout_secs = timeout.as_secs(), "job timed out");
                        record_retry_outcome(&broker, &job, &policy, "job timed out", &metrics).await;
                    }
                }
            });
        }

        // Reap completed tasks without blocking the claim loop.
        while in_flight.try_join_next().is_some() {}
    }

    info!(queue, "worker poll loop stopping, draining in-flight jobs");
    while in_flight.join_next().await.is_some() {}
    info!(queue, "worker poll loop stopped");
}

/// Records a failed attempt against the broker and reflects the outcome in
/// `Metrics`: a retry bumps `jobs_retried`, exhaustion bumps
/// `jobs_dead_lettered` (and `events_failed` when the dead job came off the
/// events queue specifically).
async fn record_retry_outcome(broker: &JobBroker, job: &Job, policy: &RetryPolicy, error: &str, metrics: &Metrics) {
    match broker.fail_and_retry(job, policy, error).await {
        Ok(true) => {
            metrics.inc_jobs_dead_lettered();
            if job.queue == QUEUE_EVENTS {
                metrics.inc_events_failed();
            }
        }
        Ok(false) => metrics.inc_jobs_retried(),
        Err(e2) => error!(job_id = %job.id, error = %e2, "failed to record job failure"),
    }
}
