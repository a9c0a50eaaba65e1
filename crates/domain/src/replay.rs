//! Reconciliation of ingests whose remote leg failed.
//!
//! Replays re-send the exact ping (same timestamp), which the history service
//! deduplicates on (username, timestamp), so running a job twice is harmless.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::jobs::{backoff_ms, new_replay_job, now_ms};
use crate::locations::LocationPing;
use crate::ports::history::{HistoryClient, RemoteCallError};
use crate::ports::jobs::{JobEnvelope, JobQueue, JobQueueError, JobType};

#[derive(Clone, Debug)]
pub struct ReplayConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub remote_timeout: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff_base_ms: 1_000,
            backoff_max_ms: 300_000,
            remote_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DrainSettings {
    pub poll_interval: Duration,
    pub promote_batch: usize,
    pub dequeue_timeout: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReplayResult {
    Replayed { job_id: String },
    Rescheduled { job_id: String, attempt: u32, run_at_ms: i64 },
    DeadLettered { job_id: String, error: String },
}

impl ReplayResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplayResult::Replayed { .. } => "replayed",
            ReplayResult::Rescheduled { .. } => "rescheduled",
            ReplayResult::DeadLettered { .. } => "dead_lettered",
        }
    }
}

#[derive(Clone)]
pub struct ReplayService {
    queue: Arc<dyn JobQueue>,
    history: Arc<dyn HistoryClient>,
    config: ReplayConfig,
}

impl ReplayService {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        history: Arc<dyn HistoryClient>,
        config: ReplayConfig,
    ) -> Self {
        Self {
            queue,
            history,
            config,
        }
    }

    pub async fn schedule(
        &self,
        ping: &LocationPing,
        request_id: String,
        correlation_id: String,
    ) -> Result<String, JobQueueError> {
        let job = new_replay_job(ping, request_id, correlation_id, self.config.max_attempts)?;
        self.queue.enqueue(&job).await?;
        Ok(job.job_id)
    }

    /// Drains the queue until `shutdown` resolves. Sleeps `poll_interval`
    /// whenever the queue is empty or unreachable.
    pub async fn run_until<F>(
        &self,
        settings: DrainSettings,
        shutdown: F,
        mut on_result: impl FnMut(&ReplayResult),
    ) where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let idle = tokio::select! {
                _ = &mut shutdown => return,
                outcome = self.run_once(settings.promote_batch, settings.dequeue_timeout) => {
                    match outcome {
                        Ok(Some(result)) => {
                            on_result(&result);
                            false
                        }
                        Ok(None) => true,
                        Err(err) => {
                            tracing::warn!(error = %err, "replay queue unavailable");
                            true
                        }
                    }
                }
            };
            if idle {
                tokio::select! {
                    _ = &mut shutdown => return,
                    _ = tokio::time::sleep(settings.poll_interval) => {}
                }
            }
        }
    }

    /// Promotes due jobs, then handles at most one. `Ok(None)` means nothing was ready.
    pub async fn run_once(
        &self,
        promote_batch: usize,
        dequeue_timeout: Duration,
    ) -> Result<Option<ReplayResult>, JobQueueError> {
        self.queue.promote_due(now_ms(), promote_batch).await?;
        let Some(job) = self.queue.dequeue(dequeue_timeout).await? else {
            return Ok(None);
        };
        self.handle(job).await.map(Some)
    }

    async fn handle(&self, job: JobEnvelope) -> Result<ReplayResult, JobQueueError> {
        if job.job_type != JobType::HistoryReplay {
            return self.dead_letter(job, "unsupported job type".to_string()).await;
        }
        let ping: LocationPing = match serde_json::from_value(job.payload.clone()) {
            Ok(ping) => ping,
            Err(err) => {
                return self
                    .dead_letter(job, format!("undecodable payload: {err}"))
                    .await;
            }
        };

        match self.forward(&ping).await {
            Ok(()) => {
                self.queue.ack(&job.job_id).await?;
                tracing::info!(
                    job_id = %job.job_id,
                    username = %ping.username,
                    attempt = job.attempt,
                    "history replay succeeded"
                );
                Ok(ReplayResult::Replayed { job_id: job.job_id })
            }
            // A 4xx (other than 409) will not get better with time.
            Err(err @ RemoteCallError::Rejected { status, .. }) if status != 409 => {
                self.dead_letter(job, err.to_string()).await
            }
            Err(err @ RemoteCallError::InvalidRequest(_)) => {
                self.dead_letter(job, err.to_string()).await
            }
            Err(err) if job.is_exhausted() => self.dead_letter(job, err.to_string()).await,
            Err(err) => {
                let delay = backoff_ms(
                    self.config.backoff_base_ms,
                    job.attempt,
                    self.config.backoff_max_ms,
                );
                let attempt = job.next_attempt();
                let run_at_ms = now_ms() + delay as i64;
                let next = JobEnvelope {
                    attempt,
                    ..job
                }
                .with_run_at(run_at_ms);
                self.queue.retry(&next).await?;
                tracing::warn!(
                    job_id = %next.job_id,
                    attempt,
                    delay_ms = delay,
                    error = %err,
                    "history replay failed; rescheduled"
                );
                Ok(ReplayResult::Rescheduled {
                    job_id: next.job_id,
                    attempt,
                    run_at_ms,
                })
            }
        }
    }

    async fn forward(&self, ping: &LocationPing) -> Result<(), RemoteCallError> {
        let limit = self.config.remote_timeout;
        match timeout(limit, self.history.forward_ping(ping)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteCallError::Timeout(limit.as_millis() as u64)),
        }
    }

    async fn dead_letter(
        &self,
        job: JobEnvelope,
        error: String,
    ) -> Result<ReplayResult, JobQueueError> {
        self.queue.ack(&job.job_id).await?;
        tracing::error!(
            job_id = %job.job_id,
            request_id = %job.request_id,
            correlation_id = %job.correlation_id,
            attempt = job.attempt,
            error = %error,
            "history replay abandoned; ping is missing from history"
        );
        Ok(ReplayResult::DeadLettered {
            job_id: job.job_id,
            error,
        })
    }
}
