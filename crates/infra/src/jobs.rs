use std::time::Duration;

use geotrail_domain::jobs::now_ms;
use geotrail_domain::ports::BoxFuture;
use geotrail_domain::ports::jobs::{JobEnvelope, JobQueue, JobQueueError};
use redis::Value;
use redis::aio::ConnectionManager;

const DEFAULT_PREFIX: &str = "geotrail:replay";

/// Redis layout: a ready list, a processing list, a delayed sorted set scored
/// by `run_at_ms` and a hash of payloads keyed by job id.
#[derive(Clone)]
pub struct RedisJobQueue {
    manager: ConnectionManager,
    ready_key: String,
    delayed_key: String,
    processing_key: String,
    payload_key: String,
}

#[derive(Debug, Clone)]
pub struct JobQueueSnapshot {
    pub ready: u64,
    pub delayed: u64,
    pub processing: u64,
}

impl RedisJobQueue {
    pub async fn connect(redis_url: &str) -> Result<Self, JobQueueError> {
        Self::connect_with_prefix(redis_url, DEFAULT_PREFIX).await
    }

    pub async fn connect_with_prefix(
        redis_url: &str,
        prefix: impl Into<String>,
    ) -> Result<Self, JobQueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| JobQueueError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| JobQueueError::Unavailable(err.to_string()))?;
        let prefix = prefix.into();
        Ok(Self {
            manager,
            ready_key: format!("{prefix}:ready"),
            delayed_key: format!("{prefix}:delayed"),
            processing_key: format!("{prefix}:processing"),
            payload_key: format!("{prefix}:payloads"),
        })
    }

    fn serialize(job: &JobEnvelope) -> Result<String, JobQueueError> {
        serde_json::to_string(job).map_err(|err| JobQueueError::Serialization(err.to_string()))
    }

    fn deserialize(payload: &str) -> Result<JobEnvelope, JobQueueError> {
        serde_json::from_str(payload).map_err(|err| JobQueueError::Serialization(err.to_string()))
    }

    /// Writes the payload and places the id in exactly one of ready/delayed.
    /// Any earlier placement of the same id is removed first.
    fn schedule_pipeline(&self, job: &JobEnvelope, payload: String) -> redis::Pipeline {
        let mut pipeline = redis::pipe();
        pipeline.atomic();
        pipeline
            .cmd("HSET")
            .arg(&self.payload_key)
            .arg(&job.job_id)
            .arg(payload);
        pipeline
            .cmd("LREM")
            .arg(&self.processing_key)
            .arg(0)
            .arg(&job.job_id);
        pipeline
            .cmd("LREM")
            .arg(&self.ready_key)
            .arg(0)
            .arg(&job.job_id);
        pipeline.cmd("ZREM").arg(&self.delayed_key).arg(&job.job_id);
        if job.run_at_ms <= now_ms() {
            pipeline.cmd("RPUSH").arg(&self.ready_key).arg(&job.job_id);
        } else {
            pipeline
                .cmd("ZADD")
                .arg(&self.delayed_key)
                .arg(job.run_at_ms)
                .arg(&job.job_id);
        }
        pipeline
    }

    pub async fn snapshot(&self) -> Result<JobQueueSnapshot, JobQueueError> {
        let mut conn = self.manager.clone();
        let (ready, delayed, processing): (u64, u64, u64) = redis::pipe()
            .cmd("LLEN")
            .arg(&self.ready_key)
            .cmd("ZCARD")
            .arg(&self.delayed_key)
            .cmd("LLEN")
            .arg(&self.processing_key)
            .query_async(&mut conn)
            .await
            .map_err(|err| JobQueueError::Operation(err.to_string()))?;
        Ok(JobQueueSnapshot {
            ready,
            delayed,
            processing,
        })
    }

    /// Puts jobs stranded in processing by a crashed worker back on the ready list.
    pub async fn requeue_processing(&self, limit: usize) -> Result<usize, JobQueueError> {
        if limit == 0 {
            return Ok(0);
        }
        let mut conn = self.manager.clone();
        let mut moved = 0usize;
        for _ in 0..limit {
            let job_id: Option<String> = redis::cmd("RPOPLPUSH")
                .arg(&self.processing_key)
                .arg(&self.ready_key)
                .query_async(&mut conn)
                .await
                .map_err(|err| JobQueueError::Operation(err.to_string()))?;
            if job_id.is_none() {
                break;
            }
            moved += 1;
        }
        Ok(moved)
    }
}

impl JobQueue for RedisJobQueue {
    fn enqueue(&self, job: &JobEnvelope) -> BoxFuture<'_, Result<(), JobQueueError>> {
        let prepared = Self::serialize(job).map(|payload| self.schedule_pipeline(job, payload));
        Box::pin(async move {
            let pipeline = prepared?;
            let mut conn = self.manager.clone();
            let _: Vec<Value> = pipeline
                .query_async(&mut conn)
                .await
                .map_err(|err| JobQueueError::Operation(err.to_string()))?;
            Ok(())
        })
    }

    fn dequeue(
        &self,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<Option<JobEnvelope>, JobQueueError>> {
        let timeout_secs = timeout.as_secs_f64();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let moved: redis::RedisResult<Option<String>> = if timeout_secs > 0.0 {
                redis::cmd("BLMOVE")
                    .arg(&self.ready_key)
                    .arg(&self.processing_key)
                    .arg("LEFT")
                    .arg("RIGHT")
                    .arg(timeout_secs)
                    .query_async(&mut conn)
                    .await
            } else {
                redis::cmd("LMOVE")
                    .arg(&self.ready_key)
                    .arg(&self.processing_key)
                    .arg("LEFT")
                    .arg("RIGHT")
                    .query_async(&mut conn)
                    .await
            };
            let job_id = moved.map_err(|err| JobQueueError::Operation(err.to_string()))?;

            let Some(job_id) = job_id else {
                return Ok(None);
            };
            let payload: Option<String> = redis::cmd("HGET")
                .arg(&self.payload_key)
                .arg(&job_id)
                .query_async(&mut conn)
                .await
                .map_err(|err| JobQueueError::Operation(err.to_string()))?;
            let Some(payload) = payload else {
                let _: i64 = redis::cmd("LREM")
                    .arg(&self.processing_key)
                    .arg(1)
                    .arg(&job_id)
                    .query_async(&mut conn)
                    .await
                    .map_err(|err| JobQueueError::Operation(err.to_string()))?;
                return Err(JobQueueError::Operation(format!(
                    "missing payload for job_id {job_id}"
                )));
            };
            Ok(Some(Self::deserialize(&payload)?))
        })
    }

    fn ack(&self, job_id: &str) -> BoxFuture<'_, Result<(), JobQueueError>> {
        let job_id = job_id.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let _: Vec<Value> = redis::pipe()
                .atomic()
                .cmd("LREM")
                .arg(&self.processing_key)
                .arg(1)
                .arg(&job_id)
                .cmd("HDEL")
                .arg(&self.payload_key)
                .arg(&job_id)
                .query_async(&mut conn)
                .await
                .map_err(|err| JobQueueError::Operation(err.to_string()))?;
            Ok(())
        })
    }

    fn retry(&self, job: &JobEnvelope) -> BoxFuture<'_, Result<(), JobQueueError>> {
        self.enqueue(job)
    }

    fn promote_due(
        &self,
        now_ms: i64,
        limit: usize,
    ) -> BoxFuture<'_, Result<usize, JobQueueError>> {
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let mut moved = 0usize;
            for _ in 0..limit {
                let result: Vec<(String, f64)> = redis::cmd("ZPOPMIN")
                    .arg(&self.delayed_key)
                    .arg(1)
                    .query_async(&mut conn)
                    .await
                    .map_err(|err| JobQueueError::Operation(err.to_string()))?;
                let Some((job_id, score)) = result.into_iter().next() else {
                    break;
                };
                if score as i64 > now_ms {
                    let _: i64 = redis::cmd("ZADD")
                        .arg(&self.delayed_key)
                        .arg(score)
                        .arg(job_id)
                        .query_async(&mut conn)
                        .await
                        .map_err(|err| JobQueueError::Operation(err.to_string()))?;
                    break;
                }
                let _: i64 = redis::cmd("RPUSH")
                    .arg(&self.ready_key)
                    .arg(job_id)
                    .query_async(&mut conn)
                    .await
                    .map_err(|err| JobQueueError::Operation(err.to_string()))?;
                moved += 1;
            }
            Ok(moved)
        })
    }
}
