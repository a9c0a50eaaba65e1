use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;

use crate::locations::LocationPing;
use crate::ports::BoxFuture;
use crate::ports::jobs::{JobEnvelope, JobQueue, JobQueueError, JobType};

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn backoff_ms(base_ms: u64, attempt: u32, max_ms: u64) -> u64 {
    if attempt == 0 {
        return 0;
    }
    let pow = 2u64.saturating_pow(attempt.saturating_sub(1));
    let delay = base_ms.saturating_mul(pow);
    delay.min(max_ms)
}

/// Job ids are derived from the ping so a duplicate enqueue overwrites instead of piling up.
pub fn replay_job_id(ping: &LocationPing) -> String {
    format!("replay:{}:{}", ping.username, ping.recorded_at_ms)
}

pub fn new_replay_job(
    ping: &LocationPing,
    request_id: String,
    correlation_id: String,
    max_attempts: u32,
) -> Result<JobEnvelope, JobQueueError> {
    let payload = serde_json::to_value(ping)
        .map_err(|err| JobQueueError::Serialization(err.to_string()))?;
    let now = now_ms();
    Ok(JobEnvelope {
        job_id: replay_job_id(ping),
        job_type: JobType::HistoryReplay,
        payload,
        request_id,
        correlation_id,
        attempt: 1,
        max_attempts: max_attempts.max(1),
        run_at_ms: now,
        created_at_ms: now,
    })
}

#[derive(Default)]
struct MemoryQueueState {
    payloads: HashMap<String, JobEnvelope>,
    ready: VecDeque<String>,
    // run_at_ms -> job ids due at that instant
    delayed: BTreeMap<i64, Vec<String>>,
    processing: Vec<String>,
}

impl MemoryQueueState {
    fn schedule(&mut self, job: &JobEnvelope, now_ms: i64) {
        self.payloads.insert(job.job_id.clone(), job.clone());
        self.ready.retain(|id| id != &job.job_id);
        for ids in self.delayed.values_mut() {
            ids.retain(|id| id != &job.job_id);
        }
        self.delayed.retain(|_, ids| !ids.is_empty());
        if job.run_at_ms <= now_ms {
            self.ready.push_back(job.job_id.clone());
        } else {
            self.delayed
                .entry(job.run_at_ms)
                .or_default()
                .push(job.job_id.clone());
        }
    }
}

/// Single-process queue for the `memory` backend and tests.
#[derive(Clone, Default)]
pub struct InMemoryJobQueue {
    state: Arc<Mutex<MemoryQueueState>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pending(&self) -> usize {
        self.state.lock().await.payloads.len()
    }

    pub async fn get(&self, job_id: &str) -> Option<JobEnvelope> {
        self.state.lock().await.payloads.get(job_id).cloned()
    }
}

impl JobQueue for InMemoryJobQueue {
    fn enqueue(&self, job: &JobEnvelope) -> BoxFuture<'_, Result<(), JobQueueError>> {
        let job = job.clone();
        Box::pin(async move {
            self.state.lock().await.schedule(&job, now_ms());
            Ok(())
        })
    }

    // Never blocks; the caller's poll interval is the wait.
    fn dequeue(
        &self,
        _timeout: Duration,
    ) -> BoxFuture<'_, Result<Option<JobEnvelope>, JobQueueError>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            while let Some(job_id) = state.ready.pop_front() {
                if let Some(job) = state.payloads.get(&job_id).cloned() {
                    state.processing.push(job_id);
                    return Ok(Some(job));
                }
            }
            Ok(None)
        })
    }

    fn ack(&self, job_id: &str) -> BoxFuture<'_, Result<(), JobQueueError>> {
        let job_id = job_id.to_string();
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.processing.retain(|id| id != &job_id);
            state.payloads.remove(&job_id);
            Ok(())
        })
    }

    fn retry(&self, job: &JobEnvelope) -> BoxFuture<'_, Result<(), JobQueueError>> {
        let job = job.clone();
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.processing.retain(|id| id != &job.job_id);
            state.schedule(&job, now_ms());
            Ok(())
        })
    }

    fn promote_due(
        &self,
        now_ms: i64,
        limit: usize,
    ) -> BoxFuture<'_, Result<usize, JobQueueError>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let mut moved = 0usize;
            while moved < limit {
                let Some(mut entry) = state.delayed.first_entry() else {
                    break;
                };
                if *entry.key() > now_ms {
                    break;
                }
                let ids = entry.get_mut();
                let Some(job_id) = ids.pop() else {
                    entry.remove();
                    continue;
                };
                if ids.is_empty() {
                    entry.remove();
                }
                state.ready.push_back(job_id);
                moved += 1;
            }
            Ok(moved)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping(recorded_at_ms: i64) -> LocationPing {
        LocationPing::new("alice123", 1.0, 2.0, recorded_at_ms).unwrap()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_ms(100, 0, 1_000), 0);
        assert_eq!(backoff_ms(100, 1, 1_000), 100);
        assert_eq!(backoff_ms(100, 3, 1_000), 400);
        assert_eq!(backoff_ms(100, 10, 1_000), 1_000);
    }

    #[tokio::test]
    async fn delayed_jobs_wait_for_promotion() {
        let queue = InMemoryJobQueue::new();
        let job = new_replay_job(&ping(1), "req".into(), "corr".into(), 3)
            .unwrap()
            .with_run_at(now_ms() + 60_000);
        queue.enqueue(&job).await.unwrap();

        assert!(queue.dequeue(Duration::ZERO).await.unwrap().is_none());
        assert_eq!(queue.promote_due(now_ms(), 10).await.unwrap(), 0);
        assert_eq!(queue.promote_due(job.run_at_ms, 10).await.unwrap(), 1);

        let dequeued = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(dequeued.job_id, job.job_id);
        queue.ack(&dequeued.job_id).await.unwrap();
        assert_eq!(queue.pending().await, 0);
    }

    #[tokio::test]
    async fn same_ping_enqueued_twice_is_one_job() {
        let queue = InMemoryJobQueue::new();
        let job = new_replay_job(&ping(7), "req".into(), "corr".into(), 3).unwrap();
        queue.enqueue(&job).await.unwrap();
        queue.enqueue(&job).await.unwrap();
        assert_eq!(queue.pending().await, 1);
        assert!(queue.dequeue(Duration::ZERO).await.unwrap().is_some());
        assert!(queue.dequeue(Duration::ZERO).await.unwrap().is_none());
    }
}
