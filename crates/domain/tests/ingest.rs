mod support;

use std::sync::Arc;
use std::time::Duration;

use geotrail_domain::error::DomainError;
use geotrail_domain::ingest::{IngestConfig, IngestCoordinator, IngestOutcome, IngestState, PingInput};
use geotrail_domain::jobs::{InMemoryJobQueue, replay_job_id};
use geotrail_domain::ports::history::RemoteCallError;
use geotrail_domain::ports::locations::StorageError;
use geotrail_domain::proximity::InMemoryProximityRepository;
use geotrail_domain::replay::{ReplayConfig, ReplayService};

use support::{Behaviour, BrokenProjection, FakeHistory};

const REMOTE_TIMEOUT: Duration = Duration::from_millis(50);

fn coordinator(
    positions: Arc<dyn geotrail_domain::ports::proximity::ProximityRepository>,
    history: FakeHistory,
    queue: InMemoryJobQueue,
) -> IngestCoordinator {
    let history = Arc::new(history);
    let replay = ReplayService::new(
        Arc::new(queue),
        history.clone(),
        ReplayConfig {
            remote_timeout: REMOTE_TIMEOUT,
            ..ReplayConfig::default()
        },
    );
    IngestCoordinator::new(
        positions,
        history,
        replay,
        IngestConfig {
            remote_timeout: REMOTE_TIMEOUT,
        },
    )
}

fn input(username: &str) -> PingInput {
    PingInput {
        username: username.to_string(),
        latitude: 37.7749,
        longitude: -122.4194,
    }
}

#[tokio::test]
async fn both_writes_succeed() {
    let positions = InMemoryProximityRepository::new();
    let history = FakeHistory::new(Behaviour::Accept);
    let queue = InMemoryJobQueue::new();
    let coordinator = coordinator(Arc::new(positions.clone()), history.clone(), queue.clone());

    let outcome = coordinator
        .ingest(input("alice123"), "req-1".into(), "corr-1".into())
        .await
        .unwrap();

    assert_eq!(outcome.state(), IngestState::Committed);
    let stored = positions.get("alice123").await.unwrap();
    assert_eq!(stored.recorded_at_ms, outcome.ping().recorded_at_ms);
    assert_eq!(history.forwarded(), vec![outcome.ping().clone()]);
    assert_eq!(queue.pending().await, 0);
}

#[tokio::test]
async fn remote_timeout_keeps_local_write_and_schedules_replay() {
    let positions = InMemoryProximityRepository::new();
    let history = FakeHistory::new(Behaviour::Hang);
    let queue = InMemoryJobQueue::new();
    let coordinator = coordinator(Arc::new(positions.clone()), history, queue.clone());

    let outcome = coordinator
        .ingest(input("alice123"), "req-1".into(), "corr-1".into())
        .await
        .unwrap();

    let IngestOutcome::Inconsistent {
        ping,
        error,
        replay_job_id: job_id,
    } = outcome
    else {
        panic!("expected an inconsistent outcome");
    };
    assert_eq!(error, RemoteCallError::Timeout(50));
    assert!(positions.get("alice123").await.is_some());
    assert_eq!(job_id.as_deref(), Some(replay_job_id(&ping).as_str()));

    let job = queue.get(&replay_job_id(&ping)).await.unwrap();
    let replayed: geotrail_domain::locations::LocationPing =
        serde_json::from_value(job.payload).unwrap();
    assert_eq!(replayed, ping);
    assert_eq!(job.request_id, "req-1");
}

#[tokio::test]
async fn remote_failure_is_reported_as_inconsistent() {
    let positions = InMemoryProximityRepository::new();
    let history = FakeHistory::new(Behaviour::Fail);
    let queue = InMemoryJobQueue::new();
    let coordinator = coordinator(Arc::new(positions), history, queue.clone());

    let outcome = coordinator
        .ingest(input("bob12345"), "req-2".into(), "corr-2".into())
        .await
        .unwrap();

    assert_eq!(outcome.state(), IngestState::Inconsistent);
    assert_eq!(queue.pending().await, 1);
}

#[tokio::test]
async fn invalid_username_writes_nothing() {
    let positions = InMemoryProximityRepository::new();
    let history = FakeHistory::new(Behaviour::Accept);
    let coordinator = coordinator(
        Arc::new(positions.clone()),
        history.clone(),
        InMemoryJobQueue::new(),
    );

    let err = coordinator
        .ingest(input("ab"), "req-3".into(), "corr-3".into())
        .await
        .unwrap_err();

    assert!(matches!(err, DomainError::Validation(_)));
    assert!(positions.get("ab").await.is_none());
    assert!(history.forwarded().is_empty());
}

#[tokio::test]
async fn out_of_range_latitude_writes_nothing() {
    let positions = InMemoryProximityRepository::new();
    let history = FakeHistory::new(Behaviour::Accept);
    let coordinator = coordinator(
        Arc::new(positions.clone()),
        history.clone(),
        InMemoryJobQueue::new(),
    );

    let mut ping = input("alice123");
    ping.latitude = 90.5;
    let err = coordinator
        .ingest(ping, "req-4".into(), "corr-4".into())
        .await
        .unwrap_err();

    assert!(matches!(err, DomainError::Validation(_)));
    assert!(positions.get("alice123").await.is_none());
    assert!(history.forwarded().is_empty());
}

#[tokio::test]
async fn local_failure_skips_remote_call() {
    let history = FakeHistory::new(Behaviour::Accept);
    let queue = InMemoryJobQueue::new();
    let coordinator = coordinator(Arc::new(BrokenProjection), history.clone(), queue.clone());

    let err = coordinator
        .ingest(input("alice123"), "req-5".into(), "corr-5".into())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DomainError::Storage(StorageError::Unavailable(_))
    ));
    assert!(history.forwarded().is_empty());
    assert_eq!(queue.pending().await, 0);
}

#[tokio::test]
async fn remote_leg_finishes_when_caller_goes_away() {
    let positions = InMemoryProximityRepository::new();
    let history = FakeHistory::new(Behaviour::Hang);
    let queue = InMemoryJobQueue::new();
    let coordinator = coordinator(Arc::new(positions.clone()), history, queue.clone());

    // Drop the ingest future while the remote call is still hanging.
    let dropped = tokio::time::timeout(
        Duration::from_millis(10),
        coordinator.ingest(input("carol123"), "req-6".into(), "corr-6".into()),
    )
    .await;
    assert!(dropped.is_err());
    assert!(positions.get("carol123").await.is_some());

    tokio::time::sleep(REMOTE_TIMEOUT * 4).await;
    assert_eq!(queue.pending().await, 1);
}
