// Behavioral tests for the scheduler engine: deterministic time scenarios,
// graceful shutdown, pause semantics, and worker pool backpressure.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use common::admin::{AdminConfig, SchedulerAdmin};
use common::clock::ManualClock;
use common::errors::{ExecutionError, SchedulerError};
use common::executor::{HandlerRegistry, JobContext, JobHandler};
use common::models::{
    FireOutcome, JobDefinition, JobKey, Schedule, SchedulerState, TriggerDefinition, TriggerKey,
    TriggerState,
};
use common::scheduler::{SchedulerConfig, SchedulerEngine};
use common::store::{JobStore, MemoryJobStore, StoreConfig};
use proptest::prelude::*;
use std::sync::Arc;

// Mock implementations for testing

/// Handler that records the scheduled time of every fire it serves.
struct RecordingHandler {
    fires: Arc<tokio::sync::Mutex<Vec<DateTime<Utc>>>>,
}

impl RecordingHandler {
    fn new() -> (Self, Arc<tokio::sync::Mutex<Vec<DateTime<Utc>>>>) {
        let fires = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        (
            Self {
                fires: fires.clone(),
            },
            fires,
        )
    }
}

#[async_trait]
impl JobHandler for RecordingHandler {
    async fn execute(&self, context: JobContext) -> Result<(), ExecutionError> {
        self.fires.lock().await.push(context.scheduled_at);
        Ok(())
    }
}

/// Handler that sleeps for a fixed duration before succeeding.
struct SlowHandler {
    duration: std::time::Duration,
}

#[async_trait]
impl JobHandler for SlowHandler {
    async fn execute(&self, _context: JobContext) -> Result<(), ExecutionError> {
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

/// Handler that always fails.
struct FailingHandler;

#[async_trait]
impl JobHandler for FailingHandler {
    async fn execute(&self, _context: JobContext) -> Result<(), ExecutionError> {
        Err(ExecutionError::HandlerFailed("boom".to_string()))
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn build_engine(
    config: SchedulerConfig,
    registry: HandlerRegistry,
) -> (Arc<ManualClock>, Arc<MemoryJobStore>, Arc<SchedulerEngine>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = Arc::new(MemoryJobStore::new(clock.clone(), StoreConfig::default()));
    let engine = Arc::new(SchedulerEngine::new(
        config,
        store.clone(),
        Arc::new(registry),
        clock.clone(),
    ));
    (clock, store, engine)
}

async fn add_interval_job(
    store: &Arc<MemoryJobStore>,
    name: &str,
    handler_type: &str,
    start: DateTime<Utc>,
    interval_seconds: u64,
    repeat_count: Option<u32>,
) -> (JobKey, TriggerKey) {
    let job_key = JobKey::new(name);
    store
        .store_job(JobDefinition::new(job_key.clone(), handler_type), false)
        .await
        .unwrap();
    let trigger_key = TriggerKey::new(format!("{}-trigger", name));
    store
        .store_trigger(
            TriggerDefinition::new(
                trigger_key.clone(),
                job_key.clone(),
                Schedule::Interval {
                    start_at: start,
                    interval_seconds,
                    repeat_count,
                    end_at: None,
                },
            ),
            false,
        )
        .await
        .unwrap();
    (job_key, trigger_key)
}

/// Wait until no fire is in flight.
async fn drain(store: &Arc<MemoryJobStore>) {
    while store.counts().await.executing > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
}

/// **Property: scheduler configuration bounds**
///
/// *For any* configuration within operational ranges, the engine's derived
/// limits stay consistent: the worker pool is non-empty and the batch size
/// never exceeds what a single poll may dispatch.
#[test]
fn property_scheduler_config_bounds() {
    proptest!(|(
        poll_interval_seconds in 1u64..3600u64,
        batch_size in 1usize..1000usize,
        worker_concurrency in 1usize..256usize,
        shutdown_grace_seconds in 0u64..600u64
    )| {
        let config = SchedulerConfig {
            poll_interval_seconds,
            batch_size,
            time_window_seconds: 0,
            worker_concurrency,
            shutdown_grace_seconds,
        };
        prop_assert!(config.poll_interval_seconds > 0);
        prop_assert!(config.batch_size > 0);
        prop_assert!(config.worker_concurrency > 0);
    });
}

/// Interval trigger with repeat_count 2 starting at T0: stepping the clock
/// to T0+3s yields exactly three fires, at T0, T0+1s, and T0+2s, and the
/// trigger retires to Complete.
#[tokio::test]
async fn test_interval_trigger_fires_exactly_repeat_plus_one_times() {
    let (handler, fires) = RecordingHandler::new();
    let mut registry = HandlerRegistry::new();
    registry.register("record", Arc::new(handler));
    let (clock, store, engine) = build_engine(SchedulerConfig::default(), registry);

    let (_, trigger_key) = add_interval_job(&store, "repeat", "record", t0(), 1, Some(2)).await;

    for _ in 0..3 {
        engine.poll_once().await.unwrap();
        drain(&store).await;
        clock.advance(Duration::seconds(1));
    }
    // Extra polls after exhaustion must not fire anything.
    engine.poll_once().await.unwrap();
    drain(&store).await;

    let recorded = fires.lock().await.clone();
    assert_eq!(
        recorded,
        vec![
            t0(),
            t0() + Duration::seconds(1),
            t0() + Duration::seconds(2)
        ]
    );

    let trigger = store.find_trigger(&trigger_key).await.unwrap();
    assert_eq!(trigger.state, TriggerState::Complete);
    assert_eq!(trigger.times_fired, 3);
    assert_eq!(trigger.next_fire_at, None);
    assert_eq!(store.recent_fires(10).await.len(), 3);
}

/// Pausing a group excludes its triggers from acquisition immediately;
/// resuming restores eligibility without altering the next fire time.
#[tokio::test]
async fn test_pause_group_excludes_from_acquisition() {
    let (handler, fires) = RecordingHandler::new();
    let mut registry = HandlerRegistry::new();
    registry.register("record", Arc::new(handler));
    let (_clock, store, engine) = build_engine(SchedulerConfig::default(), registry);

    let job_key = JobKey::new("grouped");
    store
        .store_job(JobDefinition::new(job_key.clone(), "record"), false)
        .await
        .unwrap();
    let trigger_key = TriggerKey::with_group("minutely", "reporting");
    store
        .store_trigger(
            TriggerDefinition::new(
                trigger_key.clone(),
                job_key,
                Schedule::Interval {
                    start_at: t0(),
                    interval_seconds: 60,
                    repeat_count: None,
                    end_at: None,
                },
            ),
            false,
        )
        .await
        .unwrap();

    let before = store.find_trigger(&trigger_key).await.unwrap().next_fire_at;
    store.pause_group("reporting").await.unwrap();

    assert_eq!(engine.poll_once().await.unwrap(), 0);
    assert!(fires.lock().await.is_empty());

    store.resume_group("reporting").await.unwrap();
    let after = store.find_trigger(&trigger_key).await.unwrap();
    assert_eq!(after.state, TriggerState::Waiting);
    assert_eq!(after.next_fire_at, before);

    assert_eq!(engine.poll_once().await.unwrap(), 1);
    drain(&store).await;
    assert_eq!(fires.lock().await.len(), 1);
}

/// Shutdown completes within the grace period once the in-flight job
/// finishes, and the engine reaches Stopped.
#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_inflight_within_grace() {
    let mut registry = HandlerRegistry::new();
    registry.register(
        "slow",
        Arc::new(SlowHandler {
            duration: std::time::Duration::from_millis(200),
        }),
    );
    let config = SchedulerConfig {
        shutdown_grace_seconds: 5,
        ..SchedulerConfig::default()
    };
    let (_clock, store, engine) = build_engine(config, registry);
    add_interval_job(&store, "slow-job", "slow", t0(), 60, None).await;

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start().await })
    };
    while store.counts().await.executing == 0 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    engine.shutdown().await.unwrap();
    runner.await.unwrap().unwrap();
    assert_eq!(engine.state().await, SchedulerState::Stopped);
    // The in-flight fire was allowed to finish and is recorded.
    assert_eq!(store.counts().await.executing, 0);
    assert_eq!(store.recent_fires(10).await.len(), 1);
}

/// A job exceeding the grace period is reported as ShutdownTimeout, but the
/// engine still reaches Stopped.
#[tokio::test(start_paused = true)]
async fn test_shutdown_reports_timeout_but_stops() {
    let mut registry = HandlerRegistry::new();
    registry.register(
        "glacial",
        Arc::new(SlowHandler {
            duration: std::time::Duration::from_secs(3600),
        }),
    );
    let config = SchedulerConfig {
        shutdown_grace_seconds: 1,
        ..SchedulerConfig::default()
    };
    let (_clock, store, engine) = build_engine(config, registry);
    add_interval_job(&store, "stuck-job", "glacial", t0(), 60, None).await;

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start().await })
    };
    while store.counts().await.executing == 0 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let err = engine.shutdown().await.unwrap_err();
    match err {
        SchedulerError::ShutdownTimeout { abandoned } => assert_eq!(abandoned, 1),
        other => panic!("expected ShutdownTimeout, got {other}"),
    }
    runner.await.unwrap().unwrap();
    assert_eq!(engine.state().await, SchedulerState::Stopped);
}

/// A saturated worker pool rejects the dispatch non-fatally: the acquisition
/// is released and the trigger stays eligible.
#[tokio::test(start_paused = true)]
async fn test_pool_saturation_releases_acquisition() {
    let mut registry = HandlerRegistry::new();
    registry.register(
        "slow",
        Arc::new(SlowHandler {
            duration: std::time::Duration::from_secs(30),
        }),
    );
    let config = SchedulerConfig {
        worker_concurrency: 1,
        ..SchedulerConfig::default()
    };
    let (_clock, store, engine) = build_engine(config, registry);

    let (_, first_key) = add_interval_job(&store, "first", "slow", t0(), 60, None).await;
    let (_, second_key) = add_interval_job(&store, "second", "slow", t0(), 60, None).await;

    engine.poll_once().await.unwrap();

    // Exactly one fire holds the single worker permit; the other trigger was
    // acquired, rejected at dispatch, and released back to Waiting.
    assert_eq!(store.counts().await.executing, 1);
    let first = store.find_trigger(&first_key).await.unwrap();
    let second = store.find_trigger(&second_key).await.unwrap();
    let states = [first.state, second.state];
    assert!(states.contains(&TriggerState::Acquired));
    assert!(states.contains(&TriggerState::Waiting));
}

/// Handler failure is recorded on the trigger and does not stop scheduling.
#[tokio::test]
async fn test_handler_failure_is_recorded_and_rescheduled() {
    let mut registry = HandlerRegistry::new();
    registry.register("failing", Arc::new(FailingHandler));
    let (_clock, store, engine) = build_engine(SchedulerConfig::default(), registry);

    let (_, trigger_key) = add_interval_job(&store, "flaky", "failing", t0(), 60, None).await;
    engine.poll_once().await.unwrap();
    drain(&store).await;

    let trigger = store.find_trigger(&trigger_key).await.unwrap();
    assert_eq!(trigger.state, TriggerState::Waiting);
    assert_eq!(trigger.next_fire_at, Some(t0() + Duration::seconds(60)));
    assert!(trigger.last_error.as_deref().unwrap_or("").contains("boom"));

    let history = store.recent_fires(10).await;
    assert!(matches!(
        history[0].outcome,
        Some(FireOutcome::Failed { .. })
    ));
}

/// A job naming an unregistered handler type is vetoed and its trigger
/// faulted until resumed.
#[tokio::test]
async fn test_unregistered_handler_vetoes_fire() {
    let registry = HandlerRegistry::new();
    let (_clock, store, engine) = build_engine(SchedulerConfig::default(), registry);

    let (_, trigger_key) = add_interval_job(&store, "orphan", "nonexistent", t0(), 60, None).await;
    engine.poll_once().await.unwrap();
    drain(&store).await;

    let trigger = store.find_trigger(&trigger_key).await.unwrap();
    assert_eq!(trigger.state, TriggerState::Error);

    // Resuming clears the fault and makes it eligible again.
    store.resume_trigger(&trigger_key).await.unwrap();
    let trigger = store.find_trigger(&trigger_key).await.unwrap();
    assert_eq!(trigger.state, TriggerState::Waiting);
}

/// Standby halts acquisition through the admin facade; resuming restores it.
#[tokio::test]
async fn test_admin_standby_and_resume() {
    let (handler, fires) = RecordingHandler::new();
    let mut registry = HandlerRegistry::new();
    registry.register("record", Arc::new(handler));
    let (clock, store, engine) = build_engine(SchedulerConfig::default(), registry);
    let admin = SchedulerAdmin::new(
        store.clone(),
        engine.clone(),
        clock.clone(),
        AdminConfig::default(),
    );

    add_interval_job(&store, "standby-job", "record", t0(), 1, None).await;

    // Engine is not Running yet, standby must be rejected.
    assert!(matches!(
        admin.standby().await,
        Err(SchedulerError::InvalidStateTransition { .. })
    ));

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start().await })
    };
    // Let the loop reach Running and serve the first fire.
    while engine.state().await != SchedulerState::Running {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    drain(&store).await;

    admin.standby().await.unwrap();
    assert_eq!(engine.state().await, SchedulerState::Paused);
    let fired_before = fires.lock().await.len();

    // Due fires accumulate while paused but nothing is dispatched.
    clock.advance(Duration::seconds(5));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(fires.lock().await.len(), fired_before);

    admin.resume_scheduler().await.unwrap();
    while fires.lock().await.len() == fired_before {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    engine.shutdown().await.unwrap();
    runner.await.unwrap().unwrap();
    assert_eq!(engine.state().await, SchedulerState::Stopped);
}
