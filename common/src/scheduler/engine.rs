// Scheduler engine: the control loop that acquires due triggers from the
// store and dispatches them to a bounded worker pool.
//
// One logical thread of control runs the loop; job execution happens on
// spawned tasks gated by a semaphore. Admin operations run on caller tasks
// and interleave with the loop only through the store and the engine's
// state lock.

use crate::clock::Clock;
use crate::errors::{SchedulerError, SchedulerResult};
use crate::executor::{HandlerRegistry, JobContext};
use crate::models::{FireOutcome, SchedulerState, SchedulerStatus};
use crate::store::{AcquiredFire, JobStore};
use crate::telemetry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

/// Engine tuning knobs, sourced from configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on how long the loop sleeps between polls.
    pub poll_interval_seconds: u64,
    /// Maximum triggers acquired per poll.
    pub batch_size: usize,
    /// How far ahead of their fire time triggers may be acquired.
    pub time_window_seconds: u64,
    /// Worker pool size; saturation rejects dispatch non-fatally.
    pub worker_concurrency: usize,
    /// How long shutdown waits for in-flight executions.
    pub shutdown_grace_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 10,
            batch_size: 32,
            time_window_seconds: 0,
            worker_concurrency: 8,
            shutdown_grace_seconds: 30,
        }
    }
}

/// The scheduler's run loop and lifecycle state machine:
/// Stopped -> Starting -> Running <-> Paused -> ShuttingDown -> Stopped.
pub struct SchedulerEngine {
    config: SchedulerConfig,
    store: Arc<dyn JobStore>,
    handlers: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
    state: RwLock<SchedulerState>,
    worker_permits: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SchedulerEngine {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn JobStore>,
        handlers: Arc<HandlerRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);
        let worker_permits = Arc::new(Semaphore::new(config.worker_concurrency));
        Self {
            config,
            store,
            handlers,
            clock,
            state: RwLock::new(SchedulerState::Stopped),
            worker_permits,
            shutdown_tx,
        }
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    /// Aggregate snapshot for the reporting layer.
    pub async fn status(&self) -> SchedulerStatus {
        let counts = self.store.counts().await;
        SchedulerStatus {
            state: *self.state.read().await,
            job_count: counts.jobs,
            trigger_count: counts.triggers,
            executing_count: counts.executing,
            next_fire_at: self.store.next_fire_time().await,
            fired_total: counts.fired_total,
            misfired_total: counts.misfired_total,
        }
    }

    /// Run the scheduler until shutdown is requested.
    ///
    /// Validates the store first: a trigger referencing a missing job is the
    /// one fatal condition and prevents the engine from starting.
    #[instrument(skip(self))]
    pub async fn start(&self) -> SchedulerResult<()> {
        {
            let mut state = self.state.write().await;
            if *state != SchedulerState::Stopped {
                return Err(SchedulerError::InvalidStateTransition {
                    from: state.to_string(),
                    to: SchedulerState::Starting.to_string(),
                });
            }
            *state = SchedulerState::Starting;
        }

        if let Err(e) = self.store.validate().await {
            error!(error = %e, "Store validation failed, refusing to start");
            *self.state.write().await = SchedulerState::Stopped;
            return Err(e.into());
        }
        {
            *self.state.write().await = SchedulerState::Running;
        }
        info!(
            poll_interval_seconds = self.config.poll_interval_seconds,
            worker_concurrency = self.config.worker_concurrency,
            "Scheduler engine running"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let change = self.store.change_signal();

        loop {
            if *self.state.read().await == SchedulerState::Running {
                if let Err(e) = self.poll_once().await {
                    error!(error = %e, "Poll failed");
                }
            }

            let sleep_for = self.next_sleep().await;
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = change.notified() => {
                    debug!("Woken by store change");
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, leaving run loop");
                    break;
                }
            }
        }

        Ok(())
    }

    /// One acquisition/dispatch round. The run loop calls this; tests drive
    /// it directly to step the scheduler deterministically.
    #[instrument(skip(self))]
    pub async fn poll_once(&self) -> SchedulerResult<usize> {
        let now = self.clock.now();
        let window = chrono::Duration::seconds(self.config.time_window_seconds as i64);
        let acquired = self
            .store
            .acquire_next_triggers(now, self.config.batch_size, window)
            .await?;
        let count = acquired.len();
        if count > 0 {
            debug!(count, "Acquired due triggers");
        }
        for fire in acquired {
            self.dispatch(fire).await;
        }
        telemetry::update_executing_jobs(self.store.counts().await.executing as i64);
        Ok(count)
    }

    /// Halt acquisition without cancelling in-flight executions.
    #[instrument(skip(self))]
    pub async fn pause(&self) -> SchedulerResult<()> {
        {
            let mut state = self.state.write().await;
            if *state != SchedulerState::Running {
                return Err(SchedulerError::InvalidStateTransition {
                    from: state.to_string(),
                    to: SchedulerState::Paused.to_string(),
                });
            }
            *state = SchedulerState::Paused;
        }
        info!("Scheduler paused");
        self.store.change_signal().notify_one();
        Ok(())
    }

    /// Resume acquisition after a pause.
    #[instrument(skip(self))]
    pub async fn resume(&self) -> SchedulerResult<()> {
        {
            let mut state = self.state.write().await;
            if *state != SchedulerState::Paused {
                return Err(SchedulerError::InvalidStateTransition {
                    from: state.to_string(),
                    to: SchedulerState::Running.to_string(),
                });
            }
            *state = SchedulerState::Running;
        }
        info!("Scheduler resumed");
        self.store.change_signal().notify_one();
        Ok(())
    }

    /// Stop accepting new acquisitions immediately and wait up to the
    /// configured grace period for in-flight executions. The engine always
    /// reaches Stopped; exceeding the grace period is reported as
    /// `ShutdownTimeout` with the number of abandoned executions.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> SchedulerResult<()> {
        {
            let mut state = self.state.write().await;
            if matches!(
                *state,
                SchedulerState::Stopped | SchedulerState::ShuttingDown
            ) {
                return Ok(());
            }
            *state = SchedulerState::ShuttingDown;
        }
        info!(
            grace_seconds = self.config.shutdown_grace_seconds,
            "Scheduler shutting down"
        );
        // No receiver just means the run loop is not active.
        let _ = self.shutdown_tx.send(());

        let grace = Duration::from_secs(self.config.shutdown_grace_seconds);
        let total = self.config.worker_concurrency as u32;
        let timed_out = match timeout(grace, self.worker_permits.acquire_many(total)).await {
            Ok(Ok(_all_permits)) => false,
            Ok(Err(_closed)) => false,
            Err(_elapsed) => true,
        };

        let abandoned = if timed_out {
            let stragglers = self.store.executing_fires().await;
            for fire in &stragglers {
                warn!(
                    fire_id = %fire.id,
                    job_key = %fire.job_key,
                    trigger_key = %fire.trigger_key,
                    "Execution still in flight at shutdown, abandoning"
                );
            }
            stragglers.len()
        } else {
            0
        };

        {
            *self.state.write().await = SchedulerState::Stopped;
        }

        if timed_out {
            warn!(abandoned, "Shutdown grace period exceeded");
            return Err(SchedulerError::ShutdownTimeout { abandoned });
        }
        info!("Scheduler stopped");
        Ok(())
    }

    /// Sleep until the earliest next fire time or the poll interval,
    /// whichever comes first. Admin mutations cut the sleep short through
    /// the store's change signal.
    async fn next_sleep(&self) -> Duration {
        let poll = Duration::from_secs(self.config.poll_interval_seconds);
        if *self.state.read().await != SchedulerState::Running {
            return poll;
        }
        match self.store.next_fire_time().await {
            Some(next) => {
                let millis = next
                    .signed_duration_since(self.clock.now())
                    .num_milliseconds();
                if millis <= 0 {
                    Duration::ZERO
                } else {
                    poll.min(Duration::from_millis(millis as u64))
                }
            }
            None => poll,
        }
    }

    async fn dispatch(&self, acquired: AcquiredFire) {
        let permit = match Arc::clone(&self.worker_permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    job_key = %acquired.job.key,
                    trigger_key = %acquired.trigger.key,
                    "Worker pool saturated, releasing acquisition"
                );
                telemetry::record_pool_saturation();
                if let Err(e) = self.store.release_acquired_trigger(acquired.fire.id).await {
                    error!(fire_id = %acquired.fire.id, error = %e, "Failed to release acquisition");
                }
                return;
            }
        };

        let handler = self.handlers.get(&acquired.job.handler_type);
        let store = Arc::clone(&self.store);
        let AcquiredFire { job, trigger, fire } = acquired;

        tokio::spawn(async move {
            let _permit = permit;
            let outcome = match handler {
                None => {
                    warn!(
                        job_key = %job.key,
                        handler_type = %job.handler_type,
                        "No handler registered, vetoing fire"
                    );
                    FireOutcome::Vetoed {
                        reason: format!("no handler registered for type '{}'", job.handler_type),
                    }
                }
                Some(handler) => {
                    let context = JobContext {
                        fire_id: fire.id,
                        job_key: job.key.clone(),
                        trigger_key: trigger.key.clone(),
                        scheduled_at: fire.scheduled_at,
                        fired_at: fire.fired_at,
                        data: job.data.clone(),
                    };
                    let started = std::time::Instant::now();
                    let result = handler.execute(context).await;
                    telemetry::record_fire_duration(&job.key, started.elapsed().as_secs_f64());
                    match result {
                        Ok(()) => {
                            telemetry::record_fire_success(&job.key);
                            FireOutcome::Success
                        }
                        Err(e) => {
                            warn!(job_key = %job.key, error = %e, "Job handler failed");
                            telemetry::record_fire_failure(&job.key, &e.to_string());
                            FireOutcome::Failed {
                                error: e.to_string(),
                            }
                        }
                    }
                }
            };
            if let Err(e) = store.triggered_job_complete(fire.id, outcome).await {
                error!(fire_id = %fire.id, error = %e, "Failed to record fire completion");
            }
        });
    }
}
