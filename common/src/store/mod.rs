// Job store: registry of job and trigger definitions with concurrency-safe
// acquire/release semantics for firing.
//
// The trait is the persistence seam: the engine and the admin facade only
// ever talk to `dyn JobStore`, so a durable implementation can replace the
// in-memory one without touching either.

pub mod memory;

pub use memory::MemoryJobStore;

use crate::errors::StoreError;
use crate::models::{
    FireInstance, FireOutcome, JobDefinition, JobKey, StoreCounts, TriggerDefinition, TriggerKey,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

/// Everything the engine needs to dispatch one acquired trigger.
#[derive(Debug, Clone)]
pub struct AcquiredFire {
    pub job: JobDefinition,
    pub trigger: TriggerDefinition,
    pub fire: FireInstance,
}

/// Store tuning knobs; defaults come from configuration, never from the core.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How far past its fire time a trigger may be before its misfire
    /// instruction applies instead of an immediate fire.
    pub misfire_threshold_seconds: u64,
    /// How many completed fire instances to retain for introspection.
    pub fire_history_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            misfire_threshold_seconds: 60,
            fire_history_size: 100,
        }
    }
}

/// Registry of jobs and triggers plus the firing state machine.
///
/// `acquire_next_triggers` is the sole concurrency choke point: it must be
/// linearizable so that no two callers ever hold the same trigger acquired
/// at once.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Store a job definition. Fails with `Conflict` if the key is taken and
    /// `replace` is false.
    async fn store_job(&self, job: JobDefinition, replace: bool) -> Result<(), StoreError>;

    /// Store a trigger definition and compute its initial fire time. Fails
    /// with `NotFound` if the referenced job is unknown, `Conflict` on a
    /// duplicate key without `replace`.
    async fn store_trigger(
        &self,
        trigger: TriggerDefinition,
        replace: bool,
    ) -> Result<(), StoreError>;

    async fn find_job(&self, key: &JobKey) -> Option<JobDefinition>;

    async fn find_trigger(&self, key: &TriggerKey) -> Option<TriggerDefinition>;

    async fn list_jobs(&self) -> Vec<JobDefinition>;

    async fn list_triggers(&self) -> Vec<TriggerDefinition>;

    async fn triggers_for_job(&self, key: &JobKey) -> Vec<TriggerDefinition>;

    /// Sorted, distinct job group names.
    async fn job_groups(&self) -> Vec<String>;

    /// Sorted, distinct trigger group names.
    async fn trigger_groups(&self) -> Vec<String>;

    /// Remove a job and every trigger pointing at it.
    async fn remove_job(&self, key: &JobKey) -> Result<(), StoreError>;

    /// Remove a trigger; a non-durable job loses its last trigger with it.
    async fn remove_trigger(&self, key: &TriggerKey) -> Result<(), StoreError>;

    async fn pause_trigger(&self, key: &TriggerKey) -> Result<(), StoreError>;

    /// Resume a paused (or faulted) trigger without recomputing its fire
    /// time.
    async fn resume_trigger(&self, key: &TriggerKey) -> Result<(), StoreError>;

    /// Pause every trigger in a group; returns how many were affected.
    async fn pause_group(&self, group: &str) -> Result<usize, StoreError>;

    /// Resume every trigger in a group; returns how many were affected.
    async fn resume_group(&self, group: &str) -> Result<usize, StoreError>;

    /// Atomically claim due triggers, ordered by (fire time asc, priority
    /// desc), applying misfire instructions to triggers past the threshold.
    async fn acquire_next_triggers(
        &self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: Duration,
    ) -> Result<Vec<AcquiredFire>, StoreError>;

    /// Revert an acquisition whose dispatch never started.
    async fn release_acquired_trigger(&self, fire_id: Uuid) -> Result<(), StoreError>;

    /// Record the outcome of a dispatched fire and reschedule or retire the
    /// trigger, atomically.
    async fn triggered_job_complete(
        &self,
        fire_id: Uuid,
        outcome: FireOutcome,
    ) -> Result<(), StoreError>;

    /// Earliest fire time across waiting triggers, for the engine's sleep.
    async fn next_fire_time(&self) -> Option<DateTime<Utc>>;

    async fn counts(&self) -> StoreCounts;

    /// Most recent completed fires, newest first.
    async fn recent_fires(&self, limit: usize) -> Vec<FireInstance>;

    /// Fires currently acquired or executing.
    async fn executing_fires(&self) -> Vec<FireInstance>;

    /// Startup invariant pass: every trigger references an existing job and
    /// every live trigger has a fire time. Failure is fatal to the engine.
    async fn validate(&self) -> Result<(), StoreError>;

    /// Signal raised on every mutation so the engine can wake early instead
    /// of waiting out its poll interval.
    fn change_signal(&self) -> Arc<Notify>;
}
