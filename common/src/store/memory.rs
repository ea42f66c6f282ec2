// In-memory job store.
//
// All state lives behind one RwLock; every acquisition and state transition
// takes the write lock, which makes `acquire_next_triggers` linearizable:
// a trigger claimed by one caller is in Acquired state before any other
// caller can observe it, so the same trigger is never handed out twice.

use crate::clock::Clock;
use crate::errors::StoreError;
use crate::models::{
    FireInstance, FireOutcome, JobDefinition, JobKey, MisfireInstruction, StoreCounts,
    TriggerDefinition, TriggerKey, TriggerState,
};
use crate::store::{AcquiredFire, JobStore, StoreConfig};
use crate::telemetry;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobKey, JobDefinition>,
    triggers: HashMap<TriggerKey, TriggerDefinition>,
    in_flight: HashMap<Uuid, FireInstance>,
    executing_jobs: HashMap<JobKey, usize>,
    history: VecDeque<FireInstance>,
    fired_total: u64,
    misfired_total: u64,
}

/// In-memory [`JobStore`] implementation.
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
    change: Arc<Notify>,
}

impl MemoryJobStore {
    /// Create an empty store.
    pub fn new(clock: Arc<dyn Clock>, config: StoreConfig) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
            config,
            change: Arc::new(Notify::new()),
        }
    }

    fn notify_change(&self) {
        self.change.notify_one();
    }
}

/// Advance a trigger past `after`. Returns true when the schedule is
/// exhausted, in which case the trigger is retired to Complete and kept for
/// introspection.
fn advance_trigger(
    trigger: &mut TriggerDefinition,
    after: DateTime<Utc>,
) -> Result<bool, StoreError> {
    match trigger.schedule.next_fire_time(after)? {
        Some(next) => {
            trigger.next_fire_at = Some(next);
            Ok(false)
        }
        None => {
            trigger.next_fire_at = None;
            trigger.state = TriggerState::Complete;
            Ok(true)
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    #[instrument(skip(self, job), fields(job_key = %job.key))]
    async fn store_job(&self, mut job: JobDefinition, replace: bool) -> Result<(), StoreError> {
        let now = self.clock.now();
        {
            let mut inner = self.inner.write().await;
            if let Some(existing) = inner.jobs.get(&job.key) {
                if !replace {
                    return Err(StoreError::Conflict(job.key.to_string()));
                }
                job.created_at = existing.created_at;
                job.updated_at = now;
            }
            info!(job_key = %job.key, handler_type = %job.handler_type, replace, "Job stored");
            inner.jobs.insert(job.key.clone(), job);
        }
        self.notify_change();
        Ok(())
    }

    #[instrument(skip(self, trigger), fields(trigger_key = %trigger.key, job_key = %trigger.job_key))]
    async fn store_trigger(
        &self,
        mut trigger: TriggerDefinition,
        replace: bool,
    ) -> Result<(), StoreError> {
        trigger.schedule.validate()?;
        let now = self.clock.now();
        {
            let mut inner = self.inner.write().await;
            if !inner.jobs.contains_key(&trigger.job_key) {
                return Err(StoreError::JobNotFound(trigger.job_key.to_string()));
            }
            if inner.triggers.contains_key(&trigger.key) && !replace {
                return Err(StoreError::Conflict(trigger.key.to_string()));
            }
            let first = trigger
                .schedule
                .first_fire_time(now)?
                .ok_or(crate::errors::ScheduleError::NoNextFireTime)?;
            trigger.next_fire_at = Some(first);
            trigger.state = TriggerState::Waiting;
            info!(
                trigger_key = %trigger.key,
                next_fire_at = %first,
                "Trigger stored"
            );
            inner.triggers.insert(trigger.key.clone(), trigger);
        }
        self.notify_change();
        Ok(())
    }

    async fn find_job(&self, key: &JobKey) -> Option<JobDefinition> {
        self.inner.read().await.jobs.get(key).cloned()
    }

    async fn find_trigger(&self, key: &TriggerKey) -> Option<TriggerDefinition> {
        self.inner.read().await.triggers.get(key).cloned()
    }

    async fn list_jobs(&self) -> Vec<JobDefinition> {
        let mut jobs: Vec<_> = self.inner.read().await.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| (&a.key.group, &a.key.name).cmp(&(&b.key.group, &b.key.name)));
        jobs
    }

    async fn list_triggers(&self) -> Vec<TriggerDefinition> {
        let mut triggers: Vec<_> = self.inner.read().await.triggers.values().cloned().collect();
        triggers.sort_by(|a, b| (&a.key.group, &a.key.name).cmp(&(&b.key.group, &b.key.name)));
        triggers
    }

    async fn triggers_for_job(&self, key: &JobKey) -> Vec<TriggerDefinition> {
        self.inner
            .read()
            .await
            .triggers
            .values()
            .filter(|t| &t.job_key == key)
            .cloned()
            .collect()
    }

    async fn job_groups(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let groups: BTreeSet<String> = inner.jobs.keys().map(|k| k.group.clone()).collect();
        groups.into_iter().collect()
    }

    async fn trigger_groups(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let groups: BTreeSet<String> = inner.triggers.keys().map(|k| k.group.clone()).collect();
        groups.into_iter().collect()
    }

    #[instrument(skip(self))]
    async fn remove_job(&self, key: &JobKey) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.write().await;
            if inner.jobs.remove(key).is_none() {
                return Err(StoreError::JobNotFound(key.to_string()));
            }
            inner.triggers.retain(|_, t| &t.job_key != key);
            info!(job_key = %key, "Job and its triggers removed");
        }
        self.notify_change();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_trigger(&self, key: &TriggerKey) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.write().await;
            let trigger = inner
                .triggers
                .remove(key)
                .ok_or_else(|| StoreError::TriggerNotFound(key.to_string()))?;

            // Non-durable jobs do not outlive their last trigger.
            let job_key = trigger.job_key;
            let orphaned = inner.triggers.values().all(|t| t.job_key != job_key);
            if orphaned {
                if let Some(job) = inner.jobs.get(&job_key) {
                    if !job.durable {
                        inner.jobs.remove(&job_key);
                        info!(job_key = %job_key, "Non-durable job removed with its last trigger");
                    }
                }
            }
        }
        self.notify_change();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn pause_trigger(&self, key: &TriggerKey) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.write().await;
            let trigger = inner
                .triggers
                .get_mut(key)
                .ok_or_else(|| StoreError::TriggerNotFound(key.to_string()))?;
            if trigger.state != TriggerState::Complete {
                trigger.state = TriggerState::Paused;
                debug!(trigger_key = %key, "Trigger paused");
            }
        }
        self.notify_change();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn resume_trigger(&self, key: &TriggerKey) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.write().await;
            let trigger = inner
                .triggers
                .get_mut(key)
                .ok_or_else(|| StoreError::TriggerNotFound(key.to_string()))?;
            if matches!(trigger.state, TriggerState::Paused | TriggerState::Error) {
                trigger.state = TriggerState::Waiting;
                debug!(trigger_key = %key, "Trigger resumed");
            }
        }
        self.notify_change();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn pause_group(&self, group: &str) -> Result<usize, StoreError> {
        let mut count = 0;
        {
            let mut inner = self.inner.write().await;
            for trigger in inner.triggers.values_mut() {
                if trigger.key.group == group && trigger.state != TriggerState::Complete {
                    trigger.state = TriggerState::Paused;
                    count += 1;
                }
            }
            info!(group, count, "Trigger group paused");
        }
        self.notify_change();
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn resume_group(&self, group: &str) -> Result<usize, StoreError> {
        let mut count = 0;
        {
            let mut inner = self.inner.write().await;
            for trigger in inner.triggers.values_mut() {
                if trigger.key.group == group
                    && matches!(trigger.state, TriggerState::Paused | TriggerState::Error)
                {
                    trigger.state = TriggerState::Waiting;
                    count += 1;
                }
            }
            info!(group, count, "Trigger group resumed");
        }
        self.notify_change();
        Ok(count)
    }

    #[instrument(skip(self), fields(no_later_than = %no_later_than))]
    async fn acquire_next_triggers(
        &self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: Duration,
    ) -> Result<Vec<AcquiredFire>, StoreError> {
        let now = self.clock.now();
        let misfire_threshold = Duration::seconds(self.config.misfire_threshold_seconds as i64);
        let cutoff = no_later_than + time_window;

        let mut inner = self.inner.write().await;
        let inner = &mut *inner;

        let mut due: Vec<(DateTime<Utc>, i32, TriggerKey)> = inner
            .triggers
            .values()
            .filter(|t| matches!(t.state, TriggerState::Waiting | TriggerState::Blocked))
            .filter_map(|t| t.next_fire_at.map(|at| (at, t.priority, t.key.clone())))
            .filter(|(at, _, _)| *at <= cutoff)
            .collect();
        due.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)));

        let mut acquired = Vec::new();
        for (fire_at, _, key) in due {
            if acquired.len() >= max_count {
                break;
            }
            let Some(trigger) = inner.triggers.get_mut(&key) else {
                continue;
            };

            if now.signed_duration_since(fire_at) > misfire_threshold {
                inner.misfired_total += 1;
                telemetry::record_misfire(&key);
                warn!(
                    trigger_key = %key,
                    scheduled_at = %fire_at,
                    instruction = ?trigger.misfire_instruction,
                    "Trigger misfired past threshold"
                );
                match trigger.misfire_instruction {
                    // Fire one compensating shot at the present instant; the
                    // reschedule after completion then continues from now,
                    // so the missed backlog never replays as a storm.
                    MisfireInstruction::FireNow => {
                        trigger.next_fire_at = Some(now);
                    }
                    MisfireInstruction::Skip => {
                        if !advance_trigger(trigger, now)? {
                            trigger.state = TriggerState::Waiting;
                        }
                        continue;
                    }
                    MisfireInstruction::RescheduleNext => {
                        if !advance_trigger(trigger, fire_at)? {
                            trigger.state = TriggerState::Waiting;
                        }
                        continue;
                    }
                }
            }

            let job = match inner.jobs.get(&trigger.job_key) {
                Some(job) => job.clone(),
                None => {
                    warn!(
                        trigger_key = %key,
                        job_key = %trigger.job_key,
                        "Trigger references a missing job, faulting it"
                    );
                    trigger.state = TriggerState::Error;
                    trigger.last_error = Some(format!("job {} not found", trigger.job_key));
                    continue;
                }
            };

            if !job.allow_concurrent
                && inner
                    .executing_jobs
                    .get(&trigger.job_key)
                    .copied()
                    .unwrap_or(0)
                    > 0
            {
                trigger.state = TriggerState::Blocked;
                debug!(trigger_key = %key, "Trigger blocked, job already executing");
                continue;
            }

            let Some(scheduled_at) = trigger.next_fire_at else {
                continue;
            };
            trigger.state = TriggerState::Acquired;
            let fire = FireInstance::new(
                trigger.key.clone(),
                trigger.job_key.clone(),
                scheduled_at,
                now,
            );
            *inner
                .executing_jobs
                .entry(trigger.job_key.clone())
                .or_insert(0) += 1;
            inner.in_flight.insert(fire.id, fire.clone());
            debug!(trigger_key = %key, fire_id = %fire.id, "Trigger acquired");
            acquired.push(AcquiredFire {
                job,
                trigger: trigger.clone(),
                fire,
            });
        }

        Ok(acquired)
    }

    #[instrument(skip(self))]
    async fn release_acquired_trigger(&self, fire_id: Uuid) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.write().await;
            let inner = &mut *inner;
            let fire = inner
                .in_flight
                .remove(&fire_id)
                .ok_or(StoreError::FireInstanceNotFound(fire_id))?;

            let drained = match inner.executing_jobs.get_mut(&fire.job_key) {
                Some(count) => {
                    *count = count.saturating_sub(1);
                    *count == 0
                }
                None => false,
            };
            if drained {
                inner.executing_jobs.remove(&fire.job_key);
            }

            if let Some(trigger) = inner.triggers.get_mut(&fire.trigger_key) {
                if trigger.state == TriggerState::Acquired {
                    trigger.state = TriggerState::Waiting;
                }
            }
            debug!(fire_id = %fire_id, trigger_key = %fire.trigger_key, "Acquisition released");
        }
        self.notify_change();
        Ok(())
    }

    #[instrument(skip(self, outcome), fields(outcome = %outcome))]
    async fn triggered_job_complete(
        &self,
        fire_id: Uuid,
        outcome: FireOutcome,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        {
            let mut inner = self.inner.write().await;
            let inner = &mut *inner;
            let mut fire = inner
                .in_flight
                .remove(&fire_id)
                .ok_or(StoreError::FireInstanceNotFound(fire_id))?;
            fire.completed_at = Some(now);
            fire.outcome = Some(outcome.clone());

            let drained = match inner.executing_jobs.get_mut(&fire.job_key) {
                Some(count) => {
                    *count = count.saturating_sub(1);
                    *count == 0
                }
                None => false,
            };
            if drained {
                inner.executing_jobs.remove(&fire.job_key);
            }

            inner.fired_total += 1;
            inner.history.push_front(fire.clone());
            inner.history.truncate(self.config.fire_history_size);

            // The trigger (or its job) may have been deleted mid-flight;
            // the fire record alone is kept in that case.
            if let Some(trigger) = inner.triggers.get_mut(&fire.trigger_key) {
                trigger.previous_fire_at = Some(fire.scheduled_at);
                trigger.times_fired += 1;
                let was_paused = trigger.state == TriggerState::Paused;
                match &outcome {
                    FireOutcome::Vetoed { reason } => {
                        trigger.state = TriggerState::Error;
                        trigger.last_error = Some(reason.clone());
                        warn!(trigger_key = %trigger.key, reason, "Fire vetoed, trigger faulted");
                    }
                    FireOutcome::Failed { error } => {
                        trigger.last_error = Some(error.clone());
                        if !advance_trigger(trigger, fire.scheduled_at)? {
                            trigger.state = if was_paused {
                                TriggerState::Paused
                            } else {
                                TriggerState::Waiting
                            };
                        }
                    }
                    FireOutcome::Success => {
                        if !advance_trigger(trigger, fire.scheduled_at)? {
                            trigger.state = if was_paused {
                                TriggerState::Paused
                            } else {
                                TriggerState::Waiting
                            };
                        }
                    }
                }
                debug!(
                    trigger_key = %trigger.key,
                    state = %trigger.state,
                    next_fire_at = ?trigger.next_fire_at,
                    "Fire completed"
                );
            }

            // Triggers held back by this job's no-concurrency rule can run.
            for trigger in inner.triggers.values_mut() {
                if trigger.state == TriggerState::Blocked && trigger.job_key == fire.job_key {
                    trigger.state = TriggerState::Waiting;
                }
            }
        }
        self.notify_change();
        Ok(())
    }

    async fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .await
            .triggers
            .values()
            .filter(|t| t.state == TriggerState::Waiting)
            .filter_map(|t| t.next_fire_at)
            .min()
    }

    async fn counts(&self) -> StoreCounts {
        let inner = self.inner.read().await;
        StoreCounts {
            jobs: inner.jobs.len(),
            triggers: inner.triggers.len(),
            executing: inner.in_flight.len(),
            fired_total: inner.fired_total,
            misfired_total: inner.misfired_total,
        }
    }

    async fn recent_fires(&self, limit: usize) -> Vec<FireInstance> {
        self.inner
            .read()
            .await
            .history
            .iter()
            .take(limit)
            .cloned()
            .collect()
    }

    async fn executing_fires(&self) -> Vec<FireInstance> {
        self.inner
            .read()
            .await
            .in_flight
            .values()
            .cloned()
            .collect()
    }

    async fn validate(&self) -> Result<(), StoreError> {
        let inner = self.inner.read().await;
        for trigger in inner.triggers.values() {
            if !inner.jobs.contains_key(&trigger.job_key) {
                return Err(StoreError::CorruptedStore(format!(
                    "trigger {} references missing job {}",
                    trigger.key, trigger.job_key
                )));
            }
            let live = matches!(
                trigger.state,
                TriggerState::Waiting | TriggerState::Acquired | TriggerState::Blocked
            );
            if live && trigger.next_fire_at.is_none() {
                return Err(StoreError::CorruptedStore(format!(
                    "trigger {} is {} with no next fire time",
                    trigger.key, trigger.state
                )));
            }
        }
        Ok(())
    }

    fn change_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.change)
    }
}
