// Admin/introspection facade over the live scheduler.
//
// Reads never touch the engine's control loop beyond the store's read
// locking. Mutations return once durably applied to the store; execution
// happens later, when the run loop picks the change up. An external
// reporting layer (HTTP, CLI) wraps these methods; which of them it exposes
// is its policy, the facade only honors the read-only flag.

use crate::clock::Clock;
use crate::errors::{SchedulerError, SchedulerResult, StoreError};
use crate::models::{
    FireInstance, JobDefinition, JobKey, Schedule, SchedulerStatus, TriggerDefinition, TriggerKey,
    MANUAL_GROUP,
};
use crate::scheduler::SchedulerEngine;
use crate::store::JobStore;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Feature flags fixed at construction time by the embedding process.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// Whether the embedding process exposes this facade at all. The facade
    /// itself stays functional either way; the flag is for the outer layer.
    pub enabled: bool,
    /// When set, every mutating operation fails with `ReadOnly`.
    pub read_only: bool,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            read_only: false,
        }
    }
}

/// Administrative surface consumed by an external reporting layer.
pub struct SchedulerAdmin {
    store: Arc<dyn JobStore>,
    engine: Arc<SchedulerEngine>,
    clock: Arc<dyn Clock>,
    config: AdminConfig,
}

impl SchedulerAdmin {
    pub fn new(
        store: Arc<dyn JobStore>,
        engine: Arc<SchedulerEngine>,
        clock: Arc<dyn Clock>,
        config: AdminConfig,
    ) -> Self {
        Self {
            store,
            engine,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &AdminConfig {
        &self.config
    }

    fn ensure_writable(&self) -> SchedulerResult<()> {
        if self.config.read_only {
            return Err(SchedulerError::ReadOnly);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read operations
    // ------------------------------------------------------------------

    pub async fn status(&self) -> SchedulerStatus {
        self.engine.status().await
    }

    pub async fn list_jobs(&self) -> Vec<JobDefinition> {
        self.store.list_jobs().await
    }

    /// A job together with every trigger scheduled against it.
    pub async fn get_job(
        &self,
        key: &JobKey,
    ) -> SchedulerResult<(JobDefinition, Vec<TriggerDefinition>)> {
        let job = self
            .store
            .find_job(key)
            .await
            .ok_or_else(|| StoreError::JobNotFound(key.to_string()))?;
        let triggers = self.store.triggers_for_job(key).await;
        Ok((job, triggers))
    }

    pub async fn list_triggers(&self) -> Vec<TriggerDefinition> {
        self.store.list_triggers().await
    }

    pub async fn get_trigger(&self, key: &TriggerKey) -> SchedulerResult<TriggerDefinition> {
        let trigger = self
            .store
            .find_trigger(key)
            .await
            .ok_or_else(|| StoreError::TriggerNotFound(key.to_string()))?;
        Ok(trigger)
    }

    pub async fn job_groups(&self) -> Vec<String> {
        self.store.job_groups().await
    }

    /// Trigger group names, with the reserved manual group filtered out.
    pub async fn trigger_groups(&self) -> Vec<String> {
        self.store
            .trigger_groups()
            .await
            .into_iter()
            .filter(|g| g != MANUAL_GROUP)
            .collect()
    }

    pub async fn recent_fires(&self, limit: usize) -> Vec<FireInstance> {
        self.store.recent_fires(limit).await
    }

    // ------------------------------------------------------------------
    // Mutating operations
    // ------------------------------------------------------------------

    #[instrument(skip(self, job), fields(job_key = %job.key))]
    pub async fn add_job(&self, job: JobDefinition, replace: bool) -> SchedulerResult<()> {
        self.ensure_writable()?;
        self.store.store_job(job, replace).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_job(&self, key: &JobKey) -> SchedulerResult<()> {
        self.ensure_writable()?;
        self.store.remove_job(key).await?;
        Ok(())
    }

    /// Schedule a trigger against an existing job. The schedule is validated
    /// before it reaches the store so a malformed cron expression never
    /// becomes durable.
    #[instrument(skip(self, trigger), fields(trigger_key = %trigger.key))]
    pub async fn schedule_job(
        &self,
        trigger: TriggerDefinition,
        replace: bool,
    ) -> SchedulerResult<()> {
        self.ensure_writable()?;
        trigger.schedule.validate()?;
        self.store.store_trigger(trigger, replace).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn unschedule_job(&self, key: &TriggerKey) -> SchedulerResult<()> {
        self.ensure_writable()?;
        self.store.remove_trigger(key).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn pause_trigger(&self, key: &TriggerKey) -> SchedulerResult<()> {
        self.ensure_writable()?;
        self.store.pause_trigger(key).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn resume_trigger(&self, key: &TriggerKey) -> SchedulerResult<()> {
        self.ensure_writable()?;
        self.store.resume_trigger(key).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn pause_group(&self, group: &str) -> SchedulerResult<usize> {
        self.ensure_writable()?;
        Ok(self.store.pause_group(group).await?)
    }

    #[instrument(skip(self))]
    pub async fn resume_group(&self, group: &str) -> SchedulerResult<usize> {
        self.ensure_writable()?;
        Ok(self.store.resume_group(group).await?)
    }

    /// Fire a job now, out of band of its own triggers.
    ///
    /// Implemented as an immediate one-shot trigger in the reserved manual
    /// group: the request is durable in the store when this returns, and the
    /// run loop picks it up on its next iteration via the change signal.
    #[instrument(skip(self))]
    pub async fn trigger_job_now(&self, key: &JobKey) -> SchedulerResult<TriggerKey> {
        self.ensure_writable()?;
        let job = self
            .store
            .find_job(key)
            .await
            .ok_or_else(|| StoreError::JobNotFound(key.to_string()))?;

        let trigger_key =
            TriggerKey::with_group(format!("MT-{}", Uuid::new_v4()), MANUAL_GROUP);
        let trigger = TriggerDefinition::new(
            trigger_key.clone(),
            job.key.clone(),
            Schedule::Interval {
                start_at: self.clock.now(),
                interval_seconds: 1,
                repeat_count: Some(0),
                end_at: None,
            },
        );
        self.store.store_trigger(trigger, false).await?;
        info!(job_key = %key, trigger_key = %trigger_key, "Manual fire requested");
        Ok(trigger_key)
    }

    /// Put the whole scheduler in standby: acquisition halts, in-flight
    /// executions finish.
    #[instrument(skip(self))]
    pub async fn standby(&self) -> SchedulerResult<()> {
        self.ensure_writable()?;
        self.engine.pause().await
    }

    /// Leave standby and resume acquisition.
    #[instrument(skip(self))]
    pub async fn resume_scheduler(&self) -> SchedulerResult<()> {
        self.ensure_writable()?;
        self.engine.resume().await
    }
}
