// Scheduler daemon entry point: wires configuration, telemetry, the job
// store, the handler registry, and the engine together, then runs until
// SIGINT.

use anyhow::Context;
use async_trait::async_trait;
use common::admin::SchedulerAdmin;
use common::clock::SystemClock;
use common::config::Settings;
use common::errors::ExecutionError;
use common::executor::{HandlerRegistry, JobContext, JobHandler};
use common::models::{
    JobDataMap, JobDefinition, JobKey, MisfireInstruction, Schedule, TriggerDefinition, TriggerKey,
};
use common::store::{JobStore, MemoryJobStore};
use common::scheduler::SchedulerEngine;
use common::telemetry;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Built-in handler: logs the `message` entry of the job's data map.
/// Host applications embedding the library register their own handlers.
struct LogHandler;

#[async_trait]
impl JobHandler for LogHandler {
    async fn execute(&self, context: JobContext) -> Result<(), ExecutionError> {
        let message = context
            .data
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)");
        info!(job_key = %context.job_key, message, "Log job fired");
        Ok(())
    }
}

/// Shape of the optional initial-load file referenced by
/// `scheduler.jobs_file`.
#[derive(Debug, Deserialize)]
struct JobsFile {
    jobs: Vec<JobEntry>,
}

#[derive(Debug, Deserialize)]
struct JobEntry {
    name: String,
    group: Option<String>,
    handler_type: String,
    description: Option<String>,
    #[serde(default)]
    durable: bool,
    #[serde(default)]
    allow_concurrent: bool,
    #[serde(default)]
    data: JobDataMap,
    #[serde(default)]
    triggers: Vec<TriggerEntry>,
}

#[derive(Debug, Deserialize)]
struct TriggerEntry {
    name: String,
    group: Option<String>,
    schedule: Schedule,
    priority: Option<i32>,
    misfire_instruction: Option<MisfireInstruction>,
}

/// Seed the store with the jobs file before the engine starts. Initial load
/// writes the store directly; it is not an admin mutation, so it works in
/// read-only deployments too.
async fn load_jobs_file(path: &str, store: &Arc<MemoryJobStore>) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read jobs file {}", path))?;
    let file: JobsFile = serde_json::from_str(&raw).context("Failed to parse jobs file")?;

    for entry in file.jobs {
        let job_key = match &entry.group {
            Some(group) => JobKey::with_group(&entry.name, group),
            None => JobKey::new(&entry.name),
        };
        let mut job = JobDefinition::new(job_key.clone(), &entry.handler_type);
        job.description = entry.description;
        job.durable = entry.durable;
        job.allow_concurrent = entry.allow_concurrent;
        job.data = entry.data;
        store.store_job(job, true).await?;

        for trigger_entry in entry.triggers {
            let trigger_key = match &trigger_entry.group {
                Some(group) => TriggerKey::with_group(&trigger_entry.name, group),
                None => TriggerKey::new(&trigger_entry.name),
            };
            let mut trigger =
                TriggerDefinition::new(trigger_key, job_key.clone(), trigger_entry.schedule);
            if let Some(priority) = trigger_entry.priority {
                trigger.priority = priority;
            }
            if let Some(instruction) = trigger_entry.misfire_instruction {
                trigger.misfire_instruction = instruction;
            }
            store.store_trigger(trigger, true).await?;
        }
    }

    info!(path, "Initial jobs loaded");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let settings = Settings::load().context("Failed to load configuration")?;
    settings.validate().map_err(|e| anyhow::anyhow!(e))?;

    // Initialize tracing/logging and metrics
    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    telemetry::init_metrics(settings.observability.metrics_port)?;

    info!("Starting enterprise scheduler daemon");

    let clock = Arc::new(SystemClock);
    let store = Arc::new(MemoryJobStore::new(clock.clone(), settings.store_config()));

    let mut registry = HandlerRegistry::new();
    registry.register("log", Arc::new(LogHandler));
    let registry = Arc::new(registry);

    let engine = Arc::new(SchedulerEngine::new(
        settings.scheduler_config(),
        store.clone(),
        registry,
        clock.clone(),
    ));
    let admin = Arc::new(SchedulerAdmin::new(
        store.clone(),
        engine.clone(),
        clock,
        settings.admin_config(),
    ));
    if admin.config().enabled {
        info!(
            read_only = admin.config().read_only,
            "Admin facade enabled"
        );
    } else {
        info!("Admin facade disabled by configuration");
    }

    if let Some(path) = &settings.scheduler.jobs_file {
        load_jobs_file(path, &store).await?;
    }

    // Graceful shutdown on Ctrl+C
    let engine_for_shutdown = engine.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C signal, initiating graceful shutdown");
        if let Err(e) = engine_for_shutdown.shutdown().await {
            warn!(error = %e, "Shutdown finished with warnings");
        }
    });

    // Run until shutdown
    engine.start().await?;

    let status = admin.status().await;
    info!(
        fired_total = status.fired_total,
        misfired_total = status.misfired_total,
        "Scheduler stopped"
    );
    telemetry::shutdown_tracer();
    Ok(())
}
