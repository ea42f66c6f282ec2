// Error handling framework: one enum per concern, plus the umbrella
// SchedulerError surfaced by the engine and the admin facade.

use thiserror::Error;
use uuid::Uuid;

/// Schedule-related errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid schedule configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Schedule is already exhausted, no next fire time")]
    NoNextFireTime,
}

/// Job store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Trigger not found: {0}")]
    TriggerNotFound(String),

    #[error("Fire instance not found: {0}")]
    FireInstanceNotFound(Uuid),

    #[error("Identifier already in use: {0}")]
    Conflict(String),

    #[error("Store invariant violated: {0}")]
    CorruptedStore(String),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// Job execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("No handler registered for type: {0}")]
    HandlerNotFound(String),

    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    #[error("Worker pool saturated, dispatch rejected")]
    PoolSaturated,
}

/// Umbrella error for the scheduler engine and admin facade
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Scheduler is in read-only mode")]
    ReadOnly,

    #[error("Invalid scheduler state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Shutdown grace period exceeded, {abandoned} execution(s) abandoned")]
    ShutdownTimeout { abandoned: usize },
}

/// Convenience alias used throughout the engine and facade.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
