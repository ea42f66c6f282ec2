use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Group assigned to jobs and triggers created without an explicit group.
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// Reserved group for the one-shot triggers created by trigger-now requests.
pub const MANUAL_GROUP: &str = "MANUAL";

/// Default trigger priority; higher priorities fire first on equal fire times.
pub const DEFAULT_PRIORITY: i32 = 5;

// Helper functions for Tz serialization
fn serialize_tz<S>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&tz.to_string())
}

fn deserialize_tz<'de, D>(deserializer: D) -> Result<Tz, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Tz::from_str(&s).map_err(serde::de::Error::custom)
}

fn default_timezone() -> Tz {
    chrono_tz::UTC
}

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier of a job within the store: (name, group).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub name: String,
    pub group: String,
}

impl JobKey {
    /// Create a key in the default group.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_group(name, DEFAULT_GROUP)
    }

    /// Create a key in an explicit group.
    pub fn with_group(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Unique identifier of a trigger within the store: (name, group).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerKey {
    pub name: String,
    pub group: String,
}

impl TriggerKey {
    /// Create a key in the default group.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_group(name, DEFAULT_GROUP)
    }

    /// Create a key in an explicit group.
    pub fn with_group(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

// ============================================================================
// Job Models
// ============================================================================

/// Opaque payload handed to the job handler on every fire.
pub type JobDataMap = HashMap<String, serde_json::Value>;

/// JobDefinition represents a unit of executable work, identified
/// independently of its schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub key: JobKey,
    /// Handler type identifier, resolved against the handler registry at
    /// dispatch time.
    pub handler_type: String,
    pub description: Option<String>,
    /// Durable jobs are retained in the store even with no triggers left.
    pub durable: bool,
    /// When false, at most one fire of this job may be in flight at a time.
    pub allow_concurrent: bool,
    #[serde(default)]
    pub data: JobDataMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobDefinition {
    /// Create a non-durable, non-concurrent job definition with an empty
    /// data map.
    pub fn new(key: JobKey, handler_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key,
            handler_type: handler_type.into(),
            description: None,
            durable: false,
            allow_concurrent: false,
            data: JobDataMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// Schedule Models
// ============================================================================

/// Schedule defines when a trigger fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Quartz-syntax cron expression (seconds precision), evaluated in the
    /// given timezone.
    Cron {
        expression: String,
        #[serde(
            default = "default_timezone",
            serialize_with = "serialize_tz",
            deserialize_with = "deserialize_tz"
        )]
        timezone: Tz,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_at: Option<DateTime<Utc>>,
    },
    /// Fixed-interval schedule: fires at `start_at`, then every
    /// `interval_seconds`, `repeat_count + 1` times in total when a repeat
    /// count is set.
    Interval {
        start_at: DateTime<Utc>,
        interval_seconds: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repeat_count: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_at: Option<DateTime<Utc>>,
    },
}

/// What to do with a trigger whose fire time passed the misfire threshold
/// before it could be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MisfireInstruction {
    /// Fire immediately once, then continue from the present.
    #[default]
    FireNow,
    /// Drop every missed occurrence and continue from the next future one.
    Skip,
    /// Advance exactly one occurrence past the missed one without firing.
    RescheduleNext,
}

// ============================================================================
// Trigger Models
// ============================================================================

/// TriggerState represents the lifecycle state of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    /// Eligible for acquisition when due.
    Waiting,
    /// Claimed by the engine for an imminent or in-flight fire.
    Acquired,
    /// Excluded from acquisition until resumed.
    Paused,
    /// Due, but its job disallows concurrent execution and a fire is
    /// outstanding.
    Blocked,
    /// Schedule exhausted; kept for introspection, never fires again.
    Complete,
    /// Faulted (e.g. no handler registered); excluded until resumed.
    Error,
}

impl fmt::Display for TriggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerState::Waiting => write!(f, "waiting"),
            TriggerState::Acquired => write!(f, "acquired"),
            TriggerState::Paused => write!(f, "paused"),
            TriggerState::Blocked => write!(f, "blocked"),
            TriggerState::Complete => write!(f, "complete"),
            TriggerState::Error => write!(f, "error"),
        }
    }
}

/// TriggerDefinition binds a schedule and firing state to a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub key: TriggerKey,
    pub job_key: JobKey,
    pub schedule: Schedule,
    pub priority: i32,
    pub state: TriggerState,
    pub misfire_instruction: MisfireInstruction,
    /// Next planned fire time; None only for Complete/Paused/Error triggers.
    pub next_fire_at: Option<DateTime<Utc>>,
    pub previous_fire_at: Option<DateTime<Utc>>,
    pub times_fired: u32,
    /// Message of the most recent handler failure, if any.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TriggerDefinition {
    /// Create a waiting trigger with default priority and misfire policy.
    /// The store computes `next_fire_at` when the trigger is inserted.
    pub fn new(key: TriggerKey, job_key: JobKey, schedule: Schedule) -> Self {
        Self {
            key,
            job_key,
            schedule,
            priority: DEFAULT_PRIORITY,
            state: TriggerState::Waiting,
            misfire_instruction: MisfireInstruction::default(),
            next_fire_at: None,
            previous_fire_at: None,
            times_fired: 0,
            last_error: None,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Fire Instance Models
// ============================================================================

/// Outcome of a single dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FireOutcome {
    Success,
    Failed { error: String },
    Vetoed { reason: String },
}

impl fmt::Display for FireOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FireOutcome::Success => write!(f, "success"),
            FireOutcome::Failed { .. } => write!(f, "failed"),
            FireOutcome::Vetoed { .. } => write!(f, "vetoed"),
        }
    }
}

/// FireInstance is the ephemeral record of one dispatch of a trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FireInstance {
    /// Unique per dispatch; used for completion and concurrency accounting.
    pub id: Uuid,
    pub trigger_key: TriggerKey,
    pub job_key: JobKey,
    /// The fire time the trigger was due for.
    pub scheduled_at: DateTime<Utc>,
    /// When the engine actually picked it up.
    pub fired_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcome: Option<FireOutcome>,
}

impl FireInstance {
    /// Create a new in-flight fire instance.
    pub fn new(
        trigger_key: TriggerKey,
        job_key: JobKey,
        scheduled_at: DateTime<Utc>,
        fired_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger_key,
            job_key,
            scheduled_at,
            fired_at,
            completed_at: None,
            outcome: None,
        }
    }
}

// ============================================================================
// Scheduler Status Models
// ============================================================================

/// SchedulerState is the engine's lifecycle state machine:
/// Stopped -> Starting -> Running <-> Paused -> ShuttingDown -> Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Starting,
    Running,
    Paused,
    ShuttingDown,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Stopped => write!(f, "stopped"),
            SchedulerState::Starting => write!(f, "starting"),
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::Paused => write!(f, "paused"),
            SchedulerState::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

/// Aggregate counters maintained by the job store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StoreCounts {
    pub jobs: usize,
    pub triggers: usize,
    pub executing: usize,
    pub fired_total: u64,
    pub misfired_total: u64,
}

/// SchedulerStatus is the aggregate snapshot served to the reporting layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub job_count: usize,
    pub trigger_count: usize,
    pub executing_count: usize,
    pub next_fire_at: Option<DateTime<Utc>>,
    pub fired_total: u64,
    pub misfired_total: u64,
}
