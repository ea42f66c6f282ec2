// Handler dispatch: jobs reference their executable work by a handler type
// identifier, resolved against this registry at dispatch time.

use crate::errors::ExecutionError;
use crate::models::{JobDataMap, JobKey, TriggerKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Everything a handler gets to see about the fire it is serving.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub fire_id: Uuid,
    pub job_key: JobKey,
    pub trigger_key: TriggerKey,
    /// The fire time the trigger was due for.
    pub scheduled_at: DateTime<Utc>,
    /// When the engine actually dispatched it.
    pub fired_at: DateTime<Utc>,
    /// The job's data payload, opaque to the core.
    pub data: JobDataMap,
}

/// JobHandler executes the work a job stands for.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, context: JobContext) -> Result<(), ExecutionError>;
}

/// Registry mapping handler type identifiers to implementations.
///
/// Populated once during startup, then shared immutably with the engine; a
/// fire whose job names an unregistered type is vetoed, not an engine error.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a type identifier, replacing any previous one.
    pub fn register(&mut self, handler_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let handler_type = handler_type.into();
        info!(handler_type = %handler_type, "Job handler registered");
        self.handlers.insert(handler_type, handler);
    }

    pub fn get(&self, handler_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(handler_type).cloned()
    }

    /// Sorted list of registered type identifiers.
    pub fn handler_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}
