// Configuration management with layered configuration (file, env)

use crate::admin::AdminConfig;
use crate::scheduler::SchedulerConfig;
use crate::store::StoreConfig;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub scheduler: SchedulerSettings,
    pub store: StoreSettings,
    pub admin: AdminSettings,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Upper bound on how long the run loop sleeps between polls
    pub poll_interval_seconds: u64,
    /// Maximum triggers acquired per poll
    pub batch_size: usize,
    /// How far ahead of their fire time triggers may be acquired
    pub time_window_seconds: u64,
    /// Worker pool size
    pub worker_concurrency: usize,
    /// How long shutdown waits for in-flight executions
    pub shutdown_grace_seconds: u64,
    /// Optional JSON file with jobs and triggers loaded at startup
    pub jobs_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Lateness beyond which a trigger's misfire instruction applies
    pub misfire_threshold_seconds: u64,
    /// Completed fire instances retained for introspection
    pub fire_history_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSettings {
    pub enabled: bool,
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
    pub tracing_endpoint: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults -> file -> env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default configuration
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // Add environment-specific configuration
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.scheduler.poll_interval_seconds == 0 {
            return Err("Scheduler poll_interval_seconds must be greater than 0".to_string());
        }
        if self.scheduler.batch_size == 0 {
            return Err("Scheduler batch_size must be greater than 0".to_string());
        }
        if self.scheduler.worker_concurrency == 0 {
            return Err("Scheduler worker_concurrency must be greater than 0".to_string());
        }

        if self.store.misfire_threshold_seconds == 0 {
            return Err("Store misfire_threshold_seconds must be greater than 0".to_string());
        }
        if self.store.fire_history_size == 0 {
            return Err("Store fire_history_size must be greater than 0".to_string());
        }

        if self.observability.metrics_port == 0 {
            return Err("Metrics port must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Runtime configuration for the scheduler engine.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval_seconds: self.scheduler.poll_interval_seconds,
            batch_size: self.scheduler.batch_size,
            time_window_seconds: self.scheduler.time_window_seconds,
            worker_concurrency: self.scheduler.worker_concurrency,
            shutdown_grace_seconds: self.scheduler.shutdown_grace_seconds,
        }
    }

    /// Runtime configuration for the job store.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            misfire_threshold_seconds: self.store.misfire_threshold_seconds,
            fire_history_size: self.store.fire_history_size,
        }
    }

    /// Feature flags for the admin facade.
    pub fn admin_config(&self) -> AdminConfig {
        AdminConfig {
            enabled: self.admin.enabled,
            read_only: self.admin.read_only,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scheduler: SchedulerSettings {
                poll_interval_seconds: 10,
                batch_size: 32,
                time_window_seconds: 0,
                worker_concurrency: 8,
                shutdown_grace_seconds: 30,
                jobs_file: None,
            },
            store: StoreSettings {
                misfire_threshold_seconds: 60,
                fire_history_size: 100,
            },
            admin: AdminSettings {
                enabled: true,
                read_only: false,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: 9090,
                tracing_endpoint: None,
            },
        }
    }
}
