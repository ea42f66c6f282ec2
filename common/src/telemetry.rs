// Telemetry module for structured logging, metrics, and tracing

use crate::models::{JobKey, TriggerKey};
use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging with JSON formatting and trace context
///
/// This function sets up the tracing subscriber with:
/// - JSON formatting for structured logs
/// - Trace context (trace_id, span_id) in all log entries
/// - Log levels from configuration or environment
/// - Optional OpenTelemetry integration
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    // Create environment filter from log level
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    // Create JSON formatting layer with trace context
    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    // Initialize the subscriber with optional OpenTelemetry layer
    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        // Initialize OpenTelemetry if endpoint is provided
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized with JSON formatting"
    );

    Ok(())
}

/// Initialize OpenTelemetry tracer with OTLP exporter
///
/// This function sets up OpenTelemetry tracing with:
/// - OTLP exporter to send traces to a collector (e.g., Jaeger)
/// - Service name and version as resource attributes
/// - Random ID generator for trace and span IDs
/// - Always-on sampler for all traces
#[tracing::instrument(skip_all)]
fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    // Create OTLP exporter
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    // Create tracer provider with resource attributes
    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", "enterprise-scheduler"),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    // Set global tracer provider
    global::set_tracer_provider(tracer_provider.clone());

    // Get tracer
    let tracer = tracer_provider.tracer("enterprise-scheduler");

    tracing::info!(
        endpoint = endpoint,
        "OpenTelemetry tracer initialized with OTLP exporter"
    );

    Ok(tracer)
}

/// Shutdown OpenTelemetry tracer provider
///
/// This should be called on graceful shutdown to flush remaining spans
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Initialize Prometheus metrics exporter
///
/// This function sets up the Prometheus metrics exporter and registers all
/// scheduler metrics:
/// - fire_success_total: Counter for successful fires
/// - fire_failed_total: Counter for failed fires
/// - fire_duration_seconds: Histogram for handler execution duration
/// - trigger_misfires_total: Counter for triggers past the misfire threshold
/// - worker_pool_rejections_total: Counter for dispatches rejected on saturation
/// - executing_jobs: Gauge for fires currently in flight
#[tracing::instrument(skip_all)]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    // Build and install the Prometheus exporter
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    // Describe all metrics for better Prometheus integration
    describe_counter!("fire_success_total", "Total number of successful fires");
    describe_counter!("fire_failed_total", "Total number of failed fires");
    describe_histogram!(
        "fire_duration_seconds",
        "Duration of job handler executions in seconds"
    );
    describe_counter!(
        "trigger_misfires_total",
        "Total number of triggers that passed the misfire threshold"
    );
    describe_counter!(
        "worker_pool_rejections_total",
        "Total number of dispatches rejected because the worker pool was saturated"
    );
    describe_gauge!("executing_jobs", "Number of fires currently in flight");

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

/// Record a successful fire
#[inline]
pub fn record_fire_success(job_key: &JobKey) {
    counter!(
        "fire_success_total",
        "job_group" => job_key.group.clone(),
        "job_name" => job_key.name.clone()
    )
    .increment(1);
}

/// Record a failed fire
#[inline]
pub fn record_fire_failure(job_key: &JobKey, reason: &str) {
    counter!(
        "fire_failed_total",
        "job_group" => job_key.group.clone(),
        "job_name" => job_key.name.clone(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record handler execution duration
#[inline]
pub fn record_fire_duration(job_key: &JobKey, duration_seconds: f64) {
    histogram!(
        "fire_duration_seconds",
        "job_group" => job_key.group.clone(),
        "job_name" => job_key.name.clone()
    )
    .record(duration_seconds);
}

/// Record a trigger that passed the misfire threshold
#[inline]
pub fn record_misfire(trigger_key: &TriggerKey) {
    counter!(
        "trigger_misfires_total",
        "trigger_group" => trigger_key.group.clone(),
        "trigger_name" => trigger_key.name.clone()
    )
    .increment(1);
}

/// Record a dispatch rejected because the worker pool was saturated
#[inline]
pub fn record_pool_saturation() {
    counter!("worker_pool_rejections_total").increment(1);
}

/// Update the in-flight fires gauge
#[inline]
pub fn update_executing_jobs(count: i64) {
    gauge!("executing_jobs").set(count as f64);
}
