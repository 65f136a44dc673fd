//! OpenTelemetry integration for band-sync
//!
//! This module provides observability through OpenTelemetry: OTLP trace and
//! metric export plus the sync metrics recorded by the worker and scheduler.

use crate::config::{LoggingConfig, OtelConfig};
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter, MeterProvider as _},
    trace::TracerProvider as TracerProviderTrait,
    KeyValue,
};
use opentelemetry_sdk::{metrics::SdkMeterProvider, trace::TracerProvider, Resource};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// OpenTelemetry error types
#[derive(Debug, Error)]
pub enum OtelError {
    /// Failed to initialize tracer
    #[error("Failed to initialize tracer: {0}")]
    TracerInit(String),

    /// Failed to initialize meter
    #[error("Failed to initialize meter: {0}")]
    MeterInit(String),

    /// Failed to shutdown
    #[error("Failed to shutdown: {0}")]
    Shutdown(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Tracing and metrics providers with optional OTLP export
pub struct OtelProvider {
    tracer_provider: Option<TracerProvider>,
    meter_provider: SdkMeterProvider,
    config: OtelConfig,
}

impl OtelProvider {
    /// Create a new OtelProvider with the given configuration
    pub fn new(config: &OtelConfig) -> Result<Self, OtelError> {
        let resource = Resource::new(vec![KeyValue::new(
            "service.name",
            config.service_name.clone(),
        )]);

        let (tracer_provider, meter_provider) = if config.enabled {
            let endpoint = config.endpoint.as_ref().ok_or_else(|| {
                OtelError::Config("OTLP endpoint is required when enabled".into())
            })?;

            let tracer_provider = Self::init_tracer_provider(endpoint, &resource)?;
            let meter_provider = Self::init_meter_provider(endpoint, &resource)?;
            (Some(tracer_provider), meter_provider)
        } else {
            // Metrics are still recorded, just never exported
            let meter_provider = SdkMeterProvider::builder().with_resource(resource).build();
            (None, meter_provider)
        };

        if let Some(ref tp) = tracer_provider {
            global::set_tracer_provider(tp.clone());
        }

        Ok(Self {
            tracer_provider,
            meter_provider,
            config: config.clone(),
        })
    }

    fn init_tracer_provider(
        endpoint: &str,
        resource: &Resource,
    ) -> Result<TracerProvider, OtelError> {
        use opentelemetry_otlp::WithExportConfig;
        use opentelemetry_sdk::runtime;
        use opentelemetry_sdk::trace::{Config, Sampler};

        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint)
            .build_span_exporter()
            .map_err(|e| OtelError::TracerInit(e.to_string()))?;

        let trace_config = Config::default()
            .with_sampler(Sampler::AlwaysOn)
            .with_resource(resource.clone());

        Ok(TracerProvider::builder()
            .with_batch_exporter(exporter, runtime::Tokio)
            .with_config(trace_config)
            .build())
    }

    fn init_meter_provider(
        endpoint: &str,
        resource: &Resource,
    ) -> Result<SdkMeterProvider, OtelError> {
        use opentelemetry_otlp::{MetricsExporterBuilder, WithExportConfig};
        use opentelemetry_sdk::metrics::reader::{
            DefaultAggregationSelector, DefaultTemporalitySelector,
        };
        use opentelemetry_sdk::{metrics::PeriodicReader, runtime};

        let exporter = MetricsExporterBuilder::from(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .build_metrics_exporter(
            Box::new(DefaultTemporalitySelector::new()),
            Box::new(DefaultAggregationSelector::new()),
        )
        .map_err(|e| OtelError::MeterInit(e.to_string()))?;

        let reader = PeriodicReader::builder(exporter, runtime::Tokio).build();

        Ok(SdkMeterProvider::builder()
            .with_resource(resource.clone())
            .with_reader(reader)
            .build())
    }

    /// Get a tracer from the provider
    pub fn tracer(&self, name: &'static str) -> opentelemetry_sdk::trace::Tracer {
        match self.tracer_provider {
            Some(ref tp) => tp.tracer(name),
            None => TracerProvider::builder().build().tracer(name),
        }
    }

    /// Get the meter for creating metrics
    pub fn meter(&self) -> Meter {
        self.meter_provider.meter(self.config.service_name.clone())
    }

    /// Check if OpenTelemetry export is enabled
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Shutdown the OpenTelemetry providers gracefully
    pub fn shutdown(&self) -> Result<(), OtelError> {
        if let Err(e) = self.meter_provider.shutdown() {
            return Err(OtelError::Shutdown(format!(
                "Meter shutdown failed: {:?}",
                e
            )));
        }

        if let Some(ref tp) = self.tracer_provider {
            for result in tp.force_flush() {
                if let Err(e) = result {
                    return Err(OtelError::Shutdown(format!("Tracer flush failed: {:?}", e)));
                }
            }
        }

        Ok(())
    }
}

impl Drop for OtelProvider {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Sync metrics
pub struct Metrics {
    /// Attempts by task and result (`success` or an error kind)
    pub attempts_total: Counter<u64>,

    /// Finished firings by task and outcome
    pub firings_total: Counter<u64>,

    /// Duration of a single attempt in seconds
    pub attempt_duration: Histogram<f64>,

    /// Backoff waits between attempts in seconds
    pub backoff_seconds: Histogram<f64>,
}

impl Metrics {
    /// Create new metrics with the given meter
    pub fn new(meter: &Meter) -> Self {
        let attempts_total = meter
            .u64_counter("band_sync_attempts_total")
            .with_description("Total number of sync attempts")
            .init();

        let firings_total = meter
            .u64_counter("band_sync_firings_total")
            .with_description("Total number of finished sync firings")
            .init();

        let attempt_duration = meter
            .f64_histogram("band_sync_attempt_duration_seconds")
            .with_description("Sync attempt duration in seconds")
            .init();

        let backoff_seconds = meter
            .f64_histogram("band_sync_backoff_seconds")
            .with_description("Backoff delay before a retry in seconds")
            .init();

        Self {
            attempts_total,
            firings_total,
            attempt_duration,
            backoff_seconds,
        }
    }

    /// Record one attempt
    pub fn record_attempt(&self, task: &str, result: &str, duration_secs: f64) {
        self.attempts_total.add(
            1,
            &[
                KeyValue::new("task", task.to_string()),
                KeyValue::new("result", result.to_string()),
            ],
        );
        self.attempt_duration
            .record(duration_secs, &[KeyValue::new("task", task.to_string())]);
    }

    /// Record the end of a firing
    pub fn record_firing(&self, task: &str, outcome: &str) {
        self.firings_total.add(
            1,
            &[
                KeyValue::new("task", task.to_string()),
                KeyValue::new("outcome", outcome.to_string()),
            ],
        );
    }

    /// Record a backoff wait
    pub fn record_backoff(&self, task: &str, delay_secs: f64) {
        self.backoff_seconds
            .record(delay_secs, &[KeyValue::new("task", task.to_string())]);
    }
}

fn parse_level(log_level: &str) -> Level {
    match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize the tracing subscriber
///
/// JSON output unless `logging.format` is `pretty`; the OpenTelemetry layer
/// is added only when export is enabled.
pub fn init_tracing(otel: &OtelProvider, logging: &LoggingConfig) -> Result<(), OtelError> {
    let filter = tracing_subscriber::filter::LevelFilter::from_level(parse_level(&logging.level));
    let pretty = logging.format.eq_ignore_ascii_case("pretty");

    let otel_layer = otel
        .is_enabled()
        .then(|| tracing_opentelemetry::layer().with_tracer(otel.tracer("band-sync")));
    let json_layer = (!pretty).then(|| tracing_subscriber::fmt::layer().json());
    let pretty_layer = pretty.then(|| tracing_subscriber::fmt::layer().pretty());

    tracing_subscriber::registry()
        .with(filter)
        .with(otel_layer)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .map_err(|e| OtelError::TracerInit(e.to_string()))
}
