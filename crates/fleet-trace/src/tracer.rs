//! Subscriber initialization and configuration.

use opentelemetry::trace::TracerProvider;
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource, runtime,
    trace::{RandomIdGenerator, Sampler},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
pub enum TracerError {
    #[error("Failed to initialize tracer: {0}")]
    Init(String),
    #[error("Invalid log filter: {0}")]
    Filter(String),
}

/// OTLP exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtlpConfig {
    pub endpoint: String,
    pub timeout_seconds: u64,
    pub sample_rate: f64,
}

impl Default for OtlpConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4317".to_string(),
            timeout_seconds: 10,
            sample_rate: 1.0,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    pub service_name: String,
    pub service_version: String,
    /// Default filter directive; `RUST_LOG` wins when set.
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    pub otlp: Option<OtlpConfig>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "fleet-autoscaler".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            json: false,
            otlp: None,
        }
    }
}

/// Install the global subscriber.
pub fn init_tracer(config: &TracingConfig) -> Result<(), TracerError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .map_err(|e| TracerError::Filter(e.to_string()))?,
    };

    let json_layer = config
        .json
        .then(|| tracing_subscriber::fmt::layer().json().with_target(true));
    let text_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(true));

    let telemetry_layer = match &config.otlp {
        Some(otlp) => {
            let tracer = build_otlp_tracer(config, otlp)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(telemetry_layer)
        .try_init()
        .map_err(|e| TracerError::Init(e.to_string()))
}

fn build_otlp_tracer(
    config: &TracingConfig,
    otlp: &OtlpConfig,
) -> Result<opentelemetry_sdk::trace::Tracer, TracerError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&otlp.endpoint)
        .with_timeout(std::time::Duration::from_secs(otlp.timeout_seconds))
        .build()
        .map_err(|e| TracerError::Init(e.to_string()))?;

    let sampler = if otlp.sample_rate >= 1.0 {
        Sampler::AlwaysOn
    } else if otlp.sample_rate <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(otlp.sample_rate)
    };

    let resource = Resource::new(vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", config.service_version.clone()),
    ]);

    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(sampler)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    let tracer = provider.tracer("fleet-autoscaler");
    global::set_tracer_provider(provider);

    Ok(tracer)
}

/// Flush remaining spans before exit.
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.service_name, "fleet-autoscaler");
        assert_eq!(config.log_level, "info");
        assert!(!config.json);
        assert!(config.otlp.is_none());
    }

    #[test]
    fn test_otlp_config_default() {
        let config = OtlpConfig::default();
        assert_eq!(config.endpoint, "http://localhost:4317");
        assert_eq!(config.sample_rate, 1.0);
    }
}
