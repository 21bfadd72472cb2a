//! Logging and OpenTelemetry integration for the fleet autoscaler.
//!
//! Installs the global `tracing` subscriber (plain or JSON output, optional
//! OTLP export) and provides the spans the reconcile loop runs under.

pub mod spans;
pub mod tracer;

pub use spans::{agent_span, reconcile_span, step_span};
pub use tracer::{OtlpConfig, TracerError, TracingConfig, init_tracer, shutdown_tracer};
