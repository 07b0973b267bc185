//! Observability for stackup: tracing subscriber setup and optional
//! OpenTelemetry span export.

pub mod tracing_setup;
