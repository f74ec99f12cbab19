//! Shared, domain-agnostic utilities used by the proxy binary: process version info,
//! tracing/metrics bootstrap, and small collection helpers that don't belong to any
//! one pipeline stage.

pub mod telemetry;
pub mod tokio_metrics;
pub mod version;
