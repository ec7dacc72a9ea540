//! Telemetry and observability infrastructure for the Nightfall daemon.
//!
//! This crate provides a small observability layer combining logging and
//! metrics. It integrates with the `tracing` ecosystem for structured logging
//! and exposes Prometheus-compatible metrics for the orchestrator and agent
//! loops to report against.
//!
//! Key components:
//! - **Logging**: Human-readable and JSON-formatted output via `tracing-subscriber`
//! - **Metrics**: Thread-safe counters, gauges, and histograms with Prometheus export

pub mod logging;
pub mod metrics;
