//! Favcache Telemetry - Logging and Metrics
//!
//! `tracing` with a JSON subscriber for logs, Prometheus counters for
//! cache, upstream and background-task outcomes.

pub mod metrics;
pub mod tracer;

pub use metrics::{HydrationMetrics, PrometheusGatewayObserver, METRICS};
pub use tracer::{init_tracing, TelemetryConfig};
