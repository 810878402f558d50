//! Telemetry and observability subsystem.
//!
//! Pool counters, a run-time latency histogram and exporters that write
//! snapshots out as JSON or to the console.

pub mod export;
pub mod metrics;

pub use export::{ConsoleExporter, JsonExporter, MetricsExporter};
pub use metrics::{Metrics, PoolMetrics};
