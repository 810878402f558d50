//! Metrics export functionality for various formats.

use super::metrics::PoolMetrics;
use crate::error::{Error, Result};
use serde::Serialize;

/// Trait for exporting metrics to different formats
pub trait MetricsExporter: Send + Sync {
    /// Export a metrics snapshot
    fn export(&self, metrics: &PoolMetrics) -> Result<()>;
}

/// Export metrics to a JSON file, overwritten on each export
#[derive(Debug)]
pub struct JsonExporter {
    output_path: std::path::PathBuf,
}

impl JsonExporter {
    pub fn new(output_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }
}

impl MetricsExporter for JsonExporter {
    fn export(&self, metrics: &PoolMetrics) -> Result<()> {
        let serializable = SerializableMetrics::from(metrics);
        let json = serde_json::to_string_pretty(&serializable)
            .map_err(|e| Error::telemetry(format!("JSON serialization failed: {}", e)))?;

        std::fs::write(&self.output_path, json)
            .map_err(|e| Error::telemetry(format!("Failed to write file: {}", e)))?;

        Ok(())
    }
}

/// Wire form of [`PoolMetrics`]
#[derive(Debug, Clone, Serialize)]
struct SerializableMetrics {
    uptime_secs: f64,
    active: usize,
    queued: usize,
    pool_size: usize,
    peak_pool_size: usize,
    submitted: u64,
    completed: u64,
    failed: u64,
    rejected: u64,
    cancelled: u64,
    panicked: u64,
    avg_latency_us: f64,
    p50_latency_us: f64,
    p99_latency_us: f64,
    max_latency_us: f64,
    tasks_per_second: f64,
}

impl From<&PoolMetrics> for SerializableMetrics {
    fn from(m: &PoolMetrics) -> Self {
        Self {
            uptime_secs: m.uptime.as_secs_f64(),
            active: m.active,
            queued: m.queued,
            pool_size: m.pool_size,
            peak_pool_size: m.peak_pool_size,
            submitted: m.submitted,
            completed: m.completed,
            failed: m.failed,
            rejected: m.rejected,
            cancelled: m.cancelled,
            panicked: m.panicked,
            avg_latency_us: m.avg_latency_ns as f64 / 1_000.0,
            p50_latency_us: m.p50_latency_ns as f64 / 1_000.0,
            p99_latency_us: m.p99_latency_ns as f64 / 1_000.0,
            max_latency_us: m.max_latency_ns as f64 / 1_000.0,
            tasks_per_second: m.tasks_per_second(),
        }
    }
}

/// Export metrics to console (stdout)
#[derive(Debug)]
pub struct ConsoleExporter {
    verbose: bool,
}

impl ConsoleExporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl MetricsExporter for ConsoleExporter {
    fn export(&self, m: &PoolMetrics) -> Result<()> {
        println!("=== Pool Metrics ===");
        println!("Uptime: {:.2}s", m.uptime.as_secs_f64());
        println!("Workers: {} (peak {})", m.pool_size, m.peak_pool_size);
        println!("Active: {}  Queued: {}", m.active, m.queued);
        println!(
            "Completed: {}  Failed: {}  Rejected: {}  Cancelled: {}",
            m.completed, m.failed, m.rejected, m.cancelled
        );
        println!("Tasks/sec: {:.2}", m.tasks_per_second());

        if self.verbose {
            println!("\nLatency:");
            println!("  Average: {:.2}μs", m.avg_latency_ns as f64 / 1_000.0);
            println!("  P50: {:.2}μs", m.p50_latency_ns as f64 / 1_000.0);
            println!("  P99: {:.2}μs", m.p99_latency_ns as f64 / 1_000.0);
            println!("  Max: {:.2}μs", m.max_latency_ns as f64 / 1_000.0);
            println!("Panicked: {}", m.panicked);
        }

        println!("====================");

        Ok(())
    }
}

impl Default for ConsoleExporter {
    fn default() -> Self {
        Self::new(false)
    }
}
