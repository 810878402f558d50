//! Periodically export pool metrics while a mixed workload runs

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use veda_exec::prelude::*;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("=== Pool Monitor ===\n");

    let config = PoolConfig::builder()
        .core_workers(2)
        .max_workers(6)
        .queue_capacity(16)
        .keep_alive(Duration::from_millis(200))
        .rejection_policy(RejectionPolicy::CallerRuns)
        .thread_name_prefix("monitored")
        .build()?;
    let pool = Arc::new(WorkerPool::new(config)?);

    let reporter_pool = Arc::new(WorkerPool::single_worker()?);
    let scheduler = Scheduler::new(reporter_pool)?;

    let console = ConsoleExporter::new(false);
    let watched = pool.clone();
    let report = scheduler.schedule_at_fixed_rate(
        move || {
            console.export(&watched.metrics())?;
            println!();
            Ok(())
        },
        Duration::ZERO,
        Duration::from_millis(250),
    )?;

    for i in 0..400u64 {
        pool.execute(move || {
            thread::sleep(Duration::from_millis(1 + i % 7));
            if i % 50 == 0 {
                panic!("task {} blew up", i);
            }
        })?;
    }

    pool.shutdown();
    pool.await_termination(Duration::from_secs(30));
    scheduler.cancel(&report)?;
    println!("Periodic report ran {} times", report.run_count());

    let path = std::env::temp_dir().join("veda_exec_metrics.json");
    JsonExporter::new(&path).export(&pool.metrics())?;
    println!("Final metrics written to {}", path.display());

    ConsoleExporter::new(true).export(&pool.metrics())?;
    Ok(())
}
