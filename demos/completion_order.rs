//! Consume results in the order they finish, not the order they were submitted

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use veda_exec::prelude::*;

fn main() -> anyhow::Result<()> {
    println!("=== Completion Order ===\n");

    let pool = Arc::new(WorkerPool::fixed(4)?);
    let collector = CompletionCollector::new(pool);
    let started = Instant::now();

    for (name, ms) in [("alpha", 400u64), ("beta", 100), ("gamma", 300), ("delta", 200)] {
        collector.submit(move || {
            thread::sleep(Duration::from_millis(ms));
            if name == "gamma" {
                anyhow::bail!("{} gave up", name);
            }
            Ok(name)
        })?;
        println!("submitted {} ({}ms)", name, ms);
    }
    println!();

    while collector.pending() > 0 {
        let handle = collector.take()?;
        let at = started.elapsed().as_millis();
        match handle.get() {
            Ok(name) => println!("[{:>4}ms] {} done", at, name),
            Err(err) => println!("[{:>4}ms] failure: {}", at, err),
        }
    }
    Ok(())
}
