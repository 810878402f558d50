//! Walk through the pool: presets, handles, rejection policies and shutdown

use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use veda_exec::prelude::*;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Executor Tour ===\n");

    demo_handles()?;
    demo_rejection_policies()?;
    demo_batches()?;
    demo_shutdown()?;

    println!("\n=== Tour finished ===");
    Ok(())
}

fn demo_handles() -> anyhow::Result<()> {
    println!("1. Result handles");
    let pool = WorkerPool::fixed(2)?;

    let square = pool.submit(|| Ok(12 * 12))?;
    println!("   12 * 12 = {}", square.get()?);

    let failing: ResultHandle<u32> = pool.submit(|| anyhow::bail!("disk on fire"))?;
    match failing.get() {
        Err(err) => println!("   failed task reported: {}", err),
        Ok(_) => unreachable!(),
    }

    let chained = pool
        .submit(|| Ok(String::from("veda")))?
        .then_apply(|s| s.to_uppercase());
    println!("   chained: {}", chained.get()?);

    let slow = pool.submit_interruptible(|token| {
        while !token.is_cancelled() {
            thread::sleep(Duration::from_millis(5));
        }
        token.check()
    })?;
    thread::sleep(Duration::from_millis(20));
    slow.cancel(true);
    println!("   cancelled running task: state = {:?}\n", slow.state());
    Ok(())
}

fn demo_rejection_policies() -> anyhow::Result<()> {
    println!("2. Rejection policies (1 worker, queue of 1)");

    for policy in [
        RejectionPolicy::Abort,
        RejectionPolicy::CallerRuns,
        RejectionPolicy::Discard,
        RejectionPolicy::DiscardOldest,
    ] {
        let config = PoolConfig::builder()
            .core_workers(1)
            .max_workers(1)
            .queue_capacity(1)
            .rejection_policy(policy)
            .build()?;
        let pool = WorkerPool::new(config)?;

        let submitted: Vec<_> = (0..3)
            .map(|i| {
                let handle = pool.submit(move || {
                    thread::sleep(Duration::from_millis(30));
                    Ok(i)
                });
                (i, handle)
            })
            .collect();
        let outcomes: Vec<String> = submitted
            .into_iter()
            .map(|(i, handle)| match handle {
                Ok(handle) => match handle.get() {
                    Ok(value) => format!("#{} ran -> {}", i, value),
                    Err(err) => format!("#{} {}", i, err),
                },
                Err(err) => format!("#{} rejected: {}", i, err),
            })
            .collect();
        println!("   {:?}: {:?}", policy, outcomes);
    }
    println!();
    Ok(())
}

fn demo_batches() -> anyhow::Result<()> {
    println!("3. invoke_all / invoke_any");
    let pool = WorkerPool::fixed(4)?;

    let handles = pool.invoke_all((1..=4u64).map(|n| move || Ok((1..=n).product::<u64>())))?;
    let factorials: Vec<u64> = handles.iter().filter_map(|h| h.get().ok()).collect();
    println!("   factorials: {:?}", factorials);

    let fastest = pool.invoke_any([300u64, 50, 150].map(|ms| {
        move || {
            thread::sleep(Duration::from_millis(ms));
            Ok(ms)
        }
    }))?;
    println!("   fastest mirror answered after {}ms\n", fastest);
    Ok(())
}

fn demo_shutdown() -> anyhow::Result<()> {
    println!("4. Shutdown");
    let pool = WorkerPool::single_worker()?;
    for i in 0..5 {
        pool.execute(move || {
            thread::sleep(Duration::from_millis(20));
            tracing::info!(task = i, "finished");
        })?;
    }

    let drained = pool.shutdown_now();
    println!("   shutdown_now drained {} queued tasks", drained);
    pool.await_termination(Duration::from_secs(1));
    println!("   state: {:?}", pool.state());
    Ok(())
}
