use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use veda_exec::prelude::*;

type Job = Box<dyn FnOnce() -> anyhow::Result<i32> + Send>;

fn after(ms: u64, value: i32) -> Job {
    Box::new(move || {
        thread::sleep(Duration::from_millis(ms));
        Ok(value)
    })
}

fn failing(message: &'static str) -> Job {
    Box::new(move || -> anyhow::Result<i32> { anyhow::bail!(message) })
}

#[test]
fn test_invoke_any_returns_fastest() {
    let pool = WorkerPool::fixed(3).unwrap();
    let started = Instant::now();

    let value = pool
        .invoke_any(vec![after(300, 1), after(100, 2), after(500, 3)])
        .unwrap();

    assert_eq!(value, 2);
    assert!(started.elapsed() < Duration::from_millis(300));
}

#[test]
fn test_invoke_any_cancels_the_rest() {
    // One worker, one queue slot: the first task runs, the second waits in
    // the queue and the third runs on the caller and wins.
    let config = PoolConfig::builder()
        .core_workers(1)
        .max_workers(1)
        .queue_capacity(1)
        .rejection_policy(RejectionPolicy::CallerRuns)
        .build()
        .unwrap();
    let pool = Arc::new(WorkerPool::new(config).unwrap());
    let started = Arc::new(AtomicBool::new(false));
    let running_runs = Arc::new(AtomicUsize::new(0));
    let queued_runs = Arc::new(AtomicUsize::new(0));
    let deadline = Instant::now() + Duration::from_secs(2);

    let running: Job = {
        let pool = pool.clone();
        let started = started.clone();
        let running_runs = running_runs.clone();
        Box::new(move || {
            started.store(true, Ordering::SeqCst);
            // Keep the worker busy until the queued loser is pulled out.
            while pool.metrics().cancelled == 0 && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            running_runs.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        })
    };
    let queued: Job = {
        let queued_runs = queued_runs.clone();
        Box::new(move || {
            queued_runs.fetch_add(1, Ordering::SeqCst);
            Ok(2)
        })
    };
    let winner: Job = {
        let started = started.clone();
        Box::new(move || {
            while !started.load(Ordering::SeqCst) {
                thread::yield_now();
            }
            Ok(7)
        })
    };

    let value = pool.invoke_any(vec![running, queued, winner]).unwrap();
    assert_eq!(value, 7);

    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(10)));
    assert_eq!(running_runs.load(Ordering::SeqCst), 1);
    assert_eq!(queued_runs.load(Ordering::SeqCst), 0);
    assert_eq!(pool.metrics().cancelled, 1);
    assert!(Instant::now() < deadline, "running loser was never released");
}

#[test]
fn test_invoke_any_returns_first_finisher_run_on_caller() {
    // The caller-run task finishes while the worker task is still going, so
    // it must win even though the worker task was submitted first.
    let config = PoolConfig::builder()
        .core_workers(1)
        .max_workers(1)
        .queue_capacity(0)
        .rejection_policy(RejectionPolicy::CallerRuns)
        .build()
        .unwrap();
    let pool = Arc::new(WorkerPool::new(config).unwrap());

    for round in 1..=50u64 {
        let watched = pool.clone();
        let baseline = pool.metrics().completed;
        let slow: Job = Box::new(move || {
            while watched.metrics().completed == baseline {
                thread::yield_now();
            }
            Ok(1)
        });
        let fast: Job = Box::new(|| Ok(2));

        assert_eq!(pool.invoke_any(vec![slow, fast]).unwrap(), 2);
        // Both tasks of every round have to be accounted for, run or skipped,
        // before the next baseline is taken.
        let settled = Instant::now() + Duration::from_secs(5);
        loop {
            let metrics = pool.metrics();
            if metrics.completed + metrics.cancelled == 2 * round {
                break;
            }
            assert!(Instant::now() < settled, "round {} did not settle", round);
            thread::sleep(Duration::from_millis(1));
        }
    }
}

#[test]
fn test_invoke_any_skips_failures() {
    let pool = WorkerPool::fixed(3).unwrap();
    let value = pool
        .invoke_any(vec![failing("first"), failing("second"), after(30, 3)])
        .unwrap();
    assert_eq!(value, 3);
}

#[test]
fn test_invoke_any_reports_last_failure() {
    let pool = WorkerPool::single_worker().unwrap();
    let err = pool
        .invoke_any(vec![failing("first"), failing("second")])
        .unwrap_err();
    assert!(err.to_string().contains("second"));
}

#[test]
fn test_invoke_any_timeout() {
    let pool = WorkerPool::fixed(1).unwrap();
    let err = pool
        .invoke_any_timeout(vec![after(1_000, 1), after(1_000, 2)], Duration::from_millis(30))
        .unwrap_err();
    assert!(err.is_timeout());
}

#[test]
fn test_invoke_all_mixed_outcomes() {
    let pool = WorkerPool::fixed(3).unwrap();
    let handles = pool
        .invoke_all(vec![after(20, 1), failing("middle"), after(10, 3)])
        .unwrap();

    let states: Vec<TaskState> = handles.iter().map(|h| h.state()).collect();
    assert_eq!(
        states,
        vec![TaskState::Completed, TaskState::Failed, TaskState::Completed]
    );
    assert!(matches!(handles[1].get(), Err(Error::Execution(_))));
    assert_eq!(handles[0].get().unwrap(), 1);
    assert_eq!(handles[2].get().unwrap(), 3);
}

#[test]
fn test_invoke_all_rejected_midway() {
    let config = PoolConfig::builder()
        .core_workers(1)
        .max_workers(1)
        .queue_capacity(1)
        .build()
        .unwrap();
    let pool = WorkerPool::new(config).unwrap();

    let err = pool
        .invoke_all(vec![after(200, 1), after(0, 2), after(0, 3)])
        .unwrap_err();
    assert!(err.is_rejected());
    assert_eq!(pool.metrics().rejected, 1);
}

#[test]
fn test_collector_yields_completion_order() {
    let pool = Arc::new(WorkerPool::fixed(3).unwrap());
    let collector = CompletionCollector::new(pool);

    let submitted: Vec<_> = [(1, 200u64), (2, 20), (3, 100)]
        .into_iter()
        .map(|(value, ms)| {
            collector
                .submit(move || {
                    thread::sleep(Duration::from_millis(ms));
                    Ok(value)
                })
                .unwrap()
        })
        .collect();
    assert_eq!(collector.pending(), 3);

    let mut seen = Vec::new();
    while collector.pending() > 0 {
        let handle = collector.take_timeout(Duration::from_secs(5)).unwrap();
        seen.push(handle.get().unwrap());
    }
    assert_eq!(seen, vec![2, 3, 1]);
    assert!(submitted.iter().all(|h| h.is_done()));
}
