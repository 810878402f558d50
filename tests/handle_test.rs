use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use veda_exec::prelude::*;

#[derive(Debug, thiserror::Error)]
#[error("bad input: {0}")]
struct BadInput(i32);

#[test]
fn test_get_returns_value() {
    let pool = WorkerPool::fixed(2).unwrap();
    for n in 0..20 {
        let handle = pool.submit(move || Ok(n * n)).unwrap();
        assert_eq!(handle.get().unwrap(), n * n);
        assert!(handle.is_done());
        assert!(!handle.is_cancelled());
    }
}

#[test]
fn test_get_wraps_task_error() {
    let pool = WorkerPool::fixed(1).unwrap();
    let handle: ResultHandle<i32> = pool.submit(|| Err(BadInput(7).into())).unwrap();

    let err = handle.get().unwrap_err();
    assert_eq!(handle.state(), TaskState::Failed);
    let failure = err.failure().unwrap();
    assert!(!failure.panicked());
    assert!(failure.cause().downcast_ref::<BadInput>().is_some());
    assert!(err.to_string().contains("bad input: 7"));
}

#[test]
fn test_get_timeout_leaves_task_running() {
    let pool = WorkerPool::fixed(1).unwrap();
    let handle = pool
        .submit(|| {
            thread::sleep(Duration::from_millis(100));
            Ok("late")
        })
        .unwrap();

    let err = handle.get_timeout(Duration::from_millis(5)).unwrap_err();
    assert!(err.is_timeout());
    assert!(!handle.is_cancelled());
    assert_eq!(handle.get().unwrap(), "late");
}

#[test]
fn test_cancel_pending_never_runs() {
    let pool = WorkerPool::single_worker().unwrap();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let blocker = pool
        .submit(move || {
            let _ = release_rx.recv();
            Ok(())
        })
        .unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let pending = pool
        .submit(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    assert!(pending.cancel(true));
    assert!(!pending.cancel(true));
    assert!(pending.is_cancelled());

    drop(release_tx);
    blocker.get().unwrap();
    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
    assert!(!ran.load(Ordering::SeqCst));
    assert!(pending.get().unwrap_err().is_cancelled());
}

#[test]
fn test_cancel_running_sets_interrupt() {
    let pool = WorkerPool::single_worker().unwrap();
    let (seen_tx, seen_rx) = mpsc::channel();

    let handle = pool
        .submit_interruptible(move |token| {
            while !token.is_cancelled() {
                thread::sleep(Duration::from_millis(1));
            }
            seen_tx.send(()).ok();
            Ok(1)
        })
        .unwrap();

    while handle.state() != TaskState::Running {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(handle.cancel(true));
    assert!(handle.get().unwrap_err().is_cancelled());
    seen_rx.recv_timeout(Duration::from_secs(5)).unwrap();
}

#[test]
fn test_cancel_running_without_interrupt() {
    let pool = WorkerPool::single_worker().unwrap();
    let handle = pool
        .submit_interruptible(|token| {
            thread::sleep(Duration::from_millis(30));
            Ok(token.is_cancelled())
        })
        .unwrap();

    while handle.state() != TaskState::Running {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(handle.cancel(false));
    assert!(!handle.is_interrupted());
    // The late result is discarded.
    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
    assert_eq!(handle.state(), TaskState::Cancelled);
}

#[test]
fn test_completed_handle_cannot_be_cancelled() {
    let pool = WorkerPool::fixed(1).unwrap();
    let handle = pool.submit(|| Ok(3)).unwrap();
    handle.wait();
    assert!(!handle.cancel(true));
    assert_eq!(handle.get().unwrap(), 3);
}

#[test]
fn test_chaining_through_pool() {
    let pool = WorkerPool::fixed(2).unwrap();

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let done = pool
        .submit(|| Ok(10))
        .unwrap()
        .then_apply(|n| n * 3)
        .then_accept(move |n| sink.lock().push(n));
    done.get().unwrap();
    assert_eq!(*seen.lock(), vec![30]);

    let recovered = pool
        .submit(|| -> anyhow::Result<i32> { anyhow::bail!("boom") })
        .unwrap()
        .then_apply(|n| n + 1)
        .recover(|failure| {
            assert!(failure.to_string().contains("boom"));
            Ok(-1)
        });
    assert_eq!(recovered.get().unwrap(), -1);
}

#[test]
fn test_completed_constructor() {
    let handle = ResultHandle::completed(vec![1, 2, 3]);
    assert!(handle.is_done());
    assert_eq!(handle.get().unwrap(), vec![1, 2, 3]);

    let failed: ResultHandle<()> = ResultHandle::failed(anyhow::anyhow!("nope"));
    assert_eq!(failed.state(), TaskState::Failed);
}

#[test]
fn test_many_readers() {
    let pool = WorkerPool::fixed(1).unwrap();
    let handle = pool
        .submit(|| {
            thread::sleep(Duration::from_millis(20));
            Ok(String::from("shared"))
        })
        .unwrap();

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let handle = handle.clone();
            thread::spawn(move || handle.get().unwrap())
        })
        .collect();
    for reader in readers {
        assert_eq!(reader.join().unwrap(), "shared");
    }
}
