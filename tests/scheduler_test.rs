use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use veda_exec::prelude::*;

fn scheduler(workers: usize) -> Scheduler {
    Scheduler::new(Arc::new(WorkerPool::fixed(workers).unwrap())).unwrap()
}

#[test]
fn test_schedule_runs_after_delay() {
    let scheduler = scheduler(2);
    let submitted = Instant::now();
    let handle = scheduler
        .schedule(move || Ok(submitted.elapsed()), Duration::from_millis(50))
        .unwrap();

    let waited = handle.get_timeout(Duration::from_secs(5)).unwrap();
    assert!(waited >= Duration::from_millis(50));
}

#[test]
fn test_earlier_trigger_fires_first() {
    let scheduler = scheduler(1);
    let order = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = [(3, 90u64), (1, 10), (2, 50)]
        .into_iter()
        .map(|(tag, ms)| {
            let order = order.clone();
            scheduler
                .schedule(
                    move || {
                        order.lock().push(tag);
                        Ok(())
                    },
                    Duration::from_millis(ms),
                )
                .unwrap()
        })
        .collect();

    for handle in &handles {
        handle.get_timeout(Duration::from_secs(5)).unwrap();
    }
    assert_eq!(*order.lock(), vec![1, 2, 3]);
}

#[test]
fn test_fixed_rate_never_overlaps() {
    let scheduler = scheduler(4);
    let starts = Arc::new(Mutex::new(Vec::new()));
    let running = Arc::new(AtomicUsize::new(0));
    let overlapped = Arc::new(AtomicUsize::new(0));

    let periodic = {
        let starts = starts.clone();
        let running = running.clone();
        let overlapped = overlapped.clone();
        scheduler
            .schedule_at_fixed_rate(
                move || {
                    if running.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlapped.fetch_add(1, Ordering::SeqCst);
                    }
                    starts.lock().push(Instant::now());
                    thread::sleep(Duration::from_millis(250));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                },
                Duration::ZERO,
                Duration::from_millis(100),
            )
            .unwrap()
    };

    thread::sleep(Duration::from_millis(1_100));
    scheduler.cancel(&periodic).unwrap();
    // Let a run in flight finish.
    thread::sleep(Duration::from_millis(300));

    let starts = starts.lock();
    assert!(starts.len() >= 3, "only {} runs", starts.len());
    for pair in starts.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_millis(250), "gap {:?}", gap);
        assert!(gap >= Duration::from_millis(100));
    }
    assert_eq!(overlapped.load(Ordering::SeqCst), 0);
    assert!(periodic.wait().unwrap_err().is_cancelled());
}

#[test]
fn test_fixed_rate_keeps_period_when_fast() {
    let scheduler = scheduler(2);
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let periodic = scheduler
        .schedule_at_fixed_rate(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            Duration::from_millis(10),
            Duration::from_millis(40),
        )
        .unwrap();

    thread::sleep(Duration::from_millis(230));
    periodic.cancel();
    let seen = runs.load(Ordering::SeqCst);
    // Ticks at 10, 50, 90, 130, 170, 210.
    assert!((4..=7).contains(&seen), "{} runs", seen);
    assert!(periodic.run_count() as usize >= seen);
}

#[test]
fn test_fixed_delay_spacing() {
    let scheduler = scheduler(2);
    let ends = Arc::new(Mutex::new(Vec::<(Instant, Instant)>::new()));
    let log = ends.clone();
    let periodic = scheduler
        .schedule_with_fixed_delay(
            move || {
                let start = Instant::now();
                thread::sleep(Duration::from_millis(20));
                log.lock().push((start, Instant::now()));
                Ok(())
            },
            Duration::ZERO,
            Duration::from_millis(30),
        )
        .unwrap();

    thread::sleep(Duration::from_millis(300));
    scheduler.cancel(&periodic).unwrap();
    thread::sleep(Duration::from_millis(50));

    let runs = ends.lock();
    assert!(runs.len() >= 2);
    for pair in runs.windows(2) {
        let (_, previous_end) = pair[0];
        let (next_start, _) = pair[1];
        assert!(next_start - previous_end >= Duration::from_millis(30));
    }
}

#[test]
fn test_cancel_twice_is_illegal_state() {
    let scheduler = scheduler(1);
    let periodic = scheduler
        .schedule_at_fixed_rate(|| Ok(()), Duration::from_secs(60), Duration::from_secs(1))
        .unwrap();

    assert_eq!(scheduler.pending(), 1);
    scheduler.cancel(&periodic).unwrap();
    assert_eq!(scheduler.pending(), 0);

    let err = scheduler.cancel(&periodic).unwrap_err();
    assert!(matches!(err, Error::IllegalState(_)));
}

#[test]
fn test_rejected_dispatch_cancels_handle() {
    let pool = Arc::new(WorkerPool::fixed(1).unwrap());
    let scheduler = Scheduler::new(pool.clone()).unwrap();
    let handle = scheduler.schedule(|| Ok(1), Duration::from_millis(30)).unwrap();

    pool.shutdown();
    let err = handle.get_timeout(Duration::from_secs(5)).unwrap_err();
    assert!(err.is_cancelled());
}

#[test]
fn test_manual_clock_drives_triggers() {
    let clock = Arc::new(ManualClock::new());
    let pool = Arc::new(WorkerPool::fixed(1).unwrap());
    let scheduler = Scheduler::with_clock(pool, clock.clone()).unwrap();

    let handle = scheduler.schedule(|| Ok("fired"), Duration::from_secs(3600)).unwrap();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(handle.state(), TaskState::Pending);

    clock.advance(Duration::from_secs(3600));
    assert_eq!(handle.get_timeout(Duration::from_secs(5)).unwrap(), "fired");
}
