//! veda-exec - a bounded worker pool with result handles
//!
//! Submit closures to a [`WorkerPool`] and get a [`ResultHandle`] back for
//! each. The pool grows from its core size up to a maximum, queues work in
//! a bounded FIFO, and applies a [`RejectionPolicy`] once both are full.
//! On top of it sit a [`Scheduler`] for delayed and periodic work, a
//! [`CompletionCollector`] that yields results in completion order, and
//! batch helpers ([`WorkerPool::invoke_all`], [`WorkerPool::invoke_any`]).
//!
//! # Quick Start
//!
//! ```no_run
//! use veda_exec::prelude::*;
//! use std::time::Duration;
//!
//! let pool = WorkerPool::new(
//!     PoolConfig::builder()
//!         .core_workers(2)
//!         .max_workers(4)
//!         .queue_capacity(100)
//!         .rejection_policy(RejectionPolicy::CallerRuns)
//!         .build()?,
//! )?;
//!
//! let handle = pool.submit(|| Ok(6 * 7))?;
//! assert_eq!(handle.get()?, 42);
//!
//! pool.shutdown();
//! pool.await_termination(Duration::from_secs(5));
//! # Ok::<(), veda_exec::Error>(())
//! ```
//!
//! # Failures
//!
//! A task that returns an error or panics never takes its worker down. The
//! failure is stored in the task's handle and surfaces from
//! [`ResultHandle::get`] as [`Error::Execution`].
//!
//! Nobody is told about a failure nobody asks for. Tasks started with
//! [`WorkerPool::execute`], and handles that are dropped without calling
//! `get`, lose their error; it only shows up in the pool's
//! [`metrics`](WorkerPool::metrics) failure count and a `tracing` event.
//!
//! # Cancellation
//!
//! Cancelling a pending task removes it from the queue. A running task
//! cannot be stopped from outside: it has to poll the
//! [`CancellationToken`] it gets from
//! [`submit_interruptible`](WorkerPool::submit_interruptible).

// Lint configuration
#![warn(missing_debug_implementations)]

pub mod batch;
pub mod completion;
pub mod config;
pub mod error;
pub mod executor;
pub mod future;
pub mod prelude;
pub mod scheduler;
pub mod telemetry;

// Re-export key types at crate root
pub use completion::CompletionCollector;
pub use config::{PoolConfig, PoolConfigBuilder};
pub use error::{Error, Result, TaskFailure};
pub use executor::{PanicStrategy, PoolState, RejectionPolicy, TaskId, WorkerPool};
pub use future::{CancellationToken, ResultHandle, TaskState};
pub use scheduler::{Clock, ManualClock, PeriodicHandle, Scheduler, SystemClock};
pub use telemetry::PoolMetrics;
