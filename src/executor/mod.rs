//! Task execution infrastructure.
//!
//! The worker pool, its bounded queue, rejection policies and the
//! machinery that turns closures into runnable tasks.

pub mod panic_handler;
pub mod pool;
pub mod queue;
pub mod rejection;
pub mod task;
pub mod worker;

pub use panic_handler::{PanicHandler, PanicStrategy};
pub use pool::{PoolState, WorkerPool};
pub use queue::{Take, TaskQueue};
pub use rejection::RejectionPolicy;
pub use task::TaskId;

pub(crate) use task::Task;
