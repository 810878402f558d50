pub use crate::completion::CompletionCollector;
pub use crate::config::{PoolConfig, PoolConfigBuilder};
pub use crate::error::{Error, Result, TaskFailure};
pub use crate::executor::{PanicStrategy, PoolState, RejectionPolicy, WorkerPool};
pub use crate::future::{CancellationToken, ResultHandle, TaskState};
pub use crate::scheduler::{Clock, ManualClock, PeriodicHandle, Scheduler, SystemClock};

pub use crate::telemetry::{ConsoleExporter, JsonExporter, MetricsExporter, PoolMetrics};
