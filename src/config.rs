use crate::error::{Error, Result};
use crate::executor::{PanicStrategy, RejectionPolicy};
use std::time::Duration;

const MIN_STACK_SIZE: usize = 16 * 1024;
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Sizing and lifecycle parameters for a [`WorkerPool`](crate::WorkerPool).
///
/// The single-worker, fixed and cached pools are presets of this struct,
/// not separate implementations.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub core_workers: usize,
    pub max_workers: usize,
    /// Idle time after which a worker above the core count exits.
    pub keep_alive: Duration,
    /// `None` means unbounded. `Some(0)` means direct hand-off only.
    pub queue_capacity: Option<usize>,
    pub rejection_policy: RejectionPolicy,
    pub thread_name_prefix: String,
    pub stack_size: Option<usize>,
    pub panic_strategy: PanicStrategy,
    pub prestart_core_workers: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::fixed(num_cpus::get())
    }
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    /// One worker, unbounded queue. Tasks run strictly one after another.
    pub fn single_worker() -> Self {
        Self::fixed(1)
    }

    /// `n` permanent workers sharing an unbounded queue.
    pub fn fixed(n: usize) -> Self {
        Self {
            core_workers: n,
            max_workers: n,
            keep_alive: DEFAULT_KEEP_ALIVE,
            queue_capacity: None,
            rejection_policy: RejectionPolicy::default(),
            thread_name_prefix: "veda-exec".to_string(),
            stack_size: Some(2 * 1024 * 1024),
            panic_strategy: PanicStrategy::default(),
            prestart_core_workers: false,
        }
    }

    /// No permanent workers, unlimited transient ones, no queueing.
    pub fn cached() -> Self {
        Self {
            core_workers: 0,
            max_workers: usize::MAX,
            queue_capacity: Some(0),
            ..Self::fixed(0)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::config("max_workers must be > 0"));
        }
        if self.core_workers > self.max_workers {
            return Err(Error::config("core_workers must be <= max_workers"));
        }
        if self.core_workers < self.max_workers && self.keep_alive.is_zero() {
            return Err(Error::config(
                "keep_alive must be > 0 when transient workers are allowed",
            ));
        }
        if let Some(size) = self.stack_size {
            if size < MIN_STACK_SIZE {
                return Err(Error::config("stack_size too small (min 16 KiB)"));
            }
        }
        if self.thread_name_prefix.contains('\0') {
            return Err(Error::config("thread_name_prefix must not contain NUL"));
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
        }
    }

    /// Start from an existing preset instead of the default fixed pool.
    pub fn from_preset(config: PoolConfig) -> Self {
        Self { config }
    }

    pub fn core_workers(mut self, n: usize) -> Self {
        self.config.core_workers = n;
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.max_workers = n;
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = Some(capacity);
        self
    }

    pub fn unbounded_queue(mut self) -> Self {
        self.config.queue_capacity = None;
        self
    }

    pub fn rejection_policy(mut self, policy: RejectionPolicy) -> Self {
        self.config.rejection_policy = policy;
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn panic_strategy(mut self, strategy: PanicStrategy) -> Self {
        self.config.panic_strategy = strategy;
        self
    }

    pub fn prestart_core_workers(mut self, prestart: bool) -> Self {
        self.config.prestart_core_workers = prestart;
        self
    }

    pub fn build(self) -> Result<PoolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
