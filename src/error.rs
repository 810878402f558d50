use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("task rejected: {0}")]
    Rejected(String),

    #[error("task failed: {0}")]
    Execution(#[from] TaskFailure),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("task was cancelled")]
    Cancelled,

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("telemetry error: {0}")]
    Telemetry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn rejected<S: Into<String>>(msg: S) -> Self {
        Error::Rejected(msg.into())
    }

    pub fn illegal_state<S: Into<String>>(msg: S) -> Self {
        Error::IllegalState(msg.into())
    }

    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn telemetry<S: Into<String>>(msg: S) -> Self {
        Error::Telemetry(msg.into())
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Error::Rejected(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// The captured task failure, if this error wraps one.
    pub fn failure(&self) -> Option<&TaskFailure> {
        match self {
            Error::Execution(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Failure captured from a task body.
///
/// The original error is shared behind an `Arc` so every reader of a
/// handle observes the same cause.
#[derive(Clone)]
pub struct TaskFailure {
    cause: Arc<anyhow::Error>,
    panicked: bool,
}

impl TaskFailure {
    pub fn new(cause: anyhow::Error) -> Self {
        Self {
            cause: Arc::new(cause),
            panicked: false,
        }
    }

    pub(crate) fn from_panic(message: String) -> Self {
        Self {
            cause: Arc::new(anyhow::anyhow!("task panicked: {}", message)),
            panicked: true,
        }
    }

    /// The error returned (or panic raised) by the task.
    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    pub fn panicked(&self) -> bool {
        self.panicked
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)
    }
}

impl fmt::Debug for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFailure")
            .field("cause", &self.cause)
            .field("panicked", &self.panicked)
            .finish()
    }
}

impl std::error::Error for TaskFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&**self.cause)
    }
}

impl From<anyhow::Error> for TaskFailure {
    fn from(cause: anyhow::Error) -> Self {
        TaskFailure::new(cause)
    }
}
