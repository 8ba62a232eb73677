use std::time::Duration;

use thiserror::Error;

use crate::domain::TaskId;

/// Errors returned by queue operations.
///
/// Failures of the work itself never surface here; they are recorded on the
/// task as a [`TaskError`](crate::domain::TaskError) and observed through
/// snapshots.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("task queue is not running")]
    QueueNotRunning,

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("timed out after {0:?} waiting for task to finish")]
    WaitTimeout(Duration),
}

impl QueueError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        QueueError::InvalidConfiguration(message.into())
    }
}
