//! Errors recorded on tasks.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::TaskId;

/// Why an attempt (or a whole task) failed.
///
/// Stored on the task record and copied into snapshots, so it is plain data:
/// the original `anyhow::Error` from the work is flattened into its message
/// chain when the attempt ends.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskError {
    /// The work returned an error or panicked.
    #[error("{message}")]
    WorkFailure { message: String },

    /// A prerequisite failed (or was never registered), so this task cannot run.
    #[error("dependency {dependency} failed: {reason}")]
    DependencyFailure { dependency: TaskId, reason: String },
}

impl TaskError {
    pub fn work(message: impl Into<String>) -> Self {
        TaskError::WorkFailure {
            message: message.into(),
        }
    }

    pub fn dependency(dependency: TaskId, reason: impl Into<String>) -> Self {
        TaskError::DependencyFailure {
            dependency,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_failure_names_the_dependency() {
        let err = TaskError::dependency(TaskId::new("fetch_1"), "boom");
        assert_eq!(err.to_string(), "dependency fetch_1 failed: boom");
    }

    #[test]
    fn is_tagged_when_serialized() {
        let v = serde_json::to_value(TaskError::work("timeout")).unwrap();
        assert_eq!(v["kind"], "work_failure");
        assert_eq!(v["message"], "timeout");
    }
}
