//! Task status state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a task.
///
/// State transitions:
/// - Pending -> Running -> Completed
/// - Pending -> Running -> Pending (retry, while attempts <= max_retries)
/// - Pending -> Running -> Failed (retries exhausted)
/// - Pending -> Failed (a dependency failed; work never runs)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, waiting on dependencies, or waiting out a retry delay.
    Pending,

    /// An attempt is executing on a worker.
    Running,

    /// Work returned a value.
    Completed,

    /// Retries exhausted or a dependency failed.
    Failed,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::pending(TaskStatus::Pending, false)]
    #[case::running(TaskStatus::Running, false)]
    #[case::completed(TaskStatus::Completed, true)]
    #[case::failed(TaskStatus::Failed, true)]
    fn terminal_states(#[case] status: TaskStatus, #[case] terminal: bool) {
        assert_eq!(status.is_terminal(), terminal);
    }

    #[test]
    fn serializes_as_snake_case() {
        let s = serde_json::to_string(&TaskStatus::Completed).unwrap();
        assert_eq!(s, "\"completed\"");
        assert_eq!(TaskStatus::Running.to_string(), "running");
    }
}
