//! Status views handed out to callers. Always copies, never live references.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{TaskError, TaskId, TaskStatus};

/// Point-in-time copy of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub priority: i32,

    /// Attempts started so far (including the current one while running).
    pub attempts: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,

    pub dependencies: Vec<TaskId>,

    /// Dependency id -> completed successfully.
    pub dependency_status: BTreeMap<TaskId, bool>,

    /// Parked by a worker until its remaining dependencies complete.
    pub waiting_on_dependencies: bool,

    /// Set once the task completed.
    pub result: Option<Value>,

    /// Set once the task failed.
    pub error: Option<TaskError>,

    /// Error of the most recent failed attempt, kept while retrying.
    pub last_error: Option<TaskError>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Aggregate counts over the task table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Ready entries in the priority queue (excludes parked tasks).
    pub queue_size: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,

    /// Pending tasks parked on unmet dependencies.
    pub waiting: usize,
    pub total_tasks: usize,
    pub workers_running: bool,
}
