//! Task record: definition + execution state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::RetryPolicy;
use crate::domain::{Task, TaskError, TaskId, TaskStatus, Work};
use crate::observability::TaskSnapshot;

/// The queue's record of one submitted task.
///
/// Design:
/// - This is the single source of truth for task state.
/// - The ready heap holds ids only.
/// - All state transitions happen through the methods below, under the
///   queue lock.
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub work: Arc<dyn Work>,
    pub args: Value,
    pub retry: RetryPolicy,
    pub priority: i32,

    /// Submission order; breaks ties between equal priorities.
    pub seq: u64,

    pub dependencies: BTreeSet<TaskId>,

    /// Dependency id -> completed successfully.
    pub dependency_status: BTreeMap<TaskId, bool>,

    pub status: TaskStatus,

    /// Attempts started so far (including the current one while Running).
    pub attempts: u32,

    /// Parked off the ready heap until its dependencies complete.
    pub waiting: bool,

    pub result: Option<Value>,
    pub error: Option<TaskError>,
    pub last_error: Option<TaskError>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(id: TaskId, task: Task, priority: i32, seq: u64, now: DateTime<Utc>) -> Self {
        let (name, work, args, retry, dependencies) = task.into_parts();
        let dependency_status = dependencies.iter().map(|d| (d.clone(), false)).collect();
        Self {
            id,
            name,
            work,
            args,
            retry,
            priority,
            seq,
            dependencies,
            dependency_status,
            status: TaskStatus::Pending,
            attempts: 0,
            waiting: false,
            result: None,
            error: None,
            last_error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Dependencies that have not completed yet.
    pub fn unmet_dependencies(&self) -> Vec<TaskId> {
        self.dependency_status
            .iter()
            .filter(|&(_, done)| !done)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn mark_dependency_met(&mut self, dependency: &TaskId) {
        if let Some(done) = self.dependency_status.get_mut(dependency) {
            *done = true;
        }
    }

    /// Mark as running and count the attempt. Returns the attempt number.
    pub fn start_attempt(&mut self, now: DateTime<Utc>) -> u32 {
        self.status = TaskStatus::Running;
        self.waiting = false;
        self.attempts += 1;
        self.started_at = Some(now);
        self.attempts
    }

    pub fn mark_completed(&mut self, result: Value, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.last_error = None;
        self.completed_at = Some(now);
    }

    pub fn mark_failed(&mut self, error: TaskError, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.waiting = false;
        self.last_error = Some(error.clone());
        self.error = Some(error);
        self.completed_at = Some(now);
    }

    /// Back to Pending after a failed attempt; the worker re-enqueues it once
    /// the retry delay has passed.
    pub fn schedule_retry(&mut self, error: TaskError) {
        self.status = TaskStatus::Pending;
        self.last_error = Some(error);
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status,
            priority: self.priority,
            attempts: self.attempts,
            max_retries: self.retry.max_retries,
            retry_delay_ms: self.retry.retry_delay.as_millis().min(u64::MAX as u128) as u64,
            dependencies: self.dependencies.iter().cloned().collect(),
            dependency_status: self.dependency_status.clone(),
            waiting_on_dependencies: self.waiting,
            result: self.result.clone(),
            error: self.error.clone(),
            last_error: self.last_error.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}
