//! Task definition: the work to run plus its retry policy and dependencies.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::TaskId;
use crate::error::QueueError;
use crate::queue::RetryPolicy;

/// A unit of work the queue can run.
///
/// Work is synchronous and opaque to the queue: it receives the task's
/// arguments and either returns a value or fails. Each attempt runs on the
/// blocking thread pool, so it may block freely (browser round-trips, OCR,
/// `git push`, ...).
pub trait Work: Send + Sync + 'static {
    fn call(&self, args: &Value) -> anyhow::Result<Value>;
}

impl<F> Work for F
where
    F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    fn call(&self, args: &Value) -> anyhow::Result<Value> {
        self(args)
    }
}

/// A task as submitted by a caller.
///
/// Only the definition lives here; the mutable execution state (status,
/// attempts, result, ...) is kept by the queue once the task is submitted.
pub struct Task {
    name: String,
    work: Arc<dyn Work>,
    args: Value,
    retry: RetryPolicy,
    dependencies: BTreeSet<TaskId>,
}

impl Task {
    /// Create a task with default settings (3 retries, 5 s delay, no dependencies).
    pub fn new<F>(name: impl Into<String>, work: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::from_work(name, work)
    }

    /// Same as [`Task::new`] for a type implementing [`Work`].
    pub fn from_work(name: impl Into<String>, work: impl Work) -> Self {
        Self {
            name: name.into(),
            work: Arc::new(work),
            args: Value::Null,
            retry: RetryPolicy::default(),
            dependencies: BTreeSet::new(),
        }
    }

    /// Start a builder for a task with non-default settings.
    pub fn builder<F>(name: impl Into<String>, work: F) -> TaskBuilder
    where
        F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        TaskBuilder::new(Self::from_work(name, work))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &Value {
        &self.args
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn dependencies(&self) -> &BTreeSet<TaskId> {
        &self.dependencies
    }

    #[cfg(test)]
    pub(crate) fn work(&self) -> Arc<dyn Work> {
        Arc::clone(&self.work)
    }

    pub(crate) fn into_parts(
        self,
    ) -> (String, Arc<dyn Work>, Value, RetryPolicy, BTreeSet<TaskId>) {
        (self.name, self.work, self.args, self.retry, self.dependencies)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("retry", &self.retry)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Task`]; validation happens in [`TaskBuilder::build`].
pub struct TaskBuilder {
    task: Task,
    retry_delay_secs: Option<f64>,
}

impl TaskBuilder {
    fn new(task: Task) -> Self {
        Self {
            task,
            retry_delay_secs: None,
        }
    }

    /// Arguments handed to the work on every attempt.
    pub fn args(mut self, args: Value) -> Self {
        self.task.args = args;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.task.retry.max_retries = max_retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.task.retry.retry_delay = delay;
        self.retry_delay_secs = None;
        self
    }

    /// Retry delay in (fractional) seconds. Negative or non-finite values are
    /// rejected by `build()`.
    pub fn retry_delay_secs(mut self, secs: f64) -> Self {
        self.retry_delay_secs = Some(secs);
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.task.retry.multiplier = multiplier;
        self
    }

    pub fn depends_on(mut self, dependency: TaskId) -> Self {
        self.task.dependencies.insert(dependency);
        self
    }

    pub fn dependencies(mut self, dependencies: impl IntoIterator<Item = TaskId>) -> Self {
        self.task.dependencies.extend(dependencies);
        self
    }

    pub fn build(mut self) -> Result<Task, QueueError> {
        if let Some(secs) = self.retry_delay_secs {
            if !secs.is_finite() || secs < 0.0 {
                return Err(QueueError::invalid(format!(
                    "retry_delay must be a non-negative number of seconds, got {secs}"
                )));
            }
            self.task.retry.retry_delay = Duration::try_from_secs_f64(secs)
                .map_err(|e| QueueError::invalid(format!("retry_delay out of range: {e}")))?;
        }
        self.task.retry.validate()?;
        Ok(self.task)
    }
}
