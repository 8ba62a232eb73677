//! In-memory queue state.
//!
//! Everything here is synchronous and runs under the queue lock; the async
//! parts (waking workers, sleeping through retry delays) live in
//! [`TaskQueue`](super::TaskQueue) and the worker loop.

use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, warn};

use super::{Decision, DependencyGraph, TaskRecord};
use crate::domain::{EventBus, Task, TaskError, TaskEventKind, TaskId, TaskStatus, Work};
use crate::observability::{QueueStats, TaskSnapshot};

/// Entry in the ready heap.
///
/// Ordering is reversed so `BinaryHeap` pops the lowest priority value first,
/// and among equal priorities the lowest sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReadyEntry {
    priority: i32,
    seq: u64,
    task_id: TaskId,
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A task handed to a worker for one attempt.
pub(crate) struct Claim {
    pub task_id: TaskId,
    pub name: String,
    pub work: Arc<dyn Work>,
    pub args: Value,
    pub attempt: u32,
}

/// What `submit` did with a new task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// On the ready heap; a worker should be woken.
    Ready,

    /// Failed on arrival because a dependency is unknown or already failed.
    Rejected,
}

pub(crate) struct QueueState {
    /// All task records (single source of truth).
    tasks: HashMap<TaskId, TaskRecord>,

    /// Ready heap (ids only). May hold stale entries for tasks that failed
    /// through a dependency while queued; those are skipped on pop.
    ready: BinaryHeap<ReadyEntry>,

    /// Unresolved dependencies only.
    graph: DependencyGraph,

    next_seq: u64,
    bus: EventBus,
}

impl QueueState {
    pub fn new(bus: EventBus) -> Self {
        Self {
            tasks: HashMap::new(),
            ready: BinaryHeap::new(),
            graph: DependencyGraph::new(),
            next_seq: 0,
            bus,
        }
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    fn allocate_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Register a task and put it on the ready heap.
    ///
    /// Dependencies are resolved against the current table: completed ones are
    /// marked met, pending or running ones become graph edges, and an unknown
    /// or failed one fails the new task immediately.
    pub fn submit(&mut self, id: TaskId, task: Task, priority: i32, now: DateTime<Utc>) -> Admission {
        let seq = self.allocate_seq();
        let mut record = TaskRecord::new(id.clone(), task, priority, seq, now);

        let mut rejection = None;
        for dep in record.dependencies.clone() {
            match self.tasks.get(&dep) {
                None => {
                    rejection = Some(TaskError::dependency(dep, "unknown dependency"));
                    break;
                }
                Some(dep_record) => match dep_record.status {
                    TaskStatus::Completed => record.mark_dependency_met(&dep),
                    TaskStatus::Failed => {
                        let reason = failure_reason(dep_record);
                        rejection = Some(TaskError::dependency(dep, reason));
                        break;
                    }
                    TaskStatus::Pending | TaskStatus::Running => {}
                },
            }
        }

        self.bus
            .publish(now, id.clone(), TaskEventKind::Submitted { priority });

        if let Some(err) = rejection {
            warn!(task_id = %id, error = %err, "task rejected on submission");
            record.mark_failed(err.clone(), now);
            self.tasks.insert(id.clone(), record);
            self.bus.publish(now, id, TaskEventKind::Failed { error: err });
            return Admission::Rejected;
        }

        for dep in record.unmet_dependencies() {
            self.graph.add_dependency(id.clone(), dep);
        }
        debug!(task_id = %id, priority, seq, "task submitted");
        self.tasks.insert(id.clone(), record);
        self.ready.push(ReadyEntry {
            priority,
            seq,
            task_id: id,
        });
        Admission::Ready
    }

    /// Pop the next runnable task and mark it Running.
    ///
    /// Tasks whose dependencies are still unresolved are parked (kept off the
    /// heap) and come back when their last dependency completes.
    pub fn claim_next(&mut self, now: DateTime<Utc>) -> Option<Claim> {
        while let Some(entry) = self.ready.pop() {
            let Some(record) = self.tasks.get_mut(&entry.task_id) else {
                warn!(task_id = %entry.task_id, "ready entry without a record");
                continue;
            };
            if record.status != TaskStatus::Pending || record.waiting {
                continue;
            }

            if self.graph.has_dependencies(&entry.task_id) {
                record.waiting = true;
                let pending = self.graph.get_dependencies(&entry.task_id);
                debug!(task_id = %entry.task_id, ?pending, "waiting on dependencies");
                self.bus.publish(
                    now,
                    entry.task_id,
                    TaskEventKind::WaitingOnDependencies { pending },
                );
                continue;
            }

            let attempt = record.start_attempt(now);
            self.bus
                .publish(now, entry.task_id.clone(), TaskEventKind::Started { attempt });
            return Some(Claim {
                task_id: entry.task_id,
                name: record.name.clone(),
                work: Arc::clone(&record.work),
                args: record.args.clone(),
                attempt,
            });
        }
        None
    }

    /// Record a successful attempt. Returns how many parked dependents became
    /// runnable.
    pub fn complete(&mut self, id: &TaskId, result: Value, now: DateTime<Utc>) -> usize {
        let Some(record) = self.tasks.get_mut(id) else {
            warn!(task_id = %id, "completion for unknown task");
            return 0;
        };
        record.mark_completed(result, now);
        let attempt = record.attempts;
        self.bus
            .publish(now, id.clone(), TaskEventKind::Completed { attempt });

        let mut unblocked = 0;
        for dependent in self.graph.get_waiting_tasks(id) {
            self.graph.remove_dependency(&dependent, id);
            let Some(dep_record) = self.tasks.get_mut(&dependent) else {
                continue;
            };
            dep_record.mark_dependency_met(id);

            if dep_record.waiting
                && dep_record.status == TaskStatus::Pending
                && !self.graph.has_dependencies(&dependent)
            {
                dep_record.waiting = false;
                debug!(task_id = %dependent, "dependencies met, back on the ready heap");
                self.ready.push(ReadyEntry {
                    priority: dep_record.priority,
                    seq: dep_record.seq,
                    task_id: dependent,
                });
                unblocked += 1;
            }
        }
        unblocked
    }

    /// Record a failed attempt and apply the task's retry policy.
    ///
    /// On `Retry` the task is back to Pending but not yet on the heap; the
    /// caller sleeps out the delay and then calls [`QueueState::requeue`].
    /// On `GiveUp` the task fails and so does everything waiting on it.
    pub fn fail_attempt(&mut self, id: &TaskId, err: TaskError, now: DateTime<Utc>) -> Decision {
        let Some(record) = self.tasks.get_mut(id) else {
            warn!(task_id = %id, "failure for unknown task");
            return Decision::GiveUp;
        };
        let attempt = record.attempts;
        let decision = record.retry.decide(attempt);

        match decision {
            Decision::Retry { delay } => {
                warn!(
                    task_id = %id,
                    attempt,
                    max_retries = record.retry.max_retries,
                    delay_ms = millis(delay),
                    error = %err,
                    "attempt failed, retry scheduled"
                );
                record.schedule_retry(err.clone());
                self.bus.publish(
                    now,
                    id.clone(),
                    TaskEventKind::RetryScheduled {
                        attempt,
                        delay_ms: millis(delay),
                        error: err,
                    },
                );
            }
            Decision::GiveUp => {
                error!(task_id = %id, attempt, error = %err, "task failed, retries exhausted");
                record.mark_failed(err.clone(), now);
                self.bus
                    .publish(now, id.clone(), TaskEventKind::Failed { error: err });
                self.propagate_failure(id, now);
            }
        }
        decision
    }

    /// Put a task whose retry delay has passed back on the ready heap with a
    /// fresh sequence number. Returns false if the task is no longer pending.
    pub fn requeue(&mut self, id: &TaskId) -> bool {
        let seq = self.allocate_seq();
        let Some(record) = self.tasks.get_mut(id) else {
            return false;
        };
        if record.status != TaskStatus::Pending || record.waiting {
            return false;
        }
        record.seq = seq;
        self.ready.push(ReadyEntry {
            priority: record.priority,
            seq,
            task_id: id.clone(),
        });
        true
    }

    /// Fail every task that (transitively) waits on `failed`.
    fn propagate_failure(&mut self, failed: &TaskId, now: DateTime<Utc>) {
        let mut stack = vec![failed.clone()];
        while let Some(current) = stack.pop() {
            let reason = self
                .tasks
                .get(&current)
                .map(failure_reason)
                .unwrap_or_else(|| "failed".to_string());

            for dependent in self.graph.get_waiting_tasks(&current) {
                self.graph.remove_task(&dependent);
                let Some(record) = self.tasks.get_mut(&dependent) else {
                    continue;
                };
                if record.status.is_terminal() {
                    continue;
                }
                let err = TaskError::dependency(current.clone(), reason.clone());
                warn!(task_id = %dependent, error = %err, "dependency failed");
                record.mark_failed(err.clone(), now);
                self.bus
                    .publish(now, dependent.clone(), TaskEventKind::Failed { error: err });
                stack.push(dependent);
            }
        }
    }

    pub fn snapshot(&self, id: &TaskId) -> Option<TaskSnapshot> {
        self.tasks.get(id).map(TaskRecord::snapshot)
    }

    pub fn all_snapshots(&self) -> BTreeMap<TaskId, TaskSnapshot> {
        self.tasks
            .iter()
            .map(|(id, record)| (id.clone(), record.snapshot()))
            .collect()
    }

    pub fn stats(&self, workers_running: bool) -> QueueStats {
        let mut stats = QueueStats {
            total_tasks: self.tasks.len(),
            workers_running,
            ..QueueStats::default()
        };
        for record in self.tasks.values() {
            match record.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
            if record.waiting {
                stats.waiting += 1;
            }
        }
        stats.queue_size = self
            .ready
            .iter()
            .filter(|entry| {
                self.tasks
                    .get(&entry.task_id)
                    .is_some_and(|r| r.status == TaskStatus::Pending && !r.waiting)
            })
            .count();
        stats
    }
}

fn failure_reason(record: &TaskRecord) -> String {
    record
        .error
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "failed".to_string())
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop(_: &Value) -> anyhow::Result<Value> {
        Ok(Value::Null)
    }

    fn state() -> QueueState {
        QueueState::new(EventBus::new(64))
    }

    fn submit(state: &mut QueueState, id: &str, priority: i32) -> Admission {
        state.submit(TaskId::new(id), Task::new(id, noop), priority, Utc::now())
    }

    fn submit_with_deps(state: &mut QueueState, id: &str, deps: &[&str]) -> Admission {
        let task = Task::builder(id, noop)
            .dependencies(deps.iter().map(|d| TaskId::new(*d)))
            .build()
            .unwrap();
        state.submit(TaskId::new(id), task, 0, Utc::now())
    }

    fn claim_id(state: &mut QueueState) -> Option<String> {
        state
            .claim_next(Utc::now())
            .map(|c| c.task_id.as_str().to_string())
    }

    fn status(state: &QueueState, id: &str) -> TaskStatus {
        state.snapshot(&TaskId::new(id)).unwrap().status
    }

    #[test]
    fn lowest_priority_value_runs_first() {
        let mut s = state();
        submit(&mut s, "low", 5);
        submit(&mut s, "high", 1);
        submit(&mut s, "mid", 3);

        assert_eq!(claim_id(&mut s).as_deref(), Some("high"));
        assert_eq!(claim_id(&mut s).as_deref(), Some("mid"));
        assert_eq!(claim_id(&mut s).as_deref(), Some("low"));
        assert_eq!(claim_id(&mut s), None);
    }

    #[test]
    fn equal_priorities_run_in_submission_order() {
        let mut s = state();
        for name in ["a", "b", "c"] {
            submit(&mut s, name, 2);
        }
        assert_eq!(claim_id(&mut s).as_deref(), Some("a"));
        assert_eq!(claim_id(&mut s).as_deref(), Some("b"));
        assert_eq!(claim_id(&mut s).as_deref(), Some("c"));
    }

    #[test]
    fn claim_marks_running_and_counts_attempt() {
        let mut s = state();
        submit(&mut s, "a", 0);
        let claim = s.claim_next(Utc::now()).unwrap();

        assert_eq!(claim.attempt, 1);
        assert_eq!(status(&s, "a"), TaskStatus::Running);
        assert_eq!(s.snapshot(&TaskId::new("a")).unwrap().attempts, 1);
    }

    #[test]
    fn dependent_is_parked_then_unblocked_by_completion() {
        let mut s = state();
        submit(&mut s, "a", 0);
        submit_with_deps(&mut s, "b", &["a"]);

        let a = s.claim_next(Utc::now()).unwrap();
        // b comes off the heap but its dependency is still running.
        assert!(s.claim_next(Utc::now()).is_none());
        let b_snap = s.snapshot(&TaskId::new("b")).unwrap();
        assert!(b_snap.waiting_on_dependencies);
        assert_eq!(b_snap.attempts, 0);

        assert_eq!(s.complete(&a.task_id, json!(1), Utc::now()), 1);

        let b = s.claim_next(Utc::now()).unwrap();
        assert_eq!(b.task_id, TaskId::new("b"));
        let b_snap = s.snapshot(&TaskId::new("b")).unwrap();
        assert!(!b_snap.waiting_on_dependencies);
        assert!(b_snap.dependency_status[&TaskId::new("a")]);
    }

    #[test]
    fn completed_dependency_is_met_on_submission() {
        let mut s = state();
        submit(&mut s, "a", 0);
        let a = s.claim_next(Utc::now()).unwrap();
        s.complete(&a.task_id, Value::Null, Utc::now());

        submit_with_deps(&mut s, "b", &["a"]);
        assert_eq!(claim_id(&mut s).as_deref(), Some("b"));
    }

    #[test]
    fn dependent_waits_for_all_dependencies() {
        let mut s = state();
        submit(&mut s, "a", 0);
        submit(&mut s, "b", 0);
        submit_with_deps(&mut s, "c", &["a", "b"]);

        let a = s.claim_next(Utc::now()).unwrap();
        let b = s.claim_next(Utc::now()).unwrap();
        assert!(s.claim_next(Utc::now()).is_none());

        assert_eq!(s.complete(&a.task_id, Value::Null, Utc::now()), 0);
        assert!(s.claim_next(Utc::now()).is_none());
        assert_eq!(s.complete(&b.task_id, Value::Null, Utc::now()), 1);
        assert_eq!(claim_id(&mut s).as_deref(), Some("c"));
    }

    #[test]
    fn unknown_dependency_fails_on_submission() {
        let mut s = state();
        let admission = submit_with_deps(&mut s, "b", &["ghost"]);

        assert_eq!(admission, Admission::Rejected);
        let snap = s.snapshot(&TaskId::new("b")).unwrap();
        assert_eq!(snap.status, TaskStatus::Failed);
        assert_eq!(snap.attempts, 0);
        assert!(matches!(
            snap.error,
            Some(TaskError::DependencyFailure { ref dependency, .. }) if dependency.as_str() == "ghost"
        ));
        assert!(s.claim_next(Utc::now()).is_none());
    }

    #[test]
    fn retry_keeps_task_pending_until_requeued() {
        let mut s = state();
        submit(&mut s, "flaky", 0);
        let claim = s.claim_next(Utc::now()).unwrap();

        let decision = s.fail_attempt(&claim.task_id, TaskError::work("boom"), Utc::now());
        assert_eq!(
            decision,
            Decision::Retry {
                delay: Duration::from_secs(5)
            }
        );
        let snap = s.snapshot(&claim.task_id).unwrap();
        assert_eq!(snap.status, TaskStatus::Pending);
        assert_eq!(snap.last_error, Some(TaskError::work("boom")));
        assert!(s.claim_next(Utc::now()).is_none());

        assert!(s.requeue(&claim.task_id));
        let again = s.claim_next(Utc::now()).unwrap();
        assert_eq!(again.attempt, 2);
    }

    #[test]
    fn retried_task_goes_behind_equal_priority_submissions() {
        let mut s = state();
        submit(&mut s, "first", 1);
        let first = s.claim_next(Utc::now()).unwrap();
        submit(&mut s, "second", 1);

        s.fail_attempt(&first.task_id, TaskError::work("boom"), Utc::now());
        s.requeue(&first.task_id);

        assert_eq!(claim_id(&mut s).as_deref(), Some("second"));
        assert_eq!(claim_id(&mut s).as_deref(), Some("first"));
    }

    #[test]
    fn exhausted_retries_fail_dependents_transitively() {
        let mut s = state();
        let task = Task::builder("a", noop).max_retries(0).build().unwrap();
        s.submit(TaskId::new("a"), task, 0, Utc::now());
        submit_with_deps(&mut s, "b", &["a"]);
        submit_with_deps(&mut s, "c", &["b"]);

        let a = s.claim_next(Utc::now()).unwrap();
        let decision = s.fail_attempt(&a.task_id, TaskError::work("boom"), Utc::now());
        assert_eq!(decision, Decision::GiveUp);

        assert_eq!(status(&s, "a"), TaskStatus::Failed);
        assert_eq!(status(&s, "b"), TaskStatus::Failed);
        assert_eq!(status(&s, "c"), TaskStatus::Failed);
        let c = s.snapshot(&TaskId::new("c")).unwrap();
        assert_eq!(c.attempts, 0);
        assert!(matches!(
            c.error,
            Some(TaskError::DependencyFailure { ref dependency, .. }) if dependency.as_str() == "b"
        ));
        // Stale heap entries for b and c are skipped.
        assert!(s.claim_next(Utc::now()).is_none());
    }

    #[test]
    fn failed_dependency_rejects_later_submission() {
        let mut s = state();
        let task = Task::builder("a", noop).max_retries(0).build().unwrap();
        s.submit(TaskId::new("a"), task, 0, Utc::now());
        let a = s.claim_next(Utc::now()).unwrap();
        s.fail_attempt(&a.task_id, TaskError::work("boom"), Utc::now());

        assert_eq!(submit_with_deps(&mut s, "b", &["a"]), Admission::Rejected);
        assert_eq!(status(&s, "b"), TaskStatus::Failed);
    }

    #[test]
    fn stats_count_each_status() {
        let mut s = state();
        submit(&mut s, "a", 0);
        submit(&mut s, "b", 1);
        submit_with_deps(&mut s, "c", &["a"]);
        let _a = s.claim_next(Utc::now()).unwrap();
        let b = s.claim_next(Utc::now()).unwrap();
        s.complete(&b.task_id, Value::Null, Utc::now());

        let stats = s.stats(true);
        assert_eq!(stats.total_tasks, 3);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.waiting, 1);
        assert_eq!(stats.queue_size, 0);
        assert!(stats.workers_running);
    }

    #[tokio::test]
    async fn lifecycle_events_are_published() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let mut s = QueueState::new(bus);

        submit(&mut s, "a", 7);
        let a = s.claim_next(Utc::now()).unwrap();
        s.complete(&a.task_id, Value::Null, Utc::now());

        let kinds: Vec<_> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .into_iter()
        .map(|e| e.kind)
        .collect();
        assert_eq!(
            kinds,
            vec![
                TaskEventKind::Submitted { priority: 7 },
                TaskEventKind::Started { attempt: 1 },
                TaskEventKind::Completed { attempt: 1 },
            ]
        );
    }
}
