//! Task lifecycle events and the broadcast bus that carries them.
//!
//! UI layers (dashboards, drivers waiting on a task) subscribe here instead
//! of reaching into the queue. Publishing never blocks; a receiver that
//! falls behind sees `RecvError::Lagged` and should re-read snapshots.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use super::{TaskError, TaskId};

/// What happened to a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskEventKind {
    Submitted { priority: i32 },

    /// Dequeued with unmet dependencies and parked until they complete.
    WaitingOnDependencies { pending: Vec<TaskId> },

    Started { attempt: u32 },

    RetryScheduled {
        attempt: u32,
        delay_ms: u64,
        error: TaskError,
    },

    Completed { attempt: u32 },

    Failed { error: TaskError },
}

impl TaskEventKind {
    /// Completed or Failed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskEventKind::Completed { .. } | TaskEventKind::Failed { .. }
        )
    }
}

/// A single lifecycle event.
///
/// `seq` increases monotonically per queue and restores ordering when events
/// are consumed out of order.
#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub task_id: TaskId,
    #[serde(flatten)]
    pub kind: TaskEventKind,
}

/// Thin wrapper over [`tokio::sync::broadcast`].
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
    seq: Arc<AtomicU64>,
}

impl EventBus {
    /// Capacity is shared by all receivers and clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event. Dropped silently when nobody is subscribed.
    pub fn publish(&self, at: DateTime<Utc>, task_id: TaskId, kind: TaskEventKind) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(TaskEvent {
            seq,
            at,
            task_id,
            kind,
        });
    }

    /// New receiver; only sees events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(Utc::now(), TaskId::new("a"), TaskEventKind::Submitted { priority: 0 });
        bus.publish(Utc::now(), TaskId::new("a"), TaskEventKind::Started { attempt: 1 });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(first.seq < second.seq);
        assert_eq!(second.kind, TaskEventKind::Started { attempt: 1 });
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new(0);
        bus.publish(Utc::now(), TaskId::new("a"), TaskEventKind::Completed { attempt: 1 });
    }

    #[test]
    fn event_json_is_flat() {
        let ev = TaskEvent {
            seq: 7,
            at: Utc::now(),
            task_id: TaskId::new("commit_1"),
            kind: TaskEventKind::Failed {
                error: TaskError::work("push rejected"),
            },
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["kind"], "failed");
        assert_eq!(v["task_id"], "commit_1");
        assert_eq!(v["error"]["message"], "push rejected");
    }
}
