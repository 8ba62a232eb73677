//! Queue module: task records, dependency tracking, retry policy, and the
//! [`TaskQueue`] that ties them to a pool of workers.

mod dependency;
mod memory;
mod record;
mod retry;


pub(crate) use dependency::DependencyGraph;
pub(crate) use record::TaskRecord;
pub use retry::{Decision, RetryPolicy};

pub(crate) use memory::{Admission, Claim, QueueState};

use std::collections::BTreeMap;
use std::future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::domain::{EventBus, Task, TaskEvent, TaskId};
use crate::error::QueueError;
use crate::observability::{QueueStats, TaskSnapshot};
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};
use crate::worker::WorkerGroup;

/// State shared between the queue handle and its workers.
pub(crate) struct Shared {
    pub state: Mutex<QueueState>,
    pub notify: Notify,
    pub clock: Arc<dyn Clock>,
    pub poll_interval: Duration,
}

/// A priority task queue with retries, dependencies and a fixed worker pool.
///
/// Design:
/// - One coarse lock over the task table and ready heap; every read hands
///   out copies.
/// - Work runs on the blocking thread pool, at most `max_workers` at once.
/// - Tasks can be added before `start()`; they run once workers are up.
pub struct TaskQueue {
    config: QueueConfig,
    shared: Arc<Shared>,
    bus: EventBus,
    ids: Arc<dyn IdGenerator>,
    workers: Mutex<Option<WorkerGroup>>,
    running: AtomicBool,
}

impl TaskQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self::with_ports(config, clock, ids)
    }

    pub fn with_ports(config: QueueConfig, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        let bus = EventBus::new(config.event_capacity);
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::new(bus.clone())),
            notify: Notify::new(),
            clock,
            poll_interval: config.poll_interval,
        });
        Self {
            config,
            shared,
            bus,
            ids,
            workers: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Spawn the worker pool. Calling it again while running is a no-op.
    pub async fn start(&self) -> Result<(), QueueError> {
        self.config.validate()?;

        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            debug!("task queue already running");
            return Ok(());
        }
        *workers = Some(WorkerGroup::spawn(
            self.config.max_workers,
            Arc::clone(&self.shared),
        ));
        self.running.store(true, Ordering::SeqCst);
        info!(max_workers = self.config.max_workers, "task queue started");
        Ok(())
    }

    /// Stop the workers after their current attempt and wait for them, up to
    /// `stop_timeout`. A no-op when not running.
    ///
    /// Tasks still queued stay pending and run after the next `start()`.
    pub async fn stop(&self) {
        let Some(group) = self.workers.lock().await.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);

        let aborted = group.shutdown_and_join(self.config.stop_timeout).await;
        if aborted > 0 {
            warn!(
                aborted,
                timeout_ms = self.config.stop_timeout.as_millis() as u64,
                "workers did not stop in time and were aborted"
            );
        }
        info!("task queue stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register a task and queue it at `priority` (lower runs first).
    ///
    /// Never fails: a task whose dependency is unknown or already failed is
    /// recorded as failed and its id returned all the same.
    pub async fn add_task(&self, task: Task, priority: i32) -> TaskId {
        let (id, admission) = {
            let mut state = self.shared.state.lock().await;
            let mut id = self.ids.task_id(task.name());
            while state.contains(&id) {
                id = self.ids.task_id(task.name());
            }
            let admission = state.submit(id.clone(), task, priority, self.shared.clock.now());
            (id, admission)
        };

        if admission == Admission::Ready {
            self.shared.notify.notify_one();
        }
        id
    }

    /// Copy of the task's current state, or `None` for an unknown id.
    pub async fn get_task_status(&self, id: &TaskId) -> Option<TaskSnapshot> {
        self.shared.state.lock().await.snapshot(id)
    }

    pub async fn get_all_tasks(&self) -> BTreeMap<TaskId, TaskSnapshot> {
        self.shared.state.lock().await.all_snapshots()
    }

    pub async fn get_queue_stats(&self) -> QueueStats {
        let running = self.is_running();
        self.shared.state.lock().await.stats(running)
    }

    /// Lifecycle events for every task submitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.bus.subscribe()
    }

    /// Wait until the task completes or fails and return its final snapshot.
    ///
    /// Wakes on the task's events and re-checks at least every
    /// `poll_interval`. `timeout = None` waits indefinitely.
    pub async fn wait_for_task(
        &self,
        id: &TaskId,
        timeout: Option<Duration>,
    ) -> Result<TaskSnapshot, QueueError> {
        let mut events = self.bus.subscribe();
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let snapshot = self
                .get_task_status(id)
                .await
                .ok_or_else(|| QueueError::TaskNotFound(id.clone()))?;
            if snapshot.status.is_terminal() {
                return Ok(snapshot);
            }
            if !self.is_running() {
                return Err(QueueError::QueueNotRunning);
            }

            tokio::select! {
                _ = next_event_for(&mut events, id) => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = sleep_until_deadline(deadline) => {
                    return Err(QueueError::WaitTimeout(timeout.unwrap_or_default()));
                }
            }
        }
    }
}

async fn next_event_for(events: &mut broadcast::Receiver<TaskEvent>, id: &TaskId) {
    loop {
        match events.recv().await {
            Ok(event) if &event.task_id == id => return,
            Ok(_) => {}
            // Missed some events; the caller re-reads the snapshot.
            Err(RecvError::Lagged(_)) => return,
            Err(RecvError::Closed) => future::pending::<()>().await,
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}
