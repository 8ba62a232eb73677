use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::queue::{Claim, Decision, Shared};
use crate::runtime;

/// Worker group handle.
/// - Dropping the group (and with it `shutdown_tx`) stops every worker.
/// - `shutdown_and_join()` waits for them, bounded by a timeout.
pub(crate) struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers.
    pub fn spawn(n: usize, shared: Arc<Shared>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let shared = Arc::clone(&shared);
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(worker_loop(worker_id, shared, rx)));
        }

        Self { shutdown_tx, joins }
    }

    /// Ask all workers to exit after their current attempt.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shut down and wait for every worker. Workers still busy when `timeout`
    /// runs out are aborted; returns how many were.
    ///
    /// Aborting a worker only abandons its wait: the attempt it was running
    /// lives in its own task and still records its outcome.
    pub async fn shutdown_and_join(mut self, timeout: Duration) -> usize {
        self.request_shutdown();
        let deadline = Instant::now() + timeout;
        let mut aborted = 0;
        for join in &mut self.joins {
            if tokio::time::timeout_at(deadline, &mut *join).await.is_err() {
                join.abort();
                aborted += 1;
            }
        }
        aborted
    }
}

async fn worker_loop(worker_id: usize, shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    debug!(worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let claim = {
            let mut state = shared.state.lock().await;
            state.claim_next(shared.clock.now())
        };

        let Some(claim) = claim else {
            // Idle: wake on submit, on shutdown, or after poll_interval.
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = shared.notify.notified() => {}
                _ = tokio::time::sleep(shared.poll_interval) => {}
            }
            continue;
        };

        // Owned by its own task so a timed-out stop() cannot strand the
        // record in `Running`.
        let attempt_task = tokio::spawn(run_attempt(
            worker_id,
            Arc::clone(&shared),
            claim,
            shutdown_rx.clone(),
        ));
        if let Err(e) = attempt_task.await {
            error!(worker_id, error = %e, "attempt task did not finish");
        }
    }
    debug!(worker_id, "worker stopped");
}

async fn run_attempt(
    worker_id: usize,
    shared: Arc<Shared>,
    claim: Claim,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let Claim {
        task_id,
        name,
        work,
        args,
        attempt,
    } = claim;
    info!(worker_id, task_id = %task_id, task = %name, attempt, "running task");

    match runtime::execute(work, args).await {
        Ok(result) => {
            let unblocked = {
                let mut state = shared.state.lock().await;
                state.complete(&task_id, result, shared.clock.now())
            };
            info!(worker_id, task_id = %task_id, attempt, "task completed");
            for _ in 0..unblocked {
                shared.notify.notify_one();
            }
        }
        Err(err) => {
            let decision = {
                let mut state = shared.state.lock().await;
                state.fail_attempt(&task_id, err, shared.clock.now())
            };
            let Decision::Retry { delay } = decision else {
                return;
            };

            // The delay holds this worker only; stop() cuts it short.
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => {
                    warn!(worker_id, task_id = %task_id, "shutdown during retry delay, requeueing now");
                }
            }

            let requeued = {
                let mut state = shared.state.lock().await;
                state.requeue(&task_id)
            };
            if requeued {
                shared.notify.notify_one();
            }
        }
    }
}
