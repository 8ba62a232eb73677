//! `echoloop demo`: a flaky task, a failing task and a dependent of the
//! failing one, run to completion.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::bail;
use echoloop_core::{Task, TaskQueue, TaskSnapshot};
use serde_json::json;
use tracing::info;

const WAIT: Option<Duration> = Some(Duration::from_secs(30));

/// Submit the three demo tasks and wait for each. The queue must be running.
pub async fn run_scenario(queue: &TaskQueue) -> anyhow::Result<Vec<TaskSnapshot>> {
    let calls = Arc::new(AtomicU32::new(0));
    let flaky = Task::builder("flaky", move |_| {
        let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= 2 {
            bail!("transient failure on attempt {attempt}");
        }
        Ok(json!("ok"))
    })
    .max_retries(3)
    .retry_delay(Duration::ZERO)
    .build()?;

    let broken = Task::builder("broken", |_| bail!("always fails"))
        .max_retries(1)
        .retry_delay(Duration::ZERO)
        .build()?;

    let t1 = queue.add_task(flaky, 0).await;
    let t2 = queue.add_task(broken, 0).await;

    let dependent = Task::builder("needs_broken", |_| Ok(json!("unreachable")))
        .depends_on(t2.clone())
        .build()?;
    let t3 = queue.add_task(dependent, 0).await;

    let mut snapshots = Vec::with_capacity(3);
    for id in [&t1, &t2, &t3] {
        let snapshot = queue.wait_for_task(id, WAIT).await?;
        info!(task_id = %id, status = %snapshot.status, attempts = snapshot.attempts, "task finished");
        snapshots.push(snapshot);
    }
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use echoloop_core::{QueueConfig, TaskError, TaskStatus};

    #[tokio::test]
    async fn scenario_ends_as_expected() {
        let queue = TaskQueue::new(
            QueueConfig::default()
                .with_max_workers(2)
                .with_poll_interval(Duration::from_millis(10)),
        );
        queue.start().await.unwrap();

        let snapshots = run_scenario(&queue).await.unwrap();
        queue.stop().await;

        let [t1, t2, t3] = snapshots.as_slice() else {
            panic!("expected three snapshots");
        };
        assert_eq!(t1.status, TaskStatus::Completed);
        assert_eq!(t1.attempts, 3);
        assert_eq!(t1.result, Some(json!("ok")));

        assert_eq!(t2.status, TaskStatus::Failed);
        assert_eq!(t2.attempts, 2);

        assert_eq!(t3.status, TaskStatus::Failed);
        assert_eq!(t3.attempts, 0);
        assert!(matches!(
            t3.error,
            Some(TaskError::DependencyFailure { ref dependency, .. }) if *dependency == t2.id
        ));
    }
}
