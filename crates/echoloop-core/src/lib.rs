//! echoloop-core
//!
//! A small in-process task queue: priority scheduling, per-task retries,
//! dependencies between tasks and a fixed pool of workers.
//!
//! # Modules
//! - **domain**: task definition, ids, status, errors, lifecycle events
//! - **ports**: clock and id generation seams
//! - **queue**: [`TaskQueue`] plus its records, dependency graph and retry policy
//! - **config**: [`QueueConfig`]
//! - **observability**: snapshot and stats views
//!
//! ```no_run
//! use echoloop_core::{QueueConfig, Task, TaskQueue};
//! use serde_json::json;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let queue = TaskQueue::new(QueueConfig::default());
//! queue.start().await?;
//!
//! let id = queue.add_task(Task::new("hello", |_| Ok(json!("hi"))), 0).await;
//! let snapshot = queue.wait_for_task(&id, None).await?;
//! assert_eq!(snapshot.result, Some(json!("hi")));
//!
//! queue.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod observability;
pub mod ports;
pub mod queue;

mod runtime;
mod worker;

pub use config::QueueConfig;
pub use domain::{Task, TaskBuilder, TaskError, TaskEvent, TaskEventKind, TaskId, TaskStatus, Work};
pub use error::QueueError;
pub use observability::{QueueStats, TaskSnapshot};
pub use queue::{RetryPolicy, TaskQueue};
