//! Domain model (ids, task definition, status, errors, events).

pub mod errors;
pub mod events;
pub mod ids;
pub mod state;
pub mod task;

pub use errors::TaskError;
pub use events::{EventBus, TaskEvent, TaskEventKind};
pub use ids::TaskId;
pub use state::TaskStatus;
pub use task::{Task, TaskBuilder, Work};
