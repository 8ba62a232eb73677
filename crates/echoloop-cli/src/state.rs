use std::sync::Arc;

use echoloop_core::TaskQueue;
use tokio::sync::watch;

/// Application state shared by the HTTP handlers.
///
/// Built once in `serve` and dropped on shutdown; the queue is stopped
/// explicitly before that.
pub struct AppState {
    pub queue: Arc<TaskQueue>,

    /// Whether the echo loop runs alongside the server.
    pub loop_enabled: bool,

    /// Holds the echo loop between iterations while set.
    pub pause: watch::Sender<bool>,
}

impl AppState {
    pub fn new(queue: Arc<TaskQueue>, loop_enabled: bool) -> Self {
        let (pause, _) = watch::channel(false);
        Self {
            queue,
            loop_enabled,
            pause,
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.pause.borrow()
    }
}
