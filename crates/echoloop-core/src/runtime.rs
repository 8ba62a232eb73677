//! Runs one attempt of a task's work.

use std::any::Any;
use std::sync::Arc;

use serde_json::Value;

use crate::domain::{TaskError, Work};

/// Execute `work` on the blocking thread pool.
///
/// Errors and panics from the work both come back as
/// [`TaskError::WorkFailure`]; the calling worker keeps running either way.
pub(crate) async fn execute(work: Arc<dyn Work>, args: Value) -> Result<Value, TaskError> {
    match tokio::task::spawn_blocking(move || work.call(&args)).await {
        Ok(Ok(value)) => Ok(value),
        // `{:#}` keeps the whole context chain on one line.
        Ok(Err(err)) => Err(TaskError::work(format!("{err:#}"))),
        Err(join) if join.is_panic() => Err(TaskError::work(format!(
            "work panicked: {}",
            panic_message(&*join.into_panic())
        ))),
        Err(join) => Err(TaskError::work(format!("work cancelled: {join}"))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use serde_json::json;

    #[tokio::test]
    async fn returns_the_work_result() {
        let work: Arc<dyn Work> = Arc::new(|args: &Value| -> anyhow::Result<Value> {
            Ok(json!({ "echo": args.clone() }))
        });
        let out = execute(work, json!("hi")).await.unwrap();
        assert_eq!(out, json!({ "echo": "hi" }));
    }

    #[tokio::test]
    async fn error_chain_becomes_work_failure() {
        let work: Arc<dyn Work> = Arc::new(|_: &Value| -> anyhow::Result<Value> {
            Err(anyhow::anyhow!("file missing")).context("reading ai_1_out.txt")
        });
        let err = execute(work, Value::Null).await.unwrap_err();
        assert_eq!(
            err,
            TaskError::work("reading ai_1_out.txt: file missing")
        );
    }

    #[tokio::test]
    async fn panics_are_caught() {
        let work: Arc<dyn Work> = Arc::new(|_: &Value| -> anyhow::Result<Value> {
            panic!("kaboom");
        });
        let err = execute(work, Value::Null).await.unwrap_err();
        match err {
            TaskError::WorkFailure { message } => assert!(message.contains("kaboom")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
