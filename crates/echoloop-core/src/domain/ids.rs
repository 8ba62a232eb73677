//! Task identifiers.
//!
//! A `TaskId` is `{name}_{ulid}`: the caller's label followed by a ULID whose
//! leading 48 bits are the submission time in milliseconds. Two submissions
//! with the same name in the same millisecond still differ in the 80 random
//! bits, and the queue re-draws on collision anyway.

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifier of a submitted task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Wrap an id received from a caller (HTTP path, config file, ...).
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Build the id for a task named `name` from a freshly drawn ULID.
    pub fn from_parts(name: &str, ulid: Ulid) -> Self {
        Self(format!("{name}_{ulid}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_keeps_the_caller_name_as_prefix() {
        let ulid = Ulid::new();
        let id = TaskId::from_parts("iteration_3", ulid);

        assert!(id.as_str().starts_with("iteration_3_"));
        assert!(id.as_str().ends_with(&ulid.to_string()));
    }

    #[test]
    fn same_name_yields_distinct_ids() {
        let a = TaskId::from_parts("commit", Ulid::new());
        let b = TaskId::from_parts("commit", Ulid::new());
        assert_ne!(a, b);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = TaskId::new("commit_01J0000000000000000000000");
        let s = serde_json::to_string(&id).unwrap();
        assert_eq!(s, "\"commit_01J0000000000000000000000\"");

        let back: TaskId = serde_json::from_str(&s).unwrap();
        assert_eq!(back, id);
    }
}
