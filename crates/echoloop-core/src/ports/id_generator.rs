//! IdGenerator port.
//!
//! Task ids are `{name}_{ulid}`; the ULID timestamp comes from the injected
//! [`Clock`] so tests can pin it.

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::TaskId;
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    /// Generate a fresh id for a task named `name`.
    fn task_id(&self, name: &str) -> TaskId;
}

/// ULID-based generator: millisecond timestamp from the clock, 80 random bits.
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl IdGenerator for UlidGenerator {
    fn task_id(&self, name: &str) -> TaskId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        TaskId::from_parts(name, ulid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_ids_for_repeated_names() {
        let id_gen = UlidGenerator::new(Arc::new(SystemClock));

        let id1 = id_gen.task_id("iteration");
        let id2 = id_gen.task_id("iteration");
        let id3 = id_gen.task_id("iteration");

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
        assert!(id1.as_str().starts_with("iteration_"));
    }

    #[test]
    fn timestamp_comes_from_the_clock() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(Arc::new(FixedClock::new(fixed_time)));

        let id = id_gen.task_id("commit");
        let ulid_part = id.as_str().strip_prefix("commit_").unwrap();
        let ulid = Ulid::from_string(ulid_part).unwrap();

        assert_eq!(ulid.timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }
}
