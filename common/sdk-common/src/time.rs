use std::sync::Mutex;

use time::{Duration, OffsetDateTime};

pub trait TimeSource: Send + Sync {
    // Current wall clock time, in UTC
    fn now(&self) -> OffsetDateTime;
}

#[derive(Clone, Default)]
pub struct SystemTime {}

impl TimeSource for SystemTime {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to. Used by tests and by replays of
/// recorded transactions.
pub struct FixedTime {
    now: Mutex<OffsetDateTime>,
}

impl FixedTime {
    pub fn new(now: OffsetDateTime) -> FixedTime {
        FixedTime {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: OffsetDateTime) {
        if let Ok(mut current) = self.now.lock() {
            *current = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut current) = self.now.lock() {
            *current += by;
        }
    }
}

impl TimeSource for FixedTime {
    fn now(&self) -> OffsetDateTime {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
