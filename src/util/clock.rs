//! Wall-clock access, swappable for tests.

use std::sync::Mutex;

use time::{Duration, OffsetDateTime};

use crate::cache::mutex_lock;

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<OffsetDateTime>,
}

impl FixedClock {
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: OffsetDateTime) {
        *mutex_lock(&self.now, "util::clock", "set") = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = mutex_lock(&self.now, "util::clock", "advance");
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        *mutex_lock(&self.now, "util::clock", "now")
    }
}
