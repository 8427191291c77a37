//! Injectable time source.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Source of the current time for staleness, leases and `computedAt`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests. Shared across tasks, so the time sits
/// behind a mutex rather than requiring `&mut self` to advance.
#[derive(Debug)]
#[cfg_attr(not(test), allow(dead_code))]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

#[cfg_attr(not(test), allow(dead_code))]
impl ManualClock {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(time),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current += by;
    }

    pub fn set(&self, time: DateTime<Utc>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = time;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}
