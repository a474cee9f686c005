use std::sync::RwLock;

use time::{Date, OffsetDateTime};

/// Source of "today" for every time-dependent policy.
pub trait Clock: Send + Sync {
    fn today(&self) -> Date;

    /// `(year, month)` of [`Clock::today`].
    fn current_period(&self) -> (i32, u8) {
        let today = self.today();
        (today.year(), today.month() as u8)
    }
}

/// Wall clock, in UTC.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> Date {
        OffsetDateTime::now_utc().date()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    today: RwLock<Date>,
}

impl FixedClock {
    pub fn new(today: Date) -> Self {
        Self {
            today: RwLock::new(today),
        }
    }

    pub fn set(&self, today: Date) {
        match self.today.write() {
            Ok(mut guard) => *guard = today,
            Err(poisoned) => *poisoned.into_inner() = today,
        }
    }
}

impl Clock for FixedClock {
    fn today(&self) -> Date {
        match self.today.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
