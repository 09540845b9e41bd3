//! Time source for the service layer
use super::types::TimeStamp;
use chrono::Utc;
use std::sync::RwLock;

pub trait Clock: Send + Sync {
    fn now(&self) -> TimeStamp<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimeStamp<Utc> {
        TimeStamp::new()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock(RwLock<TimeStamp<Utc>>);

impl FixedClock {
    pub fn new(at: TimeStamp<Utc>) -> Self {
        Self(RwLock::new(at))
    }
    pub fn set(&self, at: TimeStamp<Utc>) {
        // a poisoned lock still holds a valid timestamp
        let mut guard = self.0.write().unwrap_or_else(|e| e.into_inner());
        *guard = at;
    }
    pub fn advance_days(&self, days: u32) {
        let next = self.now().plus_days(days);
        self.set(next);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> TimeStamp<Utc> {
        *self.0.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances_by_whole_days() {
        let start = TimeStamp::new_with(2026, 1, 30, 8, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        clock.advance_days(3);
        assert_eq!(clock.now(), TimeStamp::new_with(2026, 2, 2, 8, 0, 0).unwrap());
    }
}
