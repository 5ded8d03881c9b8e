use {
    chrono::{DateTime, Utc},
    std::sync::atomic::{AtomicI64, Ordering},
};

pub type Timestamp = DateTime<Utc>;

/// Source of "now" for every allocation decision. An operation reads it once
/// and reuses the value for all of its checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock that never goes backwards, even if the system time does.
#[derive(Debug, Default)]
pub struct System {
    /// Latest handed out time in microseconds since the epoch.
    last: AtomicI64,
}

impl Clock for System {
    fn now(&self) -> Timestamp {
        let wall = Utc::now();
        let micros = wall.timestamp_micros();
        let previous = self.last.fetch_max(micros, Ordering::SeqCst);
        if previous > micros {
            DateTime::from_timestamp_micros(previous).unwrap_or(wall)
        } else {
            wall
        }
    }
}

/// Manually driven clock.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug)]
pub struct Fake(AtomicI64);

#[cfg(any(test, feature = "test-util"))]
impl Fake {
    pub fn new(start: Timestamp) -> Self {
        Self(AtomicI64::new(start.timestamp_micros()))
    }

    pub fn advance(&self, by: chrono::Duration) {
        let micros = by.num_microseconds().unwrap_or(i64::MAX);
        self.0.fetch_add(micros, Ordering::SeqCst);
    }

    pub fn set(&self, to: Timestamp) {
        self.0.store(to.timestamp_micros(), Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Clock for Fake {
    fn now(&self) -> Timestamp {
        let micros = self.0.load(Ordering::SeqCst);
        DateTime::from_timestamp_micros(micros).unwrap_or_default()
    }
}
