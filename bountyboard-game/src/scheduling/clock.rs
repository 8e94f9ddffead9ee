use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};

/// Source of time for the scheduler and for bounty timestamps.
///
/// Deadlines are measured on the monotonic [`Instant`] axis; bounty issue and
/// end times are wall-clock UTC values. Both must advance together.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;

    fn utc_now(&self) -> DateTime<Utc>;
}

/// Real time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used by tests and the seeded tester.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    utc_origin: DateTime<Utc>,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    #[must_use]
    pub fn new(utc_origin: DateTime<Utc>) -> Self {
        Self {
            origin: Instant::now(),
            utc_origin,
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(PoisonError::into_inner);
        *elapsed = elapsed.saturating_add(by);
    }

    /// Total time advanced since construction.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        offset_utc(self.utc_origin, self.elapsed())
    }
}

/// Clock backed by tokio's timer, so paused-time tests stay consistent with
/// the scheduler driver's sleeps.
#[cfg(feature = "async")]
#[derive(Debug)]
pub struct TokioClock {
    origin: tokio::time::Instant,
    utc_origin: DateTime<Utc>,
}

#[cfg(feature = "async")]
impl TokioClock {
    #[must_use]
    pub fn new(utc_origin: DateTime<Utc>) -> Self {
        Self {
            origin: tokio::time::Instant::now(),
            utc_origin,
        }
    }
}

#[cfg(feature = "async")]
impl Default for TokioClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[cfg(feature = "async")]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        offset_utc(self.utc_origin, tokio::time::Instant::now() - self.origin)
    }
}

fn offset_utc(origin: DateTime<Utc>, elapsed: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(elapsed)
        .ok()
        .and_then(|delta| origin.checked_add_signed(delta))
        .unwrap_or(origin)
}
