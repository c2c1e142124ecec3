//! Time source shared by the actuator and the control loop.
//!
//! Everything that waits goes through [`Clock::sleep`] so scenario tests can
//! run the loop against a virtual clock instead of real time.

use chrono::{Local, NaiveTime};
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    /// Monotonic instant.
    fn now(&self) -> Instant;

    /// Wall-clock time of day, used by the operating window.
    fn local_time(&self) -> NaiveTime;

    /// Block the calling thread.
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn local_time(&self) -> NaiveTime {
        Local::now().time()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
