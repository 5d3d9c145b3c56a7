//! Time source and sleeping, injectable so the loop can run on simulated time.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::UtcDateTime;

pub trait Clock: Send + Sync {
    fn now(&self) -> UtcDateTime;

    fn sleep<'a>(&'a self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Wall-clock UTC time and tokio timers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UtcDateTime {
        UtcDateTime::now()
    }

    fn sleep<'a>(&'a self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

#[derive(Debug)]
struct ManualInner {
    now: UtcDateTime,
    sleeps: Vec<Duration>,
}

/// Simulated clock: `sleep` returns immediately, advancing `now` and
/// recording the requested duration.
#[derive(Debug)]
pub struct ManualClock {
    inner: Mutex<ManualInner>,
}

impl ManualClock {
    pub fn new(start: UtcDateTime) -> Self {
        Self {
            inner: Mutex::new(ManualInner {
                now: start,
                sleeps: Vec::new(),
            }),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.now = inner.now + duration;
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sleeps
            .clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().into_iter().sum()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UtcDateTime {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).now
    }

    fn sleep<'a>(&'a self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.now = inner.now + duration;
            inner.sleeps.push(duration);
        }
        Box::pin(std::future::ready(()))
    }
}
