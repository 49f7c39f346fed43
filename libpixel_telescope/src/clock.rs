use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// A shutdown flag shared between a controller and its worker threads.
///
/// Waiting on it is how workers sleep: a pending wait returns as soon as the flag is set.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (flag, cvar) = &*self.inner;
        if let Ok(mut triggered) = flag.lock() {
            *triggered = true;
        }
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        // A poisoned flag means a worker panicked; treat that as a shutdown
        self.inner.0.lock().map(|t| *t).unwrap_or(true)
    }

    /// Wait up to `timeout`. Returns true if shutdown was triggered.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = match flag.lock() {
            Ok(guard) => guard,
            Err(_) => return true,
        };
        match cvar.wait_timeout_while(guard, timeout, |triggered| !*triggered) {
            Ok((triggered, _)) => *triggered,
            Err(_) => true,
        }
    }
}

/// Time source for the replay scheduler
pub trait Clock: Send {
    /// Time elapsed since a fixed origin
    fn now(&self) -> Duration;

    /// Sleep for `delay`. Returns true if the sleep was cut short by `shutdown`.
    fn sleep(&self, delay: Duration, shutdown: &Shutdown) -> bool;
}

/// The wall clock
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, delay: Duration, shutdown: &Shutdown) -> bool {
        shutdown.wait_timeout(delay)
    }
}

/// A manually driven clock. Sleeping advances it instantly and records the requested
/// delay, so timing logic can be checked without waiting.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    now: Arc<Mutex<Duration>>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward, as if work took `elapsed`
    pub fn advance(&self, elapsed: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += elapsed;
        }
    }

    /// Every delay slept so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        self.now.lock().map(|now| *now).unwrap_or_default()
    }

    fn sleep(&self, delay: Duration, shutdown: &Shutdown) -> bool {
        if shutdown.is_triggered() {
            return true;
        }
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(delay);
        }
        self.advance(delay);
        false
    }
}
