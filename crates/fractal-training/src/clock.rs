//! Time source for every wait in the client.
//!
//! All sleeps go through [`Clock`] so retry loops, cooldowns and pause traps
//! can be fast-forwarded with [`ManualClock`] instead of sleeping for real.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

type SleepHook = Box<dyn FnMut(Duration) + Send>;

/// Virtual clock: `sleep` advances time instantly.
///
/// An optional hook runs after every sleep with the total virtual time elapsed,
/// which lets a test flip pause/cancel or device state at a chosen instant.
/// The hook must not sleep on the same clock.
pub struct ManualClock {
    base: Instant,
    elapsed: Mutex<Duration>,
    sleeps: AtomicU64,
    hook: Mutex<Option<SleepHook>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualClock")
            .field("elapsed", &self.elapsed())
            .field("sleeps", &self.sleep_count())
            .finish_non_exhaustive()
    }
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: AtomicU64::new(0),
            hook: Mutex::new(None),
        }
    }

    pub fn set_hook(&self, hook: impl FnMut(Duration) + Send + 'static) {
        *self.hook.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
    }

    /// Total virtual time slept so far.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn sleep_count(&self) -> u64 {
        self.sleeps.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        let now = {
            let mut elapsed = self.elapsed.lock().unwrap_or_else(PoisonError::into_inner);
            *elapsed += duration;
            *elapsed
        };
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.hook.lock().unwrap_or_else(PoisonError::into_inner).as_mut() {
            hook(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_manual_clock_advances_without_sleeping() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_secs(3600));
        assert_eq!(clock.now() - start, Duration::from_secs(3600));
        assert_eq!(clock.sleep_count(), 1);
    }

    #[test]
    fn test_hook_sees_total_elapsed() {
        let clock = ManualClock::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        clock.set_hook(move |elapsed| {
            if elapsed >= Duration::from_secs(1) {
                flag.store(true, Ordering::SeqCst);
            }
        });

        clock.sleep(Duration::from_millis(500));
        assert!(!fired.load(Ordering::SeqCst));
        clock.sleep(Duration::from_millis(500));
        assert!(fired.load(Ordering::SeqCst));
    }
}
