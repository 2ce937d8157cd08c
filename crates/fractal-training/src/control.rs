//! Pause/cancel signals and the sliced sleeps that observe them.

use crate::clock::Clock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Granularity of cancellation-checked sleeps.
pub const SLICE: Duration = Duration::from_millis(100);
/// Tick of every pause trap.
pub const PAUSE_TICK: Duration = Duration::from_millis(500);
/// Fixed backoff after a failed fetch, download, upload or cycle.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Externally driven pause/cancel state shared between the controlling
/// thread and the worker.
///
/// Cancellation is monotonic. Pause is bistable.
#[derive(Debug, Clone, Default)]
pub struct ControlSignal {
    cancel: CancellationToken,
    paused: Arc<AtomicBool>,
}

impl ControlSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that fires when [`ControlSignal::cancel`] is called, for async callers.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Flip the pause flag and return the new value.
    pub fn toggle_pause(&self) -> bool {
        !self.paused.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// Cheap, synchronous re-check of device conditions during long work.
///
/// Returns a human-readable reason when work should not continue.
pub trait LiveConditions: Send + Sync {
    fn check_live_conditions(&self) -> Option<String>;
}

impl<F> LiveConditions for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn check_live_conditions(&self) -> Option<String> {
        self()
    }
}

/// Conditions that never block.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconstrained;

impl LiveConditions for Unconstrained {
    fn check_live_conditions(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    Elapsed,
    /// Cut short because the operator paused.
    Paused,
    Cancelled,
}

/// Sleep for `total` in [`SLICE`] steps, checking cancellation before each
/// slice and, when `break_on_pause` is set, returning early on pause.
pub fn sleep_sliced(
    control: &ControlSignal,
    clock: &dyn Clock,
    total: Duration,
    break_on_pause: bool,
) -> SleepOutcome {
    let mut remaining = total;
    while !remaining.is_zero() {
        if control.is_cancelled() {
            return SleepOutcome::Cancelled;
        }
        if break_on_pause && control.is_paused() {
            return SleepOutcome::Paused;
        }
        let step = remaining.min(SLICE);
        clock.sleep(step);
        remaining -= step;
    }
    if control.is_cancelled() { SleepOutcome::Cancelled } else { SleepOutcome::Elapsed }
}
