use crate::clock::Clock;
use crate::control::{
    ControlSignal, Flow, LiveConditions, PAUSE_TICK, SleepOutcome, sleep_sliced,
};
use crate::events::{ClientEvent, EventSink};
use std::sync::Arc;
use std::time::Duration;

/// Everything a long-running stage needs to observe control input and report
/// what it is doing.
#[derive(Clone)]
pub struct CycleContext {
    pub control: ControlSignal,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<dyn EventSink>,
    pub conditions: Arc<dyn LiveConditions>,
}

impl CycleContext {
    pub fn new(
        control: ControlSignal,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        conditions: Arc<dyn LiveConditions>,
    ) -> Self {
        Self { control, clock, events, conditions }
    }

    pub fn emit(&self, event: ClientEvent) {
        self.events.on_event(event);
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(ClientEvent::status(message));
    }

    pub fn progress(&self, percent: u8) {
        self.emit(ClientEvent::Progress { percent });
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    /// Block while paused, re-checking cancellation on every tick.
    ///
    /// `status` is surfaced once on entry when the trap actually engages.
    pub fn pause_trap(&self, status: &str) -> Flow {
        let mut announced = false;
        loop {
            if self.is_cancelled() {
                return Flow::Cancelled;
            }
            if !self.is_paused() {
                return Flow::Continue;
            }
            if !announced {
                self.status(status);
                announced = true;
            }
            self.clock.sleep(PAUSE_TICK);
        }
    }

    pub fn sleep(&self, total: Duration, break_on_pause: bool) -> SleepOutcome {
        sleep_sliced(&self.control, self.clock.as_ref(), total, break_on_pause)
    }

    /// Block while paused or while live conditions report a violation,
    /// sleeping `interval` between re-checks.
    pub fn wait_until_clear(&self, interval: Duration, paused_status: &str) -> Flow {
        let mut last: Option<String> = None;
        loop {
            if self.is_cancelled() {
                if last.is_some() {
                    self.emit(ClientEvent::Waiting { waiting: false });
                }
                return Flow::Cancelled;
            }
            let reason = if self.is_paused() {
                Some(paused_status.to_string())
            } else {
                self.conditions.check_live_conditions()
            };
            let Some(reason) = reason else {
                if last.is_some() {
                    self.emit(ClientEvent::Waiting { waiting: false });
                }
                return Flow::Continue;
            };
            if last.is_none() {
                self.emit(ClientEvent::Waiting { waiting: true });
            }
            if last.as_deref() != Some(reason.as_str()) {
                self.status(reason.clone());
                last = Some(reason);
            }
            self.clock.sleep(interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::control::Unconstrained;
    use crate::events::MemoryEventSink;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn context(clock: Arc<ManualClock>, events: Arc<MemoryEventSink>) -> CycleContext {
        CycleContext::new(ControlSignal::new(), clock, events, Arc::new(Unconstrained))
    }

    #[test]
    fn test_pause_trap_passes_through_when_running() {
        let clock = Arc::new(ManualClock::new());
        let events = Arc::new(MemoryEventSink::new());
        let ctx = context(Arc::clone(&clock), Arc::clone(&events));

        assert_eq!(ctx.pause_trap("Paused"), Flow::Continue);
        assert_eq!(clock.sleep_count(), 0);
        assert!(events.statuses().is_empty());
    }

    #[test]
    fn test_cancel_while_paused_unwinds_within_one_tick() {
        let clock = Arc::new(ManualClock::new());
        let events = Arc::new(MemoryEventSink::new());
        let ctx = context(Arc::clone(&clock), Arc::clone(&events));
        ctx.control.set_paused(true);

        let remote = ctx.control.clone();
        clock.set_hook(move |elapsed| {
            if elapsed >= Duration::from_secs(60) {
                remote.cancel();
            }
        });

        assert_eq!(ctx.pause_trap("Training Paused"), Flow::Cancelled);
        assert!(clock.elapsed() <= Duration::from_secs(60) + PAUSE_TICK);
        assert_eq!(events.statuses(), vec!["Training Paused".to_string()]);
    }

    #[test]
    fn test_wait_until_clear_reports_each_reason_once() {
        let clock = Arc::new(ManualClock::new());
        let events = Arc::new(MemoryEventSink::new());
        let blocked = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&blocked);
        let ctx = CycleContext::new(
            ControlSignal::new(),
            clock.clone(),
            events.clone(),
            Arc::new(move || flag.load(Ordering::SeqCst).then(|| "Battery too low".to_string())),
        );

        let release = Arc::clone(&blocked);
        clock.set_hook(move |elapsed| {
            if elapsed >= Duration::from_secs(9) {
                release.store(false, Ordering::SeqCst);
            }
        });

        assert_eq!(ctx.wait_until_clear(Duration::from_secs(3), "Paused"), Flow::Continue);
        assert_eq!(clock.elapsed(), Duration::from_secs(9));
        assert_eq!(events.statuses(), vec!["Battery too low".to_string()]);
        let events = events.events();
        assert_eq!(events.first(), Some(&ClientEvent::Waiting { waiting: true }));
        assert_eq!(events.last(), Some(&ClientEvent::Waiting { waiting: false }));
    }

    #[test]
    fn test_cancelled_wait_until_clear_ends_waiting() {
        let clock = Arc::new(ManualClock::new());
        let events = Arc::new(MemoryEventSink::new());
        let ctx = context(Arc::clone(&clock), Arc::clone(&events));
        ctx.control.set_paused(true);
        let remote = ctx.control.clone();
        clock.set_hook(move |elapsed| {
            if elapsed >= Duration::from_secs(6) {
                remote.cancel();
            }
        });

        assert_eq!(ctx.wait_until_clear(Duration::from_secs(3), "Training Paused"), Flow::Cancelled);
        let events = events.events();
        assert_eq!(events.first(), Some(&ClientEvent::Waiting { waiting: true }));
        assert_eq!(events.last(), Some(&ClientEvent::Waiting { waiting: false }));
    }
}
