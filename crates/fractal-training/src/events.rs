use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// The orchestrator's current state. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    AwaitingAdmission,
    AcquiringTask,
    FetchingResources,
    Training,
    Validating,
    Uploading,
    Cooldown,
    Terminated,
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AwaitingAdmission => "awaiting admission",
            Self::AcquiringTask => "acquiring task",
            Self::FetchingResources => "fetching resources",
            Self::Training => "training",
            Self::Validating => "validating",
            Self::Uploading => "uploading",
            Self::Cooldown => "cooldown",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Events the client surfaces to whatever UI is attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Status { message: String },
    Progress { percent: u8 },
    Epoch { completed: u32, total: u32, loss: f32, time_left_secs: u64 },
    Validation { result: String },
    Waiting { waiting: bool },
    State { state: CycleState },
}

impl ClientEvent {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status { message: message.into() }
    }
}

pub trait EventSink: Send + Sync {
    fn on_event(&self, event: ClientEvent);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn on_event(&self, event: ClientEvent) {
        (**self).on_event(event);
    }
}

/// Render a duration as `hh:mm:ss`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[derive(Debug, Default)]
pub struct StdoutEventSink;

impl EventSink for StdoutEventSink {
    fn on_event(&self, event: ClientEvent) {
        match event {
            ClientEvent::Status { message } => {
                for line in message.lines() {
                    println!("[fractal] {line}");
                }
            }
            ClientEvent::Progress { percent } => println!("[fractal] progress {percent}%"),
            ClientEvent::Epoch { completed, total, loss, time_left_secs } => println!(
                "[fractal] epoch {completed}/{total} loss {loss:.4} eta {}",
                format_duration(Duration::from_secs(time_left_secs))
            ),
            ClientEvent::Validation { result } => println!("[fractal] validation: {result}"),
            ClientEvent::Waiting { .. } | ClientEvent::State { .. } => {}
        }
    }
}

/// Records every event; used by tests and by callers that poll for history.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<ClientEvent>>,
}

impl MemoryEventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ClientEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ClientEvent::Status { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ClientEvent::Progress { percent } => Some(percent),
                _ => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<CycleState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ClientEvent::State { state } => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl EventSink for MemoryEventSink {
    fn on_event(&self, event: ClientEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}

/// Running summary of a training session, as shown on a statistics screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingStats {
    pub state: Option<CycleState>,
    pub status: Option<String>,
    pub progress: u8,
    pub epochs: Option<(u32, u32)>,
    pub last_loss: Option<f32>,
    pub time_left: Option<Duration>,
    pub inference: Option<String>,
    pub waiting: bool,
}

impl TrainingStats {
    /// `"k / n"`, or `"-"` before the first epoch completes.
    pub fn epochs_label(&self) -> String {
        self.epochs.map_or_else(|| "-".to_string(), |(done, total)| format!("{done} / {total}"))
    }

    pub fn time_left_label(&self) -> String {
        self.time_left.map_or_else(|| "-".to_string(), format_duration)
    }

    /// Loss mapped onto a 0-100 scale: `max(0, 100 - loss * 100)`.
    pub fn performance_label(&self) -> String {
        self.last_loss
            .map_or_else(|| "-".to_string(), |loss| format!("{:.1}%", (100.0 - loss * 100.0).max(0.0)))
    }
}

/// Folds events into a [`TrainingStats`] snapshot and forwards them unchanged.
pub struct StatsSink<S> {
    inner: S,
    stats: Mutex<TrainingStats>,
}

impl<S: EventSink> StatsSink<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, stats: Mutex::new(TrainingStats::default()) }
    }

    pub fn snapshot(&self) -> TrainingStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl<S: EventSink> EventSink for StatsSink<S> {
    fn on_event(&self, event: ClientEvent) {
        {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            match &event {
                ClientEvent::Status { message } => stats.status = Some(message.clone()),
                ClientEvent::Progress { percent } => stats.progress = *percent,
                ClientEvent::Epoch { completed, total, loss, time_left_secs } => {
                    stats.epochs = Some((*completed, *total));
                    stats.last_loss = Some(*loss);
                    stats.time_left = Some(Duration::from_secs(*time_left_secs));
                }
                ClientEvent::Validation { result } => stats.inference = Some(result.clone()),
                ClientEvent::Waiting { waiting } => stats.waiting = *waiting,
                ClientEvent::State { state } => {
                    if *state == CycleState::AcquiringTask {
                        let inference = stats.inference.take();
                        *stats = TrainingStats { inference, ..TrainingStats::default() };
                    }
                    stats.state = Some(*state);
                }
            }
        }
        self.inner.on_event(event);
    }
}
