//! The master loop: admission, acquisition, training, upload and cooldown,
//! forever, until cancelled or a fatal error.

use crate::coordinator::Coordinator;
use crate::error::{ClientError, ClientResult};
use crate::gate::AdmissionGate;
use crate::upload::{UploadCycle, UploadOutcome};
use chrono::Utc;
use fractal_training::control::{RETRY_BACKOFF, SLICE};
use fractal_training::{
    CheckpointState, CheckpointStore, ClientEvent, Clock, ControlSignal, CycleContext, CycleState, EventSink,
    Flow, Pipeline, RunOutcome, SleepOutcome, StageRegistry, SystemClock, Task, TrainingError, TrainingRunner,
};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const COOLDOWN: Duration = Duration::from_secs(30);

/// Why [`Orchestrator::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorExit {
    Cancelled,
    /// The coordinator and this client disagree on the task format.
    Fatal(String),
}

/// How one cycle ended, short of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleEnd {
    Completed,
    /// A recoverable failure already backed off; start over.
    Retry,
    Cancelled,
}

impl From<SleepOutcome> for CycleEnd {
    fn from(outcome: SleepOutcome) -> Self {
        match outcome {
            SleepOutcome::Cancelled => Self::Cancelled,
            SleepOutcome::Elapsed | SleepOutcome::Paused => Self::Retry,
        }
    }
}

pub struct Orchestrator {
    gate: AdmissionGate,
    coordinator: Arc<dyn Coordinator>,
    registry: StageRegistry,
    store: CheckpointStore,
    upload: UploadCycle,
    ctx: CycleContext,
    device_id: String,
}

impl Orchestrator {
    pub fn new(
        gate: AdmissionGate,
        coordinator: Arc<dyn Coordinator>,
        store: CheckpointStore,
        device_id: impl Into<String>,
        control: ControlSignal,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let device_id = device_id.into();
        let ctx = CycleContext::new(control, Arc::new(SystemClock), events, Arc::new(gate.clone()));
        Self {
            upload: UploadCycle::new(Arc::clone(&coordinator), device_id.clone()),
            gate,
            coordinator,
            registry: StageRegistry::with_defaults(),
            store,
            ctx,
            device_id,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ctx.clock = clock;
        self
    }

    #[must_use]
    pub fn with_registry(mut self, registry: StageRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn context(&self) -> &CycleContext {
        &self.ctx
    }

    /// Run cycles until cancelled or a fatal error.
    ///
    /// Every other failure, panics included, is reported as a status and
    /// retried after [`RETRY_BACKOFF`].
    pub fn run(&self) -> OrchestratorExit {
        info!(device_id = %self.device_id, "orchestrator started");
        loop {
            if self.ctx.is_cancelled() {
                return self.terminate(OrchestratorExit::Cancelled);
            }

            let result = panic::catch_unwind(AssertUnwindSafe(|| self.run_cycle()))
                .unwrap_or_else(|payload| Err(ClientError::Panicked(panic_message(payload.as_ref()))));

            match result {
                Ok(CycleEnd::Cancelled) => return self.terminate(OrchestratorExit::Cancelled),
                Ok(CycleEnd::Completed | CycleEnd::Retry) => {}
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "unrecoverable error, stopping");
                    self.ctx.status(format!("Error: {e}"));
                    return self.terminate(OrchestratorExit::Fatal(e.to_string()));
                }
                Err(e) => {
                    warn!(error = %e, "cycle failed, backing off");
                    self.ctx.status(format!("Error: {e}"));
                    if self.ctx.sleep(RETRY_BACKOFF, false) == SleepOutcome::Cancelled {
                        return self.terminate(OrchestratorExit::Cancelled);
                    }
                }
            }
        }
    }

    fn terminate(&self, exit: OrchestratorExit) -> OrchestratorExit {
        self.enter(CycleState::Terminated);
        info!(exit = ?exit, "orchestrator stopped");
        exit
    }

    fn enter(&self, state: CycleState) {
        debug!(%state, "cycle state");
        self.ctx.emit(ClientEvent::State { state });
    }

    fn run_cycle(&self) -> ClientResult<CycleEnd> {
        let ctx = &self.ctx;

        self.enter(CycleState::AwaitingAdmission);
        if self.gate.wait_for_admission(ctx) == Flow::Cancelled {
            return Ok(CycleEnd::Cancelled);
        }

        self.enter(CycleState::AcquiringTask);
        let Some((mut task, pipeline)) = self.acquire_task()? else {
            return Ok(CycleEnd::Cancelled);
        };

        if ctx.is_cancelled() {
            return Ok(CycleEnd::Cancelled);
        }
        self.enter(CycleState::FetchingResources);
        let layout = self.store.layout();
        if layout.resources_present(&task) {
            ctx.status("Local files found. Skipping download...");
        } else {
            ctx.status("Downloading training resources...");
            if let Err(e) = self.coordinator.download_resources(&task, layout) {
                warn!(task_id = %task.task_id, error = %e, "resource download failed");
                ctx.status("Error: Download failed");
                return Ok(ctx.sleep(RETRY_BACKOFF, false).into());
            }
        }

        if ctx.is_cancelled() {
            return Ok(CycleEnd::Cancelled);
        }
        ctx.status("Assembling training engine...");
        let dataset = pipeline.loader.load(&task, layout)?;
        let mut engine = pipeline.engine.build(&task, &layout.model_path(&task))?;

        self.enter(CycleState::Training);
        let runner = TrainingRunner::new(self.store.clone(), ctx.clone());
        match runner.run(&task, engine.as_mut(), &dataset)? {
            RunOutcome::Cancelled => return Ok(CycleEnd::Cancelled),
            RunOutcome::Completed { steps, last_loss } => {
                info!(task_id = %task.task_id, steps, last_loss = ?last_loss, "training finished");
            }
        }
        task.completed = true;

        if ctx.is_cancelled() {
            return Ok(CycleEnd::Cancelled);
        }
        self.enter(CycleState::Validating);
        let result = match pipeline.validator.validate(engine.as_ref(), &dataset) {
            Ok(report) => report.to_string(),
            Err(e) => {
                warn!(task_id = %task.task_id, error = %e, "validation failed");
                "Inference Error".to_string()
            }
        };
        ctx.status(format!("Validation: {result}"));
        ctx.emit(ClientEvent::Validation { result });

        if ctx.is_cancelled() {
            return Ok(CycleEnd::Cancelled);
        }
        self.enter(CycleState::Uploading);
        let weights = self.weights_path(&task)?;
        let cleanup = || match layout.flush_task(&task) {
            Ok(removed) => info!(task_id = %task.task_id, removed, "task files cleaned up"),
            Err(e) => warn!(task_id = %task.task_id, error = %e, "cleanup incomplete"),
        };
        if self.upload.run(&task, &weights, ctx, &self.gate, cleanup) == UploadOutcome::Cancelled {
            return Ok(CycleEnd::Cancelled);
        }

        self.enter(CycleState::Cooldown);
        ctx.progress(0);
        ctx.status("Process Complete\nCooling down (30s)...");
        Ok(self.cooldown())
    }

    /// Poll the coordinator until it hands out a usable task.
    ///
    /// `Ok(None)` means the wait was cancelled. An unknown stage name surfaces
    /// here, before anything is downloaded.
    fn acquire_task(&self) -> ClientResult<Option<(Task, Pipeline)>> {
        let ctx = &self.ctx;
        let mut attempt = 0u64;
        loop {
            if ctx.pause_trap("Task Search Paused") == Flow::Cancelled {
                return Ok(None);
            }
            if self.gate.wait_for_task_network(ctx) == Flow::Cancelled {
                return Ok(None);
            }

            attempt += 1;
            if attempt == 1 {
                ctx.status("Fetching task from server...");
            } else {
                ctx.status(format!("Searching for task (Attempt {attempt})..."));
            }

            match self.coordinator.fetch_task(&self.device_id) {
                Ok(Some(task)) if task.is_expired(Utc::now()) => {
                    info!(task_id = %task.task_id, expires_at = ?task.expires_at, "ignoring expired task");
                }
                Ok(Some(task)) => {
                    task.validate()?;
                    let pipeline = self.registry.resolve(&task)?;
                    info!(task_id = %task.task_id, attempt, pipeline = ?pipeline, "task acquired");
                    return Ok(Some((task, pipeline)));
                }
                Ok(None) => debug!(attempt, "no task available"),
                Err(e) => warn!(attempt, error = %e, "task fetch failed"),
            }

            ctx.status("Server offline or no task. Retrying in 10s...");
            if ctx.sleep(RETRY_BACKOFF, true) == SleepOutcome::Cancelled {
                return Ok(None);
            }
        }
    }

    fn weights_path(&self, task: &Task) -> ClientResult<PathBuf> {
        match self.store.inspect(task.task_id) {
            CheckpointState::Resumable(record) => Ok(self.store.layout().root().join(record.weights_file)),
            CheckpointState::Missing => {
                Err(TrainingError::Artifact(format!("no checkpoint to upload for task {}", task.task_id)).into())
            }
            CheckpointState::Corrupted(reason) => Err(TrainingError::Artifact(format!(
                "checkpoint for task {} unusable: {reason}",
                task.task_id
            ))
            .into()),
        }
    }

    /// Wait out [`COOLDOWN`] in slices, holding still while paused.
    fn cooldown(&self) -> CycleEnd {
        let ctx = &self.ctx;
        let mut remaining = COOLDOWN;
        while !remaining.is_zero() {
            if ctx.pause_trap("Cooldown Paused") == Flow::Cancelled {
                return CycleEnd::Cancelled;
            }
            let step = remaining.min(SLICE);
            ctx.clock.sleep(step);
            remaining -= step;
        }
        if ctx.is_cancelled() { CycleEnd::Cancelled } else { CycleEnd::Completed }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
