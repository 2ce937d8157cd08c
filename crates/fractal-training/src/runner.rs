//! The checkpointed epoch loop.

use crate::checkpoint::{CheckpointState, CheckpointStore};
use crate::context::CycleContext;
use crate::control::Flow;
use crate::dataset::ImageDataset;
use crate::engine::TrainingEngine;
use crate::error::{TrainingError, TrainingResult};
use crate::events::ClientEvent;
use crate::task::Task;
use std::time::Duration;
use tracing::{debug, error, info};

/// Full condition re-check every this many samples; the rest only check pause.
pub const DEEP_CHECK_EVERY: u64 = 50;
pub const DEEP_CHECK_INTERVAL: Duration = Duration::from_secs(3);
pub const PROGRESS_EVERY: u64 = 100;

const PAUSED_STATUS: &str = "Training Paused";

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every epoch is checkpointed. `steps` counts steps run in this session.
    Completed { steps: u64, last_loss: Option<f32> },
    Cancelled,
}

fn percent(step: u64, total: u64) -> u8 {
    if total == 0 { 100 } else { (step.min(total) * 100 / total) as u8 }
}

pub struct TrainingRunner {
    store: CheckpointStore,
    ctx: CycleContext,
}

impl TrainingRunner {
    pub fn new(store: CheckpointStore, ctx: CycleContext) -> Self {
        Self { store, ctx }
    }

    /// Train `task` to completion, resuming from its last checkpoint.
    ///
    /// A task whose checkpoint already covers every epoch runs zero steps and
    /// reports 100%. A failing step is returned with its coordinates; it is
    /// not retried here.
    pub fn run(
        &self,
        task: &Task,
        engine: &mut dyn TrainingEngine,
        dataset: &ImageDataset,
    ) -> TrainingResult<RunOutcome> {
        let ctx = &self.ctx;
        let total_epochs = task.epochs;
        let per_epoch = task.samples_per_epoch();
        let total_steps = task.total_steps();
        if (dataset.len() as u64) < per_epoch {
            return Err(TrainingError::Dataset(format!(
                "dataset has {} samples, task {} needs {per_epoch} per epoch",
                dataset.len(),
                task.task_id
            )));
        }

        let state = self.store.restore(task, engine);
        if let CheckpointState::Corrupted(reason) = &state {
            ctx.status(format!("Checkpoint unusable ({reason})\nRestarting from epoch 0"));
        }
        let start_epoch = state.resume_epoch().min(total_epochs);
        if start_epoch >= total_epochs {
            info!(task_id = %task.task_id, epochs = total_epochs, "task already fully trained");
            ctx.progress(100);
            return Ok(RunOutcome::Completed { steps: 0, last_loss: None });
        }
        if start_epoch > 0 {
            ctx.status(format!("Resuming from epoch {start_epoch} of {total_epochs}"));
        }

        let mut global_step = u64::from(start_epoch) * per_epoch;
        let mut last_percent = percent(global_step, total_steps);
        ctx.progress(last_percent);

        let session_start = ctx.clock.now();
        let mut last_loss = None;
        let mut steps = 0u64;
        info!(task_id = %task.task_id, start_epoch, total_epochs, per_epoch, "training started");

        for epoch in start_epoch..total_epochs {
            for sample in 0..per_epoch {
                let flow = if global_step % DEEP_CHECK_EVERY == 0 {
                    ctx.wait_until_clear(DEEP_CHECK_INTERVAL, PAUSED_STATUS)
                } else {
                    ctx.pause_trap(PAUSED_STATUS)
                };
                if flow == Flow::Cancelled {
                    info!(task_id = %task.task_id, epoch, sample, "training cancelled");
                    return Ok(RunOutcome::Cancelled);
                }

                let (input, label) = dataset
                    .sample(sample as usize)
                    .ok_or_else(|| TrainingError::Dataset(format!("sample {sample} out of range")))?;
                let loss = engine.train_step(input, label).map_err(|e| {
                    error!(task_id = %task.task_id, epoch, sample, error = %e, "training step failed");
                    TrainingError::Step { epoch, sample, source: Box::new(e) }
                })?;
                last_loss = Some(loss);
                global_step += 1;
                steps += 1;

                if global_step % PROGRESS_EVERY == 0 {
                    last_percent = percent(global_step, total_steps);
                    ctx.progress(last_percent);
                    debug!(task_id = %task.task_id, step = global_step, total_steps, loss, "training progress");
                }
            }

            let done = epoch + 1;
            let elapsed = ctx.clock.now().saturating_duration_since(session_start);
            let time_left = (elapsed / (done - start_epoch)) * (total_epochs - done);

            self.store.commit(task, engine, done)?;
            let loss = last_loss.unwrap_or_default();
            ctx.emit(ClientEvent::Epoch {
                completed: done,
                total: total_epochs,
                loss,
                time_left_secs: time_left.as_secs(),
            });
            info!(task_id = %task.task_id, epoch = done, total_epochs, loss, "epoch checkpointed");
        }

        if last_percent < 100 {
            ctx.progress(100);
        }
        Ok(RunOutcome::Completed { steps, last_loss })
    }
}
