//! Unbounded, fixed-backoff upload of trained weights.

use crate::coordinator::Coordinator;
use crate::gate::AdmissionGate;
use fractal_training::control::RETRY_BACKOFF;
use fractal_training::{CycleContext, Flow, SleepOutcome, Task};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

const PAUSED_STATUS: &str = "Upload Paused";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    /// The cycle was cancelled; nothing further may run.
    Cancelled,
}

/// Retries an upload until it succeeds or the cycle is cancelled.
///
/// The attempt counter only feeds status text and lives as long as the
/// value does; it never shortens or lengthens the backoff.
pub struct UploadCycle {
    coordinator: Arc<dyn Coordinator>,
    device_id: String,
    attempts: AtomicU64,
}

impl UploadCycle {
    pub fn new(coordinator: Arc<dyn Coordinator>, device_id: impl Into<String>) -> Self {
        Self { coordinator, device_id: device_id.into(), attempts: AtomicU64::new(0) }
    }

    /// Failed attempts since this cycle was created.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Upload `weights` for `task`, then run `cleanup` once on success.
    pub fn run(
        &self,
        task: &Task,
        weights: &Path,
        ctx: &CycleContext,
        gate: &AdmissionGate,
        cleanup: impl FnOnce(),
    ) -> UploadOutcome {
        loop {
            if ctx.pause_trap(PAUSED_STATUS) == Flow::Cancelled {
                ctx.status("Upload Aborted by User");
                return UploadOutcome::Cancelled;
            }
            if gate.wait_for_network(ctx) == Flow::Cancelled {
                return UploadOutcome::Cancelled;
            }
            if ctx.is_cancelled() {
                ctx.status("Upload Aborted by User");
                return UploadOutcome::Cancelled;
            }
            if ctx.is_paused() {
                continue;
            }

            ctx.status("Uploading weights...");
            match self.coordinator.upload_artifact(task, &self.device_id, weights) {
                Ok(()) => {
                    info!(task_id = %task.task_id, attempts = self.attempts(), "upload accepted");
                    ctx.status("Upload Complete");
                    cleanup();
                    return UploadOutcome::Uploaded;
                }
                Err(e) => {
                    let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    warn!(task_id = %task.task_id, attempt, error = %e, "upload failed");
                    ctx.status(format!("Upload failed. Retrying (attempt {attempt})..."));
                    if ctx.sleep(RETRY_BACKOFF, true) == SleepOutcome::Cancelled {
                        ctx.status("Upload Aborted by User");
                        return UploadOutcome::Cancelled;
                    }
                }
            }
        }
    }
}
