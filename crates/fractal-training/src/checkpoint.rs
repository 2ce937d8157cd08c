//! Durable epoch checkpoints.
//!
//! A checkpoint is a pair: an epoch-versioned weights blob and a small JSON
//! record naming it. Weights are always written to a fresh file first; the
//! record is then replaced atomically, and that rename is the single commit
//! point. A crash anywhere before it leaves the previous record pointing at
//! the previous, untouched blob.

use crate::artifacts::{remove_if_exists, sha256_file, write_json_atomic};
use crate::engine::TrainingEngine;
use crate::error::TrainingResult;
use crate::layout::TaskLayout;
use crate::task::{Task, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::{debug, warn};

const SIDECAR_SUFFIX: &str = "_meta.json";

/// The live checkpoint of one task. At most one exists per task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub task_id: TaskId,
    pub last_epoch: u32,
    /// Weights blob file name, relative to the task layout root.
    pub weights_file: String,
    pub weights_sha256: String,
    pub checkpoint_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointState {
    Missing,
    Resumable(CheckpointRecord),
    /// A record exists but cannot be trusted; training restarts from epoch 0.
    Corrupted(String),
}

impl CheckpointState {
    /// Epoch to resume from.
    pub fn resume_epoch(&self) -> u32 {
        match self {
            Self::Resumable(record) => record.last_epoch,
            Self::Missing | Self::Corrupted(_) => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    layout: TaskLayout,
}

impl CheckpointStore {
    #[must_use]
    pub fn new(layout: TaskLayout) -> Self {
        Self { layout }
    }

    #[must_use]
    pub fn layout(&self) -> &TaskLayout {
        &self.layout
    }

    /// Classify the task's checkpoint without touching any engine.
    pub fn inspect(&self, task_id: TaskId) -> CheckpointState {
        let sidecar = self.layout.sidecar_path(task_id);
        let bytes = match fs::read(&sidecar) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CheckpointState::Missing,
            Err(e) => return CheckpointState::Corrupted(format!("unreadable record: {e}")),
        };
        let record: CheckpointRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => return CheckpointState::Corrupted(format!("malformed record: {e}")),
        };
        if record.task_id != task_id {
            return CheckpointState::Corrupted(format!("record belongs to task {}", record.task_id));
        }
        if record.weights_file.contains(['/', '\\']) {
            return CheckpointState::Corrupted("weights path escapes the task directory".to_string());
        }

        let weights = self.layout.root().join(&record.weights_file);
        match sha256_file(&weights) {
            Ok(hash) if hash == record.weights_sha256 => CheckpointState::Resumable(record),
            Ok(_) => CheckpointState::Corrupted(format!("weights {} fail hash check", record.weights_file)),
            Err(e) => CheckpointState::Corrupted(format!("weights {} unreadable: {e}", record.weights_file)),
        }
    }

    /// Load the task's checkpoint into `engine`.
    ///
    /// An engine that rejects the blob downgrades the state to `Corrupted`;
    /// callers resume from [`CheckpointState::resume_epoch`].
    pub fn restore(&self, task: &Task, engine: &mut dyn TrainingEngine) -> CheckpointState {
        let record = match self.inspect(task.task_id) {
            CheckpointState::Resumable(record) => record,
            CheckpointState::Missing => return CheckpointState::Missing,
            CheckpointState::Corrupted(reason) => {
                warn!(task_id = %task.task_id, %reason, "checkpoint unusable, restarting from epoch 0");
                return CheckpointState::Corrupted(reason);
            }
        };

        let weights = self.layout.root().join(&record.weights_file);
        match engine.restore_checkpoint(&weights) {
            Ok(()) => {
                debug!(task_id = %task.task_id, epoch = record.last_epoch, "restored checkpoint");
                CheckpointState::Resumable(record)
            }
            Err(e) => {
                warn!(task_id = %task.task_id, error = %e, "engine rejected checkpoint, restarting from epoch 0");
                CheckpointState::Corrupted(format!("engine rejected weights: {e}"))
            }
        }
    }

    /// Persist the engine's weights as the checkpoint for `epoch`.
    pub fn commit(&self, task: &Task, engine: &dyn TrainingEngine, epoch: u32) -> TrainingResult<CheckpointRecord> {
        self.layout.ensure_root()?;
        let previous = match self.inspect(task.task_id) {
            CheckpointState::Resumable(record) => Some(record.weights_file),
            CheckpointState::Missing | CheckpointState::Corrupted(_) => None,
        };

        let weights_file = TaskLayout::weights_file_name(task, epoch);
        let weights = self.layout.root().join(&weights_file);
        engine.save_checkpoint(&weights)?;
        let weights_sha256 = sha256_file(&weights)?;

        let record = CheckpointRecord {
            task_id: task.task_id,
            last_epoch: epoch,
            weights_file,
            weights_sha256,
            checkpoint_timestamp: Utc::now(),
        };
        write_json_atomic(&self.layout.sidecar_path(task.task_id), &record)?;

        if let Some(old) = previous.filter(|old| *old != record.weights_file)
            && let Err(e) = remove_if_exists(&self.layout.root().join(&old))
        {
            warn!(task_id = %task.task_id, file = %old, error = %e, "failed to remove superseded weights");
        }
        debug!(task_id = %task.task_id, epoch, "committed checkpoint");
        Ok(record)
    }

    /// Delete the record and its weights. The record goes first.
    pub fn discard(&self, task_id: TaskId) -> TrainingResult<()> {
        let weights = match self.inspect(task_id) {
            CheckpointState::Resumable(record) => Some(record.weights_file),
            CheckpointState::Missing | CheckpointState::Corrupted(_) => None,
        };
        remove_if_exists(&self.layout.sidecar_path(task_id))?;
        if let Some(file) = weights {
            remove_if_exists(&self.layout.root().join(file))?;
        }
        Ok(())
    }

    /// All readable checkpoint records, ordered by task id.
    pub fn list(&self) -> TrainingResult<Vec<CheckpointRecord>> {
        let entries = match fs::read_dir(self.layout.root()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_name().to_string_lossy().ends_with(SIDECAR_SUFFIX) {
                continue;
            }
            match fs::read(entry.path()).map(|b| serde_json::from_slice::<CheckpointRecord>(&b)) {
                Ok(Ok(record)) => records.push(record),
                _ => debug!(path = %entry.path().display(), "skipping unreadable checkpoint record"),
            }
        }
        records.sort_by_key(|r| r.task_id);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SoftmaxEngine;
    use tempfile::TempDir;

    fn setup() -> (TempDir, CheckpointStore, Task, SoftmaxEngine) {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(TaskLayout::new(temp.path().join("tasks")));
        let mut task = Task::new(TaskId(9));
        task.input_shape = vec![1, 2];
        task.num_classes = 2;
        let engine = SoftmaxEngine::new(2, 2, 0.1);
        (temp, store, task, engine)
    }

    #[test]
    fn test_missing_checkpoint_resumes_at_zero() {
        let (_temp, store, task, mut engine) = setup();
        let state = store.restore(&task, &mut engine);
        assert_eq!(state, CheckpointState::Missing);
        assert_eq!(state.resume_epoch(), 0);
    }

    #[test]
    fn test_commit_supersedes_previous_record() {
        let (_temp, store, task, mut engine) = setup();
        store.commit(&task, &engine, 1).unwrap();
        engine.train_step(&[1.0, 0.0], &[1.0, 0.0]).unwrap();
        let record = store.commit(&task, &engine, 2).unwrap();

        assert_eq!(record.last_epoch, 2);
        assert!(!store.layout().weights_path(&task, 1).exists());
        assert!(store.layout().weights_path(&task, 2).exists());
        assert_eq!(store.inspect(task.task_id).resume_epoch(), 2);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_weights_without_record_are_not_resumable() {
        let (_temp, store, task, mut engine) = setup();
        store.commit(&task, &engine, 1).unwrap();

        // Crash after the epoch-2 blob is written but before its record.
        engine.train_step(&[1.0, 0.0], &[1.0, 0.0]).unwrap();
        engine.save_checkpoint(&store.layout().weights_path(&task, 2)).unwrap();
        fs::write(crate::artifacts::tmp_path(&store.layout().sidecar_path(task.task_id)), b"{\"task_").unwrap();

        let mut fresh = SoftmaxEngine::new(2, 2, 0.1);
        let state = store.restore(&task, &mut fresh);
        assert_eq!(state.resume_epoch(), 1);
    }

    #[test]
    fn test_truncated_record_is_corrupted() {
        let (_temp, store, task, mut engine) = setup();
        store.layout().ensure_root().unwrap();
        fs::write(store.layout().sidecar_path(task.task_id), b"{\"task_id\": 9, \"last_ep").unwrap();

        let state = store.restore(&task, &mut engine);
        assert!(matches!(state, CheckpointState::Corrupted(_)));
        assert_eq!(state.resume_epoch(), 0);
    }

    #[test]
    fn test_tampered_weights_fail_hash_check() {
        let (_temp, store, task, engine) = setup();
        store.commit(&task, &engine, 3).unwrap();
        fs::write(store.layout().weights_path(&task, 3), b"{}").unwrap();

        assert!(matches!(store.inspect(task.task_id), CheckpointState::Corrupted(_)));
    }

    #[test]
    fn test_discard_removes_pair() {
        let (_temp, store, task, engine) = setup();
        store.commit(&task, &engine, 1).unwrap();
        store.discard(task.task_id).unwrap();

        assert_eq!(store.inspect(task.task_id), CheckpointState::Missing);
        assert!(!store.layout().weights_path(&task, 1).exists());
    }
}
