use crate::artifacts::remove_if_exists;
use crate::error::TrainingResult;
use crate::task::{Task, TaskId};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Filesystem layout for task resources and checkpoints.
///
/// Everything a task owns lives flat under one directory and is prefixed
/// with `<task_id>_`, so cleanup can sweep by prefix:
/// - `<id>_<model_filename>`, `<id>_<train_images_filename>`, `<id>_<train_labels_filename>`
/// - `<id>_meta.json` (checkpoint record)
/// - `<id>_e<epoch>_<checkpoint_filename>` (weights for one committed epoch)
#[derive(Debug, Clone)]
pub struct TaskLayout {
    root: PathBuf,
}

impl TaskLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Layout under a client data directory (`<data_dir>/tasks`).
    #[must_use]
    pub fn for_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("tasks"))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_root(&self) -> TrainingResult<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    fn prefixed(&self, task_id: TaskId, name: &str) -> PathBuf {
        self.root.join(format!("{task_id}_{name}"))
    }

    #[must_use]
    pub fn model_path(&self, task: &Task) -> PathBuf {
        self.prefixed(task.task_id, &task.model_filename)
    }

    #[must_use]
    pub fn images_path(&self, task: &Task) -> PathBuf {
        self.prefixed(task.task_id, &task.train_images_filename)
    }

    #[must_use]
    pub fn labels_path(&self, task: &Task) -> PathBuf {
        self.prefixed(task.task_id, &task.train_labels_filename)
    }

    #[must_use]
    pub fn sidecar_path(&self, task_id: TaskId) -> PathBuf {
        self.prefixed(task_id, "meta.json")
    }

    /// File name (relative to the root) for the weights of a committed epoch.
    #[must_use]
    pub fn weights_file_name(task: &Task, epoch: u32) -> String {
        format!("{}_e{epoch}_{}", task.task_id, task.checkpoint_filename)
    }

    #[must_use]
    pub fn weights_path(&self, task: &Task, epoch: u32) -> PathBuf {
        self.root.join(Self::weights_file_name(task, epoch))
    }

    /// Whether model, images and labels all exist and are non-empty.
    pub fn resources_present(&self, task: &Task) -> bool {
        [self.model_path(task), self.images_path(task), self.labels_path(task)]
            .iter()
            .all(|p| fs::metadata(p).is_ok_and(|m| m.is_file() && m.len() > 0))
    }

    /// Delete every file the task owns. Returns the number of files removed.
    ///
    /// The checkpoint record goes first so an interrupted flush never leaves a
    /// record pointing at deleted weights.
    pub fn flush_task(&self, task: &Task) -> TrainingResult<usize> {
        let mut removed = 0;
        for path in [
            self.sidecar_path(task.task_id),
            self.model_path(task),
            self.images_path(task),
            self.labels_path(task),
        ] {
            if remove_if_exists(&path)? {
                removed += 1;
            }
        }

        let prefix = format!("{}_", task.task_id);
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(&prefix)
                && entry.file_type()?.is_file()
                && remove_if_exists(&entry.path())?
            {
                removed += 1;
            }
        }

        debug!(task_id = %task.task_id, removed, "flushed task files");
        Ok(removed)
    }
}
