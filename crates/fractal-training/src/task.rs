use crate::error::{TrainingError, TrainingResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coordinator-assigned task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One unit of training work as handed out by the coordinator.
///
/// Immutable once fetched except for `completed`, which the orchestrator sets
/// after the training stage finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    /// `None` means the coordinator did not set an expiry.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: bool,
    /// Declared pipeline stage names, resolved through the stage registry.
    #[serde(default)]
    pub training_type: Vec<String>,
    #[serde(default = "default_checkpoint_filename")]
    pub checkpoint_filename: String,
    #[serde(default = "default_epochs")]
    pub epochs: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_num_trainings")]
    pub num_trainings: u64,
    #[serde(default = "default_input_shape")]
    pub input_shape: Vec<u32>,
    #[serde(default = "default_num_classes")]
    pub num_classes: u32,
    #[serde(default = "default_model_filename")]
    pub model_filename: String,
    #[serde(default = "default_train_images_filename")]
    pub train_images_filename: String,
    #[serde(default = "default_train_labels_filename")]
    pub train_labels_filename: String,
}

fn default_checkpoint_filename() -> String {
    "checkpoint.ckpt".to_string()
}

fn default_epochs() -> u32 {
    20
}

fn default_batch_size() -> u64 {
    100
}

fn default_num_trainings() -> u64 {
    6000
}

fn default_input_shape() -> Vec<u32> {
    vec![1, 28, 28, 1]
}

fn default_num_classes() -> u32 {
    10
}

fn default_model_filename() -> String {
    "model_server.json".to_string()
}

fn default_train_images_filename() -> String {
    "train_images_server.bin".to_string()
}

fn default_train_labels_filename() -> String {
    "train_labels_server.bin".to_string()
}

impl Task {
    /// A task with default image parameters.
    #[must_use]
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            expires_at: None,
            completed: false,
            training_type: Vec::new(),
            checkpoint_filename: default_checkpoint_filename(),
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            num_trainings: default_num_trainings(),
            input_shape: default_input_shape(),
            num_classes: default_num_classes(),
            model_filename: default_model_filename(),
            train_images_filename: default_train_images_filename(),
            train_labels_filename: default_train_labels_filename(),
        }
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.epochs == 0 {
            return Err(TrainingError::InvalidTask("epochs must be > 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidTask("batch_size must be > 0".to_string()));
        }
        if self.num_trainings < self.batch_size {
            return Err(TrainingError::InvalidTask(format!(
                "num_trainings ({}) must hold at least one batch of {}",
                self.num_trainings, self.batch_size
            )));
        }
        if self.num_classes == 0 {
            return Err(TrainingError::InvalidTask("num_classes must be > 0".to_string()));
        }
        for (field, name) in [
            ("checkpoint_filename", &self.checkpoint_filename),
            ("model_filename", &self.model_filename),
            ("train_images_filename", &self.train_images_filename),
            ("train_labels_filename", &self.train_labels_filename),
        ] {
            // Filenames come from the network and are joined onto the data directory.
            if name.trim().is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
                return Err(TrainingError::InvalidTask(format!("{field} is not a plain file name: {name:?}")));
            }
        }
        Ok(())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Input `(height, width)` derived from `input_shape`.
    ///
    /// Two entries are `[h, w]`; three or more are `[batch, h, w, ...]`.
    /// Anything else falls back to 28x28.
    pub fn image_dims(&self) -> (usize, usize) {
        match self.input_shape.as_slice() {
            [h, w] => (*h as usize, *w as usize),
            [_, h, w, ..] => (*h as usize, *w as usize),
            _ => (28, 28),
        }
    }

    pub fn input_len(&self) -> usize {
        let (h, w) = self.image_dims();
        h * w
    }

    /// Samples trained per epoch. Only whole batches are used.
    pub fn samples_per_epoch(&self) -> u64 {
        (self.num_trainings / self.batch_size.max(1)) * self.batch_size
    }

    pub fn total_steps(&self) -> u64 {
        u64::from(self.epochs) * self.samples_per_epoch()
    }
}
