//! Remote coordinator: task assignment, resource downloads and weight uploads.

mod http;

pub use http::HttpCoordinator;

use fractal_training::{Task, TaskLayout, TrainingError};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("coordinator returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid task descriptor: {0}")]
    InvalidTask(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Local layout or artifact failure while handling a coordinator call.
    #[error(transparent)]
    Training(#[from] TrainingError),
}

pub type CoordinatorResult<T> = std::result::Result<T, CoordinatorError>;

/// The server side of a training cycle.
///
/// Absence of a task is `Ok(None)`, not an error. Every call is bounded by
/// the implementation's own transport timeouts.
pub trait Coordinator: Send + Sync {
    fn fetch_task(&self, device_id: &str) -> CoordinatorResult<Option<Task>>;

    /// Download the model and training data for `task` into `layout`.
    fn download_resources(&self, task: &Task, layout: &TaskLayout) -> CoordinatorResult<()>;

    /// Send trained weights. `Ok(())` means the coordinator accepted them.
    fn upload_artifact(&self, task: &Task, device_id: &str, weights: &Path) -> CoordinatorResult<()>;
}
