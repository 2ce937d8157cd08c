//! Error types for the client runtime.

use fractal_training::TrainingError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Training error: {0}")]
    Training(#[from] TrainingError),

    /// A collaborator panicked inside one cycle.
    #[error("cycle panicked: {0}")]
    Panicked(String),
}

impl ClientError {
    /// Fatal errors end the master loop; everything else backs off and retries.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Training(e) => e.is_fatal(),
            _ => false,
        }
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
