use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid task descriptor: {0}")]
    InvalidTask(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("training step failed at epoch {epoch}, sample {sample}: {source}")]
    Step {
        epoch: u32,
        sample: u64,
        #[source]
        source: Box<TrainingError>,
    },

    /// A task named a pipeline stage this client does not know how to build.
    #[error("unknown training stage: {0}")]
    UnknownStage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TrainingError {
    /// Whether this error indicates a client/coordinator mismatch that retrying cannot fix.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::UnknownStage(_) => true,
            Self::Step { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unknown_stage_is_fatal() {
        assert!(TrainingError::UnknownStage("audio_trainer".to_string()).is_fatal());
        assert!(!TrainingError::Dataset("short file".to_string()).is_fatal());
        assert!(!TrainingError::Io(std::io::Error::other("disk")).is_fatal());
    }

    #[test]
    fn test_step_error_keeps_coordinates() {
        let err = TrainingError::Step {
            epoch: 2,
            sample: 41,
            source: Box::new(TrainingError::Engine("nan loss".to_string())),
        };
        let text = err.to_string();
        assert!(text.contains("epoch 2"));
        assert!(text.contains("sample 41"));
        assert!(text.contains("nan loss"));
    }
}
