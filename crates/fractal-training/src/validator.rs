use crate::dataset::ImageDataset;
use crate::engine::TrainingEngine;
use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};

/// Outcome of the post-training sanity inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub predicted_class: usize,
    /// Probability of the predicted class, 0-100.
    pub confidence: f32,
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Class {} ({:.1}%)", self.predicted_class, self.confidence)
    }
}

pub trait Validator: Send + Sync {
    fn id(&self) -> &'static str;

    fn validate(&self, engine: &dyn TrainingEngine, dataset: &ImageDataset) -> TrainingResult<ValidationReport>;
}

/// Runs one inference on the first sample of the training set.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageInferenceValidator;

impl Validator for ImageInferenceValidator {
    fn id(&self) -> &'static str {
        "image_inference"
    }

    fn validate(&self, engine: &dyn TrainingEngine, dataset: &ImageDataset) -> TrainingResult<ValidationReport> {
        let (input, _) = dataset
            .sample(0)
            .ok_or_else(|| TrainingError::Dataset("no sample to validate against".to_string()))?;
        let probs = engine.infer(input)?;
        let (predicted_class, p) = probs
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| TrainingError::Engine("inference returned no classes".to_string()))?;
        Ok(ValidationReport { predicted_class, confidence: p * 100.0 })
    }
}
