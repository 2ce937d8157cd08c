use crate::artifacts::write_json_atomic;
use crate::error::{TrainingError, TrainingResult};
use crate::task::Task;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The model-training/inference engine the runner drives one sample at a time.
pub trait TrainingEngine: Send {
    /// Run one training step and return its loss.
    fn train_step(&mut self, input: &[f32], label: &[f32]) -> TrainingResult<f32>;

    /// Class probabilities for one input.
    fn infer(&self, input: &[f32]) -> TrainingResult<Vec<f32>>;

    fn save_checkpoint(&self, path: &Path) -> TrainingResult<()>;

    /// Load weights from `path`. On error the current weights are left untouched.
    fn restore_checkpoint(&mut self, path: &Path) -> TrainingResult<()>;
}

/// Builds an engine for a task from its downloaded model file.
pub trait EngineFactory: Send + Sync {
    fn id(&self) -> &'static str;

    fn build(&self, task: &Task, model_path: &Path) -> TrainingResult<Box<dyn TrainingEngine>>;
}

fn default_learning_rate() -> f32 {
    0.01
}

/// On-disk form of the softmax model, used both for the coordinator-supplied
/// model file and for checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SoftmaxModel {
    input_len: usize,
    num_classes: usize,
    #[serde(default = "default_learning_rate")]
    learning_rate: f32,
    /// Row-major `num_classes x input_len`. Absent means start from zeros.
    #[serde(default)]
    weights: Option<Vec<f32>>,
    #[serde(default)]
    bias: Option<Vec<f32>>,
}

/// A single dense layer with softmax output, trained by SGD on cross-entropy.
#[derive(Debug, Clone)]
pub struct SoftmaxEngine {
    input_len: usize,
    num_classes: usize,
    learning_rate: f32,
    weights: Vec<f32>,
    bias: Vec<f32>,
}

impl SoftmaxEngine {
    #[must_use]
    pub fn new(input_len: usize, num_classes: usize, learning_rate: f32) -> Self {
        Self {
            input_len,
            num_classes,
            learning_rate,
            weights: vec![0.0; input_len * num_classes],
            bias: vec![0.0; num_classes],
        }
    }

    pub fn from_model_file(path: &Path) -> TrainingResult<Self> {
        let model: SoftmaxModel = serde_json::from_slice(&std::fs::read(path)?)?;
        Self::from_model(model)
    }

    fn from_model(model: SoftmaxModel) -> TrainingResult<Self> {
        if model.input_len == 0 || model.num_classes == 0 {
            return Err(TrainingError::Engine("model dimensions must be > 0".to_string()));
        }
        let mut engine = Self::new(model.input_len, model.num_classes, model.learning_rate);
        if let Some(weights) = model.weights {
            if weights.len() != engine.weights.len() {
                return Err(TrainingError::Engine(format!(
                    "expected {} weights, found {}",
                    engine.weights.len(),
                    weights.len()
                )));
            }
            engine.weights = weights;
        }
        if let Some(bias) = model.bias {
            if bias.len() != engine.num_classes {
                return Err(TrainingError::Engine(format!(
                    "expected {} bias terms, found {}",
                    engine.num_classes,
                    bias.len()
                )));
            }
            engine.bias = bias;
        }
        Ok(engine)
    }

    fn to_model(&self) -> SoftmaxModel {
        SoftmaxModel {
            input_len: self.input_len,
            num_classes: self.num_classes,
            learning_rate: self.learning_rate,
            weights: Some(self.weights.clone()),
            bias: Some(self.bias.clone()),
        }
    }

    pub fn input_len(&self) -> usize {
        self.input_len
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn check_input(&self, input: &[f32]) -> TrainingResult<()> {
        if input.len() == self.input_len {
            Ok(())
        } else {
            Err(TrainingError::Engine(format!(
                "input has {} values, model expects {}",
                input.len(),
                self.input_len
            )))
        }
    }

    fn probabilities(&self, input: &[f32]) -> Vec<f32> {
        let logits: Vec<f32> = self
            .weights
            .chunks_exact(self.input_len)
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>() + b)
            .collect();
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
        let sum: f32 = exps.iter().sum();
        exps.into_iter().map(|e| e / sum).collect()
    }
}

impl TrainingEngine for SoftmaxEngine {
    fn train_step(&mut self, input: &[f32], label: &[f32]) -> TrainingResult<f32> {
        self.check_input(input)?;
        if label.len() != self.num_classes {
            return Err(TrainingError::Engine(format!(
                "label has {} values, model has {} classes",
                label.len(),
                self.num_classes
            )));
        }

        let probs = self.probabilities(input);
        let loss: f32 = -probs.iter().zip(label).map(|(p, y)| y * p.max(1e-7).ln()).sum::<f32>();
        if !loss.is_finite() {
            return Err(TrainingError::Engine(format!("loss diverged: {loss}")));
        }

        let lr = self.learning_rate;
        for (class, (p, y)) in probs.iter().zip(label).enumerate() {
            let grad = p - y;
            let row = &mut self.weights[class * self.input_len..(class + 1) * self.input_len];
            for (w, x) in row.iter_mut().zip(input) {
                *w -= lr * grad * x;
            }
            self.bias[class] -= lr * grad;
        }
        Ok(loss)
    }

    fn infer(&self, input: &[f32]) -> TrainingResult<Vec<f32>> {
        self.check_input(input)?;
        Ok(self.probabilities(input))
    }

    fn save_checkpoint(&self, path: &Path) -> TrainingResult<()> {
        write_json_atomic(path, &self.to_model())
    }

    fn restore_checkpoint(&mut self, path: &Path) -> TrainingResult<()> {
        let model: SoftmaxModel = serde_json::from_slice(&std::fs::read(path)?)?;
        if model.input_len != self.input_len || model.num_classes != self.num_classes {
            return Err(TrainingError::Engine(format!(
                "checkpoint shape {}x{} does not match model {}x{}",
                model.num_classes, model.input_len, self.num_classes, self.input_len
            )));
        }
        if model.weights.is_none() || model.bias.is_none() {
            return Err(TrainingError::Engine("checkpoint carries no weights".to_string()));
        }
        *self = Self::from_model(model)?;
        Ok(())
    }
}

/// Builds a [`SoftmaxEngine`] sized from the task when the model file only
/// carries hyperparameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftmaxEngineFactory;

impl EngineFactory for SoftmaxEngineFactory {
    fn id(&self) -> &'static str {
        "softmax"
    }

    fn build(&self, task: &Task, model_path: &Path) -> TrainingResult<Box<dyn TrainingEngine>> {
        let engine = SoftmaxEngine::from_model_file(model_path)?;
        if engine.input_len() != task.input_len() || engine.num_classes() != task.num_classes as usize {
            return Err(TrainingError::Engine(format!(
                "model is {}x{}, task {} declares {}x{}",
                engine.num_classes(),
                engine.input_len(),
                task.task_id,
                task.num_classes,
                task.input_len()
            )));
        }
        Ok(Box::new(engine))
    }
}

/// Write a fresh model file with the given dimensions.
pub fn write_softmax_model(path: &Path, input_len: usize, num_classes: usize) -> TrainingResult<()> {
    let model = SoftmaxModel {
        input_len,
        num_classes,
        learning_rate: default_learning_rate(),
        weights: None,
        bias: None,
    };
    write_json_atomic(path, &model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskId;
    use tempfile::TempDir;

    fn one_hot(class: usize, n: usize) -> Vec<f32> {
        (0..n).map(|i| if i == class { 1.0 } else { 0.0 }).collect()
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut engine = SoftmaxEngine::new(4, 2, 0.5);
        let a = [1.0, 0.0, 1.0, 0.0];
        let b = [0.0, 1.0, 0.0, 1.0];

        let first = engine.train_step(&a, &one_hot(0, 2)).unwrap();
        for _ in 0..50 {
            engine.train_step(&a, &one_hot(0, 2)).unwrap();
            engine.train_step(&b, &one_hot(1, 2)).unwrap();
        }
        let last = engine.train_step(&a, &one_hot(0, 2)).unwrap();
        assert!(last < first);

        let probs = engine.infer(&b).unwrap();
        assert!(probs[1] > probs[0]);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_checkpoint_roundtrip_restores_weights() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ckpt.json");
        let mut engine = SoftmaxEngine::new(3, 2, 0.1);
        engine.train_step(&[1.0, 2.0, 3.0], &one_hot(1, 2)).unwrap();
        engine.save_checkpoint(&path).unwrap();

        let mut fresh = SoftmaxEngine::new(3, 2, 0.1);
        fresh.restore_checkpoint(&path).unwrap();
        assert_eq!(fresh.weights, engine.weights);
        assert_eq!(fresh.bias, engine.bias);
    }

    #[test]
    fn test_failed_restore_leaves_weights_untouched() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ckpt.json");
        std::fs::write(&path, b"{\"input_len\": 3, \"num_cl").unwrap();

        let mut engine = SoftmaxEngine::new(3, 2, 0.1);
        engine.train_step(&[1.0, 1.0, 1.0], &one_hot(0, 2)).unwrap();
        let before = engine.weights.clone();

        assert!(engine.restore_checkpoint(&path).is_err());
        assert_eq!(engine.weights, before);
    }

    #[test]
    fn test_wrong_input_length_is_engine_error() {
        let mut engine = SoftmaxEngine::new(3, 2, 0.1);
        let err = engine.train_step(&[1.0], &one_hot(0, 2)).unwrap_err();
        assert!(matches!(err, TrainingError::Engine(_)));
    }

    #[test]
    fn test_factory_checks_task_dimensions() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("model.json");
        let mut task = Task::new(TaskId(1));
        task.input_shape = vec![2, 2];
        task.num_classes = 3;

        write_softmax_model(&path, 4, 3).unwrap();
        assert!(SoftmaxEngineFactory.build(&task, &path).is_ok());

        write_softmax_model(&path, 5, 3).unwrap();
        assert!(SoftmaxEngineFactory.build(&task, &path).is_err());
    }
}
