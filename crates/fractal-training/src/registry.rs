//! Maps declared stage names to the components that implement them.
//!
//! Resolution happens when a task is acquired, so a name this client does not
//! know fails before any resource is downloaded.

use crate::dataset::{DatasetLoader, ImageBinLoader};
use crate::engine::{EngineFactory, SoftmaxEngineFactory};
use crate::error::{TrainingError, TrainingResult};
use crate::task::Task;
use crate::validator::{ImageInferenceValidator, Validator};
use std::collections::HashMap;
use std::sync::Arc;

pub const IMAGE_TASK: &str = "image_task";
pub const IMAGE_DATA_INITIALIZER: &str = "image_data_initializer";
pub const IMAGE_TRAINER: &str = "image_trainer";
pub const IMAGE_INFERENCE_VALIDATOR: &str = "image_inference_validator";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFlavor {
    Image,
}

#[derive(Clone)]
pub enum Stage {
    Task(TaskFlavor),
    DataInitializer(Arc<dyn DatasetLoader>),
    Trainer(Arc<dyn EngineFactory>),
    Validator(Arc<dyn Validator>),
}

/// The concrete components one task runs through.
#[derive(Clone)]
pub struct Pipeline {
    pub flavor: TaskFlavor,
    pub loader: Arc<dyn DatasetLoader>,
    pub engine: Arc<dyn EngineFactory>,
    pub validator: Arc<dyn Validator>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("flavor", &self.flavor)
            .field("loader", &self.loader.id())
            .field("engine", &self.engine.id())
            .field("validator", &self.validator.id())
            .finish()
    }
}

pub struct StageRegistry {
    stages: HashMap<String, Stage>,
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl StageRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self { stages: HashMap::new() }
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(IMAGE_TASK, Stage::Task(TaskFlavor::Image));
        registry.register(IMAGE_DATA_INITIALIZER, Stage::DataInitializer(Arc::new(ImageBinLoader)));
        registry.register(IMAGE_TRAINER, Stage::Trainer(Arc::new(SoftmaxEngineFactory)));
        registry.register(IMAGE_INFERENCE_VALIDATOR, Stage::Validator(Arc::new(ImageInferenceValidator)));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, stage: Stage) {
        self.stages.insert(name.into(), stage);
    }

    fn default_pipeline() -> Pipeline {
        Pipeline {
            flavor: TaskFlavor::Image,
            loader: Arc::new(ImageBinLoader),
            engine: Arc::new(SoftmaxEngineFactory),
            validator: Arc::new(ImageInferenceValidator),
        }
    }

    /// Build the task's pipeline. Roles the task does not name use the image stage.
    pub fn resolve(&self, task: &Task) -> TrainingResult<Pipeline> {
        let mut pipeline = Self::default_pipeline();
        for name in &task.training_type {
            let stage = self
                .stages
                .get(name.as_str())
                .ok_or_else(|| TrainingError::UnknownStage(name.clone()))?;
            match stage {
                Stage::Task(flavor) => pipeline.flavor = *flavor,
                Stage::DataInitializer(loader) => pipeline.loader = Arc::clone(loader),
                Stage::Trainer(engine) => pipeline.engine = Arc::clone(engine),
                Stage::Validator(validator) => pipeline.validator = Arc::clone(validator),
            }
        }
        Ok(pipeline)
    }
}
