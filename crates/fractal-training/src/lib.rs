//! Fractal Training
//!
//! Backend-agnostic primitives for resumable on-device training:
//! - Describing fetched work (`Task`) and its on-disk layout (`TaskLayout`)
//! - Durable, crash-safe epoch checkpoints (`CheckpointStore`)
//! - The engine seam (`TrainingEngine`) plus a small built-in softmax engine
//! - Cooperative pause/cancel handling over an injectable clock
//! - The checkpointed epoch loop (`TrainingRunner`)

pub mod artifacts;
pub mod checkpoint;
pub mod clock;
pub mod context;
pub mod control;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod events;
pub mod layout;
pub mod registry;
pub mod runner;
pub mod task;
pub mod validator;

pub use artifacts::sha256_file;
pub use checkpoint::{CheckpointRecord, CheckpointState, CheckpointStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::CycleContext;
pub use control::{ControlSignal, Flow, LiveConditions, SleepOutcome, Unconstrained};
pub use dataset::{DatasetLoader, ImageBinLoader, ImageDataset};
pub use engine::{EngineFactory, SoftmaxEngine, SoftmaxEngineFactory, TrainingEngine};
pub use error::{TrainingError, TrainingResult};
pub use events::{
    ClientEvent, CycleState, EventSink, MemoryEventSink, StatsSink, StdoutEventSink, TrainingStats,
};
pub use layout::TaskLayout;
pub use registry::{Pipeline, Stage, StageRegistry, TaskFlavor};
pub use runner::{RunOutcome, TrainingRunner};
pub use task::{Task, TaskId};
pub use validator::{ImageInferenceValidator, ValidationReport, Validator};
