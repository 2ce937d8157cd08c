//! Fractal Core - the resource-gated training client runtime.
//!
//! This crate composes the training primitives from `fractal-training` into
//! the long-running client:
//! - Configuration and the persisted admission policy
//! - Device telemetry and the admission gate built on it
//! - The coordinator seam and its HTTP implementation
//! - The infinite-retry upload cycle
//! - The master orchestration loop

pub mod config;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod orchestrator;
pub mod telemetry;
pub mod upload;

pub use config::settings::{AdmissionPolicy, SettingsError, SettingsStore};
pub use config::{ClientConfig, ConfigError};
pub use coordinator::{Coordinator, CoordinatorError, CoordinatorResult, HttpCoordinator};
pub use error::{ClientError, ClientResult};
pub use gate::{Admission, AdmissionGate, BlockReason, evaluate_network_only_policy, evaluate_policy};
pub use orchestrator::{Orchestrator, OrchestratorExit};
pub use telemetry::{DeviceSnapshot, DeviceTelemetry, StaticTelemetry, SysfsTelemetry, TransportSet};
pub use upload::{UploadCycle, UploadOutcome};
