//! Command implementations for the Fractal CLI.

pub mod checkpoints;
pub mod run;
pub mod settings;
