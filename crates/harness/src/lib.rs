//! nnport Harness
//!
//! Ties the crates together: the `generate` pipeline (load, calibrate, emit) and
//! the comparison harness that scores a deployed network against the host model.

mod comparison;
mod config;
mod emulator;
mod error;
mod pipeline;

pub use comparison::{
    ComparisonHarness, ComparisonRecord, ComparisonReport, FailurePolicy, HostPredictor,
    SampleStatus,
};
pub use config::{GenerateConfig, RunConfig};
pub use emulator::DeviceEmulator;
pub use error::{HarnessError, Result};
pub use pipeline::{calibrate, generate, load_eval_set, load_model, GenerateOutcome};
