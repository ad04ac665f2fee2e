//! nnport Calibration
//!
//! Turns a float model into a [`CalibratedModel`]: quantized weights plus the
//! per-layer output shifts, chosen layer by layer against an evaluation set while
//! emulating the runtime's integer arithmetic exactly.

mod calibrator;
mod error;
mod layer;
mod model;

pub use calibrator::{
    select_candidate, Calibration, CalibrationConfig, CandidateScore, LayerCalibration,
    OutputShiftCalibrator,
};
pub use error::{QuantizationError, Result};
pub use layer::{LayerOutput, QuantizedLayer};
pub use model::CalibratedModel;
