//! Quantization and calibration error types

use nnport_fixed_point::BitWidth;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuantizationError {
    #[error("Fixed-point error: {0}")]
    FixedPoint(#[from] nnport_fixed_point::FixedPointError),

    #[error("Every output shift candidate saturates or is out of range for layer {layer}")]
    NoViableShift { layer: usize },

    #[error("Invalid shift search range [{start}, {stop}] (stop must be at most {max})")]
    InvalidRange { start: u8, stop: u8, max: u8 },

    #[error("Layer {layer} input has {input_frac_bits} fractional bits, above the accumulator limit {max}")]
    InputFormat {
        layer: usize,
        input_frac_bits: u8,
        max: u8,
    },

    #[error("Layer {layer} reads {got} fractional bits but its predecessor produces {expected}")]
    FormatMismatch { layer: usize, expected: i32, got: u8 },

    #[error("Layer {layer} is not quantized at the model's bit width {expected}")]
    MixedBitWidth { layer: usize, expected: BitWidth },

    #[error("Evaluation set is empty")]
    EmptyEvalSet,

    #[error("Evaluation samples have {got} values but the model expects {expected}")]
    InputWidthMismatch { expected: usize, got: usize },

    #[error("All {layers} layers are already calibrated")]
    AlreadyCalibrated { layers: usize },
}

pub type Result<T> = std::result::Result<T, QuantizationError>;
