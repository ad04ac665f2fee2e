//! Code generation error types

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodegenError {
    #[error("Model has no layers")]
    EmptyModel,

    #[error("Layer {layer} {tensor} has {got} values, expected {expected}")]
    LengthMismatch {
        layer: usize,
        tensor: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Layer {layer} expects {expected} inputs but the previous layer produces {got}")]
    WidthMismatch {
        layer: usize,
        expected: usize,
        got: usize,
    },

    #[error("Layer {layer} reads {got} fractional bits but the previous layer produces {expected}")]
    FormatMismatch { layer: usize, expected: i32, got: u8 },

    #[error("Layer {layer} {tensor}[{index}] = {value} does not fit the word width")]
    ValueOutOfRange {
        layer: usize,
        tensor: &'static str,
        index: usize,
        value: i32,
    },

    #[error("Layer {layer} is quantized at a different bit width than the model")]
    BitWidthMismatch { layer: usize },

    #[error("Layer {layer} {tensor} has {frac_bits} fractional bits (max {max})")]
    FracBitsOutOfRange {
        layer: usize,
        tensor: &'static str,
        frac_bits: u8,
        max: u8,
    },

    #[error("Layer {layer} {shift} shift {value} is outside the legal range")]
    ShiftOutOfRange {
        layer: usize,
        shift: &'static str,
        value: i32,
    },

    #[error("Layer {layer} dimension {size} does not fit the runtime's 16-bit sizes")]
    DimensionTooLarge { layer: usize, size: usize },

    #[error("Softmax at layer {layer} is not the final step")]
    SoftmaxNotLast { layer: usize },

    #[error("Two emissions of the same model differ in {file}")]
    DeterminismViolation { file: String },

    #[error("{path} exists and is not a regular file")]
    ArtifactPathBlocked { path: PathBuf },

    #[error("Formatting error: {0}")]
    Format(#[from] std::fmt::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CodegenError>;
