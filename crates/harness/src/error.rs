//! Harness error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Model error: {0}")]
    Model(#[from] nnport_model::ModelError),

    #[error("Quantization error: {0}")]
    Quantization(#[from] nnport_calibrate::QuantizationError),

    #[error("Fixed-point error: {0}")]
    FixedPoint(#[from] nnport_fixed_point::FixedPointError),

    #[error("Code generation error: {0}")]
    Codegen(#[from] nnport_codegen::CodegenError),

    #[error("Device link error: {0}")]
    Link(#[from] nnport_protocol::LinkError),

    #[error("Device failed on sample {index}: {source}")]
    DeviceFailed {
        index: usize,
        #[source]
        source: nnport_protocol::LinkError,
    },

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
