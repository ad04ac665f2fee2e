//! Model loading error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid tensor shape in layer {layer}: expected {expected:?}, got {got:?}")]
    InvalidShape {
        layer: usize,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Layer {layer} expects {expected} inputs but the previous layer produces {got}")]
    WidthMismatch {
        layer: usize,
        expected: usize,
        got: usize,
    },

    #[error("Unsupported activation: {0}")]
    UnsupportedActivation(String),

    #[error("Unsupported layer type: {0}")]
    UnsupportedLayer(String),

    #[error("Activation entry {entry} has no dense layer to attach to")]
    DanglingActivation { entry: usize },

    #[error("Softmax is only allowed on the last layer (found on layer {layer})")]
    SoftmaxNotLast { layer: usize },

    #[error("Model has no layers")]
    EmptyModel,

    #[error("Non-finite parameter in layer {layer}")]
    NonFinite { layer: usize },

    #[error("Sample {index}: {message}")]
    InvalidSample { index: usize, message: String },
}

pub type Result<T> = std::result::Result<T, ModelError>;
