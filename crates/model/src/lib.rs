//! nnport Model Loading
//!
//! Float dense-network topology as exported by the training environment,
//! its reference forward pass, and the evaluation set used to score it.

mod dataset;
mod error;
mod loader;
mod network;
mod weights;

pub use dataset::{EvalSet, Sample, IMAGE_LEN, NUM_CLASSES};
pub use error::{ModelError, Result};
pub use loader::{KernelLayout, LayerSpec, ModelFile};
pub use network::{argmax, FloatModel};
pub use weights::{Activation, Layer};
