//! nnport Code Generation
//!
//! Serializes a [`CalibratedModel`](nnport_calibrate::CalibratedModel) into the C
//! headers and forward-pass source a CMSIS-NN firmware build compiles:
//!
//! - `nn_weights.h`: quantized weight and bias arrays
//! - `nn_dimensions.h`: per-layer widths
//! - `nn_params.h`: fractional bits and shifts
//! - `nn_bit_size.h`: word type, rounding convention and model fingerprint
//! - `nn_net.h` / `nn_net.c`: the ordered call sequence
//!
//! Models are validated before anything is rendered, and nothing reaches the
//! output directory unless every file was written.

mod emitter;
mod error;
mod render;
mod validate;

#[cfg(test)]
mod test_util;

pub use emitter::{fingerprint, Artifacts, CodeEmitter, EmitOptions, ARTIFACT_NAMES};
pub use error::{CodegenError, Result};
pub use validate::validate;
