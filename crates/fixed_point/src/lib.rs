//! nnport Fixed-Point Encoding
//!
//! Q-format representation matching the CMSIS-NN runtime: signed 8-bit (q7)
//! and 16-bit (q15) words, accumulate in a wide integer, then shift and saturate.

mod error;
mod fixed;
mod vector;

pub use error::{FixedPointError, Result};
pub use fixed::{
    accumulator_overflows, BitWidth, Rounding, Saturated, ACCUMULATOR_BITS, ACC_HEADROOM_BITS,
    MAX_SHIFT,
};
pub use vector::{choose_frac_bits, QuantizedTensor};
