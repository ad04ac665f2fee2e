//! Fixed-point error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FixedPointError {
    #[error("Value {value} does not fit a {bits}-bit word at any non-negative fractional-bit count")]
    OutOfRange { value: f64, bits: u8 },

    #[error("Non-finite value at index {index}")]
    NonFinite { index: usize },

    #[error("Invalid fractional bits: {frac_bits} (must be 0-{max})")]
    InvalidFracBits { frac_bits: u8, max: u8 },

    #[error("Shift {shift} outside the representable range 0-{max}")]
    InvalidShift { shift: i32, max: u8 },

    #[error("Unsupported bit width selector: {0} (use 7 for q7 or 15 for q15)")]
    UnsupportedBitWidth(u8),
}

pub type Result<T> = std::result::Result<T, FixedPointError>;
