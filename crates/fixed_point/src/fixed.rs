//! Word formats and the runtime's accumulate-then-shift arithmetic

use serde::{Deserialize, Serialize};

use crate::error::{FixedPointError, Result};

/// Width of the runtime accumulator (q31_t)
pub const ACCUMULATOR_BITS: u8 = 32;

/// Largest shift the runtime can apply to the accumulator
pub const MAX_SHIFT: u8 = ACCUMULATOR_BITS - 1;

/// Integer bits the accumulator keeps free above its binary point
pub const ACC_HEADROOM_BITS: u8 = 8;

/// Signed word width of the deployed network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitWidth {
    /// 8-bit words (q7_t)
    Q7,
    /// 16-bit words (q15_t)
    Q15,
}

impl BitWidth {
    /// Select a width from its fractional-bit count (7 or 15), as the CLI does
    pub fn from_frac_selector(selector: u8) -> Result<Self> {
        match selector {
            7 => Ok(BitWidth::Q7),
            15 => Ok(BitWidth::Q15),
            other => Err(FixedPointError::UnsupportedBitWidth(other)),
        }
    }

    /// Total number of bits, sign included
    pub fn total_bits(self) -> u8 {
        match self {
            BitWidth::Q7 => 8,
            BitWidth::Q15 => 16,
        }
    }

    /// The 7/15 selector this width is named after
    pub fn frac_selector(self) -> u8 {
        self.total_bits() - 1
    }

    pub fn min_value(self) -> i32 {
        -(1i32 << (self.total_bits() - 1))
    }

    pub fn max_value(self) -> i32 {
        (1i32 << (self.total_bits() - 1)) - 1
    }

    /// Upper bound for any tensor's fractional-bit count.
    ///
    /// Also the count assigned to an all-zero tensor.
    pub fn max_frac_bits(self) -> u8 {
        2 * (self.total_bits() - 1)
    }

    /// Fractional bits of the network input.
    ///
    /// q7 drops the pixel's lowest bit (Q0.7); q15 keeps all eight (Q7.8).
    pub fn input_frac_bits(self) -> u8 {
        match self {
            BitWidth::Q7 => 7,
            BitWidth::Q15 => 8,
        }
    }

    /// Convert one raw pixel to the network input format, as the firmware does
    pub fn pixel_to_fixed(self, pixel: u8) -> i32 {
        match self {
            BitWidth::Q7 => (pixel >> 1) as i32,
            BitWidth::Q15 => pixel as i32,
        }
    }

    /// Upper bound for the accumulator's fractional bits (input + weight)
    pub fn max_acc_frac_bits(self) -> u8 {
        MAX_SHIFT - ACC_HEADROOM_BITS
    }

    /// Default output integer-bit search range `[start, stop]`
    pub fn default_shift_range(self) -> (u8, u8) {
        match self {
            BitWidth::Q7 => (0, 4),
            BitWidth::Q15 => (0, 8),
        }
    }

    /// C word type of the runtime
    pub fn c_type(self) -> &'static str {
        match self {
            BitWidth::Q7 => "q7_t",
            BitWidth::Q15 => "q15_t",
        }
    }

    /// Suffix of the runtime's function family (`arm_relu_q7`, ...)
    pub fn cmsis_suffix(self) -> &'static str {
        match self {
            BitWidth::Q7 => "q7",
            BitWidth::Q15 => "q15",
        }
    }

    /// Whether `value` is representable in this width
    pub fn contains(self, value: i64) -> bool {
        value >= self.min_value() as i64 && value <= self.max_value() as i64
    }

    /// Clamp to the word range (`__SSAT`)
    pub fn saturate(self, value: i64) -> Saturated {
        let clamped = value.clamp(self.min_value() as i64, self.max_value() as i64);
        Saturated {
            value: clamped as i32,
            clamped: clamped != value,
        }
    }

    /// Renormalize a wide accumulator into an output word.
    ///
    /// The accumulator must already contain the rounding term (see
    /// [`Rounding::round_term`]). An accumulator outside the q31 range counts as
    /// saturation even when the shifted result happens to fit.
    pub fn rescale(self, acc: i64, out_shift: u8) -> Saturated {
        let mut out = self.saturate(acc >> out_shift.min(63));
        out.clamped |= accumulator_overflows(acc);
        out
    }

    /// Validate a shift amount against the runtime's legal range
    pub fn check_shift(shift: i32) -> Result<u8> {
        if (0..=MAX_SHIFT as i32).contains(&shift) {
            Ok(shift as u8)
        } else {
            Err(FixedPointError::InvalidShift {
                shift,
                max: MAX_SHIFT,
            })
        }
    }
}

/// Whether `acc` leaves the q31 accumulator the runtime sums into
pub fn accumulator_overflows(acc: i64) -> bool {
    acc < i32::MIN as i64 || acc > i32::MAX as i64
}

impl std::fmt::Display for BitWidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.cmsis_suffix())
    }
}

/// Rounding applied by the runtime before the output shift
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rounding {
    /// Add half an output LSB before shifting (`NN_ROUND`)
    #[default]
    Nearest,
    /// Plain arithmetic shift (`ARM_NN_TRUNCATE`)
    Truncate,
}

impl Rounding {
    /// Constant the runtime seeds the accumulator with
    pub fn round_term(self, out_shift: u8) -> i64 {
        match self {
            Rounding::Nearest if out_shift > 0 => 1i64 << (out_shift - 1),
            _ => 0,
        }
    }
}

/// A word produced by saturating arithmetic, with a flag telling whether it was clipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Saturated {
    pub value: i32,
    pub clamped: bool,
}
