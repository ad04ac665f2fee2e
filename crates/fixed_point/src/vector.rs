//! Tensor quantization: float values to fixed-point words with a shared Q format

use crate::error::{FixedPointError, Result};
use crate::fixed::BitWidth;

/// A tensor of fixed-point words sharing one fractional-bit count.
///
/// Element `k` represents the real value `data[k] / 2^frac_bits`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizedTensor {
    /// Raw words, each within the range of `bits`
    pub data: Vec<i32>,
    /// Fractional bits shared by all elements
    pub frac_bits: u8,
    /// Word width
    pub bits: BitWidth,
}

/// Pick the largest fractional-bit count at which every value still fits `bits`.
///
/// An all-zero (or empty) tensor gets [`BitWidth::max_frac_bits`].
pub fn choose_frac_bits(values: &[f32], bits: BitWidth) -> Result<u8> {
    let mut lo = 0.0f64;
    let mut hi = 0.0f64;
    for (index, &v) in values.iter().enumerate() {
        if !v.is_finite() {
            return Err(FixedPointError::NonFinite { index });
        }
        lo = lo.min(v as f64);
        hi = hi.max(v as f64);
    }

    // round() is monotonic, so the extremes decide
    let fits = |frac: u8| {
        let scale = (1u64 << frac) as f64;
        bits.contains((hi * scale).round() as i64) && bits.contains((lo * scale).round() as i64)
    };

    (0..=bits.max_frac_bits())
        .rev()
        .find(|&frac| fits(frac))
        .ok_or_else(|| FixedPointError::OutOfRange {
            value: if hi >= -lo { hi } else { lo },
            bits: bits.total_bits(),
        })
}

impl QuantizedTensor {
    /// Create from raw words, checking the range
    pub fn from_raw(data: Vec<i32>, frac_bits: u8, bits: BitWidth) -> Result<Self> {
        check_frac_bits(frac_bits, bits)?;
        if let Some(&bad) = data.iter().find(|&&v| !bits.contains(v as i64)) {
            return Err(FixedPointError::OutOfRange {
                value: bad as f64,
                bits: bits.total_bits(),
            });
        }
        Ok(Self {
            data,
            frac_bits,
            bits,
        })
    }

    /// Quantize at the finest resolution that does not overflow
    pub fn quantize(values: &[f32], bits: BitWidth) -> Result<Self> {
        let frac_bits = choose_frac_bits(values, bits)?;
        Self::quantize_with(values, frac_bits, bits)
    }

    /// Quantize at a given fractional-bit count, saturating out-of-range values
    pub fn quantize_with(values: &[f32], frac_bits: u8, bits: BitWidth) -> Result<Self> {
        check_frac_bits(frac_bits, bits)?;
        let scale = (1u64 << frac_bits) as f64;

        let mut data = Vec::with_capacity(values.len());
        for (index, &v) in values.iter().enumerate() {
            if !v.is_finite() {
                return Err(FixedPointError::NonFinite { index });
            }
            data.push(bits.saturate((v as f64 * scale).round() as i64).value);
        }

        Ok(Self {
            data,
            frac_bits,
            bits,
        })
    }

    /// Convert back to floating-point
    pub fn to_f64_vec(&self) -> Vec<f64> {
        let scale = self.resolution();
        self.data.iter().map(|&x| x as f64 * scale).collect()
    }

    /// Value of one LSB (`2^-frac_bits`)
    pub fn resolution(&self) -> f64 {
        1.0 / (1u64 << self.frac_bits) as f64
    }

    /// Get the length of the tensor
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the tensor is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Largest absolute dequantization error against the source values
    pub fn max_abs_error(&self, source: &[f32]) -> f64 {
        self.to_f64_vec()
            .iter()
            .zip(source)
            .map(|(&q, &v)| (q - v as f64).abs())
            .fold(0.0, f64::max)
    }
}

fn check_frac_bits(frac_bits: u8, bits: BitWidth) -> Result<()> {
    if frac_bits > bits.max_frac_bits() {
        return Err(FixedPointError::InvalidFracBits {
            frac_bits,
            max: bits.max_frac_bits(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_frac_bits_maximize_resolution() {
        // 0.9 * 2^7 = 115 fits q7, 0.9 * 2^8 = 230 does not
        assert_eq!(choose_frac_bits(&[0.9, -0.2], BitWidth::Q7).unwrap(), 7);
        // 3.0 needs two integer bits
        assert_eq!(choose_frac_bits(&[3.0], BitWidth::Q7).unwrap(), 5);
        // -1.0 * 2^7 = -128 is the q7 minimum
        assert_eq!(choose_frac_bits(&[-1.0], BitWidth::Q7).unwrap(), 7);
        assert_eq!(choose_frac_bits(&[1.0], BitWidth::Q7).unwrap(), 6);
    }

    #[test]
    fn test_small_values_use_extra_frac_bits() {
        assert_eq!(choose_frac_bits(&[0.01], BitWidth::Q7).unwrap(), 13);
    }

    #[test]
    fn test_zero_tensor_gets_max_frac_bits() {
        assert_eq!(choose_frac_bits(&[0.0, 0.0], BitWidth::Q7).unwrap(), 14);
        assert_eq!(choose_frac_bits(&[], BitWidth::Q15).unwrap(), 30);
        let t = QuantizedTensor::quantize(&[0.0; 4], BitWidth::Q15).unwrap();
        assert_eq!(t.data, vec![0; 4]);
    }

    #[test]
    fn test_out_of_range() {
        assert!(matches!(
            choose_frac_bits(&[300.0], BitWidth::Q7),
            Err(FixedPointError::OutOfRange { bits: 8, .. })
        ));
        assert!(choose_frac_bits(&[300.0], BitWidth::Q15).is_ok());
    }

    #[test]
    fn test_non_finite_rejected() {
        assert!(matches!(
            QuantizedTensor::quantize(&[1.0, f32::NAN], BitWidth::Q7),
            Err(FixedPointError::NonFinite { index: 1 })
        ));
    }

    #[test]
    fn test_quantize_with_saturates() {
        let t = QuantizedTensor::quantize_with(&[2.0, -2.0, 0.5], 7, BitWidth::Q7).unwrap();
        assert_eq!(t.data, vec![127, -128, 64]);
    }

    #[test]
    fn test_invalid_frac_bits() {
        assert!(matches!(
            QuantizedTensor::quantize_with(&[0.5], 15, BitWidth::Q7),
            Err(FixedPointError::InvalidFracBits { frac_bits: 15, max: 14 })
        ));
    }

    #[test]
    fn test_from_raw_checks_range() {
        assert!(QuantizedTensor::from_raw(vec![127, -128], 7, BitWidth::Q7).is_ok());
        assert!(QuantizedTensor::from_raw(vec![128], 7, BitWidth::Q7).is_err());
    }

    #[test]
    fn test_range_edges_are_exact() {
        let t = QuantizedTensor::quantize(&[-1.0, 127.0 / 128.0], BitWidth::Q7).unwrap();
        assert_eq!(t.frac_bits, 7);
        assert_eq!(t.data, vec![-128, 127]);
        assert_eq!(t.max_abs_error(&[-1.0, 127.0 / 128.0]), 0.0);

        let t = QuantizedTensor::quantize(&[-1.0, 32767.0 / 32768.0], BitWidth::Q15).unwrap();
        assert_eq!(t.frac_bits, 15);
        assert_eq!(t.data, vec![-32768, 32767]);

        // -128 still fits q7 at zero fractional bits, +128 does not
        assert_eq!(choose_frac_bits(&[-128.0], BitWidth::Q7).unwrap(), 0);
        assert!(choose_frac_bits(&[128.0], BitWidth::Q7).is_err());
    }

    /// A bit width and values spanning its integer-bit regime, range edges included
    fn tensor_values() -> impl Strategy<Value = (BitWidth, Vec<f32>)> {
        any::<bool>().prop_flat_map(|wide| {
            let (bits, bound) = if wide {
                (BitWidth::Q15, 100.0f32)
            } else {
                (BitWidth::Q7, 4.0f32)
            };
            let value = prop_oneof![
                4 => -bound..bound,
                1 => Just(-bound),
                1 => Just(bound * 127.0 / 128.0),
            ];
            (Just(bits), prop::collection::vec(value, 1..64))
        })
    }

    proptest! {
        #[test]
        fn prop_roundtrip_within_half_lsb((bits, values) in tensor_values()) {
            let t = QuantizedTensor::quantize(&values, bits).unwrap();
            prop_assert_eq!(t.len(), values.len());
            for &q in &t.data {
                prop_assert!(bits.contains(q as i64));
            }
            prop_assert!(t.max_abs_error(&values) <= t.resolution() / 2.0);
        }

        #[test]
        fn prop_frac_bits_is_maximal(values in prop::collection::vec(-4.0f32..4.0, 1..64)) {
            let bits = BitWidth::Q7;
            let frac = choose_frac_bits(&values, bits).unwrap();
            if frac < bits.max_frac_bits() {
                let scale = (1u64 << (frac + 1)) as f64;
                let overflows = values
                    .iter()
                    .any(|&v| !bits.contains((v as f64 * scale).round() as i64));
                prop_assert!(overflows);
            }
        }
    }
}
