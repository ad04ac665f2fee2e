//! Consistency checks run before any artifact is rendered

use nnport_calibrate::{CalibratedModel, QuantizedLayer};
use nnport_fixed_point::{BitWidth, QuantizedTensor, MAX_SHIFT};
use nnport_model::Activation;

use crate::error::{CodegenError, Result};

/// Check that `model` can be emitted as mutually consistent artifacts.
///
/// Array lengths must match dimensions, widths and formats must chain, every
/// word, fractional-bit count and shift must be legal for the model's bit width,
/// and softmax may only close the network.
pub fn validate(model: &CalibratedModel) -> Result<()> {
    let layers = model.layers();
    if layers.is_empty() {
        return Err(CodegenError::EmptyModel);
    }

    let bits = model.bits();
    let last = layers.len() - 1;
    let mut prev_width = layers[0].in_features;
    let mut prev_frac = model.input_frac_bits() as i32;

    for (i, layer) in layers.iter().enumerate() {
        if layer.in_features != prev_width {
            return Err(CodegenError::WidthMismatch {
                layer: i,
                expected: layer.in_features,
                got: prev_width,
            });
        }
        if layer.input_frac_bits as i32 != prev_frac {
            return Err(CodegenError::FormatMismatch {
                layer: i,
                expected: prev_frac,
                got: layer.input_frac_bits,
            });
        }
        if layer.activation == Activation::Softmax && i != last {
            return Err(CodegenError::SoftmaxNotLast { layer: i });
        }
        for size in [layer.in_features, layer.out_features] {
            if size > u16::MAX as usize {
                return Err(CodegenError::DimensionTooLarge { layer: i, size });
            }
        }

        check_tensor(i, "weights", &layer.weights, layer.in_features * layer.out_features, bits)?;
        check_tensor(i, "bias", &layer.bias, layer.out_features, bits)?;
        check_shifts(i, layer)?;

        prev_width = layer.out_features;
        prev_frac = layer.output_frac_bits();
    }

    Ok(())
}

fn check_tensor(
    layer: usize,
    tensor: &'static str,
    t: &QuantizedTensor,
    expected_len: usize,
    bits: BitWidth,
) -> Result<()> {
    if t.bits != bits {
        return Err(CodegenError::BitWidthMismatch { layer });
    }
    if t.len() != expected_len {
        return Err(CodegenError::LengthMismatch {
            layer,
            tensor,
            expected: expected_len,
            got: t.len(),
        });
    }
    if t.frac_bits > bits.max_frac_bits() {
        return Err(CodegenError::FracBitsOutOfRange {
            layer,
            tensor,
            frac_bits: t.frac_bits,
            max: bits.max_frac_bits(),
        });
    }
    if let Some((index, &value)) = t
        .data
        .iter()
        .enumerate()
        .find(|&(_, &v)| !bits.contains(v as i64))
    {
        return Err(CodegenError::ValueOutOfRange {
            layer,
            tensor,
            index,
            value,
        });
    }
    Ok(())
}

fn check_shifts(index: usize, layer: &QuantizedLayer) -> Result<()> {
    let bits = layer.bits();
    if layer.acc_frac_bits() > bits.max_acc_frac_bits() {
        return Err(CodegenError::FracBitsOutOfRange {
            layer: index,
            tensor: "accumulator",
            frac_bits: layer.acc_frac_bits(),
            max: bits.max_acc_frac_bits(),
        });
    }

    let bias_shift = layer.acc_frac_bits() as i32 - layer.bias_frac_bits() as i32;
    if bias_shift < 0 || bias_shift != layer.bias_shift as i32 {
        return Err(CodegenError::ShiftOutOfRange {
            layer: index,
            shift: "bias",
            value: layer.bias_shift as i32,
        });
    }
    if layer.out_shift > MAX_SHIFT {
        return Err(CodegenError::ShiftOutOfRange {
            layer: index,
            shift: "output",
            value: layer.out_shift as i32,
        });
    }

    // The output format must leave at least the sign bit
    let out_frac = layer.output_frac_bits();
    if out_frac < 0 || out_frac > bits.frac_selector() as i32 {
        return Err(CodegenError::ShiftOutOfRange {
            layer: index,
            shift: "output",
            value: layer.out_shift as i32,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::sample_model;
    use nnport_fixed_point::Rounding;

    fn rebuild(model: &CalibratedModel, edit: impl FnOnce(&mut Vec<QuantizedLayer>)) -> CalibratedModel {
        let mut layers = model.layers().to_vec();
        edit(&mut layers);
        CalibratedModel::new(model.bits(), model.rounding(), model.shift_range(), layers).unwrap()
    }

    #[test]
    fn test_valid_model() {
        assert!(validate(&sample_model(BitWidth::Q7, Rounding::Nearest)).is_ok());
        assert!(validate(&sample_model(BitWidth::Q15, Rounding::Truncate)).is_ok());
    }

    #[test]
    fn test_value_out_of_range() {
        let model = sample_model(BitWidth::Q7, Rounding::Nearest);
        let broken = rebuild(&model, |layers| layers[1].bias.data[1] = 200);
        assert!(matches!(
            validate(&broken),
            Err(CodegenError::ValueOutOfRange { layer: 1, tensor: "bias", index: 1, value: 200 })
        ));
    }

    #[test]
    fn test_inconsistent_bias_shift() {
        let model = sample_model(BitWidth::Q7, Rounding::Nearest);
        let broken = rebuild(&model, |layers| layers[0].bias_shift += 1);
        assert!(matches!(
            validate(&broken),
            Err(CodegenError::ShiftOutOfRange { layer: 0, shift: "bias", .. })
        ));
    }

    #[test]
    fn test_softmax_not_last() {
        let model = sample_model(BitWidth::Q15, Rounding::Nearest);
        let broken = rebuild(&model, |layers| layers[0].activation = Activation::Softmax);
        assert!(matches!(
            validate(&broken),
            Err(CodegenError::SoftmaxNotLast { layer: 0 })
        ));
    }

    #[test]
    fn test_bias_length() {
        let model = sample_model(BitWidth::Q15, Rounding::Nearest);
        let broken = rebuild(&model, |layers| layers[1].bias.data.push(0));
        assert!(matches!(
            validate(&broken),
            Err(CodegenError::LengthMismatch { layer: 1, tensor: "bias", expected: 2, got: 3 })
        ));
    }
}
