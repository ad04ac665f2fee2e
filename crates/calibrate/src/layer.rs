//! Quantized fully-connected layer and its integer forward pass

use nnport_fixed_point::{accumulator_overflows, BitWidth, QuantizedTensor, Rounding};
use nnport_model::{Activation, Layer};

use crate::error::{QuantizationError, Result};

/// A layer in the runtime's fixed-point form.
///
/// The runtime computes, per output neuron `j`:
/// `y_j = ssat(((b_j << bias_shift) + round + Σ w_jk x_k) >> out_shift)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizedLayer {
    pub index: usize,
    pub activation: Activation,
    pub in_features: usize,
    pub out_features: usize,
    /// Weight matrix (out_features × in_features), row-major
    pub weights: QuantizedTensor,
    /// Bias vector (out_features)
    pub bias: QuantizedTensor,
    /// Fractional bits of this layer's input words
    pub input_frac_bits: u8,
    /// Left shift aligning the bias with the accumulator
    pub bias_shift: u8,
    /// Right shift renormalizing the accumulator into the output format
    pub out_shift: u8,
}

/// Result of one integer forward step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerOutput {
    pub values: Vec<i32>,
    /// Whether any accumulator overflowed or an output word lost information to
    /// clipping (ReLU outputs clipped at the word minimum do not count)
    pub saturated: bool,
}

impl QuantizedLayer {
    /// Quantize `layer` for a given input format and output integer-bit count
    pub fn quantize(
        layer: &Layer,
        bits: BitWidth,
        input_frac_bits: u8,
        output_int_bits: u8,
    ) -> Result<Self> {
        Self::quantize_params(layer, bits, input_frac_bits)?.with_output_int_bits(output_int_bits)
    }

    /// Quantize weights and bias for a given input format; the output shift is left at 0
    pub(crate) fn quantize_params(layer: &Layer, bits: BitWidth, input_frac_bits: u8) -> Result<Self> {
        let max_weight_frac = bits
            .max_acc_frac_bits()
            .checked_sub(input_frac_bits)
            .ok_or(QuantizationError::InputFormat {
                layer: layer.index,
                input_frac_bits,
                max: bits.max_acc_frac_bits(),
            })?;

        let mut weights = QuantizedTensor::quantize(&layer.weights, bits)?;
        if weights.frac_bits > max_weight_frac {
            weights = QuantizedTensor::quantize_with(&layer.weights, max_weight_frac, bits)?;
        }

        let acc_frac = input_frac_bits + weights.frac_bits;
        let mut bias = QuantizedTensor::quantize(&layer.bias, bits)?;
        if bias.frac_bits > acc_frac {
            bias = QuantizedTensor::quantize_with(&layer.bias, acc_frac, bits)?;
        }
        let bias_shift = acc_frac - bias.frac_bits;

        Ok(Self {
            index: layer.index,
            activation: layer.activation,
            in_features: layer.in_features,
            out_features: layer.out_features,
            weights,
            bias,
            input_frac_bits,
            bias_shift,
            out_shift: 0,
        })
    }

    /// Same layer with the output format Qk.(bits-1-k)
    pub fn with_output_int_bits(mut self, output_int_bits: u8) -> Result<Self> {
        self.out_shift = self.out_shift_for(output_int_bits)?;
        Ok(self)
    }

    /// Right shift producing an output with `output_int_bits` integer bits
    pub fn out_shift_for(&self, output_int_bits: u8) -> Result<u8> {
        let out_frac = self.bits().frac_selector() as i32 - output_int_bits as i32;
        Ok(BitWidth::check_shift(self.acc_frac_bits() as i32 - out_frac)?)
    }

    pub fn bits(&self) -> BitWidth {
        self.weights.bits
    }

    pub fn weight_frac_bits(&self) -> u8 {
        self.weights.frac_bits
    }

    pub fn bias_frac_bits(&self) -> u8 {
        self.bias.frac_bits
    }

    /// Fractional bits of the accumulator (input + weight)
    pub fn acc_frac_bits(&self) -> u8 {
        self.input_frac_bits + self.weights.frac_bits
    }

    /// Fractional bits of the output words; the next layer's input format
    pub fn output_frac_bits(&self) -> i32 {
        self.acc_frac_bits() as i32 - self.out_shift as i32
    }

    /// Integer bits of the output words (sign excluded)
    pub fn output_int_bits(&self) -> i32 {
        self.bits().frac_selector() as i32 - self.output_frac_bits()
    }

    /// Weights feeding output neuron `j`
    pub fn row(&self, j: usize) -> &[i32] {
        &self.weights.data[j * self.in_features..(j + 1) * self.in_features]
    }

    /// Integer forward pass, mirroring the runtime's fully-connected + activation calls.
    ///
    /// Softmax is not applied: it preserves the arg-max and the runtime's version
    /// is only used for the final class decision.
    pub fn forward(&self, x: &[i32], rounding: Rounding) -> LayerOutput {
        debug_assert_eq!(x.len(), self.in_features);
        let bits = self.bits();
        let round = rounding.round_term(self.out_shift);
        let mut saturated = false;

        let values = (0..self.out_features)
            .map(|j| {
                let dot: i64 = self
                    .row(j)
                    .iter()
                    .zip(x)
                    .map(|(&w, &xi)| w as i64 * xi as i64)
                    .sum();
                let acc = ((self.bias.data[j] as i64) << self.bias_shift) + round + dot;
                let out = bits.rescale(acc, self.out_shift);
                match self.activation {
                    Activation::Relu => {
                        // a clip at the word minimum is erased by the ReLU anyway
                        saturated |= accumulator_overflows(acc) || (out.clamped && out.value > 0);
                        out.value.max(0)
                    }
                    Activation::Softmax | Activation::Identity => {
                        saturated |= out.clamped;
                        out.value
                    }
                }
            })
            .collect();

        LayerOutput { values, saturated }
    }
}
