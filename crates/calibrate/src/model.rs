//! The fully calibrated fixed-point network

use nnport_fixed_point::{BitWidth, Rounding};
use nnport_model::{argmax, EvalSet};

use crate::error::{QuantizationError, Result};
use crate::layer::{LayerOutput, QuantizedLayer};

/// Quantized layers plus the global settings they were calibrated under.
///
/// Built once by the calibrator and never mutated; a different bit width or
/// shift range means a new calibration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibratedModel {
    bits: BitWidth,
    rounding: Rounding,
    shift_range: (u8, u8),
    layers: Vec<QuantizedLayer>,
}

impl CalibratedModel {
    /// Validate that the layers chain: each layer reads the previous one's output format
    pub fn new(
        bits: BitWidth,
        rounding: Rounding,
        shift_range: (u8, u8),
        layers: Vec<QuantizedLayer>,
    ) -> Result<Self> {
        let mut expected_frac = bits.input_frac_bits() as i32;
        let mut expected_width = layers.first().map_or(0, |l| l.in_features);

        for layer in &layers {
            if layer.bits() != bits || layer.bias.bits != bits {
                return Err(QuantizationError::MixedBitWidth {
                    layer: layer.index,
                    expected: bits,
                });
            }
            if layer.input_frac_bits as i32 != expected_frac {
                return Err(QuantizationError::FormatMismatch {
                    layer: layer.index,
                    expected: expected_frac,
                    got: layer.input_frac_bits,
                });
            }
            if layer.in_features != expected_width {
                return Err(QuantizationError::InputWidthMismatch {
                    expected: expected_width,
                    got: layer.in_features,
                });
            }
            expected_frac = layer.output_frac_bits();
            expected_width = layer.out_features;
        }

        Ok(Self {
            bits,
            rounding,
            shift_range,
            layers,
        })
    }

    pub fn bits(&self) -> BitWidth {
        self.bits
    }

    pub fn rounding(&self) -> Rounding {
        self.rounding
    }

    /// Output integer-bit range `[start, stop]` searched during calibration
    pub fn shift_range(&self) -> (u8, u8) {
        self.shift_range
    }

    pub fn layers(&self) -> &[QuantizedLayer] {
        &self.layers
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Fractional bits of the network input
    pub fn input_frac_bits(&self) -> u8 {
        self.bits.input_frac_bits()
    }

    pub fn input_width(&self) -> usize {
        self.layers.first().map_or(0, |l| l.in_features)
    }

    pub fn output_width(&self) -> usize {
        self.layers.last().map_or(0, |l| l.out_features)
    }

    /// Fractional bits of the final layer's output words
    pub fn output_frac_bits(&self) -> i32 {
        self.layers
            .last()
            .map_or(self.input_frac_bits() as i32, QuantizedLayer::output_frac_bits)
    }

    /// Widest layer input or output (scratch buffer size on the device)
    pub fn max_width(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.in_features.max(l.out_features))
            .max()
            .unwrap_or(0)
    }

    /// Convert raw pixels to the network input format
    pub fn quantize_input(&self, pixels: &[u8]) -> Vec<i32> {
        pixels.iter().map(|&p| self.bits.pixel_to_fixed(p)).collect()
    }

    /// Integer forward pass over already-quantized input words
    pub fn forward_fixed(&self, x: &[i32]) -> LayerOutput {
        run_layers(&self.layers, self.rounding, x.to_vec())
    }

    /// Integer forward pass from raw pixels, exactly as the firmware runs it
    pub fn forward(&self, pixels: &[u8]) -> LayerOutput {
        self.forward_fixed(&self.quantize_input(pixels))
    }

    /// Predicted class from raw pixels
    pub fn predict(&self, pixels: &[u8]) -> usize {
        argmax(&self.forward(pixels).values)
    }

    /// Fraction of samples the fixed-point network classifies correctly
    pub fn accuracy(&self, eval: &EvalSet) -> f64 {
        if eval.is_empty() {
            return 0.0;
        }
        let correct = eval
            .iter()
            .filter(|s| self.predict(&s.pixels) == s.label as usize)
            .count();
        correct as f64 / eval.len() as f64
    }
}

/// Run `x` through `layers` in sequence, flagging saturation anywhere along the way
pub(crate) fn run_layers(layers: &[QuantizedLayer], rounding: Rounding, x: Vec<i32>) -> LayerOutput {
    layers.iter().fold(
        LayerOutput {
            values: x,
            saturated: false,
        },
        |acc, layer| {
            let out = layer.forward(&acc.values, rounding);
            LayerOutput {
                values: out.values,
                saturated: acc.saturated || out.saturated,
            }
        },
    )
}
