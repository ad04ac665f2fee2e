//! Per-layer output-shift search
//!
//! Layers are calibrated strictly in forward order: layer `i` reads the output
//! format chosen for layer `i - 1`. For each candidate output format the
//! evaluation set runs through the already calibrated prefix and the candidate
//! layer in fixed point, then through the remaining layers in float.

use std::ops::RangeInclusive;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use nnport_fixed_point::{BitWidth, Rounding};
use nnport_model::{argmax, EvalSet, FloatModel};

use crate::error::{QuantizationError, Result};
use crate::layer::QuantizedLayer;
use crate::model::{run_layers, CalibratedModel};

/// Settings of one calibration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub bits: BitWidth,
    /// Smallest output integer-bit count tried
    pub start_bit: u8,
    /// Largest output integer-bit count tried
    pub stop_bit: u8,
    pub rounding: Rounding,
}

impl CalibrationConfig {
    /// Default search range for `bits`, round-to-nearest
    pub fn new(bits: BitWidth) -> Self {
        let (start_bit, stop_bit) = bits.default_shift_range();
        Self {
            bits,
            start_bit,
            stop_bit,
            rounding: Rounding::default(),
        }
    }

    pub fn with_range(mut self, start_bit: u8, stop_bit: u8) -> Result<Self> {
        self.start_bit = start_bit;
        self.stop_bit = stop_bit;
        self.validate()?;
        Ok(self)
    }

    pub fn with_rounding(mut self, rounding: Rounding) -> Self {
        self.rounding = rounding;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let max = self.bits.frac_selector();
        if self.start_bit > self.stop_bit || self.stop_bit > max {
            return Err(QuantizationError::InvalidRange {
                start: self.start_bit,
                stop: self.stop_bit,
                max,
            });
        }
        Ok(())
    }

    /// Candidate output integer-bit counts
    pub fn candidates(&self) -> RangeInclusive<u8> {
        self.start_bit..=self.stop_bit
    }
}

/// Outcome of evaluating one candidate output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub output_int_bits: u8,
    /// `None` when the format needs a shift outside the runtime's range
    pub out_shift: Option<u8>,
    /// Whether any sample overflowed the accumulator or clipped an output
    pub saturated: bool,
    pub correct: usize,
    pub total: usize,
}

impl CandidateScore {
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    /// Whether the candidate takes part in the accuracy comparison
    pub fn is_viable(&self) -> bool {
        self.out_shift.is_some() && !self.saturated
    }
}

/// Pick the viable candidate with the most correct samples; ties go to the smallest shift.
///
/// Saturating or out-of-range candidates are dropped before accuracy is compared.
pub fn select_candidate(scores: &[CandidateScore]) -> Option<&CandidateScore> {
    scores
        .iter()
        .filter(|s| s.is_viable())
        .min_by_key(|s| (std::cmp::Reverse(s.correct), s.out_shift))
}

/// Calibration record for one layer
#[derive(Debug, Clone, PartialEq)]
pub struct LayerCalibration {
    pub layer: QuantizedLayer,
    pub candidates: Vec<CandidateScore>,
    pub selected: CandidateScore,
}

impl LayerCalibration {
    /// Evaluation accuracy with this layer in fixed point
    pub fn accuracy(&self) -> f64 {
        self.selected.accuracy()
    }
}

/// Result of calibrating a whole model
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub model: CalibratedModel,
    pub layers: Vec<LayerCalibration>,
    /// Accuracy of the float model on the evaluation set
    pub float_accuracy: f64,
    /// Accuracy of the complete fixed-point network on the evaluation set
    pub accuracy: f64,
}

/// Chooses each layer's output shift against an evaluation set
pub struct OutputShiftCalibrator<'a> {
    config: CalibrationConfig,
    model: &'a FloatModel,
    eval: &'a EvalSet,
}

impl<'a> OutputShiftCalibrator<'a> {
    pub fn new(config: CalibrationConfig, model: &'a FloatModel, eval: &'a EvalSet) -> Result<Self> {
        config.validate()?;
        if eval.is_empty() {
            return Err(QuantizationError::EmptyEvalSet);
        }
        if eval.width() != model.input_width() {
            return Err(QuantizationError::InputWidthMismatch {
                expected: model.input_width(),
                got: eval.width(),
            });
        }
        Ok(Self {
            config,
            model,
            eval,
        })
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Calibrate the layer following `prefix`.
    ///
    /// `prefix` holds the layers already calibrated, in order; it is not modified.
    pub fn calibrate_next(&self, prefix: &[QuantizedLayer]) -> Result<LayerCalibration> {
        let index = prefix.len();
        let layers = self.model.layers();
        let float_layer = layers
            .get(index)
            .ok_or(QuantizationError::AlreadyCalibrated {
                layers: layers.len(),
            })?;
        let bits = self.config.bits;

        let input_frac_bits = match prefix.last() {
            Some(prev) => {
                let frac = prev.output_frac_bits();
                u8::try_from(frac).map_err(|_| QuantizationError::FormatMismatch {
                    layer: index,
                    expected: frac,
                    got: 0,
                })?
            }
            None => bits.input_frac_bits(),
        };
        let base = QuantizedLayer::quantize_params(float_layer, bits, input_frac_bits)?;
        debug!(
            layer = index,
            weight_frac = base.weight_frac_bits(),
            bias_frac = base.bias_frac_bits(),
            bias_shift = base.bias_shift,
            "Quantized layer parameters"
        );

        // Prefix outputs don't depend on the candidate; compute them once
        let inputs: Vec<Vec<i32>> = self
            .eval
            .samples()
            .par_iter()
            .map(|s| {
                let x = s.pixels.iter().map(|&p| bits.pixel_to_fixed(p)).collect();
                run_layers(prefix, self.config.rounding, x).values
            })
            .collect();

        let candidates: Vec<CandidateScore> = self
            .config
            .candidates()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|k| self.score(&base, k, &inputs))
            .collect();

        for c in &candidates {
            debug!(
                layer = index,
                int_bits = c.output_int_bits,
                out_shift = ?c.out_shift,
                saturated = c.saturated,
                accuracy = c.accuracy(),
                "Scored candidate"
            );
        }

        let selected = *select_candidate(&candidates)
            .ok_or(QuantizationError::NoViableShift { layer: index })?;
        let layer = base.with_output_int_bits(selected.output_int_bits)?;

        info!(
            layer = index,
            int_bits = selected.output_int_bits,
            out_shift = layer.out_shift,
            accuracy = selected.accuracy(),
            "Selected output shift"
        );

        Ok(LayerCalibration {
            layer,
            candidates,
            selected,
        })
    }

    /// Calibrate every layer in order
    pub fn calibrate(&self) -> Result<Calibration> {
        let mut records: Vec<LayerCalibration> = Vec::with_capacity(self.model.num_layers());
        let mut prefix: Vec<QuantizedLayer> = Vec::with_capacity(self.model.num_layers());

        while prefix.len() < self.model.num_layers() {
            let record = self.calibrate_next(&prefix)?;
            prefix.push(record.layer.clone());
            records.push(record);
        }

        let model = CalibratedModel::new(
            self.config.bits,
            self.config.rounding,
            (self.config.start_bit, self.config.stop_bit),
            prefix,
        )?;
        let float_accuracy = self.model.accuracy(self.eval);
        let accuracy = model.accuracy(self.eval);

        info!(
            bits = %self.config.bits,
            float_accuracy,
            accuracy,
            "Calibration complete"
        );

        Ok(Calibration {
            model,
            layers: records,
            float_accuracy,
            accuracy,
        })
    }

    /// Evaluate one candidate output format for `base` over every sample
    fn score(&self, base: &QuantizedLayer, output_int_bits: u8, inputs: &[Vec<i32>]) -> CandidateScore {
        let total = inputs.len();
        let out_shift = match base.out_shift_for(output_int_bits) {
            Ok(shift) => shift,
            Err(_) => {
                return CandidateScore {
                    output_int_bits,
                    out_shift: None,
                    saturated: false,
                    correct: 0,
                    total,
                }
            }
        };

        let mut layer = base.clone();
        layer.out_shift = out_shift;
        let is_last = layer.index + 1 == self.model.num_layers();
        let scale = (-layer.output_frac_bits() as f64).exp2();

        let mut saturated = false;
        let mut correct = 0;
        for (x, sample) in inputs.iter().zip(self.eval.iter()) {
            let out = layer.forward(x, self.config.rounding);
            saturated |= out.saturated;
            let predicted = if is_last {
                argmax(&out.values)
            } else {
                let h: Vec<f32> = out.values.iter().map(|&v| (v as f64 * scale) as f32).collect();
                argmax(&self.model.forward_from(layer.index + 1, &h))
            };
            if predicted == sample.label as usize {
                correct += 1;
            }
        }

        CandidateScore {
            output_int_bits,
            out_shift: Some(out_shift),
            saturated,
            correct,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nnport_model::{Activation, Layer, Sample};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn score(k: u8, saturated: bool, correct: usize) -> CandidateScore {
        CandidateScore {
            output_int_bits: k,
            out_shift: Some(10 + k),
            saturated,
            correct,
            total: 10,
        }
    }

    #[test]
    fn test_select_prefers_accuracy_then_smallest_shift() {
        let scores = vec![score(0, false, 6), score(1, false, 8), score(2, false, 8), score(3, false, 7)];
        assert_eq!(select_candidate(&scores).unwrap().output_int_bits, 1);
    }

    #[test]
    fn test_select_skips_saturated_and_out_of_range() {
        let mut scores: Vec<_> = (0..4).map(|k| score(k, true, 10)).collect();
        scores.extend([score(4, false, 7), score(5, false, 8), score(6, false, 8), score(7, false, 6)]);
        scores.push(CandidateScore {
            output_int_bits: 8,
            out_shift: None,
            saturated: false,
            correct: 10,
            total: 10,
        });
        assert_eq!(select_candidate(&scores).unwrap().output_int_bits, 5);
    }

    #[test]
    fn test_select_none_viable() {
        let scores: Vec<_> = (0..3).map(|k| score(k, true, 10)).collect();
        assert!(select_candidate(&scores).is_none());
    }

    #[test]
    fn test_config_range_validation() {
        let config = CalibrationConfig::new(BitWidth::Q7);
        assert_eq!((config.start_bit, config.stop_bit), (0, 4));
        assert_eq!(CalibrationConfig::new(BitWidth::Q15).stop_bit, 8);
        assert!(config.with_range(2, 7).is_ok());
        assert!(matches!(
            config.with_range(0, 8),
            Err(QuantizationError::InvalidRange { max: 7, .. })
        ));
        assert!(config.with_range(3, 2).is_err());
    }

    /// One identity layer whose outputs reach about 10: four integer bits needed
    fn wide_output_model() -> (FloatModel, EvalSet) {
        let layer = Layer::from_rows(
            0,
            &[vec![10.0, 0.0], vec![0.0, 10.0]],
            vec![0.0, 0.0],
            Activation::Identity,
        )
        .unwrap();
        let model = FloatModel::new(vec![layer]).unwrap();
        let eval = EvalSet::new(vec![
            Sample::new(vec![255, 0], 0),
            Sample::new(vec![0, 255], 1),
            Sample::new(vec![200, 10], 0),
        ])
        .unwrap();
        (model, eval)
    }

    #[test]
    fn test_saturating_shifts_never_selected() {
        let (model, eval) = wide_output_model();
        let config = CalibrationConfig::new(BitWidth::Q15).with_range(0, 8).unwrap();
        let calibrator = OutputShiftCalibrator::new(config, &model, &eval).unwrap();
        let record = calibrator.calibrate_next(&[]).unwrap();

        assert_eq!(record.candidates.len(), 9);
        for c in &record.candidates[..4] {
            assert!(c.saturated, "k={} should saturate", c.output_int_bits);
            // clipped outputs still rank the classes correctly
            assert_eq!(c.correct, 3);
        }
        for c in &record.candidates[4..] {
            assert!(!c.saturated);
        }
        assert_eq!(record.selected.output_int_bits, 4);
        assert_eq!(record.layer.output_int_bits(), 4);
        // accumulator frac 8 + 11, output Q4.11
        assert_eq!(record.layer.out_shift, 8);
    }

    #[test]
    fn test_relu_floor_clipping_stays_viable() {
        // pre-activations near -30 clip at the q7 minimum for every candidate
        let hidden = Layer::from_rows(
            0,
            &[vec![4.0, -30.0], vec![-30.0, 4.0]],
            vec![0.0, 0.0],
            Activation::Relu,
        )
        .unwrap();
        let output = Layer::from_rows(
            1,
            &[vec![1.0, 0.0], vec![0.0, 1.0]],
            vec![0.0, 0.0],
            Activation::Identity,
        )
        .unwrap();
        let model = FloatModel::new(vec![hidden, output]).unwrap();
        let eval = EvalSet::new(vec![Sample::new(vec![255, 0], 0), Sample::new(vec![0, 255], 1)]).unwrap();
        assert_eq!(model.accuracy(&eval), 1.0);

        let calibrator = OutputShiftCalibrator::new(CalibrationConfig::new(BitWidth::Q7), &model, &eval).unwrap();
        let record = calibrator.calibrate_next(&[]).unwrap();
        // 3.97 overflows Q0.7 and Q1.6 at the top
        assert!(record.candidates[0].saturated);
        assert!(record.candidates[1].saturated);
        for c in &record.candidates[2..] {
            assert!(!c.saturated, "k={} should be viable", c.output_int_bits);
        }
        assert_eq!(record.selected.output_int_bits, 2);
        // accumulator frac 7 + 2, output Q2.5
        assert_eq!(record.layer.out_shift, 4);

        let calibration = calibrator.calibrate().unwrap();
        assert_eq!(calibration.accuracy, 1.0);
    }

    #[test]
    fn test_no_viable_shift() {
        let (model, eval) = wide_output_model();
        let config = CalibrationConfig::new(BitWidth::Q15).with_range(0, 3).unwrap();
        let calibrator = OutputShiftCalibrator::new(config, &model, &eval).unwrap();
        assert!(matches!(
            calibrator.calibrate_next(&[]),
            Err(QuantizationError::NoViableShift { layer: 0 })
        ));
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let (model, _) = wide_output_model();
        let config = CalibrationConfig::new(BitWidth::Q7);
        let empty = EvalSet::default();
        assert!(matches!(
            OutputShiftCalibrator::new(config, &model, &empty),
            Err(QuantizationError::EmptyEvalSet)
        ));
        let narrow = EvalSet::new(vec![Sample::new(vec![1, 2, 3], 0)]).unwrap();
        assert!(matches!(
            OutputShiftCalibrator::new(config, &model, &narrow),
            Err(QuantizationError::InputWidthMismatch { expected: 2, got: 3 })
        ));
    }

    fn random_layer(rng: &mut ChaCha8Rng, index: usize, inputs: usize, outputs: usize, act: Activation) -> Layer {
        let bound = 1.0 / (inputs as f32).sqrt();
        let weights = (0..inputs * outputs).map(|_| rng.gen_range(-bound..bound)).collect();
        let bias = (0..outputs).map(|_| rng.gen_range(-0.1..0.1)).collect();
        Layer::new(index, weights, bias, inputs, outputs, act).unwrap()
    }

    /// Three-layer model labelled by its own float predictions
    fn synthetic(seed: u64) -> (FloatModel, EvalSet) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let model = FloatModel::new(vec![
            random_layer(&mut rng, 0, 16, 12, Activation::Relu),
            random_layer(&mut rng, 1, 12, 8, Activation::Relu),
            random_layer(&mut rng, 2, 8, 4, Activation::Softmax),
        ])
        .unwrap();
        let samples = (0..120)
            .map(|_| {
                let pixels: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
                let features: Vec<f32> = pixels.iter().map(|&p| p as f32 / 255.0).collect();
                let label = model.predict(&features) as u8;
                Sample::new(pixels, label)
            })
            .collect();
        (model, EvalSet::new(samples).unwrap())
    }

    #[test]
    fn test_calibrate_synthetic_q15() {
        let (model, eval) = synthetic(7);
        let calibrator = OutputShiftCalibrator::new(CalibrationConfig::new(BitWidth::Q15), &model, &eval).unwrap();
        let calibration = calibrator.calibrate().unwrap();

        assert_eq!(calibration.layers.len(), 3);
        assert_eq!(calibration.model.num_layers(), 3);
        assert_eq!(calibration.float_accuracy, 1.0);
        assert!(calibration.accuracy >= 0.9, "accuracy {}", calibration.accuracy);
        for record in &calibration.layers {
            assert!(record.selected.is_viable());
        }
        // the last layer is scored on the complete fixed-point network
        let last = calibration.layers.last().unwrap();
        assert!((last.accuracy() - calibration.accuracy).abs() < 1e-12);
    }

    #[test]
    fn test_calibrate_chains_formats() {
        let (model, eval) = synthetic(11);
        let calibrator = OutputShiftCalibrator::new(CalibrationConfig::new(BitWidth::Q7), &model, &eval).unwrap();
        let calibration = calibrator.calibrate().unwrap();

        let layers = calibration.model.layers();
        assert_eq!(layers[0].input_frac_bits, 7);
        for pair in layers.windows(2) {
            assert_eq!(pair[1].input_frac_bits as i32, pair[0].output_frac_bits());
        }
    }

    #[test]
    fn test_calibrate_next_is_pure() {
        let (model, eval) = synthetic(3);
        let calibrator = OutputShiftCalibrator::new(CalibrationConfig::new(BitWidth::Q15), &model, &eval).unwrap();
        let first = calibrator.calibrate_next(&[]).unwrap();
        let again = calibrator.calibrate_next(&[]).unwrap();
        assert_eq!(first, again);

        let prefix = vec![first.layer];
        let second = calibrator.calibrate_next(&prefix).unwrap();
        assert_eq!(second.layer.index, 1);
        assert_eq!(prefix.len(), 1);
    }

    #[test]
    fn test_already_calibrated() {
        let (model, eval) = wide_output_model();
        let calibrator = OutputShiftCalibrator::new(CalibrationConfig::new(BitWidth::Q15), &model, &eval).unwrap();
        let calibration = calibrator.calibrate().unwrap();
        assert!(matches!(
            calibrator.calibrate_next(calibration.model.layers()),
            Err(QuantizationError::AlreadyCalibrated { layers: 1 })
        ));
    }
}
