//! Float reference network

use crate::dataset::EvalSet;
use crate::error::{ModelError, Result};
use crate::weights::{Activation, Layer};

/// Index of the largest value; the first one wins on ties
pub fn argmax<T: PartialOrd + Copy>(values: &[T]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// A validated sequence of dense layers
#[derive(Debug, Clone, PartialEq)]
pub struct FloatModel {
    layers: Vec<Layer>,
}

impl FloatModel {
    /// Validate the topology: chained widths and softmax only at the end.
    ///
    /// Layer indices are renumbered to their position.
    pub fn new(mut layers: Vec<Layer>) -> Result<Self> {
        if layers.is_empty() {
            return Err(ModelError::EmptyModel);
        }

        let last = layers.len() - 1;
        for (i, layer) in layers.iter_mut().enumerate() {
            layer.index = i;
            if layer.activation == Activation::Softmax && i != last {
                return Err(ModelError::SoftmaxNotLast { layer: i });
            }
        }

        for pair in layers.windows(2) {
            if pair[1].in_features != pair[0].out_features {
                return Err(ModelError::WidthMismatch {
                    layer: pair[1].index,
                    expected: pair[1].in_features,
                    got: pair[0].out_features,
                });
            }
        }

        Ok(Self { layers })
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn input_width(&self) -> usize {
        self.layers[0].in_features
    }

    pub fn output_width(&self) -> usize {
        self.layers[self.layers.len() - 1].out_features
    }

    /// Forward pass through every layer
    pub fn forward(&self, x: &[f32]) -> Vec<f32> {
        self.forward_from(0, x)
    }

    /// Forward pass through layers `start..`, where `x` is the input of layer `start`
    pub fn forward_from(&self, start: usize, x: &[f32]) -> Vec<f32> {
        self.layers[start..]
            .iter()
            .fold(x.to_vec(), |h, layer| layer.forward(&h))
    }

    /// Predicted class (arg-max of the output)
    pub fn predict(&self, x: &[f32]) -> usize {
        argmax(&self.forward(x))
    }

    /// Fraction of samples classified correctly
    pub fn accuracy(&self, eval: &EvalSet) -> f64 {
        if eval.is_empty() {
            return 0.0;
        }
        let correct = eval
            .iter()
            .filter(|s| self.predict(&s.features()) == s.label as usize)
            .count();
        correct as f64 / eval.len() as f64
    }
}
