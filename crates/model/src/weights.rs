//! Dense layer weights

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Activation applied after a layer's affine transform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Softmax,
    #[default]
    #[serde(alias = "linear")]
    Identity,
}

impl Activation {
    /// Parse an activation name as written by the training environment
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "relu" => Ok(Activation::Relu),
            "softmax" => Ok(Activation::Softmax),
            "linear" | "identity" | "none" => Ok(Activation::Identity),
            other => Err(ModelError::UnsupportedActivation(other.to_string())),
        }
    }

    /// Apply in place
    pub fn apply(self, values: &mut [f32]) {
        match self {
            Activation::Relu => values.iter_mut().for_each(|v| *v = v.max(0.0)),
            Activation::Softmax => softmax(values),
            Activation::Identity => {}
        }
    }
}

fn softmax(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        values.iter_mut().for_each(|v| *v /= sum);
    }
}

/// One fully-connected layer: `y = act(W x + b)`
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// Position in the forward pass
    pub index: usize,
    /// Name from the exported model (for diagnostics only)
    pub name: String,
    /// Weight matrix (out_features × in_features), row-major
    pub weights: Vec<f32>,
    /// Bias vector (out_features)
    pub bias: Vec<f32>,
    pub activation: Activation,
    pub in_features: usize,
    pub out_features: usize,
}

impl Layer {
    /// Create from a flat row-major (out × in) weight matrix
    pub fn new(
        index: usize,
        weights: Vec<f32>,
        bias: Vec<f32>,
        in_features: usize,
        out_features: usize,
        activation: Activation,
    ) -> Result<Self> {
        if weights.len() != in_features * out_features {
            return Err(ModelError::InvalidShape {
                layer: index,
                expected: vec![out_features, in_features],
                got: vec![weights.len()],
            });
        }
        if bias.len() != out_features {
            return Err(ModelError::InvalidShape {
                layer: index,
                expected: vec![out_features],
                got: vec![bias.len()],
            });
        }
        if weights.iter().chain(&bias).any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite { layer: index });
        }

        Ok(Self {
            index,
            name: format!("dense_{}", index),
            weights,
            bias,
            activation,
            in_features,
            out_features,
        })
    }

    /// Create from one row per output neuron
    pub fn from_rows(
        index: usize,
        rows: &[Vec<f32>],
        bias: Vec<f32>,
        activation: Activation,
    ) -> Result<Self> {
        let in_features = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().find(|r| r.len() != in_features) {
            return Err(ModelError::InvalidShape {
                layer: index,
                expected: vec![rows.len(), in_features],
                got: vec![rows.len(), bad.len()],
            });
        }
        let weights = rows.iter().flatten().copied().collect();
        Self::new(index, weights, bias, in_features, rows.len(), activation)
    }

    /// Set the diagnostic name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Weights feeding output neuron `j`
    pub fn row(&self, j: usize) -> &[f32] {
        &self.weights[j * self.in_features..(j + 1) * self.in_features]
    }

    /// Affine transform without the activation
    pub fn affine(&self, x: &[f32]) -> Vec<f32> {
        debug_assert_eq!(x.len(), self.in_features);
        (0..self.out_features)
            .map(|j| {
                self.row(j)
                    .iter()
                    .zip(x)
                    .fold(self.bias[j], |acc, (&w, &xi)| acc + w * xi)
            })
            .collect()
    }

    /// Full layer: affine transform then activation
    pub fn forward(&self, x: &[f32]) -> Vec<f32> {
        let mut y = self.affine(x);
        self.activation.apply(&mut y);
        y
    }
}
