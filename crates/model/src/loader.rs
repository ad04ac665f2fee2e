//! Exported model loading and layer extraction
//!
//! The training environment exports its sequential model as JSON:
//!
//! ```json
//! {
//!   "layout": "in_out",
//!   "layers": [
//!     {"class_name": "Dense", "name": "dense_1", "weights": [[...]], "bias": [...]},
//!     {"class_name": "Activation", "activation": "relu"},
//!     {"class_name": "Dense", "weights": [[...]], "bias": [...], "activation": "softmax"}
//!   ]
//! }
//! ```
//!
//! A `Dense` entry followed by an `Activation` entry folds into one [`Layer`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::network::FloatModel;
use crate::weights::{Activation, Layer};

/// Orientation of the exported weight matrices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelLayout {
    /// One row per output neuron
    #[default]
    OutIn,
    /// One row per input neuron (Keras kernel layout)
    InOut,
}

/// One entry of the exported layer list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    #[serde(default = "default_class_name")]
    pub class_name: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub weights: Option<Vec<Vec<f32>>>,

    #[serde(default)]
    pub bias: Option<Vec<f32>>,

    #[serde(default)]
    pub activation: Option<String>,
}

fn default_class_name() -> String {
    "Dense".to_string()
}

/// The exported model file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFile {
    #[serde(default)]
    pub layout: KernelLayout,
    pub layers: Vec<LayerSpec>,
}

impl ModelFile {
    /// Load model from JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Build the layer list described by this file
    pub fn extract_layers(&self) -> Result<Vec<Layer>> {
        let mut layers: Vec<Layer> = Vec::new();
        // Whether the last dense layer already carries a non-identity activation
        let mut activation_set = false;

        for (entry, spec) in self.layers.iter().enumerate() {
            match spec.class_name.as_str() {
                "Dense" | "dense" => {
                    let layer = self.dense_layer(layers.len(), entry, spec)?;
                    activation_set = layer.activation != Activation::Identity;
                    layers.push(layer);
                }
                "Activation" | "activation" => {
                    let name = spec.activation.as_deref().unwrap_or("linear");
                    let activation = Activation::parse(name)?;
                    match layers.last_mut() {
                        Some(last) if !activation_set => {
                            last.activation = activation;
                            activation_set = activation != Activation::Identity;
                        }
                        _ if activation == Activation::Identity => {}
                        _ => return Err(ModelError::DanglingActivation { entry }),
                    }
                }
                // No-ops at inference time
                "Flatten" | "InputLayer" | "Dropout" | "Reshape" => {}
                other => return Err(ModelError::UnsupportedLayer(other.to_string())),
            }
        }

        Ok(layers)
    }

    /// Extract and validate the model
    pub fn into_model(self) -> Result<FloatModel> {
        FloatModel::new(self.extract_layers()?)
    }

    fn dense_layer(&self, index: usize, entry: usize, spec: &LayerSpec) -> Result<Layer> {
        let weights = spec
            .weights
            .as_ref()
            .ok_or_else(|| ModelError::InvalidShape {
                layer: index,
                expected: vec![],
                got: vec![],
            })?;

        let rows = match self.layout {
            KernelLayout::OutIn => weights.clone(),
            KernelLayout::InOut => transpose(weights, index)?,
        };
        let out_features = rows.len();
        let bias = spec.bias.clone().unwrap_or_else(|| vec![0.0; out_features]);
        let activation = match &spec.activation {
            Some(name) => Activation::parse(name)?,
            None => Activation::Identity,
        };

        let name = spec
            .name
            .clone()
            .unwrap_or_else(|| format!("dense_{}", entry));
        Ok(Layer::from_rows(index, &rows, bias, activation)?.with_name(name))
    }
}

fn transpose(rows: &[Vec<f32>], layer: usize) -> Result<Vec<Vec<f32>>> {
    let cols = rows.first().map_or(0, Vec::len);
    if let Some(bad) = rows.iter().find(|r| r.len() != cols) {
        return Err(ModelError::InvalidShape {
            layer,
            expected: vec![rows.len(), cols],
            got: vec![rows.len(), bad.len()],
        });
    }
    Ok((0..cols)
        .map(|j| rows.iter().map(|r| r[j]).collect())
        .collect())
}
