//! Evaluation samples

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Pixels per 28×28 image
pub const IMAGE_LEN: usize = 28 * 28;

/// Number of digit classes
pub const NUM_CLASSES: usize = 10;

/// One labelled image with raw 8-bit pixels (row-major)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub pixels: Vec<u8>,
    pub label: u8,
}

impl Sample {
    pub fn new(pixels: Vec<u8>, label: u8) -> Self {
        Self { pixels, label }
    }

    /// Float features as seen by the host model (`pixel / 255`)
    pub fn features(&self) -> Vec<f32> {
        self.pixels.iter().map(|&p| p as f32 / 255.0).collect()
    }
}

/// The evaluation set used for calibration and comparison
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalSet {
    samples: Vec<Sample>,
}

impl EvalSet {
    /// Validate that every sample has the same width
    pub fn new(samples: Vec<Sample>) -> Result<Self> {
        if let Some(first) = samples.first() {
            let width = first.pixels.len();
            for (index, s) in samples.iter().enumerate() {
                if s.pixels.len() != width {
                    return Err(ModelError::InvalidSample {
                        index,
                        message: format!("expected {} pixels, got {}", width, s.pixels.len()),
                    });
                }
            }
        }
        Ok(Self { samples })
    }

    /// Load `{"samples": [{"pixels": [...], "label": n}, ...]}`
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: EvalSet = serde_json::from_str(content)?;
        Self::new(raw.samples)
    }

    /// Width of each sample (0 for an empty set)
    pub fn width(&self) -> usize {
        self.samples.first().map_or(0, |s| s.pixels.len())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// The first `n` samples (or all, if fewer)
    pub fn truncated(&self, n: usize) -> Self {
        Self {
            samples: self.samples.iter().take(n).cloned().collect(),
        }
    }
}
