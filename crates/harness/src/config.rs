//! Pipeline configuration

use std::path::PathBuf;
use std::time::Duration;

use nnport_calibrate::CalibrationConfig;
use nnport_codegen::EmitOptions;
use nnport_fixed_point::{BitWidth, Rounding};
use nnport_protocol::LinkConfig;

use crate::comparison::FailurePolicy;
use crate::error::Result;

/// Settings of the `generate` pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateConfig {
    /// Exported model (JSON)
    pub model_path: PathBuf,

    /// Evaluation set used for calibration (JSON)
    pub eval_path: PathBuf,

    /// Directory receiving the C artifacts
    pub output_dir: PathBuf,

    /// Word width of the deployed network
    pub bits: BitWidth,

    /// Output integer-bit search range; `None` uses the width's default
    pub start_bit: Option<u8>,
    pub stop_bit: Option<u8>,

    pub rounding: Rounding,

    /// Apply softmax as the final step of the emitted forward pass
    pub emit_softmax: bool,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("model.json"),
            eval_path: PathBuf::from("eval.json"),
            output_dir: PathBuf::from("generated"),
            bits: BitWidth::Q15,
            start_bit: None,
            stop_bit: None,
            rounding: Rounding::Nearest,
            emit_softmax: true,
        }
    }
}

impl GenerateConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overlay the defaults with whatever `lookup` returns for each variable
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("NNPORT_MODEL") {
            config.model_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("NNPORT_EVAL_SET") {
            config.eval_path = PathBuf::from(path);
        }

        if let Some(dir) = lookup("NNPORT_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }

        if let Some(bits) = lookup("NNPORT_BITS") {
            if let Some(b) = bits.parse().ok().and_then(|s| BitWidth::from_frac_selector(s).ok()) {
                config.bits = b;
            }
        }

        config
    }

    /// Calibration settings; an explicit range is validated against the bit width
    pub fn calibration_config(&self) -> Result<CalibrationConfig> {
        let base = CalibrationConfig::new(self.bits).with_rounding(self.rounding);
        let (default_start, default_stop) = self.bits.default_shift_range();
        let start = self.start_bit.unwrap_or(default_start);
        let stop = self.stop_bit.unwrap_or(default_stop);
        Ok(base.with_range(start, stop)?)
    }

    pub fn emit_options(&self) -> EmitOptions {
        EmitOptions {
            emit_softmax: self.emit_softmax,
        }
    }
}

/// Settings of the `run` comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Exported model (JSON), used for host predictions
    pub model_path: PathBuf,

    /// Evaluation set (JSON) whose first `samples` entries are compared
    pub eval_path: PathBuf,

    /// Serial port settings
    pub link: LinkConfig,

    /// Number of samples to compare
    pub samples: usize,

    pub policy: FailurePolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("model.json"),
            eval_path: PathBuf::from("eval.json"),
            link: LinkConfig::default(),
            samples: 10,
            policy: FailurePolicy::FailFast,
        }
    }
}

impl RunConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("NNPORT_MODEL") {
            config.model_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("NNPORT_EVAL_SET") {
            config.eval_path = PathBuf::from(path);
        }

        if let Some(device) = lookup("NNPORT_SERIAL_DEVICE") {
            config.link.path = device;
        }

        if let Some(samples) = lookup("NNPORT_SAMPLES") {
            if let Ok(n) = samples.parse() {
                config.samples = n;
            }
        }

        if let Some(timeout) = lookup("NNPORT_TIMEOUT_SECS") {
            if let Ok(t) = timeout.parse() {
                config.link.timeout = Duration::from_secs(t);
            }
        }

        config
    }
}
