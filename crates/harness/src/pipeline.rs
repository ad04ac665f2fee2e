//! The generate pipeline: load, calibrate, emit

use std::path::{Path, PathBuf};

use tracing::info;

use nnport_calibrate::{Calibration, CalibrationConfig, OutputShiftCalibrator};
use nnport_codegen::{Artifacts, CodeEmitter};
use nnport_model::{EvalSet, FloatModel, ModelFile};

use crate::config::GenerateConfig;
use crate::error::Result;

/// Everything produced by one `generate` run
#[derive(Debug, Clone)]
pub struct GenerateOutcome {
    pub calibration: Calibration,
    pub artifacts: Artifacts,
    /// Written artifact paths
    pub files: Vec<PathBuf>,
}

/// Load and validate an exported model
pub fn load_model<P: AsRef<Path>>(path: P) -> Result<FloatModel> {
    let path = path.as_ref();
    let model = ModelFile::from_json_file(path)?.into_model()?;
    info!(
        path = %path.display(),
        layers = model.num_layers(),
        inputs = model.input_width(),
        outputs = model.output_width(),
        "Loaded model"
    );
    Ok(model)
}

pub fn load_eval_set<P: AsRef<Path>>(path: P) -> Result<EvalSet> {
    let path = path.as_ref();
    let eval = EvalSet::from_json_file(path)?;
    info!(path = %path.display(), samples = eval.len(), "Loaded evaluation set");
    Ok(eval)
}

/// Calibrate every layer of `model` against `eval`
pub fn calibrate(model: &FloatModel, eval: &EvalSet, config: CalibrationConfig) -> Result<Calibration> {
    let calibration = OutputShiftCalibrator::new(config, model, eval)?.calibrate()?;
    for record in &calibration.layers {
        let layer = &record.layer;
        info!(
            layer = layer.index,
            weight_frac = layer.weight_frac_bits(),
            bias_frac = layer.bias_frac_bits(),
            bias_shift = layer.bias_shift,
            out_shift = layer.out_shift,
            int_bits = record.selected.output_int_bits,
            accuracy = record.accuracy(),
            "Layer calibrated"
        );
    }
    Ok(calibration)
}

/// Run the whole pipeline described by `config`
pub fn generate(config: &GenerateConfig) -> Result<GenerateOutcome> {
    let model = load_model(&config.model_path)?;
    let eval = load_eval_set(&config.eval_path)?;
    let calibration = calibrate(&model, &eval, config.calibration_config()?)?;

    let emitter = CodeEmitter::new(config.emit_options());
    let artifacts = emitter.emit(&calibration.model)?;
    let files = artifacts.write_to_dir(&config.output_dir)?;

    Ok(GenerateOutcome {
        calibration,
        artifacts,
        files,
    })
}
