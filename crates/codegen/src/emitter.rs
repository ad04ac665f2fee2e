//! Artifact emission and atomic writing

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use nnport_calibrate::CalibratedModel;
use nnport_fixed_point::Rounding;

use crate::error::{CodegenError, Result};
use crate::render;
use crate::validate::validate;

/// File names of every emitted artifact
pub const ARTIFACT_NAMES: [&str; 6] = [
    "nn_bit_size.h",
    "nn_dimensions.h",
    "nn_params.h",
    "nn_weights.h",
    "nn_net.h",
    "nn_net.c",
];

/// CRC32 over the bit width, the rounding mode and every quantized tensor and
/// parameter, in layer order
pub fn fingerprint(model: &CalibratedModel) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    let rounding = match model.rounding() {
        Rounding::Nearest => 0u8,
        Rounding::Truncate => 1,
    };
    hasher.update(&[model.bits().total_bits(), rounding]);
    for layer in model.layers() {
        hasher.update(&(layer.in_features as u32).to_le_bytes());
        hasher.update(&(layer.out_features as u32).to_le_bytes());
        hasher.update(&[
            layer.input_frac_bits,
            layer.weight_frac_bits(),
            layer.bias_frac_bits(),
            layer.bias_shift,
            layer.out_shift,
        ]);
        for &w in layer.weights.data.iter().chain(&layer.bias.data) {
            hasher.update(&w.to_le_bytes());
        }
    }
    hasher.finalize()
}

/// Options controlling what the forward pass includes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitOptions {
    /// Apply the runtime softmax as the final step; when false only the arg-max is produced
    pub emit_softmax: bool,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self { emit_softmax: true }
    }
}

/// The rendered files of one emission, keyed by file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    files: BTreeMap<&'static str, String>,
    fingerprint: u32,
}

impl Artifacts {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.files.iter().map(|(&k, v)| (k, v.as_str()))
    }

    pub fn fingerprint(&self) -> u32 {
        self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Write every file into `dir`, all or nothing.
    ///
    /// Files are staged in a temporary directory inside `dir` and moved into
    /// place only once all of them were written. If a move fails, the files
    /// already moved are taken back out and the artifacts they replaced are
    /// restored.
    pub fn write_to_dir<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        // Only regular files may be replaced
        for name in self.files.keys() {
            let path = dir.join(name);
            if let Ok(meta) = fs::symlink_metadata(&path) {
                if !meta.is_file() {
                    return Err(CodegenError::ArtifactPathBlocked { path });
                }
            }
        }

        let staging = tempfile::Builder::new().prefix(".nn_staging").tempdir_in(dir)?;
        for (name, content) in &self.files {
            fs::write(staging.path().join(name), content)?;
        }

        let backup = tempfile::Builder::new().prefix(".nn_backup").tempdir_in(dir)?;
        let mut placed: Vec<Placed> = Vec::with_capacity(self.files.len());
        for &name in self.files.keys() {
            match place(name, staging.path(), backup.path(), dir) {
                Ok(p) => {
                    debug!(file = %p.path.display(), replaced = p.replaced, "Wrote artifact");
                    placed.push(p);
                }
                Err(e) => {
                    warn!(file = name, error = %e, "Failed to place artifact, rolling back");
                    roll_back(&placed, backup.path());
                    return Err(e.into());
                }
            }
        }

        info!(
            dir = %dir.display(),
            files = placed.len(),
            crc32 = %format!("0x{:08X}", self.fingerprint),
            "Artifacts written"
        );
        Ok(placed.into_iter().map(|p| p.path).collect())
    }
}

/// An artifact moved into its final location
struct Placed {
    name: &'static str,
    path: PathBuf,
    /// Whether a previous artifact was moved to the backup directory
    replaced: bool,
}

fn place(name: &'static str, staging: &Path, backup: &Path, dir: &Path) -> io::Result<Placed> {
    let path = dir.join(name);
    let replaced = path.exists();
    if replaced {
        fs::rename(&path, backup.join(name))?;
    }
    if let Err(e) = fs::rename(staging.join(name), &path) {
        if replaced {
            let _ = fs::rename(backup.join(name), &path);
        }
        return Err(e);
    }
    Ok(Placed {
        name,
        path,
        replaced,
    })
}

fn roll_back(placed: &[Placed], backup: &Path) {
    for p in placed.iter().rev() {
        let _ = fs::remove_file(&p.path);
        if p.replaced {
            let _ = fs::rename(backup.join(p.name), &p.path);
        }
    }
}

/// Renders a calibrated model into C build artifacts
#[derive(Debug, Clone, Default)]
pub struct CodeEmitter {
    options: EmitOptions,
}

impl CodeEmitter {
    pub fn new(options: EmitOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> EmitOptions {
        self.options
    }

    /// Validate and render `model`.
    ///
    /// The model is rendered twice; any difference between the two renderings
    /// is reported as [`CodegenError::DeterminismViolation`].
    pub fn emit(&self, model: &CalibratedModel) -> Result<Artifacts> {
        validate(model)?;

        let first = self.render(model)?;
        let second = self.render(model)?;
        for (name, content) in &first.files {
            if second.files.get(name) != Some(content) {
                return Err(CodegenError::DeterminismViolation {
                    file: name.to_string(),
                });
            }
        }
        if first.fingerprint != second.fingerprint {
            return Err(CodegenError::DeterminismViolation {
                file: "nn_bit_size.h".to_string(),
            });
        }

        debug!(files = first.len(), "Rendered artifacts");
        Ok(first)
    }

    /// Emit `model` and write the artifacts into `dir`
    pub fn write<P: AsRef<Path>>(&self, model: &CalibratedModel, dir: P) -> Result<Artifacts> {
        let artifacts = self.emit(model)?;
        artifacts.write_to_dir(dir)?;
        Ok(artifacts)
    }

    fn render(&self, model: &CalibratedModel) -> Result<Artifacts> {
        let fingerprint = fingerprint(model);
        let mut files = BTreeMap::new();
        files.insert("nn_bit_size.h", render::bit_size_h(model, fingerprint)?);
        files.insert("nn_dimensions.h", render::dimensions_h(model)?);
        files.insert("nn_params.h", render::params_h(model)?);
        files.insert("nn_weights.h", render::weights_h(model)?);
        files.insert("nn_net.h", render::net_h(model)?);
        files.insert("nn_net.c", render::net_c(model, self.options.emit_softmax)?);
        Ok(Artifacts { files, fingerprint })
    }
}
