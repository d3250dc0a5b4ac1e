// Checkpoint I/O - versioned manifest plus burn binary weights
//
// A checkpoint is two files sharing a stem:
//   model_epoch{n}_{YYYYMMDD_HHMMSS}.bin   weights (BinFileRecorder, full precision)
//   model_epoch{n}_{YYYYMMDD_HHMMSS}.json  manifest (format version, architecture, epoch)
// Both are written under a temporary name and renamed into place. Existing
// files are never overwritten; a clashing stem gets a numeric suffix.

use burn::module::{Module, ModuleVisitor, Param};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::WavetableSynthModel;
use crate::config::AppConfig;
use crate::error::{InferenceError, TrainingError};

/// Manifest layout understood by this build
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

const WEIGHTS_EXTENSION: &str = "bin";
const MANIFEST_EXTENSION: &str = "json";

/// Shape-determining hyperparameters a checkpoint was trained with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelArchitecture {
    pub hidden_size: usize,
    pub n_harmonic: usize,
    pub n_wavetables: usize,
    pub table_size: usize,
    pub n_mfcc: usize,
    pub sample_rate: u32,
    pub block_size: usize,
}

impl ModelArchitecture {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            hidden_size: config.model.hidden_size,
            n_harmonic: config.model.n_harmonic,
            n_wavetables: config.model.n_wavetables,
            table_size: config.model.table_size,
            n_mfcc: config.features.n_mfcc,
            sample_rate: config.common.sample_rate,
            block_size: config.common.block_size,
        }
    }
}

/// JSON sidecar describing a weights file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub format_version: u32,
    pub architecture: ModelArchitecture,
    pub epoch: usize,
    /// Local time the checkpoint was written, RFC 3339
    pub created_at: String,
    /// Weights file name, relative to the manifest
    pub weights_file: String,
}

fn recorder() -> BinFileRecorder<FullPrecisionSettings> {
    BinFileRecorder::<FullPrecisionSettings>::new()
}

fn unique_stem(dir: &Path, epoch: usize) -> String {
    let base = format!(
        "model_epoch{}_{}",
        epoch,
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    let taken = |stem: &str| {
        dir.join(stem).with_extension(WEIGHTS_EXTENSION).exists()
            || dir.join(stem).with_extension(MANIFEST_EXTENSION).exists()
    };

    if !taken(&base) {
        return base;
    }
    (1..)
        .map(|n| format!("{}_{}", base, n))
        .find(|stem| !taken(stem))
        .unwrap_or(base)
}

/// Write a new checkpoint for `model` into `dir`
///
/// # Returns
/// Path of the manifest file
pub fn save_checkpoint<B: Backend>(
    model: &WavetableSynthModel<B>,
    architecture: &ModelArchitecture,
    dir: &Path,
    epoch: usize,
) -> Result<PathBuf, TrainingError> {
    let fail = |path: &Path, reason: String| TrainingError::Checkpoint {
        path: path.display().to_string(),
        reason,
    };

    fs::create_dir_all(dir).map_err(|err| fail(dir, err.to_string()))?;

    let stem = unique_stem(dir, epoch);
    let weights_path = dir.join(&stem).with_extension(WEIGHTS_EXTENSION);
    let manifest_path = dir.join(&stem).with_extension(MANIFEST_EXTENSION);
    let partial = dir.join(format!("{}_partial", stem));
    let partial_weights = partial.with_extension(WEIGHTS_EXTENSION);
    let partial_manifest = partial.with_extension(MANIFEST_EXTENSION);

    model
        .clone()
        .save_file(partial.clone(), &recorder())
        .map_err(|err| fail(&weights_path, format!("{:?}", err)))?;

    let manifest = CheckpointManifest {
        format_version: CHECKPOINT_FORMAT_VERSION,
        architecture: architecture.clone(),
        epoch,
        created_at: chrono::Local::now().to_rfc3339(),
        weights_file: format!("{}.{}", stem, WEIGHTS_EXTENSION),
    };
    let json = serde_json::to_vec_pretty(&manifest).map_err(|err| fail(&manifest_path, err.to_string()))?;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&partial_manifest)
        .map_err(|err| fail(&partial_manifest, err.to_string()))?;
    file.write_all(&json)
        .and_then(|_| file.sync_all())
        .map_err(|err| fail(&partial_manifest, err.to_string()))?;

    fs::rename(&partial_weights, &weights_path).map_err(|err| fail(&weights_path, err.to_string()))?;
    fs::rename(&partial_manifest, &manifest_path)
        .map_err(|err| fail(&manifest_path, err.to_string()))?;

    tracing::info!("[Checkpoint] Saved epoch {} to {}", epoch, manifest_path.display());
    Ok(manifest_path)
}

/// Parameter paths and shapes in visiting order
#[derive(Debug, Default, PartialEq)]
struct ParameterShapes {
    path: Vec<String>,
    shapes: Vec<(String, Vec<usize>)>,
}

impl ParameterShapes {
    fn of<B: Backend>(model: &WavetableSynthModel<B>) -> Vec<(String, Vec<usize>)> {
        let mut collector = Self::default();
        model.visit(&mut collector);
        collector.shapes
    }
}

impl<B: Backend> ModuleVisitor<B> for ParameterShapes {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        self.shapes
            .push((self.path.join("."), param.val().dims().to_vec()));
    }

    fn enter_module(&mut self, name: &str, _container_type: &str) {
        self.path.push(name.to_string());
    }

    fn exit_module(&mut self, _name: &str, _container_type: &str) {
        self.path.pop();
    }
}

/// First parameter whose loaded shape differs from the configured one
fn shape_mismatch(
    expected: &[(String, Vec<usize>)],
    loaded: &[(String, Vec<usize>)],
) -> Option<String> {
    if expected.len() != loaded.len() {
        return Some(format!(
            "checkpoint has {} parameters, configuration expects {}",
            loaded.len(),
            expected.len()
        ));
    }
    expected
        .iter()
        .zip(loaded)
        .find(|(want, got)| want != got)
        .map(|((name, want), (_, got))| {
            format!("parameter {} has shape {:?}, expected {:?}", name, got, want)
        })
}

/// Read and validate a checkpoint manifest
pub fn read_manifest(manifest_path: &Path) -> Result<CheckpointManifest, InferenceError> {
    let load_error = |reason: String| InferenceError::ModelLoad {
        path: manifest_path.display().to_string(),
        reason,
    };
    let text = fs::read_to_string(manifest_path).map_err(|err| load_error(err.to_string()))?;
    let manifest: CheckpointManifest =
        serde_json::from_str(&text).map_err(|err| load_error(format!("invalid manifest: {}", err)))?;
    if manifest.format_version != CHECKPOINT_FORMAT_VERSION {
        return Err(load_error(format!(
            "unsupported format version {} (expected {})",
            manifest.format_version, CHECKPOINT_FORMAT_VERSION
        )));
    }
    Ok(manifest)
}

/// Load a checkpoint into a model built from `config`
///
/// # Errors
/// `ModelLoad` when the manifest is missing or unknown, the architecture
/// differs from the configuration, or any loaded parameter shape differs
/// from the configured model
pub fn load_checkpoint<B: Backend>(
    manifest_path: &Path,
    config: &AppConfig,
    device: &B::Device,
) -> Result<(WavetableSynthModel<B>, CheckpointManifest), InferenceError> {
    let load_error = |reason: String| InferenceError::ModelLoad {
        path: manifest_path.display().to_string(),
        reason,
    };

    let manifest = read_manifest(manifest_path)?;
    let expected = ModelArchitecture::from_config(config);
    if manifest.architecture != expected {
        return Err(load_error(format!(
            "architecture mismatch: checkpoint {:?}, configuration {:?}",
            manifest.architecture, expected
        )));
    }

    let dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    let weights_path = dir.join(&manifest.weights_file);
    if !weights_path.is_file() {
        return Err(load_error(format!("weights file {} not found", weights_path.display())));
    }

    let fresh = WavetableSynthModel::<B>::new(config, device);
    let expected_shapes = ParameterShapes::of(&fresh);
    let model = fresh
        .load_file(weights_path.with_extension(""), &recorder(), device)
        .map_err(|err| load_error(format!("{:?}", err)))?;

    // The recorder swaps tensors in without checking their shapes
    if let Some(reason) = shape_mismatch(&expected_shapes, &ParameterShapes::of(&model)) {
        return Err(load_error(reason));
    }

    tracing::info!(
        "[Checkpoint] Loaded epoch {} from {}",
        manifest.epoch,
        manifest_path.display()
    );
    Ok((model, manifest))
}
