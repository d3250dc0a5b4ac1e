// Inference pipeline - waveform in, synth preset (and metrics) out
//
// Loaded weights are read-only and every intermediate lives inside one
// call, so `infer` takes `&self` and concurrent calls do not interact.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::analysis::{FeatureExtractor, FeatureSequence, Waveform};
use crate::config::AppConfig;
use crate::error::{log_inference_error, InferenceError};
use crate::export::{exporter_for, PresetExporter, SynthPreset};
use crate::fixtures::read_wav;
use crate::loss::MultiResolutionStftLoss;
use crate::model::{load_checkpoint, CheckpointManifest, ModelPrediction, WavetableSynthModel};
use crate::synthesis::SynthesisEngine;
use crate::InferenceBackend;

/// How close the reconstruction is to the input
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationMetrics {
    /// Multi-resolution spectral loss, summed over window sizes
    pub total_loss: f32,
    /// (window size, loss) per resolution
    pub per_scale: Vec<(usize, f32)>,
    /// Sample-wise mean squared error over the input length
    pub waveform_mse: f32,
    pub frames: usize,
    pub samples: usize,
}

/// Everything one call produced
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Input at the configured sample rate
    pub input: Waveform,
    pub features: FeatureSequence,
    pub prediction: ModelPrediction,
    /// Clipped reconstruction, `frames × block_size` samples
    pub reconstruction: Waveform,
}

/// End-to-end parameter inference with one loaded model
pub struct InferencePipeline {
    config: AppConfig,
    extractor: FeatureExtractor,
    model: WavetableSynthModel<InferenceBackend>,
    engine: SynthesisEngine,
    loss: MultiResolutionStftLoss,
    exporter: Box<dyn PresetExporter + Send + Sync>,
    manifest: Option<CheckpointManifest>,
}

impl InferencePipeline {
    pub fn new(config: AppConfig, model: WavetableSynthModel<InferenceBackend>) -> Self {
        Self {
            extractor: FeatureExtractor::new(&config),
            engine: SynthesisEngine::new(&config),
            loss: MultiResolutionStftLoss::new(&config.loss),
            exporter: exporter_for(config.export.target, &config.export),
            model,
            manifest: None,
            config,
        }
    }

    /// Pipeline around a freshly initialized (untrained) model
    pub fn with_initial_weights(config: AppConfig) -> Self {
        let model = WavetableSynthModel::new(&config, &Default::default());
        Self::new(config, model)
    }

    /// Pipeline around the checkpoint described by `manifest_path`
    ///
    /// # Errors
    /// `ModelLoad` when the checkpoint is missing, unknown or built for a
    /// different architecture
    pub fn from_checkpoint(config: AppConfig, manifest_path: &Path) -> Result<Self, InferenceError> {
        let (model, manifest) = load_checkpoint::<InferenceBackend>(manifest_path, &config, &Default::default())?;
        let mut pipeline = Self::new(config, model);
        pipeline.manifest = Some(manifest);
        Ok(pipeline)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn model(&self) -> &WavetableSynthModel<InferenceBackend> {
        &self.model
    }

    /// Manifest of the loaded checkpoint, if any
    pub fn manifest(&self) -> Option<&CheckpointManifest> {
        self.manifest.as_ref()
    }

    /// Run features, model and synthesis on one waveform
    pub fn analyze(&self, waveform: &Waveform) -> Result<Analysis, InferenceError> {
        waveform.validate()?;
        let input = waveform.resampled(self.config.common.sample_rate);
        let features = self.extractor.extract(&input)?;
        let tensors = self.model.forward(&features, self.extractor.loudness_floor_db())?;
        let prediction = tensors.to_prediction()?;
        let reconstruction = self.engine.render_clipped(&tensors)?;

        Ok(Analysis {
            input,
            features,
            prediction,
            reconstruction,
        })
    }

    /// Audio the predicted parameters produce
    pub fn reconstruct(&self, waveform: &Waveform) -> Result<Waveform, InferenceError> {
        Ok(self.analyze(waveform)?.reconstruction)
    }

    /// Compare a reconstruction with its input
    pub fn evaluate(&self, reconstruction: &Waveform, input: &Waveform) -> Result<EvaluationMetrics, InferenceError> {
        let report = self.loss.evaluate(&reconstruction.samples, &input.samples)?;
        let samples = input.len().min(reconstruction.len());
        let squared: f32 = input.samples[..samples]
            .iter()
            .zip(&reconstruction.samples[..samples])
            .map(|(a, b)| (a - b) * (a - b))
            .sum();

        Ok(EvaluationMetrics {
            total_loss: report.total,
            per_scale: report.per_scale,
            waveform_mse: squared / samples.max(1) as f32,
            frames: self.extractor.frame_count(input.len()),
            samples: input.len(),
        })
    }

    /// Preset and evaluation metrics for one waveform
    ///
    /// # Errors
    /// `InvalidInput` for an empty waveform or zero sample rate,
    /// `NumericDivergence` naming the failing stage, export errors
    pub fn infer(&self, waveform: &Waveform) -> Result<(SynthPreset, EvaluationMetrics), InferenceError> {
        let result = self.analyze(waveform).and_then(|analysis| {
            let metrics = self.evaluate(&analysis.reconstruction, &analysis.input)?;
            let preset = self.exporter.export(&analysis.prediction)?;
            Ok((preset, metrics))
        });

        match &result {
            Ok((preset, metrics)) => info!(
                "[InferencePipeline] {} frames -> {} preset, loss {:.4}",
                metrics.frames,
                preset.target(),
                metrics.total_loss
            ),
            Err(err) => log_inference_error(err, "infer"),
        }
        result
    }

    /// Infer from a WAV file and write the preset into `output_dir`
    ///
    /// The preset is named after the input file; an existing file is never
    /// replaced, a numeric suffix is added instead.
    ///
    /// # Returns
    /// The written preset path, plus metrics when `enable_eval` is set
    pub fn infer_file(
        &self,
        input: &Path,
        output_dir: &Path,
        enable_eval: bool,
    ) -> Result<(PathBuf, Option<EvaluationMetrics>), InferenceError> {
        let waveform = read_wav(input)?;
        let (preset, metrics) = if enable_eval {
            let (preset, metrics) = self.infer(&waveform)?;
            (preset, Some(metrics))
        } else {
            let analysis = self.analyze(&waveform)?;
            (self.exporter.export(&analysis.prediction)?, None)
        };

        std::fs::create_dir_all(output_dir)?;
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "preset".to_string());
        let path = unique_path(output_dir, &stem, preset.target().file_extension());
        preset.write_to(&path)?;
        Ok((path, metrics))
    }
}

fn unique_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let candidate = dir.join(format!("{}.{}", stem, extension));
    if !candidate.exists() {
        return candidate;
    }
    (1..)
        .map(|n| dir.join(format!("{}_{}.{}", stem, n, extension)))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use crate::fixtures::{generate_sine, write_wav};
    use tempfile::tempdir;

    fn small_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.model.hidden_size = 16;
        config.model.n_wavetables = 3;
        config.model.table_size = 64;
        config.model.n_harmonic = 4;
        config
    }

    #[test]
    fn test_infer_shapes() {
        let pipeline = InferencePipeline::with_initial_weights(small_config());
        let wave = generate_sine(330.0, 0.5, 0.25, 16_000);
        let (preset, metrics) = pipeline.infer(&wave).unwrap();

        assert_eq!(metrics.frames, 25);
        assert_eq!(metrics.samples, 4000);
        assert_eq!(metrics.per_scale.len(), 6);
        assert!(metrics.total_loss.is_finite() && metrics.total_loss > 0.0);
        assert!(preset.parameter("osc_1_on").is_some());

        let reconstruction = pipeline.reconstruct(&wave).unwrap();
        assert_eq!(reconstruction.len(), 25 * 160);
    }

    #[test]
    fn test_resamples_input() {
        let pipeline = InferencePipeline::with_initial_weights(small_config());
        let wave = generate_sine(330.0, 0.5, 0.25, 32_000);
        let (_, metrics) = pipeline.infer(&wave).unwrap();
        assert_eq!(metrics.samples, 4000);
    }

    #[test]
    fn test_empty_input_rejected() {
        let pipeline = InferencePipeline::with_initial_weights(small_config());
        let err = pipeline
            .infer(&Waveform {
                samples: Vec::new(),
                sample_rate: 16_000,
            })
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::FeatureExtraction));
    }

    #[test]
    fn test_infer_file_never_overwrites() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("tone.wav");
        write_wav(&input, &generate_sine(220.0, 0.5, 0.2, 16_000)).unwrap();
        let pipeline = InferencePipeline::with_initial_weights(small_config());

        let (first, metrics) = pipeline.infer_file(&input, dir.path(), true).unwrap();
        let (second, none) = pipeline.infer_file(&input, dir.path(), false).unwrap();
        assert_eq!(first.file_name().unwrap(), "tone.vital");
        assert_eq!(second.file_name().unwrap(), "tone_1.vital");
        assert!(metrics.is_some());
        assert!(none.is_none());
        assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
    }
}
