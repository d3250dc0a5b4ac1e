//! Configuration management for the parameter-inference pipeline
//!
//! This module provides runtime configuration loading from JSON files.
//! A single `AppConfig` is constructed once per process and passed by
//! reference into every component constructor (feature extractor, model,
//! synthesis engine, loss, exporter, trainer). Nothing reads ambient
//! global state.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::TrainingError;
use crate::export::SynthTarget;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub common: CommonConfig,
    pub features: FeatureConfig,
    pub onset_detection: OnsetDetectionConfig,
    pub model: ModelConfig,
    pub loss: LossConfig,
    pub train: TrainConfig,
    pub export: ExportConfig,
}

/// Settings shared by every stage of the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonConfig {
    /// Sample rate every waveform is converted to before analysis
    pub sample_rate: u32,
    /// Samples per feature frame; also the synthesis block size
    pub block_size: usize,
    /// Fixed clip length used when building training datasets
    pub duration_secs: f32,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            block_size: 160,
            duration_secs: 4.0,
        }
    }
}

/// Feature extractor parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// FFT size for loudness and MFCC analysis
    pub fft_size: usize,
    /// Number of mel bands feeding the cepstral transform
    pub n_mels: usize,
    /// Number of cepstral coefficients per frame (timbre vector length)
    pub n_mfcc: usize,
    /// Lowest detectable fundamental in Hz
    pub pitch_min_hz: f32,
    /// Highest detectable fundamental in Hz
    pub pitch_max_hz: f32,
    /// YIN absolute threshold (lower = stricter voicing decision)
    pub yin_threshold: f32,
    /// Loudness (dB, A-weighted) treated as digital silence
    pub loudness_floor_db: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            fft_size: 1024,
            n_mels: 64,
            n_mfcc: 30,
            pitch_min_hz: 50.0,
            pitch_max_hz: 2000.0,
            yin_threshold: 0.15,
            loudness_floor_db: -80.0,
        }
    }
}

/// Onset detection algorithm parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnsetDetectionConfig {
    /// Threshold offset added to median for adaptive thresholding
    pub threshold_offset: f32,
    /// FFT window size in samples
    pub window_size: usize,
    /// Hop size for overlapping windows
    pub hop_size: usize,
    /// Half-size of median filter window (full window = 2 * this + 1)
    pub median_window_halfsize: usize,
    /// Minimum distance between two reported onsets, in milliseconds
    pub min_interval_ms: f32,
}

impl Default for OnsetDetectionConfig {
    fn default() -> Self {
        Self {
            threshold_offset: 0.3,
            window_size: 256,
            hop_size: 64,
            median_window_halfsize: 50,
            min_interval_ms: 100.0,
        }
    }
}

/// Wavetable synthesis model hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub hidden_size: usize,
    pub n_harmonic: usize,
    pub n_wavetables: usize,
    /// Samples per single-cycle wavetable
    pub table_size: usize,
    /// Softmax temperature of the wavetable attention head
    pub attention_temperature: f32,
    /// Largest per-step change the model may apply to a wavetable sample
    pub wavetable_delta_scale: f32,
    /// Upper bound of predicted attack/decay/release times in seconds
    pub max_envelope_secs: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_size: 128,
            n_harmonic: 16,
            n_wavetables: 8,
            table_size: 512,
            attention_temperature: 0.5,
            wavetable_delta_scale: 0.1,
            max_envelope_secs: 2.0,
        }
    }
}

/// Multi-resolution spectral loss parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    /// Analysis window sizes, short to long
    pub fft_sizes: Vec<usize>,
    /// Fractional overlap between analysis windows
    pub overlap: f32,
    pub linear_weight: f32,
    pub log_weight: f32,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            fft_sizes: vec![2048, 1024, 512, 256, 128, 64],
            overlap: 0.75,
            linear_weight: 1.0,
            log_weight: 1.0,
        }
    }
}

/// Training loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Fraction of the dataset used for training; the rest is held out
    pub train_split: f32,
    /// Seed for the train/test shuffle
    pub seed: u64,
    pub checkpoint_dir: PathBuf,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 4,
            learning_rate: 1e-3,
            train_split: 0.8,
            seed: 0x5A5A_FFF0,
            checkpoint_dir: PathBuf::from("checkpoints"),
        }
    }
}

/// Preset export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub target: SynthTarget,
    pub preset_name: String,
    pub preset_style: String,
    pub author: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            target: SynthTarget::Vital,
            preset_name: "Modeled".to_string(),
            preset_style: "Lead".to_string(),
            author: String::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The loaded configuration, or the defaults if the file is missing or
    /// invalid (a warning is logged in that case)
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match Self::try_load_from_file(&path) {
            Ok(config) => {
                log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                config
            }
            Err(err) => {
                log::warn!(
                    "[Config] {} Using defaults.",
                    crate::error::ErrorCode::message(&err)
                );
                Self::default()
            }
        }
    }

    /// Load and validate configuration, surfacing every failure
    pub fn try_load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, TrainingError> {
        let contents = fs::read_to_string(&path).map_err(|err| TrainingError::Config {
            reason: format!("failed to read {:?}: {}", path.as_ref(), err),
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|err| TrainingError::Config {
            reason: format!("failed to parse JSON from {:?}: {}", path.as_ref(), err),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants that serde cannot express
    pub fn validate(&self) -> Result<(), TrainingError> {
        let fail = |reason: &str| {
            Err(TrainingError::Config {
                reason: reason.to_string(),
            })
        };

        if self.common.sample_rate == 0 {
            return fail("common.sample_rate must be > 0");
        }
        if self.common.block_size == 0 {
            return fail("common.block_size must be > 0");
        }
        if self.features.n_mfcc == 0 || self.features.n_mfcc > self.features.n_mels {
            return fail("features.n_mfcc must be in 1..=features.n_mels");
        }
        if !self.features.fft_size.is_power_of_two() {
            return fail("features.fft_size must be a power of two");
        }
        if self.features.pitch_min_hz <= 0.0
            || self.features.pitch_max_hz <= self.features.pitch_min_hz
        {
            return fail("features pitch range must satisfy 0 < min < max");
        }
        if self.model.hidden_size == 0
            || self.model.n_harmonic == 0
            || self.model.n_wavetables == 0
            || self.model.table_size < 4
        {
            return fail("model dimensions must be non-zero (table_size >= 4)");
        }
        if self.model.attention_temperature <= 0.0 {
            return fail("model.attention_temperature must be > 0");
        }
        if self.loss.fft_sizes.is_empty() || self.loss.fft_sizes.iter().any(|&n| n < 4) {
            return fail("loss.fft_sizes must contain window sizes >= 4");
        }
        if !(0.0..1.0).contains(&self.loss.overlap) {
            return fail("loss.overlap must be in [0, 1)");
        }
        if self.train.batch_size == 0 {
            return fail("train.batch_size must be > 0");
        }
        if !(0.0..=1.0).contains(&self.train.train_split) {
            return fail("train.train_split must be in [0, 1]");
        }
        Ok(())
    }

    /// Number of samples in a fixed-duration training clip, rounded to
    /// whole frames
    pub fn clip_samples(&self) -> usize {
        let raw = (self.common.duration_secs.max(0.0) * self.common.sample_rate as f32) as usize;
        let frames = raw.div_ceil(self.common.block_size).max(1);
        frames * self.common.block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.common.sample_rate, 16_000);
        assert_eq!(config.common.block_size, 160);
        assert_eq!(config.model.table_size, 512);
        assert_eq!(config.loss.fft_sizes.len(), 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = AppConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.model.hidden_size, config.model.hidden_size);
        assert_eq!(parsed.export.target, config.export.target);
        assert_eq!(parsed.train.checkpoint_dir, config.train.checkpoint_dir);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let parsed: AppConfig =
            serde_json::from_str(r#"{"model": {"hidden_size": 32}}"#).unwrap();
        assert_eq!(parsed.model.hidden_size, 32);
        assert_eq!(parsed.model.n_wavetables, 8);
        assert_eq!(parsed.common.block_size, 160);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.common.block_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.features.n_mfcc = 100;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.loss.overlap = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from_file("definitely/not/here.json");
        assert_eq!(config.common.sample_rate, 16_000);
        assert!(AppConfig::try_load_from_file("definitely/not/here.json").is_err());
    }

    #[test]
    fn test_clip_samples_rounds_to_frames() {
        let mut config = AppConfig::default();
        config.common.duration_secs = 1.0;
        assert_eq!(config.clip_samples(), 16_000);

        config.common.duration_secs = 0.001;
        assert_eq!(config.clip_samples(), 160);
    }
}
