// Analysis module - waveform container and feature extraction
//
// This module turns a recorded waveform into the aligned frame sequence
// consumed by the synthesis model.
//
// Pipeline: Waveform → resample → FeatureExtractor (pitch, loudness,
// timbre per frame) + OnsetDetector (note starts) → FeatureSequence

pub mod features;
pub mod onset;

pub use features::{FeatureExtractor, FeatureFrame, FeatureSequence, OnsetMarker};

use crate::error::{InferenceError, Stage};

/// Mono audio at a known sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    /// Create a validated waveform
    ///
    /// # Errors
    /// `InvalidInput` when samples are empty or non-finite, or the sample
    /// rate is zero
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self, InferenceError> {
        let waveform = Self {
            samples,
            sample_rate,
        };
        waveform.validate()?;
        Ok(waveform)
    }

    /// Check the invariants of a waveform built by field initialization
    pub fn validate(&self) -> Result<(), InferenceError> {
        let stage = Stage::FeatureExtraction;
        if self.samples.is_empty() {
            return Err(InferenceError::invalid(stage, "waveform has no samples"));
        }
        if self.sample_rate == 0 {
            return Err(InferenceError::invalid(stage, "sample rate must be > 0"));
        }
        if let Some(i) = self.samples.iter().position(|s| !s.is_finite()) {
            return Err(InferenceError::invalid(
                stage,
                format!("sample {} is not finite", i),
            ));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Linear-interpolation resampling to `target_rate`
    ///
    /// Returns a clone when the rates already match.
    pub fn resampled(&self, target_rate: u32) -> Waveform {
        if self.sample_rate == target_rate || self.sample_rate == 0 || target_rate == 0 {
            return self.clone();
        }

        let ratio = self.sample_rate as f64 / target_rate as f64;
        let out_len = ((self.samples.len() as f64) / ratio).round().max(1.0) as usize;
        let last = self.samples.len() - 1;

        let samples = (0..out_len)
            .map(|i| {
                let pos = i as f64 * ratio;
                let idx = (pos.floor() as usize).min(last);
                let next = (idx + 1).min(last);
                let frac = (pos - idx as f64).clamp(0.0, 1.0) as f32;
                self.samples[idx] + (self.samples[next] - self.samples[idx]) * frac
            })
            .collect();

        Waveform {
            samples,
            sample_rate: target_rate,
        }
    }

    /// Zero-pad or truncate to exactly `num_samples`
    pub fn fit_to_length(mut self, num_samples: usize) -> Waveform {
        self.samples.resize(num_samples, 0.0);
        self
    }

    /// Largest absolute sample value
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates() {
        assert!(Waveform::new(vec![], 16_000).is_err());
        assert!(Waveform::new(vec![0.0], 0).is_err());
        assert!(Waveform::new(vec![0.0, f32::NAN], 16_000).is_err());
        assert!(Waveform::new(vec![0.0, 0.5], 16_000).is_ok());
    }

    #[test]
    fn test_resample_halves_length() {
        let wave = Waveform::new((0..100).map(|i| i as f32).collect(), 32_000).unwrap();
        let resampled = wave.resampled(16_000);
        assert_eq!(resampled.sample_rate, 16_000);
        assert_eq!(resampled.len(), 50);
        assert_eq!(resampled.samples[10], 20.0);
    }

    #[test]
    fn test_resample_upsamples_linearly() {
        let wave = Waveform::new(vec![0.0, 1.0, 2.0], 8_000).unwrap();
        let resampled = wave.resampled(16_000);
        assert_eq!(resampled.len(), 6);
        assert!((resampled.samples[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_fit_to_length() {
        let wave = Waveform::new(vec![1.0; 10], 16_000).unwrap();
        assert_eq!(wave.clone().fit_to_length(4).len(), 4);
        let padded = wave.fit_to_length(12);
        assert_eq!(padded.samples[11], 0.0);
        assert_eq!(padded.peak(), 1.0);
    }
}
