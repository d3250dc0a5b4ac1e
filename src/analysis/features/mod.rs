// FeatureExtractor - frame-level pitch, loudness and timbre extraction
//
// The waveform is cut into frames of `block_size` samples (the synthesis
// block size), so frame t of every feature describes samples
// [t·block, (t+1)·block). Each feature is measured on a window centered on
// the frame, shifted inward at the clip edges.
//
// Module organization:
// - types: FeatureFrame, OnsetMarker, FeatureSequence
// - fft: windowed power spectra
// - pitch: YIN fundamental tracking
// - loudness: A-weighted loudness
// - mfcc: cepstral timbre descriptor
// - mod.rs: Coordinator (FeatureExtractor)

mod fft;
mod loudness;
mod mfcc;
mod pitch;
mod types;

pub use fft::{hann_window, FftProcessor};
pub use loudness::{a_weighting_gain, loudness_gate, LoudnessMeter};
pub use mfcc::MfccExtractor;
pub use pitch::{hz_to_midi, PitchTracker};
pub use types::{FeatureFrame, FeatureSequence, OnsetMarker};

use crate::analysis::onset::OnsetDetector;
use crate::analysis::Waveform;
use crate::config::AppConfig;
use crate::error::InferenceError;

/// FeatureExtractor coordinates the per-frame DSP analysis
pub struct FeatureExtractor {
    sample_rate: u32,
    block_size: usize,
    fft_processor: FftProcessor,
    loudness: LoudnessMeter,
    mfcc: MfccExtractor,
    pitch: PitchTracker,
    onset_detector: OnsetDetector,
}

impl FeatureExtractor {
    /// Create a new FeatureExtractor from the application configuration
    pub fn new(config: &AppConfig) -> Self {
        let sample_rate = config.common.sample_rate;
        let features = &config.features;
        let fft_processor = FftProcessor::new(features.fft_size);
        let bin_freqs: Vec<f32> = (0..fft_processor.num_bins())
            .map(|k| fft_processor.bin_frequency(k, sample_rate))
            .collect();

        Self {
            sample_rate,
            block_size: config.common.block_size.max(1),
            loudness: LoudnessMeter::new(&bin_freqs, features.loudness_floor_db),
            mfcc: MfccExtractor::new(
                sample_rate,
                features.fft_size,
                features.n_mels,
                features.n_mfcc,
            ),
            pitch: PitchTracker::new(
                sample_rate,
                features.pitch_min_hz,
                features.pitch_max_hz,
                features.yin_threshold,
            ),
            onset_detector: OnsetDetector::with_config(sample_rate, &config.onset_detection),
            fft_processor,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn loudness_floor_db(&self) -> f32 {
        self.loudness.floor_db()
    }

    /// Number of frames produced for a signal of `num_samples` samples
    pub fn frame_count(&self, num_samples: usize) -> usize {
        num_samples.div_ceil(self.block_size).max(1)
    }

    /// Extract the aligned feature sequence of a waveform
    ///
    /// The waveform is resampled to the configured rate first, then padded
    /// with silence to a whole number of frames.
    ///
    /// # Errors
    /// `InvalidInput` (stage `feature_extraction`) for an empty waveform,
    /// a zero sample rate or non-finite samples.
    pub fn extract(&self, waveform: &Waveform) -> Result<FeatureSequence, InferenceError> {
        waveform.validate()?;
        let resampled = waveform.resampled(self.sample_rate);

        let num_frames = self.frame_count(resampled.samples.len());
        let mut samples = resampled.samples;
        samples.resize(num_frames * self.block_size, 0.0);

        let pitch_window = self.pitch.window_size();
        let fft_window = self.fft_processor.fft_size();

        let frames: Vec<FeatureFrame> = (0..num_frames)
            .map(|t| {
                let center = t * self.block_size + self.block_size / 2;
                let f0_hz = self.pitch.detect(centered_window(&samples, center, pitch_window));
                let power = self
                    .fft_processor
                    .power_spectrum(centered_window(&samples, center, fft_window));

                FeatureFrame {
                    f0_hz,
                    loudness_db: self.loudness.loudness_db(&power),
                    timbre: self.mfcc.compute(&power),
                    timestamp_secs: (t * self.block_size) as f32 / self.sample_rate as f32,
                }
            })
            .collect();

        let mut onsets: Vec<OnsetMarker> = Vec::new();
        for position in self.onset_detector.detect(&samples) {
            let frame_index = position / self.block_size;
            if frame_index == 0 || frame_index >= num_frames {
                continue;
            }
            if onsets.last().is_some_and(|o| o.frame_index >= frame_index) {
                continue;
            }
            onsets.push(OnsetMarker { frame_index });
        }

        let voiced = frames.iter().filter(|f| f.is_voiced()).count();
        tracing::debug!(
            "[FeatureExtractor] {} frames ({} voiced), {} onsets",
            num_frames,
            voiced,
            onsets.len()
        );

        FeatureSequence::new(frames, onsets)
    }
}

/// Window of `size` samples centered on `center`, kept inside the signal
fn centered_window(samples: &[f32], center: usize, size: usize) -> &[f32] {
    if samples.len() <= size {
        return samples;
    }
    let start = center.saturating_sub(size / 2).min(samples.len() - size);
    &samples[start..start + size]
}
