// OnsetDetector - spectral flux-based note onset detection
//
// Onsets split a clip into note segments; each segment gets its own
// amplitude envelope.
//
// Algorithm:
// 1. Compute a Hann-windowed FFT every `hop_size` samples
// 2. Normalize magnitudes so a full-scale sine peaks at 1.0
// 3. Spectral flux: SF_t = Σ_k max(0, |X_t[k]| - |X_(t-1)[k]|)
// 4. Adaptive threshold: threshold_t = median(flux[t-N:t+N]) + offset
// 5. Peak pick: local maxima where flux_t > threshold_t
// 6. Drop peaks closer than `min_interval_ms` to the previous kept peak

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use crate::analysis::features::hann_window;
use crate::config::OnsetDetectionConfig;

/// OnsetDetector uses spectral flux algorithm to detect note onsets
pub struct OnsetDetector {
    fft: Arc<dyn Fft<f32>>,
    window_size: usize,
    hop_size: usize,
    median_window_halfsize: usize,
    threshold_offset: f32,
    min_interval_samples: usize,
    // Windowing function (Hann window)
    window: Vec<f32>,
    magnitude_norm: f32,
}

impl OnsetDetector {
    /// Create a detector with explicit configuration parameters
    ///
    /// # Arguments
    /// * `sample_rate` - Audio sample rate in Hz
    /// * `config` - Window, hop, threshold and spacing parameters
    pub fn with_config(sample_rate: u32, config: &OnsetDetectionConfig) -> Self {
        let window_size = config.window_size.max(2);
        let window = hann_window(window_size);
        let window_sum: f32 = window.iter().sum();

        Self {
            fft: FftPlanner::new().plan_fft_forward(window_size),
            window_size,
            hop_size: config.hop_size.max(1),
            median_window_halfsize: config.median_window_halfsize.max(1),
            threshold_offset: config.threshold_offset,
            min_interval_samples: (config.min_interval_ms.max(0.0) / 1000.0
                * sample_rate as f32) as usize,
            window,
            magnitude_norm: (window_sum / 2.0).max(f32::EPSILON),
        }
    }

    /// Detect onsets in a complete signal
    ///
    /// # Arguments
    /// * `audio` - Mono signal to analyze
    ///
    /// # Returns
    /// Onset positions in samples, strictly increasing
    pub fn detect(&self, audio: &[f32]) -> Vec<usize> {
        let flux = self.flux_signal(audio);
        let mut onsets: Vec<usize> = Vec::new();

        for peak_idx in self.pick_peaks(&flux) {
            let position = peak_idx * self.hop_size;
            let far_enough = onsets
                .last()
                .is_none_or(|&last| position >= last + self.min_interval_samples);
            if far_enough {
                onsets.push(position);
            }
        }

        onsets
    }

    /// Spectral flux per hop
    fn flux_signal(&self, audio: &[f32]) -> Vec<f32> {
        let mut flux = Vec::new();
        let mut prev_spectrum = vec![0.0; self.window_size / 2 + 1];

        let mut pos = 0;
        while pos + self.window_size <= audio.len() {
            let spectrum = self.compute_magnitude_spectrum(&audio[pos..pos + self.window_size]);
            flux.push(compute_spectral_flux(&spectrum, &prev_spectrum));
            prev_spectrum = spectrum;
            pos += self.hop_size;
        }

        flux
    }

    /// Compute normalized magnitude spectrum
    ///
    /// # Returns
    /// Magnitude spectrum (size = window_size / 2 + 1)
    fn compute_magnitude_spectrum(&self, audio: &[f32]) -> Vec<f32> {
        let mut buffer: Vec<Complex<f32>> = audio
            .iter()
            .zip(self.window.iter())
            .map(|(sample, window_val)| Complex::new(sample * window_val, 0.0))
            .collect();

        self.fft.process(&mut buffer);

        buffer[..self.window_size / 2 + 1]
            .iter()
            .map(|c| c.norm() / self.magnitude_norm)
            .collect()
    }

    /// Calculate adaptive threshold using median + offset
    ///
    /// threshold(t) = median(flux[t-N:t+N]) + offset
    fn adaptive_threshold(&self, flux: &[f32], index: usize) -> f32 {
        let start = index.saturating_sub(self.median_window_halfsize);
        let end = (index + self.median_window_halfsize).min(flux.len());

        if start >= end {
            return self.threshold_offset;
        }

        let mut window: Vec<f32> = flux[start..end].to_vec();
        window.sort_by(|a, b| a.total_cmp(b));

        let median = if window.len().is_multiple_of(2) {
            let mid = window.len() / 2;
            (window[mid - 1] + window[mid]) / 2.0
        } else {
            window[window.len() / 2]
        };

        median + self.threshold_offset
    }

    /// Indices of local flux maxima above the adaptive threshold
    fn pick_peaks(&self, flux: &[f32]) -> Vec<usize> {
        if flux.len() < 3 {
            return Vec::new();
        }

        (1..flux.len() - 1)
            .filter(|&i| {
                let curr = flux[i];
                curr > flux[i - 1]
                    && curr >= flux[i + 1]
                    && curr > self.adaptive_threshold(flux, i)
            })
            .collect()
    }
}

/// SF(t) = Σ max(0, |X(t)| - |X(t-1)|)
fn compute_spectral_flux(spectrum: &[f32], prev_spectrum: &[f32]) -> f32 {
    spectrum
        .iter()
        .zip(prev_spectrum.iter())
        .map(|(curr, prev)| (curr - prev).max(0.0))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tone bursts starting at the given times (ms)
    fn generate_bursts(sample_rate: u32, duration_ms: u32, starts_ms: &[u32]) -> Vec<f32> {
        let total_samples = (sample_rate * duration_ms / 1000) as usize;
        let mut signal = vec![0.0; total_samples];
        let burst_len = (sample_rate / 20) as usize;

        for &start_ms in starts_ms {
            let start = (sample_rate * start_ms / 1000) as usize;
            for i in 0..burst_len {
                if start + i < total_samples {
                    let t = i as f32 / sample_rate as f32;
                    signal[start + i] = 0.8 * (2.0 * std::f32::consts::PI * 440.0 * t).sin();
                }
            }
        }

        signal
    }

    fn detector(sample_rate: u32) -> OnsetDetector {
        OnsetDetector::with_config(sample_rate, &OnsetDetectionConfig::default())
    }

    #[test]
    fn test_detects_bursts() {
        let sample_rate = 16_000;
        let signal = generate_bursts(sample_rate, 1000, &[200, 600]);
        let onsets = detector(sample_rate).detect(&signal);

        assert!(!onsets.is_empty(), "Failed to detect any onsets");
        let first_ms = onsets[0] as f32 / sample_rate as f32 * 1000.0;
        assert!(
            (150.0..=250.0).contains(&first_ms),
            "First onset at {:.1}ms, expected near 200ms",
            first_ms
        );
        assert!(onsets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_spectral_flux_calculation() {
        let flat = vec![1.0; 129];
        assert_eq!(compute_spectral_flux(&flat, &flat), 0.0);

        let increased = vec![2.0; 129];
        assert_eq!(compute_spectral_flux(&increased, &flat), 129.0);
        assert_eq!(compute_spectral_flux(&flat, &increased), 0.0);
    }

    #[test]
    fn test_adaptive_threshold() {
        let det = detector(16_000);
        let flux: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let threshold = det.adaptive_threshold(&flux, 50);
        assert!(
            threshold > 40.0 && threshold < 60.0,
            "Threshold {} outside expected range",
            threshold
        );
    }

    #[test]
    fn test_peak_picking() {
        let det = detector(16_000);
        let flux: Vec<f32> = (0..20)
            .map(|i| if i == 5 || i == 15 { 10.0 } else { 0.1 })
            .collect();
        assert_eq!(det.pick_peaks(&flux), vec![5, 15]);
    }

    #[test]
    fn test_min_interval_suppresses_close_onsets() {
        let config = OnsetDetectionConfig {
            min_interval_ms: 500.0,
            ..OnsetDetectionConfig::default()
        };
        let det = OnsetDetector::with_config(16_000, &config);
        let signal = generate_bursts(16_000, 1000, &[200, 400]);
        let onsets = det.detect(&signal);
        assert!(onsets.len() <= 1, "Got {:?}", onsets);
    }

    #[test]
    fn test_no_false_positives_on_silence() {
        let onsets = detector(16_000).detect(&vec![0.0; 16_000]);
        assert!(onsets.is_empty(), "Should not detect onsets in silence");
    }
}
