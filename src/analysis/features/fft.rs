// FFT module - windowed power spectra for frame features
//
// Loudness and MFCC share one Hann-windowed FFT per frame. The spectrum is
// returned as one-sided power normalized so that the bins of a frame sum to
// the mean-square value of the windowed signal.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Hann window of the given length (symmetric)
pub fn hann_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| {
            0.5 * (1.0 - ((2.0 * std::f32::consts::PI * i as f32) / (size as f32 - 1.0)).cos())
        })
        .collect()
}

/// FFT processor that computes power spectra from audio windows
pub struct FftProcessor {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    /// Hann window for FFT (pre-computed)
    window: Vec<f32>,
    /// N * Σw², the normalization of one-sided power
    power_norm: f32,
}

impl FftProcessor {
    /// Create a new FFT processor
    ///
    /// # Arguments
    /// * `fft_size` - FFT window size (1024 for frame features)
    pub fn new(fft_size: usize) -> Self {
        let window = hann_window(fft_size);
        let window_energy: f32 = window.iter().map(|w| w * w).sum();
        let fft = FftPlanner::new().plan_fft_forward(fft_size);

        Self {
            fft,
            fft_size,
            window,
            power_norm: (fft_size as f32 * window_energy).max(f32::EPSILON),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of one-sided bins (fft_size / 2 + 1)
    pub fn num_bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Compute the one-sided power spectrum of an audio window
    ///
    /// Input shorter than `fft_size` is zero-padded, longer input is cut.
    ///
    /// # Arguments
    /// * `audio` - Audio window
    ///
    /// # Returns
    /// Power per bin (size = fft_size / 2 + 1)
    pub fn power_spectrum(&self, audio: &[f32]) -> Vec<f32> {
        let mut buffer: Vec<Complex<f32>> = audio
            .iter()
            .take(self.fft_size)
            .zip(self.window.iter())
            .map(|(&sample, &w)| Complex::new(sample * w, 0.0))
            .collect();
        buffer.resize(self.fft_size, Complex::new(0.0, 0.0));

        self.fft.process(&mut buffer);

        let last = self.fft_size / 2;
        buffer[..=last]
            .iter()
            .enumerate()
            .map(|(k, c)| {
                // DC and Nyquist appear once in the two-sided spectrum
                let scale = if k == 0 || k == last { 1.0 } else { 2.0 };
                scale * c.norm_sqr() / self.power_norm
            })
            .collect()
    }

    /// Center frequency of a bin in Hz
    pub fn bin_frequency(&self, bin: usize, sample_rate: u32) -> f32 {
        bin as f32 * sample_rate as f32 / self.fft_size as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hann_window_endpoints() {
        let w = hann_window(8);
        assert!(w[0].abs() < 1e-6);
        assert!(w[7].abs() < 1e-6);
        assert!(w.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_sine_power_matches_mean_square() {
        let size = 1024;
        let fft = FftProcessor::new(size);
        // Bin-centered sine so leakage stays inside the main lobe
        let freq_bin = 64.0;
        let audio: Vec<f32> = (0..size)
            .map(|i| (2.0 * std::f32::consts::PI * freq_bin * i as f32 / size as f32).sin())
            .collect();

        let spectrum = fft.power_spectrum(&audio);
        assert_eq!(spectrum.len(), size / 2 + 1);

        let total: f32 = spectrum.iter().sum();
        assert!((total - 0.5).abs() < 0.02, "total power {}", total);

        let peak = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 64);
    }

    #[test]
    fn test_silence_has_zero_power() {
        let fft = FftProcessor::new(256);
        let spectrum = fft.power_spectrum(&[0.0; 100]);
        assert!(spectrum.iter().all(|&p| p == 0.0));
    }
}
