// MFCC module - mel-frequency cepstral coefficients (timbre vector)
//
// Power spectrum → triangular mel filterbank (HTK mel scale) → natural log
// → orthonormal DCT-II, keeping the first `n_mfcc` coefficients.

const LOG_FLOOR: f32 = 1e-10;

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Precomputed mel filterbank and DCT basis
pub struct MfccExtractor {
    /// n_mels rows of per-bin triangular weights
    filters: Vec<Vec<f32>>,
    /// n_mfcc rows of n_mels DCT-II coefficients
    dct: Vec<Vec<f32>>,
}

impl MfccExtractor {
    /// # Arguments
    /// * `sample_rate` - Audio sample rate in Hz
    /// * `fft_size` - FFT size of the power spectra fed to `compute`
    /// * `n_mels` - Number of mel bands
    /// * `n_mfcc` - Number of coefficients kept
    pub fn new(sample_rate: u32, fft_size: usize, n_mels: usize, n_mfcc: usize) -> Self {
        let n_bins = fft_size / 2 + 1;
        let nyquist = sample_rate as f32 / 2.0;
        let mel_max = hz_to_mel(nyquist);

        let edges: Vec<f32> = (0..n_mels + 2)
            .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
            .collect();
        let bin_hz = |k: usize| k as f32 * sample_rate as f32 / fft_size as f32;

        let filters = (0..n_mels)
            .map(|m| {
                let (lo, center, hi) = (edges[m], edges[m + 1], edges[m + 2]);
                (0..n_bins)
                    .map(|k| {
                        let f = bin_hz(k);
                        if f <= lo || f >= hi {
                            0.0
                        } else if f <= center {
                            (f - lo) / (center - lo).max(f32::EPSILON)
                        } else {
                            (hi - f) / (hi - center).max(f32::EPSILON)
                        }
                    })
                    .collect()
            })
            .collect();

        let dct = (0..n_mfcc)
            .map(|n| {
                let scale = if n == 0 {
                    (1.0 / n_mels as f32).sqrt()
                } else {
                    (2.0 / n_mels as f32).sqrt()
                };
                (0..n_mels)
                    .map(|m| {
                        scale
                            * (std::f32::consts::PI * n as f32 * (m as f32 + 0.5) / n_mels as f32)
                                .cos()
                    })
                    .collect()
            })
            .collect();

        Self { filters, dct }
    }

    pub fn n_mfcc(&self) -> usize {
        self.dct.len()
    }

    /// Cepstral coefficients of one power spectrum
    pub fn compute(&self, power: &[f32]) -> Vec<f32> {
        let log_mel: Vec<f32> = self
            .filters
            .iter()
            .map(|filter| {
                let energy: f32 = filter.iter().zip(power.iter()).map(|(w, p)| w * p).sum();
                energy.max(LOG_FLOOR).ln()
            })
            .collect();

        self.dct
            .iter()
            .map(|row| row.iter().zip(log_mel.iter()).map(|(c, l)| c * l).sum())
            .collect()
    }
}
