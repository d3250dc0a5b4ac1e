// Pitch module - YIN fundamental frequency tracking
//
// Algorithm (de Cheveigné & Kawahara, 2002):
// 1. Difference function d(τ) = Σ (x[j] - x[j+τ])²
// 2. Cumulative mean normalized difference d'(τ)
// 3. First local minimum of d'(τ) below the absolute threshold
// 4. Parabolic interpolation around that minimum
//
// A frame with no candidate, or with negligible energy, is unvoiced and
// reported as 0 Hz.

/// RMS below which a frame is treated as silence without running YIN
const SILENCE_RMS: f32 = 1e-4;

/// Fallback acceptance bound when no dip crosses the threshold
const FALLBACK_APERIODICITY: f32 = 0.35;

/// Monophonic YIN pitch tracker
pub struct PitchTracker {
    sample_rate: u32,
    min_freq: f32,
    max_freq: f32,
    threshold: f32,
}

impl PitchTracker {
    /// Create a tracker for the given frequency range
    ///
    /// # Arguments
    /// * `sample_rate` - Audio sample rate in Hz
    /// * `min_freq` - Lowest detectable fundamental
    /// * `max_freq` - Highest detectable fundamental
    /// * `threshold` - YIN absolute threshold
    pub fn new(sample_rate: u32, min_freq: f32, max_freq: f32, threshold: f32) -> Self {
        Self {
            sample_rate,
            min_freq,
            max_freq,
            threshold: threshold.clamp(0.01, 0.5),
        }
    }

    /// Window length needed to resolve the lowest frequency (two periods)
    pub fn window_size(&self) -> usize {
        2 * self.max_period()
    }

    fn max_period(&self) -> usize {
        (self.sample_rate as f32 / self.min_freq).ceil() as usize
    }

    fn min_period(&self) -> usize {
        ((self.sample_rate as f32 / self.max_freq).floor() as usize).max(2)
    }

    /// Estimate the fundamental of one analysis window
    ///
    /// # Returns
    /// Frequency in Hz, or 0.0 when the window is unvoiced
    pub fn detect(&self, samples: &[f32]) -> f32 {
        let max_period = self.max_period().min(samples.len() / 2);
        let min_period = self.min_period();
        if max_period <= min_period + 1 {
            return 0.0;
        }

        let energy: f32 = samples.iter().map(|s| s * s).sum();
        let rms = (energy / samples.len() as f32).sqrt();
        if rms < SILENCE_RMS {
            return 0.0;
        }

        let cmnd = cumulative_mean_normalized_difference(samples, max_period);

        let Some(tau) = self.best_period(&cmnd, min_period, max_period) else {
            return 0.0;
        };

        let refined = parabolic_interpolation(&cmnd, tau);
        if refined <= 0.0 {
            return 0.0;
        }

        let frequency = self.sample_rate as f32 / refined;
        if frequency < self.min_freq || frequency > self.max_freq {
            0.0
        } else {
            frequency
        }
    }

    fn best_period(&self, cmnd: &[f32], min_period: usize, max_period: usize) -> Option<usize> {
        let mut tau = min_period;
        while tau < max_period {
            if cmnd[tau] < self.threshold {
                while tau + 1 < max_period && cmnd[tau + 1] < cmnd[tau] {
                    tau += 1;
                }
                return Some(tau);
            }
            tau += 1;
        }

        // Noisy but periodic: accept a clear global minimum
        let (best_tau, best_val) = (min_period..max_period)
            .map(|t| (t, cmnd[t]))
            .min_by(|a, b| a.1.total_cmp(&b.1))?;
        (best_val < FALLBACK_APERIODICITY).then_some(best_tau)
    }
}

/// YIN steps 1-2, returned for lags 0..=max_period
fn cumulative_mean_normalized_difference(samples: &[f32], max_period: usize) -> Vec<f32> {
    let window = samples.len() - max_period;
    let mut cmnd = vec![1.0f32; max_period + 1];

    let mut running_sum = 0.0f64;
    for tau in 1..=max_period {
        let diff: f64 = (0..window)
            .map(|j| {
                let d = (samples[j] - samples[j + tau]) as f64;
                d * d
            })
            .sum();
        running_sum += diff;
        cmnd[tau] = if running_sum > 1e-12 {
            (diff * tau as f64 / running_sum) as f32
        } else {
            1.0
        };
    }
    cmnd
}

fn parabolic_interpolation(cmnd: &[f32], tau: usize) -> f32 {
    if tau < 1 || tau + 1 >= cmnd.len() {
        return tau as f32;
    }
    let (s0, s1, s2) = (cmnd[tau - 1], cmnd[tau], cmnd[tau + 1]);
    let denom = s0 + s2 - 2.0 * s1;
    if denom.abs() < 1e-12 {
        return tau as f32;
    }
    let shift = 0.5 * (s0 - s2) / denom;
    tau as f32 + shift.clamp(-1.0, 1.0)
}

/// Convert a frequency to a fractional MIDI note number (A4 = 69)
pub fn hz_to_midi(freq: f32) -> f32 {
    69.0 + 12.0 * (freq / 440.0).log2()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_detects_220hz() {
        let tracker = PitchTracker::new(16_000, 50.0, 2000.0, 0.15);
        let audio = sine(220.0, 16_000, tracker.window_size());
        let f0 = tracker.detect(&audio);
        assert!((f0 - 220.0).abs() < 2.0, "detected {}", f0);
    }

    #[test]
    fn test_detects_high_pitch() {
        let tracker = PitchTracker::new(16_000, 50.0, 2000.0, 0.15);
        let audio = sine(880.0, 16_000, tracker.window_size());
        let f0 = tracker.detect(&audio);
        assert!((f0 - 880.0).abs() < 10.0, "detected {}", f0);
    }

    #[test]
    fn test_silence_is_unvoiced() {
        let tracker = PitchTracker::new(16_000, 50.0, 2000.0, 0.15);
        assert_eq!(tracker.detect(&vec![0.0; tracker.window_size()]), 0.0);
    }

    #[test]
    fn test_short_window_is_unvoiced() {
        let tracker = PitchTracker::new(16_000, 50.0, 2000.0, 0.15);
        assert_eq!(tracker.detect(&[0.5, -0.5, 0.5]), 0.0);
    }

    #[test]
    fn test_hz_to_midi() {
        assert!((hz_to_midi(440.0) - 69.0).abs() < 1e-4);
        assert!((hz_to_midi(220.0) - 57.0).abs() < 1e-4);
    }
}
