// Loudness module - A-weighted frame loudness in dB
//
// L = 10·log10(Σ_k P_k · A(f_k) + ε), floored at the configured silence
// level. A(f) is the IEC 61672 A-weighting curve expressed as a linear
// power gain.

const A_WEIGHT_EPS: f32 = 1e-12;

/// Linear power gain of the A-weighting curve at `freq` Hz
pub fn a_weighting_gain(freq: f32) -> f32 {
    if freq <= 0.0 {
        return 0.0;
    }
    let f2 = (freq as f64).powi(2);
    let c1 = 20.598_997f64.powi(2);
    let c2 = 107.652_65f64.powi(2);
    let c3 = 737.862_23f64.powi(2);
    let c4 = 12_194.217f64.powi(2);

    let ra = c4 * f2 * f2 / ((f2 + c1) * ((f2 + c2) * (f2 + c3)).sqrt() * (f2 + c4));
    // +2.0 dB normalizes the curve to 0 dB at 1 kHz
    (ra * ra * 10f64.powf(0.2)) as f32
}

/// Per-bin A-weighting table plus the silence floor
pub struct LoudnessMeter {
    weights: Vec<f32>,
    floor_db: f32,
}

impl LoudnessMeter {
    /// # Arguments
    /// * `bin_freqs` - Center frequency of every power-spectrum bin
    /// * `floor_db` - Lowest reported loudness (digital silence)
    pub fn new(bin_freqs: &[f32], floor_db: f32) -> Self {
        Self {
            weights: bin_freqs.iter().map(|&f| a_weighting_gain(f)).collect(),
            floor_db,
        }
    }

    /// A-weighted loudness of a power spectrum, in dB
    pub fn loudness_db(&self, power: &[f32]) -> f32 {
        let weighted: f32 = power
            .iter()
            .zip(self.weights.iter())
            .map(|(p, w)| p * w)
            .sum();
        (10.0 * (weighted + A_WEIGHT_EPS).log10()).max(self.floor_db)
    }

    pub fn floor_db(&self) -> f32 {
        self.floor_db
    }
}

/// Map loudness in dB to a [0, 1] gate (0 at the floor, 1 at 0 dB)
pub fn loudness_gate(loudness_db: f32, floor_db: f32) -> f32 {
    if floor_db >= 0.0 {
        return if loudness_db >= 0.0 { 1.0 } else { 0.0 };
    }
    ((loudness_db - floor_db) / -floor_db).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_a_weighting_reference_points() {
        let db = |f: f32| 10.0 * a_weighting_gain(f).log10();
        assert!(db(1000.0).abs() < 0.1);
        assert!((db(100.0) + 19.1).abs() < 0.3);
        assert_eq!(a_weighting_gain(0.0), 0.0);
    }

    #[test]
    fn test_silence_reports_floor() {
        let meter = LoudnessMeter::new(&[0.0, 500.0, 1000.0], -80.0);
        assert_eq!(meter.loudness_db(&[0.0, 0.0, 0.0]), -80.0);
    }

    #[test]
    fn test_loudness_gate_range() {
        assert_eq!(loudness_gate(-80.0, -80.0), 0.0);
        assert_eq!(loudness_gate(0.0, -80.0), 1.0);
        assert!((loudness_gate(-40.0, -80.0) - 0.5).abs() < 1e-6);
        assert_eq!(loudness_gate(10.0, -80.0), 1.0);
    }
}
