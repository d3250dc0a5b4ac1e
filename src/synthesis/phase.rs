// Phase accumulation for wavetable playback
//
// The oscillator phase is measured in table samples ([0, L)). Pitch is
// interpolated linearly between frame values, the phase wraps modulo L and
// carries across block boundaries. Unvoiced samples hold the phase.

/// Running oscillator phase in table-sample units
#[derive(Debug, Clone)]
pub struct PhaseAccumulator {
    phase: f64,
    table_size: usize,
    sample_rate: u32,
}

/// Table read position for one output sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableLookup {
    pub index: usize,
    pub next: usize,
    pub frac: f32,
}

impl PhaseAccumulator {
    pub fn new(table_size: usize, sample_rate: u32) -> Self {
        Self {
            phase: 0.0,
            table_size: table_size.max(1),
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Read position at the current phase, then advance by one sample at
    /// `f0_hz`
    pub fn advance(&mut self, f0_hz: f32) -> TableLookup {
        let index = (self.phase.floor() as usize).min(self.table_size - 1);
        let lookup = TableLookup {
            index,
            next: (index + 1) % self.table_size,
            frac: (self.phase - index as f64) as f32,
        };

        if f0_hz > 0.0 {
            let increment = f0_hz as f64 * self.table_size as f64 / self.sample_rate as f64;
            self.phase = (self.phase + increment).rem_euclid(self.table_size as f64);
        }
        lookup
    }
}

/// Per-sample pitch from per-frame values
///
/// Within frame t the pitch moves linearly from f0[t] to f0[t+1] when both
/// frames are voiced; otherwise it stays at f0[t].
pub fn upsample_pitch(f0_hz: &[f32], block_size: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(f0_hz.len() * block_size);
    for (t, &current) in f0_hz.iter().enumerate() {
        let next = f0_hz.get(t + 1).copied().unwrap_or(current);
        let glide = current > 0.0 && next > 0.0;
        for n in 0..block_size {
            if glide {
                let r = n as f32 / block_size as f32;
                out.push(current + (next - current) * r);
            } else {
                out.push(current);
            }
        }
    }
    out
}

/// Per-sample linear interpolation of a per-frame control
pub fn upsample_linear(values: &[f32], block_size: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(values.len() * block_size);
    for (t, &current) in values.iter().enumerate() {
        let next = values.get(t + 1).copied().unwrap_or(current);
        for n in 0..block_size {
            let r = n as f32 / block_size as f32;
            out.push(current + (next - current) * r);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_wraps_and_persists() {
        let mut acc = PhaseAccumulator::new(100, 1000);
        // 10 table samples per output sample
        for _ in 0..15 {
            acc.advance(100.0);
        }
        assert!((acc.phase() - 50.0).abs() < 1e-9);

        let lookup = acc.advance(100.0);
        assert_eq!(lookup.index, 50);
        assert_eq!(lookup.next, 51);
        assert!(lookup.frac.abs() < 1e-6);
    }

    #[test]
    fn test_unvoiced_holds_phase() {
        let mut acc = PhaseAccumulator::new(64, 16_000);
        acc.advance(440.0);
        let held = acc.phase();
        acc.advance(0.0);
        acc.advance(0.0);
        assert_eq!(acc.phase(), held);
    }

    #[test]
    fn test_lookup_wraps_at_table_end() {
        let mut acc = PhaseAccumulator::new(4, 4);
        // Increment of 3.5 table samples per step
        acc.advance(3.5);
        let lookup = acc.advance(3.5);
        assert_eq!(lookup.index, 3);
        assert_eq!(lookup.next, 0);
        assert!((lookup.frac - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_pitch_upsampling() {
        let up = upsample_pitch(&[100.0, 200.0, 0.0], 4);
        assert_eq!(up.len(), 12);
        assert_eq!(&up[0..4], &[100.0, 125.0, 150.0, 175.0]);
        // Voiced into unvoiced holds instead of gliding to zero
        assert_eq!(&up[4..8], &[200.0; 4]);
        assert_eq!(&up[8..12], &[0.0; 4]);
    }

    #[test]
    fn test_linear_upsampling() {
        let up = upsample_linear(&[0.0, 1.0], 2);
        assert_eq!(up, vec![0.0, 0.5, 1.0, 1.0]);
    }
}
