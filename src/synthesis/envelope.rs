// ADSR amplitude envelope evaluated per sample
//
// Within a note segment of length Ls (seconds) at time τ since its start:
//   env(τ) = peak · A(τ) · D(τ) · R(τ)
//   A(τ) = clamp(τ / attack, 0, 1)
//   D(τ) = 1 − (1 − sustain) · clamp((τ − attack) / decay, 0, 1)
//   R(τ) = 1 − clamp((τ − (Ls − release)) / release, 0, 1)
// Time is absolute within the segment, so block edges never restart it.

use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use std::ops::Range;

use crate::model::EnvelopeParameters;

/// Per-sample position inside the note segments
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeTiming {
    /// Segment index of every sample
    pub segment: Vec<i64>,
    /// Seconds since the start of the sample's segment
    pub time_secs: Vec<f32>,
    /// Length in seconds of the sample's segment
    pub note_secs: Vec<f32>,
}

impl EnvelopeTiming {
    pub fn new(segments: &[Range<usize>], block_size: usize, sample_rate: u32) -> Self {
        let sr = sample_rate.max(1) as f32;
        let total: usize = segments.iter().map(|r| r.len() * block_size).sum();
        let mut timing = Self {
            segment: Vec::with_capacity(total),
            time_secs: Vec::with_capacity(total),
            note_secs: Vec::with_capacity(total),
        };

        for (s, range) in segments.iter().enumerate() {
            let samples = range.len() * block_size;
            let note = samples as f32 / sr;
            for n in 0..samples {
                timing.segment.push(s as i64);
                timing.time_secs.push(n as f32 / sr);
                timing.note_secs.push(note);
            }
        }
        timing
    }

    pub fn len(&self) -> usize {
        self.segment.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segment.is_empty()
    }
}

/// Reference evaluation of the envelope at one instant
pub fn adsr_value(params: &EnvelopeParameters, time_secs: f32, note_secs: f32) -> f32 {
    let attack = (time_secs / params.attack_secs).clamp(0.0, 1.0);
    let decay_ramp = ((time_secs - params.attack_secs) / params.decay_secs).clamp(0.0, 1.0);
    let decay = 1.0 - (1.0 - params.sustain_level) * decay_ramp;
    let release_ramp =
        ((time_secs - (note_secs - params.release_secs)) / params.release_secs).clamp(0.0, 1.0);
    params.peak_level * attack * decay * (1.0 - release_ramp)
}

/// Differentiable envelope for every sample
///
/// # Arguments
/// * `envelopes` - [S, 5] attack, decay, sustain, release, peak
/// * `timing` - Per-sample segment positions
///
/// # Returns
/// Envelope gain, [N]
pub fn adsr<B: Backend>(envelopes: Tensor<B, 2>, timing: &EnvelopeTiming) -> Tensor<B, 1> {
    let device = envelopes.device();
    let n = timing.len();

    let index = Tensor::<B, 1, Int>::from_data(TensorData::new(timing.segment.clone(), [n]), &device);
    let time = Tensor::<B, 1>::from_data(TensorData::new(timing.time_secs.clone(), [n]), &device);
    let note = Tensor::<B, 1>::from_data(TensorData::new(timing.note_secs.clone(), [n]), &device);

    let per_sample = envelopes.select(0, index);
    let column = |i: usize| per_sample.clone().narrow(1, i, 1).reshape([n]);
    let (attack, decay, sustain, release, peak) = (column(0), column(1), column(2), column(3), column(4));

    let attack_gain = (time.clone() / attack.clone()).clamp(0.0, 1.0);
    let decay_ramp = ((time.clone() - attack) / decay).clamp(0.0, 1.0);
    let decay_gain = (sustain.neg().add_scalar(1.0) * decay_ramp).neg().add_scalar(1.0);
    let release_ramp = ((time - note + release.clone()) / release).clamp(0.0, 1.0);
    let release_gain = release_ramp.neg().add_scalar(1.0);

    peak * attack_gain * decay_gain * release_gain
}
