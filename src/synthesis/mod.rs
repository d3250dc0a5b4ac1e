// Differentiable synthesis engine - predicted controls to audio
//
// Per frame t the played tables are mixed by attention and the harmonic
// mix into one shape E_t. Inside frame t the oscillator cross-fades from
// the shape that was sounding at the end of the previous block (E_{t-1},
// or the initial old set for t = 0) to E_t, so block edges are seamless.
// The phase comes from a per-sample accumulator; the result is scaled by
// the ADSR envelope of the note segment and the voicing gate.
//
// Everything after the phase computation is a burn tensor op, so the same
// code serves training (autodiff backend) and inference.

mod envelope;
mod phase;
mod wavetable;

pub use envelope::{adsr, adsr_value, EnvelopeTiming};
pub use phase::{upsample_linear, upsample_pitch, PhaseAccumulator, TableLookup};
pub use wavetable::{apply_harmonics, combined_shapes, harmonic_indices, mask_harmonics, mix_tables};

use burn::tensor::{backend::Backend, Int, Tensor, TensorData};

use crate::analysis::Waveform;
use crate::config::AppConfig;
use crate::error::{InferenceError, Stage};
use crate::model::PredictionTensors;

/// Renders audio from model predictions
#[derive(Debug, Clone)]
pub struct SynthesisEngine {
    sample_rate: u32,
    block_size: usize,
}

/// Sample-level read positions into the flattened [T·L] shape tables
struct ReadPlan {
    index: Vec<i64>,
    next: Vec<i64>,
    frac: Vec<f32>,
    fade: Vec<f32>,
}

impl SynthesisEngine {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            sample_rate: config.common.sample_rate,
            block_size: config.common.block_size.max(1),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Output length for `frames` frames
    pub fn output_len(&self, frames: usize) -> usize {
        frames * self.block_size
    }

    fn read_plan(&self, f0_hz: &[f32], table_size: usize) -> ReadPlan {
        let pitch = upsample_pitch(f0_hz, self.block_size);
        let mut accumulator = PhaseAccumulator::new(table_size, self.sample_rate);
        let mut plan = ReadPlan {
            index: Vec::with_capacity(pitch.len()),
            next: Vec::with_capacity(pitch.len()),
            frac: Vec::with_capacity(pitch.len()),
            fade: Vec::with_capacity(pitch.len()),
        };

        for (n, &f0) in pitch.iter().enumerate() {
            let frame_offset = (n / self.block_size) * table_size;
            let lookup = accumulator.advance(f0);
            plan.index.push((frame_offset + lookup.index) as i64);
            plan.next.push((frame_offset + lookup.next) as i64);
            plan.frac.push(lookup.frac);
            plan.fade.push(((n % self.block_size) + 1) as f32 / self.block_size as f32);
        }
        plan
    }

    /// Render the unclipped waveform used by the loss
    ///
    /// # Returns
    /// Audio of `frames × block_size` samples, [N]
    pub fn render<B: Backend>(&self, prediction: &PredictionTensors<B>) -> Tensor<B, 1> {
        let [frames, _, table_size] = prediction.wavetables.dims();
        let device = prediction.wavetables.device();

        let harmonics = mask_harmonics(prediction.harmonics.clone(), &prediction.f0_hz, self.sample_rate);
        let end_shapes = combined_shapes(
            prediction.wavetables.clone(),
            prediction.attention.clone(),
            harmonics.clone(),
        );
        let initial_shape = combined_shapes(
            prediction.old_wavetables.clone().narrow(0, 0, 1),
            prediction.attention.clone().narrow(0, 0, 1),
            harmonics.narrow(0, 0, 1),
        );
        let start_shapes = if frames > 1 {
            Tensor::cat(vec![initial_shape, end_shapes.clone().narrow(0, 0, frames - 1)], 0)
        } else {
            initial_shape
        };

        let plan = self.read_plan(&prediction.f0_hz, table_size);
        let n = plan.index.len();
        let int_tensor = |values: Vec<i64>| {
            Tensor::<B, 1, Int>::from_data(TensorData::new(values, [n]), &device)
        };
        let float_tensor =
            |values: Vec<f32>| Tensor::<B, 1>::from_data(TensorData::new(values, [n]), &device);

        let index = int_tensor(plan.index);
        let next = int_tensor(plan.next);
        let frac = float_tensor(plan.frac);
        let fade = float_tensor(plan.fade);

        let read = |shapes: Tensor<B, 2>| {
            let flat = shapes.reshape([frames * table_size]);
            let a = flat.clone().select(0, index.clone());
            let b = flat.select(0, next.clone());
            a.clone() + (b - a) * frac.clone()
        };
        let start = read(start_shapes);
        let end = read(end_shapes);
        let oscillator = start.clone() + (end - start) * fade;

        let timing = EnvelopeTiming::new(&prediction.segments, self.block_size, self.sample_rate);
        let envelope = adsr(prediction.envelopes.clone(), &timing);
        let gate = float_tensor(upsample_linear(&prediction.voiced, self.block_size));

        oscillator * envelope * gate
    }

    /// Render for playback: checked for divergence and clipped to [-1, 1]
    ///
    /// # Errors
    /// `NumericDivergence` (stage `synthesis`) when any sample is not finite
    pub fn render_clipped<B: Backend>(
        &self,
        prediction: &PredictionTensors<B>,
    ) -> Result<Waveform, InferenceError> {
        let samples = self
            .render(prediction)
            .into_data()
            .to_vec::<f32>()
            .map_err(|err| InferenceError::diverged(Stage::Synthesis, format!("{:?}", err)))?;

        if let Some(i) = samples.iter().position(|s| !s.is_finite()) {
            return Err(InferenceError::diverged(
                Stage::Synthesis,
                format!("output sample {} is not finite", i),
            ));
        }

        Ok(Waveform {
            samples: samples.into_iter().map(|s| s.clamp(-1.0, 1.0)).collect(),
            sample_rate: self.sample_rate,
        })
    }
}
