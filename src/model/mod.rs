// Wavetable synthesis model - features to synthesizer controls
//
// Per frame: conditioning row → encoder → GRU (explicit carried state) →
// decoder trunk → heads:
// - attention over the K tables (softmax with temperature)
// - harmonic mix (softmax)
// - smoothing coefficient c (sigmoid)
// - wavetable delta (tanh · scale) added to a learned table bank
// The played set `old + c·(new − old)` becomes the next step's old set.
// One ADSR envelope per note segment comes from the segment's mean hidden
// state.

pub mod checkpoint;
mod gru;
mod prediction;

pub use checkpoint::{load_checkpoint, save_checkpoint, CheckpointManifest, ModelArchitecture};
pub use gru::GruCell;
pub use prediction::{EnvelopeParameters, ModelPrediction, PredictionTensors, WavetableSet};

use burn::module::{Module, Param};
use burn::nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::tensor::activation::{leaky_relu, sigmoid, softmax};
use burn::tensor::{backend::Backend, Tensor, TensorData};

use crate::analysis::features::{hz_to_midi, loudness_gate};
use crate::analysis::FeatureSequence;
use crate::config::AppConfig;
use crate::error::{InferenceError, Stage};

/// Conditioning values ahead of the timbre vector: pitch, voicing, loudness
const CONDITIONING_PREFIX: usize = 3;

/// Timbre coefficients are scaled into roughly unit range
const TIMBRE_SCALE: f32 = 0.01;

const LEAKY_SLOPE: f64 = 0.01;

/// Shortest envelope stage in seconds
const MIN_STAGE_SECS: f32 = 0.001;

/// Recurrent state carried from one step to the next
#[derive(Debug, Clone)]
pub struct ModelState<B: Backend> {
    /// GRU hidden vector, [1, hidden_size]
    pub hidden: Tensor<B, 2>,
    /// Tables played by the previous step, [K, L]
    pub wavetables: Tensor<B, 2>,
}

/// Outputs of a single step
#[derive(Debug, Clone)]
pub struct StepOutput<B: Backend> {
    pub hidden: Tensor<B, 2>,
    /// [1, K], non-negative, sums to 1
    pub attention: Tensor<B, 2>,
    /// [1, H], non-negative, sums to 1
    pub harmonics: Tensor<B, 2>,
    /// [1, 1] in [0, 1]
    pub smoothing: Tensor<B, 2>,
    pub new_wavetables: Tensor<B, 2>,
    pub old_wavetables: Tensor<B, 2>,
    pub played_wavetables: Tensor<B, 2>,
}

/// Per-frame model inputs derived from a feature sequence
#[derive(Debug, Clone)]
pub struct Conditioning {
    /// Row-major [T, 3 + n_mfcc]
    pub rows: Vec<f32>,
    pub f0_hz: Vec<f32>,
    pub voiced: Vec<f32>,
    pub loudness_gate: Vec<f32>,
}

impl Conditioning {
    pub fn from_features(features: &FeatureSequence, loudness_floor_db: f32) -> Self {
        let frames = features.frames();
        let width = CONDITIONING_PREFIX + features.timbre_dim();
        let mut rows = Vec::with_capacity(frames.len() * width);
        let mut f0_hz = Vec::with_capacity(frames.len());
        let mut voiced = Vec::with_capacity(frames.len());
        let mut gates = Vec::with_capacity(frames.len());

        for frame in frames {
            // Unvoiced frames never reach the log of a zero pitch
            let (pitch, flag) = if frame.is_voiced() {
                ((hz_to_midi(frame.f0_hz) / 127.0).clamp(0.0, 1.0), 1.0)
            } else {
                (0.0, 0.0)
            };
            let gate = loudness_gate(frame.loudness_db, loudness_floor_db);

            rows.push(pitch);
            rows.push(flag);
            rows.push(gate);
            rows.extend(frame.timbre.iter().map(|c| c * TIMBRE_SCALE));

            f0_hz.push(if frame.is_voiced() { frame.f0_hz } else { 0.0 });
            voiced.push(flag);
            gates.push(gate);
        }

        Self {
            rows,
            f0_hz,
            voiced,
            loudness_gate: gates,
        }
    }

    pub fn num_frames(&self) -> usize {
        self.f0_hz.len()
    }
}

/// Analytic starting shape for table `k`
///
/// sine, saw, square, triangle, 25% pulse, then single higher partials
fn analytic_wavetable(k: usize, table_size: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..table_size)
        .map(|i| {
            let x = i as f32 / table_size as f32;
            match k {
                0 => (2.0 * PI * x).sin(),
                1 => 2.0 * x - 1.0,
                2 => {
                    if x < 0.5 {
                        1.0
                    } else {
                        -1.0
                    }
                }
                3 => 1.0 - 4.0 * (x - 0.5).abs(),
                4 => {
                    if x < 0.25 {
                        1.0
                    } else {
                        -1.0
                    }
                }
                _ => (2.0 * PI * (k - 3) as f32 * x).sin(),
            }
        })
        .collect()
}

/// Learned mapping from feature frames to wavetable synth controls
#[derive(Module, Debug)]
pub struct WavetableSynthModel<B: Backend> {
    encoder: Linear<B>,
    encoder_norm: LayerNorm<B>,
    gru: GruCell<B>,
    trunk: Linear<B>,
    trunk_norm: LayerNorm<B>,
    attention_head: Linear<B>,
    harmonic_head: Linear<B>,
    smoothing_head: Linear<B>,
    wavetable_head: Linear<B>,
    envelope_head: Linear<B>,
    wavetable_bank: Param<Tensor<B, 2>>,
    n_mfcc: usize,
    n_wavetables: usize,
    table_size: usize,
    n_harmonic: usize,
    attention_temperature: f32,
    wavetable_delta_scale: f32,
    max_envelope_secs: f32,
}

impl<B: Backend> WavetableSynthModel<B> {
    /// Build a freshly initialized model for the configured architecture
    pub fn new(config: &AppConfig, device: &B::Device) -> Self {
        let model = &config.model;
        let hidden = model.hidden_size;
        let input_size = CONDITIONING_PREFIX + config.features.n_mfcc;

        let bank: Vec<f32> = (0..model.n_wavetables)
            .flat_map(|k| analytic_wavetable(k, model.table_size))
            .collect();
        let bank = Tensor::<B, 2>::from_data(
            TensorData::new(bank, [model.n_wavetables, model.table_size]),
            device,
        );

        Self {
            encoder: LinearConfig::new(input_size, hidden).init(device),
            encoder_norm: LayerNormConfig::new(hidden).init(device),
            gru: GruCell::new(hidden, hidden, device),
            trunk: LinearConfig::new(2 * hidden, hidden).init(device),
            trunk_norm: LayerNormConfig::new(hidden).init(device),
            attention_head: LinearConfig::new(hidden, model.n_wavetables).init(device),
            harmonic_head: LinearConfig::new(hidden, model.n_harmonic).init(device),
            smoothing_head: LinearConfig::new(hidden, 1).init(device),
            wavetable_head: LinearConfig::new(hidden, model.n_wavetables * model.table_size)
                .init(device),
            envelope_head: LinearConfig::new(hidden, EnvelopeParameters::WIDTH).init(device),
            wavetable_bank: Param::from_tensor(bank),
            n_mfcc: config.features.n_mfcc,
            n_wavetables: model.n_wavetables,
            table_size: model.table_size,
            n_harmonic: model.n_harmonic,
            attention_temperature: model.attention_temperature.max(f32::EPSILON),
            wavetable_delta_scale: model.wavetable_delta_scale,
            max_envelope_secs: model.max_envelope_secs.max(0.0),
        }
    }

    pub fn input_size(&self) -> usize {
        CONDITIONING_PREFIX + self.n_mfcc
    }

    pub fn hidden_size(&self) -> usize {
        self.gru.hidden_size()
    }

    pub fn n_wavetables(&self) -> usize {
        self.n_wavetables
    }

    pub fn table_size(&self) -> usize {
        self.table_size
    }

    pub fn n_harmonic(&self) -> usize {
        self.n_harmonic
    }

    /// Current learned table bank, [K, L]
    pub fn wavetable_bank(&self) -> Tensor<B, 2> {
        self.wavetable_bank.val()
    }

    /// State before the first frame: zero hidden vector, the bank as the
    /// previously played set
    pub fn initial_state(&self, device: &B::Device) -> ModelState<B> {
        ModelState {
            hidden: Tensor::zeros([1, self.hidden_size()], device),
            wavetables: self.wavetable_bank.val(),
        }
    }

    fn encode(&self, frame: Tensor<B, 2>) -> Tensor<B, 2> {
        leaky_relu(self.encoder_norm.forward(self.encoder.forward(frame)), LEAKY_SLOPE)
    }

    /// Run one frame through the model
    ///
    /// # Arguments
    /// * `state` - State returned by the previous step (or `initial_state`)
    /// * `frame` - Conditioning row, [1, input_size]
    ///
    /// # Returns
    /// The state for the next step and this step's outputs
    pub fn step(&self, state: ModelState<B>, frame: Tensor<B, 2>) -> (ModelState<B>, StepOutput<B>) {
        let encoded = self.encode(frame);
        let hidden = self.gru.forward(encoded.clone(), state.hidden);

        let trunk = leaky_relu(
            self.trunk_norm
                .forward(self.trunk.forward(Tensor::cat(vec![hidden.clone(), encoded], 1))),
            LEAKY_SLOPE,
        );

        let attention = softmax(
            self.attention_head
                .forward(trunk.clone())
                .div_scalar(self.attention_temperature),
            1,
        );
        let harmonics = softmax(self.harmonic_head.forward(trunk.clone()), 1);
        let smoothing = sigmoid(self.smoothing_head.forward(trunk.clone()));

        let delta = self
            .wavetable_head
            .forward(trunk)
            .tanh()
            .mul_scalar(self.wavetable_delta_scale)
            .reshape([self.n_wavetables, self.table_size]);
        let new_wavetables = self.wavetable_bank.val() + delta;
        let old_wavetables = state.wavetables;
        let played_wavetables = old_wavetables.clone()
            + (new_wavetables.clone() - old_wavetables.clone()) * smoothing.clone();

        let next = ModelState {
            hidden: hidden.clone(),
            wavetables: played_wavetables.clone(),
        };
        let output = StepOutput {
            hidden,
            attention,
            harmonics,
            smoothing,
            new_wavetables,
            old_wavetables,
            played_wavetables,
        };
        (next, output)
    }

    fn check_input(&self, features: &FeatureSequence) -> Result<(), InferenceError> {
        if features.timbre_dim() != self.n_mfcc {
            return Err(InferenceError::invalid(
                Stage::Model,
                format!(
                    "timbre dimension {} does not match model input {}",
                    features.timbre_dim(),
                    self.n_mfcc
                ),
            ));
        }
        Ok(())
    }

    /// Predict controls for every frame of a clip
    ///
    /// # Arguments
    /// * `features` - Validated feature sequence
    /// * `loudness_floor_db` - Silence level used to gate envelope levels
    ///
    /// # Errors
    /// `InvalidInput` (stage `model`) when the timbre dimension differs from
    /// the configured `n_mfcc`
    pub fn forward(
        &self,
        features: &FeatureSequence,
        loudness_floor_db: f32,
    ) -> Result<PredictionTensors<B>, InferenceError> {
        self.check_input(features)?;
        let device = self.wavetable_bank.val().device();
        let conditioning = Conditioning::from_features(features, loudness_floor_db);
        let frames = conditioning.num_frames();

        let rows = Tensor::<B, 2>::from_data(
            TensorData::new(conditioning.rows.clone(), [frames, self.input_size()]),
            &device,
        );

        let mut state = self.initial_state(&device);
        let mut hidden = Vec::with_capacity(frames);
        let mut attention = Vec::with_capacity(frames);
        let mut harmonics = Vec::with_capacity(frames);
        let mut smoothing = Vec::with_capacity(frames);
        let mut played = Vec::with_capacity(frames);
        let mut old = Vec::with_capacity(frames);
        let mut new = Vec::with_capacity(frames);

        for t in 0..frames {
            let (next, output) = self.step(state, rows.clone().narrow(0, t, 1));
            state = next;
            hidden.push(output.hidden);
            attention.push(output.attention);
            harmonics.push(output.harmonics);
            smoothing.push(output.smoothing);
            played.push(output.played_wavetables);
            old.push(output.old_wavetables);
            new.push(output.new_wavetables);
        }

        let hidden = Tensor::cat(hidden, 0);
        let segments = features.segments();
        let envelopes = self.segment_envelopes(hidden, &segments, &conditioning.loudness_gate);

        Ok(PredictionTensors {
            wavetables: Tensor::stack(played, 0),
            old_wavetables: Tensor::stack(old, 0),
            new_wavetables: Tensor::stack(new, 0),
            smoothing: Tensor::cat(smoothing, 0),
            attention: Tensor::cat(attention, 0),
            harmonics: Tensor::cat(harmonics, 0),
            envelopes,
            f0_hz: conditioning.f0_hz,
            voiced: conditioning.voiced,
            loudness_gate: conditioning.loudness_gate,
            segments,
        })
    }

    /// ADSR per segment from the mean hidden state, [S, 5]
    ///
    /// Times map to [0.001, 0.001 + max_envelope_secs]; sustain and peak are
    /// scaled by the segment's mean loudness gate.
    fn segment_envelopes(
        &self,
        hidden: Tensor<B, 2>,
        segments: &[std::ops::Range<usize>],
        gates: &[f32],
    ) -> Tensor<B, 2> {
        let device = hidden.device();
        let pooled: Vec<Tensor<B, 2>> = segments
            .iter()
            .map(|range| {
                hidden
                    .clone()
                    .narrow(0, range.start, range.len())
                    .mean_dim(0)
            })
            .collect();
        let raw = sigmoid(self.envelope_head.forward(Tensor::cat(pooled, 0)));

        let time = self.max_envelope_secs;
        let mut scale = Vec::with_capacity(segments.len() * EnvelopeParameters::WIDTH);
        let mut offset = Vec::with_capacity(segments.len() * EnvelopeParameters::WIDTH);
        for range in segments {
            let gate = gates[range.clone()].iter().sum::<f32>() / range.len().max(1) as f32;
            scale.extend_from_slice(&[time, time, gate, time, gate]);
            offset.extend_from_slice(&[MIN_STAGE_SECS, MIN_STAGE_SECS, 0.0, MIN_STAGE_SECS, 0.0]);
        }
        let shape = [segments.len(), EnvelopeParameters::WIDTH];
        let scale = Tensor::<B, 2>::from_data(TensorData::new(scale, shape), &device);
        let offset = Tensor::<B, 2>::from_data(TensorData::new(offset, shape), &device);

        raw * scale + offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{FeatureFrame, OnsetMarker};
    use crate::InferenceBackend;

    fn small_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.model.hidden_size = 16;
        config.model.n_wavetables = 4;
        config.model.table_size = 32;
        config.model.n_harmonic = 4;
        config.features.n_mfcc = 5;
        config
    }

    fn features(frames: usize, n_mfcc: usize, loudness_db: f32, onsets: Vec<usize>) -> FeatureSequence {
        let frames = (0..frames)
            .map(|t| FeatureFrame {
                f0_hz: if loudness_db > -80.0 { 220.0 } else { 0.0 },
                loudness_db,
                timbre: (0..n_mfcc).map(|i| (i + t) as f32).collect(),
                timestamp_secs: t as f32 * 0.01,
            })
            .collect();
        let onsets = onsets
            .into_iter()
            .map(|frame_index| OnsetMarker { frame_index })
            .collect();
        FeatureSequence::new(frames, onsets).unwrap()
    }

    fn values<const D: usize>(t: Tensor<InferenceBackend, D>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_forward_shapes() {
        let config = small_config();
        let device = Default::default();
        let model = WavetableSynthModel::<InferenceBackend>::new(&config, &device);
        let seq = features(6, 5, -20.0, vec![3]);

        let out = model.forward(&seq, -80.0).unwrap();
        assert_eq!(out.wavetables.dims(), [6, 4, 32]);
        assert_eq!(out.attention.dims(), [6, 4]);
        assert_eq!(out.harmonics.dims(), [6, 4]);
        assert_eq!(out.smoothing.dims(), [6, 1]);
        assert_eq!(out.envelopes.dims(), [2, 5]);
        assert_eq!(out.segments, vec![0..3, 3..6]);
    }

    #[test]
    fn test_attention_and_harmonics_are_distributions() {
        let config = small_config();
        let device = Default::default();
        let model = WavetableSynthModel::<InferenceBackend>::new(&config, &device);
        let out = model.forward(&features(5, 5, -30.0, vec![]), -80.0).unwrap();

        for row in values(out.attention).chunks(4) {
            assert!(row.iter().all(|&w| w >= 0.0));
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
        for row in values(out.harmonics).chunks(4) {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
        assert!(values(out.smoothing).iter().all(|&c| (0.0..=1.0).contains(&c)));
    }

    #[test]
    fn test_played_set_chains_into_next_old_set() {
        let config = small_config();
        let device = Default::default();
        let model = WavetableSynthModel::<InferenceBackend>::new(&config, &device);
        let out = model.forward(&features(3, 5, -20.0, vec![]), -80.0).unwrap();

        let played = values(out.wavetables.clone().narrow(0, 0, 1));
        let next_old = values(out.old_wavetables.clone().narrow(0, 1, 1));
        assert_eq!(played, next_old);

        let first_old = values(out.old_wavetables.narrow(0, 0, 1));
        assert_eq!(first_old, values(model.wavetable_bank()));
    }

    #[test]
    fn test_wrong_timbre_dimension_rejected() {
        let config = small_config();
        let device = Default::default();
        let model = WavetableSynthModel::<InferenceBackend>::new(&config, &device);
        let err = model.forward(&features(3, 7, -20.0, vec![]), -80.0).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Model));
    }

    #[test]
    fn test_silence_gates_envelope_levels() {
        let config = small_config();
        let device = Default::default();
        let model = WavetableSynthModel::<InferenceBackend>::new(&config, &device);
        let out = model.forward(&features(4, 5, -80.0, vec![]), -80.0).unwrap();

        let env = values(out.envelopes);
        assert_eq!(env[2], 0.0, "sustain");
        assert_eq!(env[4], 0.0, "peak");
        assert!(env[0] >= MIN_STAGE_SECS && env[0] <= MIN_STAGE_SECS + 2.0);
    }

    #[test]
    fn test_negative_pitch_renders_as_silence() {
        let config = small_config();
        let device = Default::default();
        let model = WavetableSynthModel::<InferenceBackend>::new(&config, &device);
        let frames = (0..4)
            .map(|t| FeatureFrame {
                f0_hz: -1.0,
                loudness_db: -20.0,
                timbre: vec![1.0; 5],
                timestamp_secs: t as f32 * 0.01,
            })
            .collect();
        let seq = FeatureSequence::new(frames, vec![]).unwrap();

        let out = model.forward(&seq, -80.0).unwrap();
        assert_eq!(out.f0_hz, vec![0.0; 4]);
        assert_eq!(out.voiced, vec![0.0; 4]);

        let engine = crate::synthesis::SynthesisEngine::new(&config);
        let wave = engine.render_clipped(&out).unwrap();
        assert_eq!(wave.len(), engine.output_len(4));
        assert!(wave.samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_forward_is_deterministic() {
        let config = small_config();
        let device = Default::default();
        let model = WavetableSynthModel::<InferenceBackend>::new(&config, &device);
        let seq = features(4, 5, -20.0, vec![]);

        let a = model.forward(&seq, -80.0).unwrap().to_prediction().unwrap();
        let b = model.forward(&seq, -80.0).unwrap().to_prediction().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_analytic_bank_shapes() {
        let sine = analytic_wavetable(0, 8);
        assert!(sine[0].abs() < 1e-6);
        assert!((sine[2] - 1.0).abs() < 1e-6);
        let square = analytic_wavetable(2, 8);
        assert_eq!(square, vec![1.0, 1.0, 1.0, 1.0, -1.0, -1.0, -1.0, -1.0]);
    }
}
