// Prediction types - model outputs as tensors and as plain values
//
// `PredictionTensors` keeps the graph alive for the synthesis engine and
// the loss; `ModelPrediction` is the detached, call-scoped copy the exporter
// reads.

use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::{InferenceError, Stage};

/// K single-cycle tables of `table_size` samples, stored row-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WavetableSet {
    n_tables: usize,
    table_size: usize,
    data: Vec<f32>,
}

impl WavetableSet {
    /// # Errors
    /// `InvalidInput` when `data.len() != n_tables * table_size`
    pub fn new(n_tables: usize, table_size: usize, data: Vec<f32>) -> Result<Self, InferenceError> {
        if n_tables == 0 || table_size == 0 || data.len() != n_tables * table_size {
            return Err(InferenceError::invalid(
                Stage::Model,
                format!(
                    "wavetable data length {} does not match {} x {}",
                    data.len(),
                    n_tables,
                    table_size
                ),
            ));
        }
        Ok(Self {
            n_tables,
            table_size,
            data,
        })
    }

    pub fn n_tables(&self) -> usize {
        self.n_tables
    }

    pub fn table_size(&self) -> usize {
        self.table_size
    }

    pub fn table(&self, k: usize) -> &[f32] {
        &self.data[k * self.table_size..(k + 1) * self.table_size]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// `old + c·(new − old)`; c = 0 gives `old`, c = 1 gives `new` exactly
    pub fn interpolate(old: &WavetableSet, new: &WavetableSet, c: f32) -> WavetableSet {
        let c = c.clamp(0.0, 1.0);
        let data = old
            .data
            .iter()
            .zip(new.data.iter())
            .map(|(&o, &n)| {
                if c == 0.0 {
                    o
                } else if c == 1.0 {
                    n
                } else {
                    o + c * (n - o)
                }
            })
            .collect();
        WavetableSet {
            n_tables: old.n_tables,
            table_size: old.table_size,
            data,
        }
    }

    /// Element-wise mean of several sets of the same shape
    pub fn mean(sets: &[WavetableSet]) -> Option<WavetableSet> {
        let first = sets.first()?;
        let mut data = vec![0.0f32; first.data.len()];
        for set in sets {
            for (acc, v) in data.iter_mut().zip(set.data.iter()) {
                *acc += v;
            }
        }
        let n = sets.len() as f32;
        data.iter_mut().for_each(|v| *v /= n);
        Some(WavetableSet {
            n_tables: first.n_tables,
            table_size: first.table_size,
            data,
        })
    }
}

/// ADSR amplitude envelope of one note segment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeParameters {
    pub attack_secs: f32,
    pub decay_secs: f32,
    pub sustain_level: f32,
    pub release_secs: f32,
    pub peak_level: f32,
}

impl EnvelopeParameters {
    /// Envelope columns in tensor order
    pub const WIDTH: usize = 5;

    fn from_row(row: &[f32]) -> Self {
        Self {
            attack_secs: row[0],
            decay_secs: row[1],
            sustain_level: row[2],
            release_secs: row[3],
            peak_level: row[4],
        }
    }
}

/// Model outputs for a whole clip, still attached to the autodiff graph
#[derive(Debug, Clone)]
pub struct PredictionTensors<B: Backend> {
    /// Played tables `old + c·(new − old)`, [T, K, L]
    pub wavetables: Tensor<B, 3>,
    /// Tables the step started from, [T, K, L]
    pub old_wavetables: Tensor<B, 3>,
    /// Tables proposed by the step, [T, K, L]
    pub new_wavetables: Tensor<B, 3>,
    /// Smoothing coefficient per frame, [T, 1]
    pub smoothing: Tensor<B, 2>,
    /// Attention over tables per frame, [T, K]
    pub attention: Tensor<B, 2>,
    /// Harmonic mix per frame, [T, H]
    pub harmonics: Tensor<B, 2>,
    /// attack, decay, sustain, release, peak per segment, [S, 5]
    pub envelopes: Tensor<B, 2>,
    pub f0_hz: Vec<f32>,
    pub voiced: Vec<f32>,
    pub loudness_gate: Vec<f32>,
    pub segments: Vec<Range<usize>>,
}

fn tensor_values<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
    name: &str,
) -> Result<Vec<f32>, InferenceError> {
    let values = tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|err| InferenceError::diverged(Stage::Model, format!("{}: {:?}", name, err)))?;
    if values.iter().any(|v| !v.is_finite()) {
        return Err(InferenceError::diverged(
            Stage::Model,
            format!("{} contains non-finite values", name),
        ));
    }
    Ok(values)
}

fn split_rows(values: Vec<f32>, width: usize) -> Vec<Vec<f32>> {
    values.chunks(width.max(1)).map(|c| c.to_vec()).collect()
}

impl<B: Backend> PredictionTensors<B> {
    pub fn num_frames(&self) -> usize {
        self.f0_hz.len()
    }

    /// Detach every output into plain values
    ///
    /// # Errors
    /// `NumericDivergence` (stage `model`) if any output is non-finite
    pub fn to_prediction(&self) -> Result<ModelPrediction, InferenceError> {
        let [frames, n_tables, table_size] = self.wavetables.dims();
        let n_harmonic = self.harmonics.dims()[1];
        let per_frame = n_tables * table_size;

        let to_sets = |values: Vec<f32>| -> Result<Vec<WavetableSet>, InferenceError> {
            values
                .chunks(per_frame)
                .map(|chunk| WavetableSet::new(n_tables, table_size, chunk.to_vec()))
                .collect()
        };

        let prediction = ModelPrediction {
            table_size,
            n_tables,
            n_harmonic,
            f0_hz: self.f0_hz.clone(),
            voiced: self.voiced.iter().map(|&v| v > 0.5).collect(),
            loudness_gate: self.loudness_gate.clone(),
            attention: split_rows(tensor_values(self.attention.clone(), "attention")?, n_tables),
            harmonics: split_rows(tensor_values(self.harmonics.clone(), "harmonics")?, n_harmonic),
            smoothing: tensor_values(self.smoothing.clone(), "smoothing")?,
            wavetables: to_sets(tensor_values(self.wavetables.clone(), "wavetables")?)?,
            old_wavetables: to_sets(tensor_values(self.old_wavetables.clone(), "old_wavetables")?)?,
            new_wavetables: to_sets(tensor_values(self.new_wavetables.clone(), "new_wavetables")?)?,
            envelopes: tensor_values(self.envelopes.clone(), "envelopes")?
                .chunks(EnvelopeParameters::WIDTH)
                .map(EnvelopeParameters::from_row)
                .collect(),
            segments: self.segments.clone(),
        };

        debug_assert_eq!(prediction.wavetables.len(), frames);
        Ok(prediction)
    }
}

/// Detached per-clip prediction, owned by one inference call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub table_size: usize,
    pub n_tables: usize,
    pub n_harmonic: usize,
    pub f0_hz: Vec<f32>,
    pub voiced: Vec<bool>,
    pub loudness_gate: Vec<f32>,
    pub attention: Vec<Vec<f32>>,
    pub harmonics: Vec<Vec<f32>>,
    pub smoothing: Vec<f32>,
    pub wavetables: Vec<WavetableSet>,
    pub old_wavetables: Vec<WavetableSet>,
    pub new_wavetables: Vec<WavetableSet>,
    pub envelopes: Vec<EnvelopeParameters>,
    pub segments: Vec<Range<usize>>,
}

impl ModelPrediction {
    pub fn num_frames(&self) -> usize {
        self.f0_hz.len()
    }

    /// Frames used for clip-level summaries: voiced frames, or all frames
    /// when nothing is voiced
    fn summary_frames(&self) -> Vec<usize> {
        let voiced: Vec<usize> = (0..self.num_frames()).filter(|&t| self.voiced[t]).collect();
        if voiced.is_empty() {
            (0..self.num_frames()).collect()
        } else {
            voiced
        }
    }

    fn mean_rows(rows: &[Vec<f32>], frames: &[usize], width: usize) -> Vec<f32> {
        let mut mean = vec![0.0f32; width];
        for &t in frames {
            for (acc, v) in mean.iter_mut().zip(rows[t].iter()) {
                *acc += v;
            }
        }
        let n = frames.len().max(1) as f32;
        mean.iter_mut().for_each(|v| *v /= n);
        mean
    }

    /// Mean attention weights over the summary frames
    pub fn mean_attention(&self) -> Vec<f32> {
        Self::mean_rows(&self.attention, &self.summary_frames(), self.n_tables)
    }

    /// Mean harmonic mix over the summary frames
    pub fn mean_harmonics(&self) -> Vec<f32> {
        Self::mean_rows(&self.harmonics, &self.summary_frames(), self.n_harmonic)
    }

    /// Index of the table with the highest mean attention
    pub fn dominant_wavetable(&self) -> usize {
        self.mean_attention()
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, _)| k)
            .unwrap_or(0)
    }

    /// Mean of the played tables over the summary frames
    pub fn mean_wavetables(&self) -> Option<WavetableSet> {
        let sets: Vec<WavetableSet> = self
            .summary_frames()
            .into_iter()
            .map(|t| self.wavetables[t].clone())
            .collect();
        WavetableSet::mean(&sets)
    }

    /// Median f0 over voiced frames
    pub fn median_f0(&self) -> Option<f32> {
        let mut voiced: Vec<f32> = self
            .f0_hz
            .iter()
            .zip(self.voiced.iter())
            .filter(|(_, &v)| v)
            .map(|(&f, _)| f)
            .collect();
        if voiced.is_empty() {
            return None;
        }
        voiced.sort_by(|a, b| a.total_cmp(b));
        let mid = voiced.len() / 2;
        Some(if voiced.len().is_multiple_of(2) {
            (voiced[mid - 1] + voiced[mid]) / 2.0
        } else {
            voiced[mid]
        })
    }

    /// Envelope of the longest note segment (first one on ties)
    pub fn primary_envelope(&self) -> Option<EnvelopeParameters> {
        let (index, _) = self
            .segments
            .iter()
            .enumerate()
            .rev()
            .max_by_key(|(_, range)| range.len())?;
        self.envelopes.get(index).copied()
    }

    /// True when no frame is voiced and no frame rises above the silence floor
    pub fn is_silent(&self) -> bool {
        const SILENT_GATE: f32 = 1e-3;
        !self.voiced.iter().any(|&v| v) && self.loudness_gate.iter().all(|&g| g < SILENT_GATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[f32]) -> WavetableSet {
        WavetableSet::new(1, values.len(), values.to_vec()).unwrap()
    }

    #[test]
    fn test_interpolation_boundaries() {
        let old = set(&[0.1, 0.2, 0.3]);
        let new = set(&[0.9, -0.4, 0.7]);
        assert_eq!(WavetableSet::interpolate(&old, &new, 0.0), old);
        assert_eq!(WavetableSet::interpolate(&old, &new, 1.0), new);

        let mid = WavetableSet::interpolate(&old, &new, 0.5);
        assert!((mid.as_slice()[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_wavetable_shape_checked() {
        assert!(WavetableSet::new(2, 4, vec![0.0; 7]).is_err());
        let ok = WavetableSet::new(2, 4, (0..8).map(|i| i as f32).collect()).unwrap();
        assert_eq!(ok.table(1), &[4.0, 5.0, 6.0, 7.0]);
    }

    fn prediction(voiced: Vec<bool>, attention: Vec<Vec<f32>>) -> ModelPrediction {
        let frames = voiced.len();
        let table = set(&[0.0, 1.0]);
        ModelPrediction {
            table_size: 2,
            n_tables: 1,
            n_harmonic: 1,
            f0_hz: voiced.iter().map(|&v| if v { 220.0 } else { 0.0 }).collect(),
            voiced,
            loudness_gate: vec![0.5; frames],
            attention,
            harmonics: vec![vec![1.0]; frames],
            smoothing: vec![0.5; frames],
            wavetables: vec![table.clone(); frames],
            old_wavetables: vec![table.clone(); frames],
            new_wavetables: vec![table; frames],
            envelopes: vec![
                EnvelopeParameters {
                    attack_secs: 0.01,
                    decay_secs: 0.1,
                    sustain_level: 0.5,
                    release_secs: 0.2,
                    peak_level: 0.8,
                },
                EnvelopeParameters {
                    attack_secs: 0.02,
                    decay_secs: 0.1,
                    sustain_level: 0.4,
                    release_secs: 0.2,
                    peak_level: 0.7,
                },
            ],
            segments: vec![0..1, 1..frames],
        }
    }

    #[test]
    fn test_summaries_prefer_voiced_frames() {
        let mut p = prediction(vec![false, true, true], vec![vec![1.0]; 3]);
        p.attention = vec![vec![0.2, 0.8], vec![0.9, 0.1], vec![0.7, 0.3]];
        p.n_tables = 2;
        assert_eq!(p.dominant_wavetable(), 0);
        assert_eq!(p.median_f0(), Some(220.0));
        assert_eq!(p.primary_envelope().unwrap().attack_secs, 0.02);
        assert!(!p.is_silent());
    }

    #[test]
    fn test_silent_prediction() {
        let mut p = prediction(vec![false, false], vec![vec![1.0]; 2]);
        p.loudness_gate = vec![0.0; 2];
        assert!(p.is_silent());
        assert_eq!(p.median_f0(), None);
    }
}
