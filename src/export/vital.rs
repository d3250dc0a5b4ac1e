// Vital preset exporter
//
// Only oscillator 1 is driven. Parameter ranges follow Vital's own knob
// scales:
//   osc_1_transpose   whole semitones from C4, [-48, 48]
//   osc_1_tune        residual semitone, [-1, 1]
//   osc_1_level       sqrt(linear gain), [0, 1]
//   osc_1_wave_frame  wavetable position, [0, 256]
//   env_1_*           seconds^(1/4), [0, 2.37842]; sustain [0, 1]
//   volume            5473.0404 is unity gain
// The predicted wavetables, with the mean harmonic mix baked in, become the
// keyframes of osc 1's wavetable.

use base64::Engine;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::{clamp_parameter, PresetExporter, PresetMetadata, SynthPreset, SynthTarget};
use crate::config::ExportConfig;
use crate::error::ExportError;
use crate::model::{EnvelopeParameters, ModelPrediction};

/// Frequency of Vital's untransposed oscillator (C4)
pub const VITAL_REFERENCE_HZ: f64 = 261.6256;

/// `volume` value for unity gain
pub const VITAL_UNITY_VOLUME: f64 = 5473.0404;

/// Samples per Vital wavetable frame
pub const VITAL_FRAME_SIZE: usize = 2048;

/// Wavetable positions 0..=256
pub const VITAL_WAVE_FRAMES: usize = 257;

const VITAL_VERSION: &str = "1.5.5";
const MAX_TRANSPOSE: f64 = 48.0;
const MAX_ENVELOPE_VALUE: f64 = 2.37842;
/// Parameter values are rounded to 1 / PARAMETER_STEPS
const PARAMETER_STEPS: f64 = 1e6;

/// Top-level `.vital` document; fields serialize in declaration order
#[derive(Serialize)]
struct VitalDocument<'a> {
    author: &'a str,
    comments: String,
    macro1: &'static str,
    macro2: &'static str,
    macro3: &'static str,
    macro4: &'static str,
    preset_name: &'a str,
    preset_style: &'a str,
    settings: BTreeMap<String, Value>,
    synth_version: &'static str,
}

/// Writes `.vital` JSON presets
#[derive(Debug, Clone)]
pub struct VitalExporter {
    preset_name: String,
    preset_style: String,
    author: String,
}

fn quantize(value: f64) -> f64 {
    (value * PARAMETER_STEPS).round() / PARAMETER_STEPS
}

/// Vital's quartic time scale
fn envelope_time(name: &str, seconds: f32) -> Result<f64, ExportError> {
    let seconds = clamp_parameter(name, seconds as f64, 0.0, f64::MAX)?;
    clamp_parameter(name, seconds.powf(0.25), 0.0, MAX_ENVELOPE_VALUE)
}

/// Single cycle with the harmonic mix applied:
/// out[i] = Σ_h a_h · table[(h·i) mod L]
fn bake_harmonics(table: &[f32], harmonics: &[f32]) -> Vec<f32> {
    let len = table.len();
    (0..len)
        .map(|i| {
            harmonics
                .iter()
                .enumerate()
                .map(|(h, &a)| a * table[((h + 1) * i) % len])
                .sum()
        })
        .collect()
}

/// Periodic linear resampling to `size` samples, peak-normalized
fn to_vital_frame(cycle: &[f32], size: usize) -> Vec<f32> {
    let len = cycle.len();
    let mut frame: Vec<f32> = (0..size)
        .map(|i| {
            let position = i as f64 * len as f64 / size as f64;
            let index = position.floor() as usize % len;
            let frac = (position - position.floor()) as f32;
            let a = cycle[index];
            let b = cycle[(index + 1) % len];
            a + (b - a) * frac
        })
        .collect();

    let peak = frame.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    if peak > 1e-9 {
        frame.iter_mut().for_each(|v| *v /= peak);
    }
    frame
}

fn encode_frame(frame: &[f32]) -> String {
    let bytes: Vec<u8> = frame.iter().flat_map(|v| v.to_le_bytes()).collect();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Keyframe position of table `k` of `n_tables`
fn keyframe_position(k: usize, n_tables: usize) -> usize {
    if n_tables <= 1 {
        return 0;
    }
    let last = (VITAL_WAVE_FRAMES - 1) as f64;
    (k as f64 * last / (n_tables - 1) as f64).round() as usize
}

fn wavetable_entry(name: &str, keyframes: Vec<Value>) -> Value {
    json!({
        "author": "",
        "full_normalize": true,
        "groups": [{
            "components": [{
                "interpolation": 1,
                "interpolation_style": 1,
                "keyframes": keyframes,
                "type": "Wave Source"
            }]
        }],
        "name": name,
        "remove_all_dc": true,
        "version": VITAL_VERSION
    })
}

impl VitalExporter {
    pub fn new(config: &ExportConfig) -> Self {
        Self {
            preset_name: config.preset_name.clone(),
            preset_style: config.preset_style.clone(),
            author: config.author.clone(),
        }
    }

    /// Flat parameter values in Vital units
    fn parameters(&self, prediction: &ModelPrediction) -> Result<BTreeMap<String, f64>, ExportError> {
        let mut params = BTreeMap::new();

        params.insert("osc_1_on".to_string(), 1.0);
        params.insert("osc_2_on".to_string(), 0.0);
        params.insert("osc_3_on".to_string(), 0.0);

        let (transpose, tune) = match prediction.median_f0() {
            Some(f0) => {
                let semitones = clamp_parameter(
                    "osc_1_transpose",
                    12.0 * (f0 as f64 / VITAL_REFERENCE_HZ).log2(),
                    -MAX_TRANSPOSE - 1.0,
                    MAX_TRANSPOSE + 1.0,
                )?;
                let transpose = semitones.round().clamp(-MAX_TRANSPOSE, MAX_TRANSPOSE);
                let tune = clamp_parameter("osc_1_tune", semitones - transpose, -1.0, 1.0)?;
                (transpose, tune)
            }
            None => (0.0, 0.0),
        };
        params.insert("osc_1_transpose".to_string(), transpose);
        params.insert("osc_1_tune".to_string(), tune);

        let envelope = prediction.primary_envelope().unwrap_or(EnvelopeParameters {
            attack_secs: 0.0,
            decay_secs: 0.0,
            sustain_level: 0.0,
            release_secs: 0.0,
            peak_level: 0.0,
        });
        let peak = clamp_parameter("osc_1_level", envelope.peak_level as f64, 0.0, 1.0)?;
        params.insert("osc_1_level".to_string(), peak.sqrt());

        let frame = keyframe_position(prediction.dominant_wavetable(), prediction.n_tables);
        params.insert("osc_1_wave_frame".to_string(), frame as f64);

        params.insert("env_1_attack".to_string(), envelope_time("env_1_attack", envelope.attack_secs)?);
        params.insert("env_1_decay".to_string(), envelope_time("env_1_decay", envelope.decay_secs)?);
        params.insert(
            "env_1_sustain".to_string(),
            clamp_parameter("env_1_sustain", envelope.sustain_level as f64, 0.0, 1.0)?,
        );
        params.insert("env_1_release".to_string(), envelope_time("env_1_release", envelope.release_secs)?);
        for power in ["env_1_attack_power", "env_1_decay_power", "env_1_release_power"] {
            params.insert(power.to_string(), 0.0);
        }

        let volume = if prediction.is_silent() { 0.0 } else { VITAL_UNITY_VOLUME };
        params.insert("volume".to_string(), volume);

        for value in params.values_mut() {
            *value = quantize(*value);
        }
        Ok(params)
    }

    /// Oscillator 1 keyframes from the mean played tables
    fn keyframes(&self, prediction: &ModelPrediction) -> Result<Vec<Value>, ExportError> {
        let tables = prediction.mean_wavetables().ok_or_else(|| ExportError::Serialization {
            reason: "prediction has no frames".to_string(),
        })?;
        let harmonics = prediction.mean_harmonics();
        if let Some(bad) = tables.as_slice().iter().chain(harmonics.iter()).find(|v| v.is_nan()) {
            return Err(ExportError::RangeUnmappable {
                parameter: "wave_data".to_string(),
                value: *bad as f64,
            });
        }

        Ok((0..tables.n_tables())
            .map(|k| {
                let frame = to_vital_frame(&bake_harmonics(tables.table(k), &harmonics), VITAL_FRAME_SIZE);
                json!({
                    "position": keyframe_position(k, tables.n_tables()),
                    "wave_data": encode_frame(&frame)
                })
            })
            .collect())
    }
}

impl PresetExporter for VitalExporter {
    fn target(&self) -> SynthTarget {
        SynthTarget::Vital
    }

    fn export(&self, prediction: &ModelPrediction) -> Result<SynthPreset, ExportError> {
        let parameters = self.parameters(prediction)?;

        let sine: Vec<f32> = (0..VITAL_FRAME_SIZE)
            .map(|i| (2.0 * std::f32::consts::PI * i as f32 / VITAL_FRAME_SIZE as f32).sin())
            .collect();
        let init_keyframe = json!({ "position": 0, "wave_data": encode_frame(&sine) });

        let mut settings: BTreeMap<String, Value> = parameters
            .iter()
            .map(|(name, &value)| (name.clone(), Value::from(value)))
            .collect();
        settings.insert(
            "wavetables".to_string(),
            Value::Array(vec![
                wavetable_entry(&self.preset_name, self.keyframes(prediction)?),
                wavetable_entry("Init", vec![init_keyframe.clone()]),
                wavetable_entry("Init", vec![init_keyframe]),
            ]),
        );

        let document = VitalDocument {
            author: &self.author,
            comments: format!(
                "Modeled from {} frames with {} wavetables",
                prediction.num_frames(),
                prediction.n_tables
            ),
            macro1: "MACRO 1",
            macro2: "MACRO 2",
            macro3: "MACRO 3",
            macro4: "MACRO 4",
            preset_name: &self.preset_name,
            preset_style: &self.preset_style,
            settings,
            synth_version: VITAL_VERSION,
        };
        let bytes = serde_json::to_vec(&document)?;

        tracing::debug!(
            "[PresetExporter] Vital preset '{}': {} parameters, {} bytes",
            self.preset_name,
            parameters.len(),
            bytes.len()
        );

        Ok(SynthPreset::new(
            SynthTarget::Vital,
            PresetMetadata {
                name: self.preset_name.clone(),
                style: self.preset_style.clone(),
                author: self.author.clone(),
                oscillator_count: 1,
            },
            parameters,
            bytes,
        ))
    }
}
