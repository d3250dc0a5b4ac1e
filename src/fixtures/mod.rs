//! Deterministic audio fixtures and WAV I/O.
//!
//! Synthetic tones, noise and silence let the test-suite exercise the
//! pipeline without recorded material. `read_wav` is the CLI's and the
//! dataset loader's entry point for real files; WAV files are decoded with
//! `hound` and mixed down to mono.

use rand::{rngs::StdRng, Rng, SeedableRng};
use std::f32::consts::PI;
use std::path::Path;

use crate::analysis::Waveform;
use crate::error::{InferenceError, Stage};

/// Periodic and noise patterns a fixture can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pattern {
    Sine,
    WhiteNoise,
}

struct Fixture {
    pattern: Pattern,
    frequency_hz: f32,
    amplitude: f32,
    duration_secs: f32,
    sample_rate: u32,
    seed: u64,
}

impl Fixture {
    fn render(&self) -> Waveform {
        let len = duration_samples(self.duration_secs, self.sample_rate);
        let step = self.frequency_hz.max(0.0) / self.sample_rate.max(1) as f32;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut phase = 0.0f32;

        let samples = (0..len)
            .map(|_| {
                let value = match self.pattern {
                    Pattern::Sine => (2.0 * PI * phase).sin(),
                    Pattern::WhiteNoise => rng.gen_range(-1.0f32..1.0),
                };
                phase += step;
                if phase >= 1.0 {
                    phase -= phase.floor();
                }
                value * self.amplitude
            })
            .collect();

        Waveform {
            samples,
            sample_rate: self.sample_rate,
        }
    }
}

fn duration_samples(duration_secs: f32, sample_rate: u32) -> usize {
    (duration_secs.max(0.0) * sample_rate as f32).round() as usize
}

/// Sine tone starting at phase 0
pub fn generate_sine(frequency_hz: f32, amplitude: f32, duration_secs: f32, sample_rate: u32) -> Waveform {
    Fixture {
        pattern: Pattern::Sine,
        frequency_hz,
        amplitude,
        duration_secs,
        sample_rate,
        seed: 0,
    }
    .render()
}

/// Seeded uniform white noise
pub fn generate_noise(amplitude: f32, duration_secs: f32, sample_rate: u32, seed: u64) -> Waveform {
    Fixture {
        pattern: Pattern::WhiteNoise,
        frequency_hz: 0.0,
        amplitude,
        duration_secs,
        sample_rate,
        seed,
    }
    .render()
}

/// Digital silence
pub fn generate_silence(duration_secs: f32, sample_rate: u32) -> Waveform {
    Waveform {
        samples: vec![0.0; duration_samples(duration_secs, sample_rate)],
        sample_rate,
    }
}

fn io_error(path: &Path, err: impl std::fmt::Display) -> InferenceError {
    InferenceError::Io {
        details: format!("{}: {}", path.display(), err),
    }
}

/// Decode a WAV file into a mono waveform
///
/// Integer formats are scaled to [-1, 1); multi-channel audio is averaged.
///
/// # Errors
/// `Io` when the file cannot be opened or decoded, `InvalidInput` for
/// unsupported formats or an empty file.
pub fn read_wav(path: &Path) -> Result<Waveform, InferenceError> {
    let mut reader = hound::WavReader::open(path).map_err(|err| io_error(path, err))?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(InferenceError::invalid(
            Stage::FeatureExtraction,
            format!("{} has zero channels", path.display()),
        ));
    }

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<f32>, _>>()
            .map_err(|err| io_error(path, err))?,
        hound::SampleFormat::Int => match spec.bits_per_sample {
            8..=32 => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<f32>, _>>()
                    .map_err(|err| io_error(path, err))?
            }
            bits => {
                return Err(InferenceError::invalid(
                    Stage::FeatureExtraction,
                    format!("unsupported bits_per_sample={} for {}", bits, path.display()),
                ))
            }
        },
    };

    let channels = spec.channels as usize;
    let mono = if channels == 1 {
        samples
    } else {
        samples
            .chunks(channels)
            .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
            .collect()
    };

    Waveform::new(mono, spec.sample_rate)
}

/// Write a mono 32-bit float WAV file
///
/// Refuses to overwrite an existing file.
pub fn write_wav(path: &Path, waveform: &Waveform) -> Result<(), InferenceError> {
    let file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|err| io_error(path, err))?;

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: waveform.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::new(std::io::BufWriter::new(file), spec)
        .map_err(|err| io_error(path, err))?;
    for &sample in &waveform.samples {
        writer.write_sample(sample).map_err(|err| io_error(path, err))?;
    }
    writer.finalize().map_err(|err| io_error(path, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sine_fixture_shape() {
        let wave = generate_sine(220.0, 0.5, 1.0, 16_000);
        assert_eq!(wave.len(), 16_000);
        assert_eq!(wave.samples[0], 0.0);
        assert!((wave.peak() - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_noise_is_seeded() {
        let a = generate_noise(0.5, 0.1, 16_000, 7);
        let b = generate_noise(0.5, 0.1, 16_000, 7);
        let c = generate_noise(0.5, 0.1, 16_000, 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.samples.iter().all(|s| s.abs() <= 0.5));
    }

    #[test]
    fn test_wav_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let wave = generate_sine(440.0, 0.5, 0.25, 16_000);

        write_wav(&path, &wave).unwrap();
        let loaded = read_wav(&path).unwrap();
        assert_eq!(loaded.sample_rate, 16_000);
        assert_eq!(loaded.samples, wave.samples);

        assert!(write_wav(&path, &wave).is_err(), "must not overwrite");
    }

    #[test]
    fn test_stereo_int_wav_is_mixed_down() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(16_384i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let loaded = read_wav(&path).unwrap();
        assert_eq!(loaded.len(), 100);
        assert!((loaded.samples[0] - 0.25).abs() < 1e-4);
    }

    #[test]
    fn test_missing_wav_is_io_error() {
        let err = read_wav(Path::new("/definitely/not/here.wav")).unwrap_err();
        assert!(matches!(err, InferenceError::Io { .. }));
    }
}
