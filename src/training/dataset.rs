// Training datasets - clips with their extracted features
//
// A dataset only knows how many clips it has and how to produce clip i.
// Iteration is lazy and can be restarted any number of times; nothing
// about the on-disk layout leaks into the training loop.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};

use crate::analysis::{FeatureExtractor, FeatureSequence, Waveform};
use crate::config::AppConfig;
use crate::error::TrainingError;
use crate::fixtures::read_wav;

/// One training example
#[derive(Debug, Clone)]
pub struct TrainingClip {
    pub name: String,
    pub waveform: Waveform,
    pub features: FeatureSequence,
}

/// Indexed collection of training clips
pub trait ClipDataset {
    fn len(&self) -> usize;

    /// Produce clip `index` (`0..len()`)
    fn get(&self, index: usize) -> Result<TrainingClip, TrainingError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lazy pass over every clip in index order
    fn iter(&self) -> Box<dyn Iterator<Item = Result<TrainingClip, TrainingError>> + '_> {
        Box::new((0..self.len()).map(move |i| self.get(i)))
    }
}

fn out_of_range(index: usize, len: usize) -> TrainingError {
    TrainingError::Dataset {
        reason: format!("clip index {} out of range ({} clips)", index, len),
    }
}

/// Clips held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    clips: Vec<TrainingClip>,
}

impl InMemoryDataset {
    pub fn new(clips: Vec<TrainingClip>) -> Self {
        Self { clips }
    }

    /// Build clips from named waveforms, extracting features eagerly
    ///
    /// Waveforms are resampled to the configured rate and fitted to the
    /// configured clip length.
    pub fn from_waveforms(
        config: &AppConfig,
        waveforms: Vec<(String, Waveform)>,
    ) -> Result<Self, TrainingError> {
        let extractor = FeatureExtractor::new(config);
        let clip_samples = config.clip_samples();
        let clips = waveforms
            .into_iter()
            .map(|(name, waveform)| -> Result<TrainingClip, TrainingError> {
                let waveform = waveform
                    .resampled(config.common.sample_rate)
                    .fit_to_length(clip_samples);
                let features = extractor.extract(&waveform)?;
                Ok(TrainingClip {
                    name,
                    waveform,
                    features,
                })
            })
            .collect::<Result<Vec<_>, TrainingError>>()?;
        Ok(Self { clips })
    }
}

impl ClipDataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.clips.len()
    }

    fn get(&self, index: usize) -> Result<TrainingClip, TrainingError> {
        self.clips
            .get(index)
            .cloned()
            .ok_or_else(|| out_of_range(index, self.clips.len()))
    }
}

/// `*.wav` files of one directory, loaded on demand
///
/// Features come from a `<stem>.features.json` sidecar when one exists,
/// otherwise they are extracted from the audio.
pub struct WavDirectoryDataset {
    paths: Vec<PathBuf>,
    extractor: FeatureExtractor,
    sample_rate: u32,
    clip_samples: usize,
}

impl WavDirectoryDataset {
    /// Scan `dir` for WAV files (sorted by file name)
    pub fn open(dir: &Path, config: &AppConfig) -> Result<Self, TrainingError> {
        let entries = fs::read_dir(dir).map_err(|err| TrainingError::Dataset {
            reason: format!("cannot read {}: {}", dir.display(), err),
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .map(|ext| ext.eq_ignore_ascii_case("wav"))
                        .unwrap_or(false)
            })
            .collect();
        paths.sort();

        tracing::info!("[Dataset] Found {} clips in {}", paths.len(), dir.display());
        Ok(Self {
            paths,
            extractor: FeatureExtractor::new(config),
            sample_rate: config.common.sample_rate,
            clip_samples: config.clip_samples(),
        })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
        path.with_file_name(format!("{}.features.json", stem))
    }

    fn load_sidecar(&self, sidecar: &Path) -> Result<FeatureSequence, TrainingError> {
        let fail = |reason: String| TrainingError::Dataset {
            reason: format!("{}: {}", sidecar.display(), reason),
        };
        let text = fs::read_to_string(sidecar).map_err(|err| fail(err.to_string()))?;
        let features: FeatureSequence = serde_json::from_str(&text).map_err(|err| fail(err.to_string()))?;

        let expected = self.extractor.frame_count(self.clip_samples);
        if features.len() != expected {
            return Err(fail(format!(
                "sidecar has {} frames, clip has {}",
                features.len(),
                expected
            )));
        }
        Ok(features)
    }
}

impl ClipDataset for WavDirectoryDataset {
    fn len(&self) -> usize {
        self.paths.len()
    }

    fn get(&self, index: usize) -> Result<TrainingClip, TrainingError> {
        let path = self
            .paths
            .get(index)
            .ok_or_else(|| out_of_range(index, self.paths.len()))?;

        let waveform = read_wav(path)?
            .resampled(self.sample_rate)
            .fit_to_length(self.clip_samples);

        let sidecar = Self::sidecar_path(path);
        let features = if sidecar.is_file() {
            self.load_sidecar(&sidecar)?
        } else {
            self.extractor.extract(&waveform)?
        };

        Ok(TrainingClip {
            name: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            waveform,
            features,
        })
    }
}

/// View of selected clips of another dataset
pub struct Subset<'a, D: ClipDataset + ?Sized> {
    dataset: &'a D,
    indices: Vec<usize>,
}

impl<'a, D: ClipDataset + ?Sized> Subset<'a, D> {
    pub fn new(dataset: &'a D, indices: Vec<usize>) -> Self {
        Self { dataset, indices }
    }

    /// Indices into the parent dataset
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

impl<D: ClipDataset + ?Sized> ClipDataset for Subset<'_, D> {
    fn len(&self) -> usize {
        self.indices.len()
    }

    fn get(&self, index: usize) -> Result<TrainingClip, TrainingError> {
        let parent = *self
            .indices
            .get(index)
            .ok_or_else(|| out_of_range(index, self.indices.len()))?;
        self.dataset.get(parent)
    }
}

/// Seeded random split into (train, test)
///
/// `round(len × ratio)` clips go to the training side.
pub fn train_test_split<D: ClipDataset + ?Sized>(
    dataset: &D,
    ratio: f32,
    seed: u64,
) -> (Subset<'_, D>, Subset<'_, D>) {
    let mut indices: Vec<usize> = (0..dataset.len()).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));

    let n_train = ((dataset.len() as f32 * ratio.clamp(0.0, 1.0)).round() as usize).min(indices.len());
    let test = indices.split_off(n_train);
    (Subset::new(dataset, indices), Subset::new(dataset, test))
}
