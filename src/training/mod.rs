// Training loop shell
//
// Epoch = mini-batches over the train split (mean spectral loss per batch,
// backward, Adam step), then the held-out split on the non-autodiff copy of
// the model. Every epoch ends with a new checkpoint on disk.

mod dataset;

pub use dataset::{
    train_test_split, ClipDataset, InMemoryDataset, Subset, TrainingClip, WavDirectoryDataset,
};

use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{InferenceError, Stage, TrainingError};
use crate::loss::MultiResolutionStftLoss;
use crate::model::{load_checkpoint, save_checkpoint, ModelArchitecture, WavetableSynthModel};
use crate::synthesis::SynthesisEngine;
use crate::{InferenceBackend, TrainingBackend};

/// Outcome of one epoch
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    /// Mean loss of the applied batches; `None` when every batch was skipped
    pub train_loss: Option<f32>,
    /// Mean held-out loss; `None` for an empty test split
    pub test_loss: Option<f32>,
    pub skipped_batches: usize,
    /// Manifest of the checkpoint written after the epoch
    pub checkpoint: PathBuf,
}

/// Outcome of a full training run
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrainingSummary {
    pub epochs: Vec<EpochReport>,
}

impl TrainingSummary {
    pub fn final_checkpoint(&self) -> Option<&Path> {
        self.epochs.last().map(|report| report.checkpoint.as_path())
    }
}

/// Runs epochs of training over a dataset
pub struct Trainer {
    config: AppConfig,
    engine: SynthesisEngine,
    loss: MultiResolutionStftLoss,
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> Result<f32, InferenceError> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|err| InferenceError::diverged(Stage::Loss, format!("{:?}", err)))?
        .first()
        .copied()
        .ok_or_else(|| InferenceError::diverged(Stage::Loss, "empty loss tensor"))
}

/// Visiting order of the train split for one epoch, reshuffled per epoch
fn epoch_order(len: usize, seed: u64, epoch: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch as u64));
    order.shuffle(&mut rng);
    order
}

fn mean(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f32>() / values.len() as f32)
    }
}

impl Trainer {
    /// # Errors
    /// `Config` when the configuration fails validation
    pub fn new(config: AppConfig) -> Result<Self, TrainingError> {
        config.validate()?;
        Ok(Self {
            engine: SynthesisEngine::new(&config),
            loss: MultiResolutionStftLoss::new(&config.loss),
            config,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Spectral loss of one clip's reconstruction, [1]
    fn clip_loss<B: Backend>(
        &self,
        model: &WavetableSynthModel<B>,
        clip: &TrainingClip,
    ) -> Result<Tensor<B, 1>, InferenceError> {
        let prediction = model.forward(&clip.features, self.config.features.loudness_floor_db)?;
        let reconstruction = self.engine.render(&prediction);
        let samples = &clip.waveform.samples;
        let target = Tensor::<B, 1>::from_data(
            TensorData::new(samples.clone(), [samples.len()]),
            &reconstruction.device(),
        );
        Ok(self.loss.forward(reconstruction, target))
    }

    /// Mean held-out loss; diverging clips are logged and left out
    fn evaluate(
        &self,
        model: &WavetableSynthModel<InferenceBackend>,
        dataset: &dyn ClipDataset,
    ) -> Result<Option<f32>, TrainingError> {
        let mut losses = Vec::with_capacity(dataset.len());
        for clip in dataset.iter() {
            let clip = clip?;
            let value = scalar(self.clip_loss(model, &clip)?)?;
            if value.is_finite() {
                losses.push(value);
            } else {
                warn!("[Trainer] Held-out clip '{}' produced loss {}", clip.name, value);
            }
        }
        Ok(mean(&losses))
    }

    /// Train on `dataset`, optionally continuing from a checkpoint manifest
    ///
    /// # Returns
    /// One report per epoch, each naming the checkpoint written after it
    ///
    /// # Errors
    /// `Dataset` for an empty train split or unreadable clips, `Checkpoint`
    /// when weights cannot be written, `Inference` when resuming fails
    pub fn train(
        &self,
        dataset: &dyn ClipDataset,
        resume: Option<&Path>,
    ) -> Result<TrainingSummary, TrainingError> {
        let train_config = &self.config.train;
        let (train, test) = train_test_split(dataset, train_config.train_split, train_config.seed);
        if train.is_empty() {
            return Err(TrainingError::Dataset {
                reason: format!("no training clips ({} clips, split {})", dataset.len(), train_config.train_split),
            });
        }

        let device = Default::default();
        let (mut model, start_epoch) = match resume {
            Some(manifest) => {
                let (model, manifest) = load_checkpoint::<TrainingBackend>(manifest, &self.config, &device)?;
                info!("[Trainer] Resuming after epoch {}", manifest.epoch);
                (model, manifest.epoch)
            }
            None => (WavetableSynthModel::<TrainingBackend>::new(&self.config, &device), 0),
        };
        let architecture = ModelArchitecture::from_config(&self.config);
        let mut optimizer = AdamConfig::new().init::<TrainingBackend, WavetableSynthModel<TrainingBackend>>();

        info!(
            "[Trainer] {} train / {} test clips, {} epochs, batch size {}",
            train.len(),
            test.len(),
            train_config.epochs,
            train_config.batch_size
        );

        let mut summary = TrainingSummary::default();

        for epoch in start_epoch + 1..=start_epoch + train_config.epochs {
            let batch_indices = epoch_order(train.len(), train_config.seed, epoch);
            let mut batch_losses = Vec::new();
            let mut skipped_batches = 0;

            for batch in batch_indices.chunks(train_config.batch_size) {
                let mut terms = Vec::with_capacity(batch.len());
                for &index in batch {
                    let clip = train.get(index)?;
                    terms.push(self.clip_loss(&model, &clip)?);
                }
                let batch_loss = Tensor::cat(terms, 0).mean();
                let value = scalar(batch_loss.clone())?;

                if !value.is_finite() {
                    warn!("[Trainer] Epoch {}: skipping batch with loss {}", epoch, value);
                    skipped_batches += 1;
                    continue;
                }

                let grads = GradientsParams::from_grads(batch_loss.backward(), &model);
                model = optimizer.step(train_config.learning_rate, model, grads);
                batch_losses.push(value);
            }

            let train_loss = mean(&batch_losses);
            let test_loss = self.evaluate(&model.valid(), &test)?;
            let checkpoint = save_checkpoint(&model, &architecture, &train_config.checkpoint_dir, epoch)?;

            info!(
                "[Trainer] Epoch {}: train_loss={:?}, test_loss={:?}, skipped={}",
                epoch, train_loss, test_loss, skipped_batches
            );
            summary.epochs.push(EpochReport {
                epoch,
                train_loss,
                test_loss,
                skipped_batches,
                checkpoint,
            });
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::generate_sine;
    use tempfile::tempdir;

    fn tiny_config(checkpoint_dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.common.duration_secs = 0.1;
        config.features.fft_size = 256;
        config.features.n_mels = 16;
        config.features.n_mfcc = 4;
        config.model.hidden_size = 8;
        config.model.n_wavetables = 2;
        config.model.table_size = 32;
        config.model.n_harmonic = 2;
        config.loss.fft_sizes = vec![256, 64];
        config.train.epochs = 1;
        config.train.batch_size = 2;
        config.train.checkpoint_dir = checkpoint_dir.to_path_buf();
        config
    }

    #[test]
    fn test_epoch_order_reshuffles_each_epoch() {
        let first = epoch_order(16, 7, 1);
        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..16).collect::<Vec<_>>());

        assert_eq!(first, epoch_order(16, 7, 1));
        assert_ne!(first, epoch_order(16, 7, 2));
    }

    fn dataset(config: &AppConfig, n: usize) -> InMemoryDataset {
        let waves = (0..n)
            .map(|i| (format!("tone{}", i), generate_sine(180.0 + 40.0 * i as f32, 0.5, 0.1, 16_000)))
            .collect();
        InMemoryDataset::from_waveforms(config, waves).unwrap()
    }

    #[test]
    fn test_one_epoch_writes_checkpoint() {
        let dir = tempdir().unwrap();
        let config = tiny_config(dir.path());
        let data = dataset(&config, 4);

        let summary = Trainer::new(config).unwrap().train(&data, None).unwrap();
        assert_eq!(summary.epochs.len(), 1);

        let report = &summary.epochs[0];
        assert_eq!(report.epoch, 1);
        assert_eq!(report.skipped_batches, 0);
        assert!(report.train_loss.unwrap().is_finite());
        assert!(report.test_loss.unwrap().is_finite());
        assert!(report.checkpoint.exists());
        assert_eq!(summary.final_checkpoint(), Some(report.checkpoint.as_path()));
    }

    #[test]
    fn test_resume_continues_epoch_numbering() {
        let dir = tempdir().unwrap();
        let config = tiny_config(dir.path());
        let data = dataset(&config, 2);
        let trainer = Trainer::new(config).unwrap();

        let first = trainer.train(&data, None).unwrap();
        let resumed = trainer.train(&data, first.final_checkpoint()).unwrap();
        assert_eq!(resumed.epochs[0].epoch, 2);
        assert_ne!(resumed.epochs[0].checkpoint, first.epochs[0].checkpoint);
    }

    #[test]
    fn test_empty_dataset_is_rejected() {
        let dir = tempdir().unwrap();
        let trainer = Trainer::new(tiny_config(dir.path())).unwrap();
        let err = trainer.train(&InMemoryDataset::default(), None).unwrap_err();
        assert!(matches!(err, TrainingError::Dataset { .. }));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = AppConfig::default();
        config.train.batch_size = 0;
        assert!(matches!(Trainer::new(config), Err(TrainingError::Config { .. })));
    }
}
