// Synth Modeler Core - wavetable synthesizer parameter inference
// Feature extraction, differentiable wavetable synthesis, spectral loss and
// preset export, plus a thin training shell around them.

// Module declarations
pub mod analysis;
pub mod config;
pub mod error;
pub mod export;
pub mod fixtures;
pub mod loss;
pub mod model;
pub mod pipeline;
pub mod synthesis;
pub mod training;

// Re-exports for convenience
pub use analysis::{FeatureExtractor, FeatureFrame, FeatureSequence, OnsetMarker, Waveform};
pub use config::AppConfig;
pub use error::{ErrorCode, ExportError, InferenceError, Stage, TrainingError};
pub use export::{exporter_for, PresetExporter, SynthPreset, SynthTarget};
pub use model::{ModelPrediction, WavetableSynthModel};
pub use pipeline::{EvaluationMetrics, InferencePipeline};
pub use synthesis::SynthesisEngine;

/// Backend used for inference and evaluation (no gradient tape)
pub type InferenceBackend = burn::backend::NdArray<f32>;

/// Backend used by the training loop
pub type TrainingBackend = burn::backend::Autodiff<InferenceBackend>;

/// Initialize tracing output for binaries
///
/// Logs go to stderr so stdout stays free for JSON reports. Safe to call
/// more than once; later calls are ignored.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_structure() {
        let config = AppConfig::default();
        let extractor = FeatureExtractor::new(&config);
        assert_eq!(extractor.block_size(), config.common.block_size);
    }
}
