// Training error types and constants

use crate::error::{ErrorCode, InferenceError};
use std::fmt;
use tracing::error;

/// Training error code constants
///
/// Error code range: 3001-3004
pub struct TrainingErrorCodes {}

impl TrainingErrorCodes {
    /// Dataset is empty, unreadable or inconsistent
    pub const DATASET: i32 = 3001;

    /// Checkpoint could not be written
    pub const CHECKPOINT: i32 = 3002;

    /// Configuration file invalid
    pub const CONFIG: i32 = 3003;

    /// A pipeline stage failed while processing a clip
    pub const INFERENCE: i32 = 3004;
}

/// Log a training error with structured context
pub fn log_training_error(err: &TrainingError, context: &str) {
    error!(
        "Training error in {}: code={}, component=Trainer, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised by the training shell
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingError {
    Dataset { reason: String },
    Checkpoint { path: String, reason: String },
    Config { reason: String },
    Inference(InferenceError),
}

impl ErrorCode for TrainingError {
    fn code(&self) -> i32 {
        match self {
            TrainingError::Dataset { .. } => TrainingErrorCodes::DATASET,
            TrainingError::Checkpoint { .. } => TrainingErrorCodes::CHECKPOINT,
            TrainingError::Config { .. } => TrainingErrorCodes::CONFIG,
            TrainingError::Inference(_) => TrainingErrorCodes::INFERENCE,
        }
    }

    fn message(&self) -> String {
        match self {
            TrainingError::Dataset { reason } => format!("Dataset error: {}", reason),
            TrainingError::Checkpoint { path, reason } => {
                format!("Checkpoint {} failed: {}", path, reason)
            }
            TrainingError::Config { reason } => format!("Invalid configuration: {}", reason),
            TrainingError::Inference(inner) => inner.message(),
        }
    }
}

impl fmt::Display for TrainingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TrainingError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for TrainingError {}

impl From<InferenceError> for TrainingError {
    fn from(err: InferenceError) -> Self {
        TrainingError::Inference(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;

    #[test]
    fn test_training_error_codes() {
        assert_eq!(
            TrainingError::Dataset {
                reason: "x".to_string()
            }
            .code(),
            3001
        );
        assert_eq!(
            TrainingError::Checkpoint {
                path: "p".to_string(),
                reason: "r".to_string()
            }
            .code(),
            3002
        );
        assert_eq!(
            TrainingError::Config {
                reason: "x".to_string()
            }
            .code(),
            3003
        );
    }

    #[test]
    fn test_wrapped_inference_error_keeps_message() {
        let inner = InferenceError::InvalidInput {
            stage: Stage::FeatureExtraction,
            reason: "empty waveform".to_string(),
        };
        let err: TrainingError = inner.clone().into();
        assert_eq!(err.code(), TrainingErrorCodes::INFERENCE);
        assert_eq!(err.message(), inner.message());
    }
}
