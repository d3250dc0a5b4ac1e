// Inference error types and constants

use crate::error::{ErrorCode, ExportError};
use std::fmt;
use tracing::error;

/// Inference error code constants
///
/// Error code range: 1001-1006
pub struct InferenceErrorCodes {}

impl InferenceErrorCodes {
    /// Malformed or mismatched input (empty waveform, ragged feature frames)
    pub const INVALID_INPUT: i32 = 1001;

    /// Checkpoint missing, unreadable or built for another architecture
    pub const MODEL_LOAD: i32 = 1002;

    /// Non-finite values produced during synthesis or loss
    pub const NUMERIC_DIVERGENCE: i32 = 1003;

    /// A predicted value could not be mapped into any target range
    pub const EXPORT_RANGE: i32 = 1004;

    /// Preset could not be produced for another reason
    pub const EXPORT_FAILED: i32 = 1005;

    /// Filesystem failure while reading audio or writing a preset
    pub const IO: i32 = 1006;
}

/// Pipeline stage in which an error was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FeatureExtraction,
    Model,
    Synthesis,
    Loss,
    Export,
    Checkpoint,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::FeatureExtraction => "feature_extraction",
            Stage::Model => "model",
            Stage::Synthesis => "synthesis",
            Stage::Loss => "loss",
            Stage::Export => "export",
            Stage::Checkpoint => "checkpoint",
        };
        f.write_str(name)
    }
}

/// Log an inference error with structured context
///
/// Logs the numeric code, the component and the human-readable message so
/// failures can be correlated with service responses.
pub fn log_inference_error(err: &InferenceError, context: &str) {
    error!(
        "Inference error in {}: code={}, component=InferencePipeline, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors surfaced by a single inference call
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceError {
    /// Input rejected before any computation happened
    InvalidInput { stage: Stage, reason: String },

    /// Checkpoint could not be loaded into the configured architecture
    ModelLoad { path: String, reason: String },

    /// NaN or infinity detected; no useful preset can be produced
    NumericDivergence { stage: Stage, detail: String },

    /// Value outside every target range (indicates a configuration bug)
    ExportRange { parameter: String, value: f64 },

    /// Preset serialization or writing failed
    Export { reason: String },

    /// Filesystem failure
    Io { details: String },
}

impl ErrorCode for InferenceError {
    fn code(&self) -> i32 {
        match self {
            InferenceError::InvalidInput { .. } => InferenceErrorCodes::INVALID_INPUT,
            InferenceError::ModelLoad { .. } => InferenceErrorCodes::MODEL_LOAD,
            InferenceError::NumericDivergence { .. } => InferenceErrorCodes::NUMERIC_DIVERGENCE,
            InferenceError::ExportRange { .. } => InferenceErrorCodes::EXPORT_RANGE,
            InferenceError::Export { .. } => InferenceErrorCodes::EXPORT_FAILED,
            InferenceError::Io { .. } => InferenceErrorCodes::IO,
        }
    }

    fn message(&self) -> String {
        match self {
            InferenceError::InvalidInput { stage, reason } => {
                format!("Invalid input at stage {}: {}", stage, reason)
            }
            InferenceError::ModelLoad { path, reason } => {
                format!("Failed to load checkpoint {}: {}", path, reason)
            }
            InferenceError::NumericDivergence { stage, detail } => {
                format!("Numeric divergence at stage {}: {}", stage, detail)
            }
            InferenceError::ExportRange { parameter, value } => {
                format!("Value {} for {} cannot be mapped to any range", value, parameter)
            }
            InferenceError::Export { reason } => format!("Export failed: {}", reason),
            InferenceError::Io { details } => format!("I/O error: {}", details),
        }
    }
}

impl InferenceError {
    /// Stage that produced the error, when it is known
    pub fn stage(&self) -> Option<Stage> {
        match self {
            InferenceError::InvalidInput { stage, .. }
            | InferenceError::NumericDivergence { stage, .. } => Some(*stage),
            InferenceError::ModelLoad { .. } => Some(Stage::Checkpoint),
            InferenceError::ExportRange { .. } | InferenceError::Export { .. } => {
                Some(Stage::Export)
            }
            InferenceError::Io { .. } => None,
        }
    }

    pub(crate) fn invalid(stage: Stage, reason: impl Into<String>) -> Self {
        InferenceError::InvalidInput {
            stage,
            reason: reason.into(),
        }
    }

    pub(crate) fn diverged(stage: Stage, detail: impl Into<String>) -> Self {
        InferenceError::NumericDivergence {
            stage,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InferenceError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for InferenceError {}

impl From<std::io::Error> for InferenceError {
    fn from(err: std::io::Error) -> Self {
        InferenceError::Io {
            details: err.to_string(),
        }
    }
}

impl From<ExportError> for InferenceError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::RangeUnmappable { parameter, value } => {
                InferenceError::ExportRange { parameter, value }
            }
            ExportError::Serialization { reason } => InferenceError::Export { reason },
            ExportError::Io { details } => InferenceError::Io { details },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inference_error_codes() {
        assert_eq!(
            InferenceError::invalid(Stage::FeatureExtraction, "empty").code(),
            InferenceErrorCodes::INVALID_INPUT
        );
        assert_eq!(
            InferenceError::ModelLoad {
                path: "a".to_string(),
                reason: "b".to_string()
            }
            .code(),
            InferenceErrorCodes::MODEL_LOAD
        );
        assert_eq!(
            InferenceError::diverged(Stage::Loss, "nan").code(),
            InferenceErrorCodes::NUMERIC_DIVERGENCE
        );
        assert_eq!(
            InferenceError::ExportRange {
                parameter: "osc_1_level".to_string(),
                value: f64::NAN
            }
            .code(),
            InferenceErrorCodes::EXPORT_RANGE
        );
        assert_eq!(
            InferenceError::Io {
                details: "x".to_string()
            }
            .code(),
            InferenceErrorCodes::IO
        );
    }

    #[test]
    fn test_message_names_stage() {
        let err = InferenceError::diverged(Stage::Synthesis, "output contains NaN");
        assert!(err.message().contains("synthesis"));
        assert_eq!(err.stage(), Some(Stage::Synthesis));

        let display = format!("{}", err);
        assert!(display.contains("InferenceError"));
        assert!(display.contains("1003"));
    }

    #[test]
    fn test_export_error_conversion() {
        let err: InferenceError = ExportError::RangeUnmappable {
            parameter: "env_1_attack".to_string(),
            value: f64::INFINITY,
        }
        .into();
        assert_eq!(err.code(), InferenceErrorCodes::EXPORT_RANGE);
        assert_eq!(err.stage(), Some(Stage::Export));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing wav");
        let err: InferenceError = io_err.into();
        match err {
            InferenceError::Io { details } => assert!(details.contains("missing wav")),
            other => panic!("Expected Io variant, got {:?}", other),
        }
    }
}
