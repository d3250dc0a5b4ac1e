// Error types for the synthesizer parameter-inference pipeline
//
// This module defines the error taxonomy of the core: input validation,
// checkpoint loading, numeric divergence and preset export failures, plus
// the training-shell errors wrapped around them. Every error carries a
// stable numeric code so the service boundary can translate it into a
// structured failure payload.

mod export;
mod inference;
mod training;

pub use export::{log_export_error, ExportError, ExportErrorCodes};
pub use inference::{log_inference_error, InferenceError, InferenceErrorCodes, Stage};
pub use training::{log_training_error, TrainingError, TrainingErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the service boundary.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
