// Export error types and constants

use crate::error::ErrorCode;
use std::fmt;
use tracing::error;

/// Export error code constants
///
/// Error code range: 2001-2003
pub struct ExportErrorCodes {}

impl ExportErrorCodes {
    /// Predicted value is not a number and cannot be clamped
    pub const RANGE_UNMAPPABLE: i32 = 2001;

    /// Preset document could not be serialized
    pub const SERIALIZATION: i32 = 2002;

    /// Preset file could not be written
    pub const IO: i32 = 2003;
}

/// Log an export error with structured context
pub fn log_export_error(err: &ExportError, context: &str) {
    error!(
        "Export error in {}: code={}, component=PresetExporter, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised while mapping a prediction into a synth preset
#[derive(Debug, Clone, PartialEq)]
pub enum ExportError {
    /// Value has no nearest bound (NaN); clamping cannot apply
    RangeUnmappable { parameter: String, value: f64 },

    /// Document serialization failed
    Serialization { reason: String },

    /// Writing the preset file failed (including refusing to overwrite)
    Io { details: String },
}

impl ErrorCode for ExportError {
    fn code(&self) -> i32 {
        match self {
            ExportError::RangeUnmappable { .. } => ExportErrorCodes::RANGE_UNMAPPABLE,
            ExportError::Serialization { .. } => ExportErrorCodes::SERIALIZATION,
            ExportError::Io { .. } => ExportErrorCodes::IO,
        }
    }

    fn message(&self) -> String {
        match self {
            ExportError::RangeUnmappable { parameter, value } => {
                format!("Parameter {} has unmappable value {}", parameter, value)
            }
            ExportError::Serialization { reason } => {
                format!("Preset serialization failed: {}", reason)
            }
            ExportError::Io { details } => format!("Preset write failed: {}", details),
        }
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ExportError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ExportError {}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::Io {
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::Serialization {
            reason: err.to_string(),
        }
    }
}
