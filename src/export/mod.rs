// Parameter export - model predictions to synthesizer presets
//
// Each target synth is a strategy behind `PresetExporter`. Adding a target
// means a new `SynthTarget` variant and a new exporter; the model and the
// synthesis engine never change.

mod preset;
mod vital;

pub use preset::{PresetMetadata, SynthPreset};
pub use vital::{
    VitalExporter, VITAL_FRAME_SIZE, VITAL_REFERENCE_HZ, VITAL_UNITY_VOLUME, VITAL_WAVE_FRAMES,
};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ExportConfig;
use crate::error::ExportError;
use crate::model::ModelPrediction;

/// Synthesizer a preset is written for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthTarget {
    #[default]
    Vital,
}

impl SynthTarget {
    /// File extension of the target's preset documents
    pub fn file_extension(&self) -> &'static str {
        match self {
            SynthTarget::Vital => "vital",
        }
    }
}

impl fmt::Display for SynthTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthTarget::Vital => f.write_str("vital"),
        }
    }
}

/// Maps a prediction onto one synth's parameter set
pub trait PresetExporter {
    fn target(&self) -> SynthTarget;

    /// Build the preset for `prediction`
    ///
    /// Out-of-range values are clamped to the nearest bound. Exporting the
    /// same prediction twice yields byte-identical documents.
    ///
    /// # Errors
    /// `RangeUnmappable` when a value has no nearest bound (NaN)
    fn export(&self, prediction: &ModelPrediction) -> Result<SynthPreset, ExportError>;
}

/// Exporter strategy for `target`
pub fn exporter_for(target: SynthTarget, config: &ExportConfig) -> Box<dyn PresetExporter + Send + Sync> {
    match target {
        SynthTarget::Vital => Box::new(VitalExporter::new(config)),
    }
}

/// Clamp `value` into `[min, max]`, rejecting NaN
pub(crate) fn clamp_parameter(name: &str, value: f64, min: f64, max: f64) -> Result<f64, ExportError> {
    if value.is_nan() {
        return Err(ExportError::RangeUnmappable {
            parameter: name.to_string(),
            value,
        });
    }
    Ok(value.clamp(min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exporter_for_vital() {
        let exporter = exporter_for(SynthTarget::Vital, &ExportConfig::default());
        assert_eq!(exporter.target(), SynthTarget::Vital);
        assert_eq!(SynthTarget::Vital.file_extension(), "vital");
    }

    #[test]
    fn test_clamp_parameter() {
        assert_eq!(clamp_parameter("x", 5.0, 0.0, 1.0).unwrap(), 1.0);
        assert_eq!(clamp_parameter("x", f64::NEG_INFINITY, 0.0, 1.0).unwrap(), 0.0);
        assert!(matches!(
            clamp_parameter("x", f64::NAN, 0.0, 1.0),
            Err(ExportError::RangeUnmappable { .. })
        ));
    }

    #[test]
    fn test_target_serde_name() {
        assert_eq!(serde_json::to_string(&SynthTarget::Vital).unwrap(), "\"vital\"");
    }
}
