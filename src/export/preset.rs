// Exported preset artifact

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use super::SynthTarget;
use crate::error::ExportError;

/// Descriptive fields carried alongside the parameter values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresetMetadata {
    pub name: String,
    pub style: String,
    pub author: String,
    pub oscillator_count: usize,
}

/// A finished preset: flat parameter map plus the serialized document
///
/// Built only by a `PresetExporter`; never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthPreset {
    target: SynthTarget,
    metadata: PresetMetadata,
    parameters: BTreeMap<String, f64>,
    document: Vec<u8>,
}

impl SynthPreset {
    pub(crate) fn new(
        target: SynthTarget,
        metadata: PresetMetadata,
        parameters: BTreeMap<String, f64>,
        document: Vec<u8>,
    ) -> Self {
        Self {
            target,
            metadata,
            parameters,
            document,
        }
    }

    pub fn target(&self) -> SynthTarget {
        self.target
    }

    pub fn metadata(&self) -> &PresetMetadata {
        &self.metadata
    }

    /// Parameter values in the synth's native units, sorted by name
    pub fn parameters(&self) -> &BTreeMap<String, f64> {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).copied()
    }

    /// Serialized preset document
    pub fn to_bytes(&self) -> &[u8] {
        &self.document
    }

    /// Write the document to a new file
    ///
    /// # Errors
    /// `Io` if the file exists already or cannot be written
    pub fn write_to(&self, path: &Path) -> Result<(), ExportError> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|err| ExportError::Io {
                details: format!("{}: {}", path.display(), err),
            })?;
        file.write_all(&self.document)?;
        file.sync_all()?;
        tracing::info!(
            "[PresetExporter] Wrote {} preset '{}' to {}",
            self.target,
            self.metadata.name,
            path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn preset() -> SynthPreset {
        let mut parameters = BTreeMap::new();
        parameters.insert("volume".to_string(), 1.0);
        SynthPreset::new(
            SynthTarget::Vital,
            PresetMetadata {
                name: "Test".to_string(),
                style: "Lead".to_string(),
                author: String::new(),
                oscillator_count: 1,
            },
            parameters,
            b"{}".to_vec(),
        )
    }

    #[test]
    fn test_write_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.vital");
        let preset = preset();

        preset.write_to(&path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{}");
        assert!(matches!(preset.write_to(&path), Err(ExportError::Io { .. })));
    }

    #[test]
    fn test_parameter_lookup() {
        let preset = preset();
        assert_eq!(preset.parameter("volume"), Some(1.0));
        assert_eq!(preset.parameter("missing"), None);
    }
}
