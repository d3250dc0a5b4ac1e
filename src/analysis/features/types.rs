// Types module - frame-level feature data structures
//
// A `FeatureSequence` is validated once on construction and immutable
// afterwards; every later stage can rely on equal timbre lengths, finite
// values and ordered onsets.

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::{InferenceError, Stage};

/// Features of one analysis frame (one synthesis block)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFrame {
    /// Fundamental frequency in Hz; 0.0 marks an unvoiced frame
    pub f0_hz: f32,

    /// A-weighted loudness in dB, floored at the configured silence level
    pub loudness_db: f32,

    /// Cepstral timbre descriptor (n_mfcc values)
    pub timbre: Vec<f32>,

    /// Frame start time in seconds
    pub timestamp_secs: f32,
}

impl FeatureFrame {
    pub fn is_voiced(&self) -> bool {
        self.f0_hz > 0.0
    }
}

/// Start of a note event, as an index into the frame sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OnsetMarker {
    pub frame_index: usize,
}

/// Ordered frames plus onset markers for one waveform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFeatureSequence", into = "RawFeatureSequence")]
pub struct FeatureSequence {
    frames: Vec<FeatureFrame>,
    onsets: Vec<OnsetMarker>,
}

#[derive(Serialize, Deserialize)]
struct RawFeatureSequence {
    frames: Vec<FeatureFrame>,
    #[serde(default)]
    onsets: Vec<OnsetMarker>,
}

impl TryFrom<RawFeatureSequence> for FeatureSequence {
    type Error = InferenceError;

    fn try_from(raw: RawFeatureSequence) -> Result<Self, Self::Error> {
        FeatureSequence::new(raw.frames, raw.onsets)
    }
}

impl From<FeatureSequence> for RawFeatureSequence {
    fn from(seq: FeatureSequence) -> Self {
        RawFeatureSequence {
            frames: seq.frames,
            onsets: seq.onsets,
        }
    }
}

impl FeatureSequence {
    /// Build and validate a sequence
    ///
    /// # Errors
    /// `InvalidInput` when the sequence is empty, timbre lengths differ,
    /// any value is non-finite, or onsets are unsorted, duplicated or out
    /// of range. Zero or negative f0 is kept and reads as unvoiced.
    pub fn new(frames: Vec<FeatureFrame>, onsets: Vec<OnsetMarker>) -> Result<Self, InferenceError> {
        let stage = Stage::FeatureExtraction;
        let Some(first) = frames.first() else {
            return Err(InferenceError::invalid(stage, "feature sequence has no frames"));
        };
        let timbre_dim = first.timbre.len();

        for (i, frame) in frames.iter().enumerate() {
            if frame.timbre.len() != timbre_dim {
                return Err(InferenceError::invalid(
                    stage,
                    format!(
                        "frame {} has timbre length {}, expected {}",
                        i,
                        frame.timbre.len(),
                        timbre_dim
                    ),
                ));
            }
            let finite = frame.f0_hz.is_finite()
                && frame.loudness_db.is_finite()
                && frame.timestamp_secs.is_finite()
                && frame.timbre.iter().all(|v| v.is_finite());
            if !finite {
                return Err(InferenceError::invalid(
                    stage,
                    format!("frame {} contains non-finite values", i),
                ));
            }
        }

        for pair in onsets.windows(2) {
            if pair[0].frame_index >= pair[1].frame_index {
                return Err(InferenceError::invalid(
                    stage,
                    "onsets must be strictly increasing",
                ));
            }
        }
        if let Some(last) = onsets.last() {
            if last.frame_index >= frames.len() {
                return Err(InferenceError::invalid(
                    stage,
                    format!(
                        "onset at frame {} is past the end ({} frames)",
                        last.frame_index,
                        frames.len()
                    ),
                ));
            }
        }

        Ok(Self { frames, onsets })
    }

    pub fn frames(&self) -> &[FeatureFrame] {
        &self.frames
    }

    pub fn onsets(&self) -> &[OnsetMarker] {
        &self.onsets
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Always false for a validated sequence
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn timbre_dim(&self) -> usize {
        self.frames[0].timbre.len()
    }

    /// Note segments as half-open frame ranges
    ///
    /// A segment starts at frame 0 and at every onset, and runs to the next
    /// start (or the end of the sequence). Segments cover every frame
    /// exactly once.
    pub fn segments(&self) -> Vec<Range<usize>> {
        let mut starts = vec![0usize];
        starts.extend(
            self.onsets
                .iter()
                .map(|o| o.frame_index)
                .filter(|&i| i > 0),
        );

        starts
            .iter()
            .enumerate()
            .map(|(i, &start)| {
                let end = starts.get(i + 1).copied().unwrap_or(self.frames.len());
                start..end
            })
            .collect()
    }

    /// Median f0 over voiced frames, if any frame is voiced
    pub fn median_voiced_f0(&self) -> Option<f32> {
        let mut voiced: Vec<f32> = self
            .frames
            .iter()
            .filter(|f| f.is_voiced())
            .map(|f| f.f0_hz)
            .collect();
        if voiced.is_empty() {
            return None;
        }
        voiced.sort_by(|a, b| a.total_cmp(b));
        let mid = voiced.len() / 2;
        Some(if voiced.len().is_multiple_of(2) {
            (voiced[mid - 1] + voiced[mid]) / 2.0
        } else {
            voiced[mid]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(f0: f32, dim: usize) -> FeatureFrame {
        FeatureFrame {
            f0_hz: f0,
            loudness_db: -20.0,
            timbre: vec![0.0; dim],
            timestamp_secs: 0.0,
        }
    }

    #[test]
    fn test_empty_sequence_rejected() {
        let err = FeatureSequence::new(vec![], vec![]).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::FeatureExtraction));
    }

    #[test]
    fn test_mismatched_timbre_rejected() {
        let frames = vec![frame(220.0, 4), frame(220.0, 3)];
        assert!(FeatureSequence::new(frames, vec![]).is_err());
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut bad = frame(220.0, 2);
        bad.loudness_db = f32::NAN;
        assert!(FeatureSequence::new(vec![bad], vec![]).is_err());
    }

    #[test]
    fn test_onsets_must_be_ordered_and_in_range() {
        let frames = vec![frame(0.0, 2); 10];
        let unordered = vec![OnsetMarker { frame_index: 5 }, OnsetMarker { frame_index: 3 }];
        assert!(FeatureSequence::new(frames.clone(), unordered).is_err());

        let out_of_range = vec![OnsetMarker { frame_index: 10 }];
        assert!(FeatureSequence::new(frames, out_of_range).is_err());
    }

    #[test]
    fn test_segments_cover_all_frames() {
        let frames = vec![frame(0.0, 2); 10];
        let onsets = vec![OnsetMarker { frame_index: 0 }, OnsetMarker { frame_index: 4 }];
        let seq = FeatureSequence::new(frames, onsets).unwrap();
        assert_eq!(seq.segments(), vec![0..4, 4..10]);

        let seq = FeatureSequence::new(vec![frame(0.0, 2); 3], vec![]).unwrap();
        assert_eq!(seq.segments(), vec![0..3]);
    }

    #[test]
    fn test_negative_f0_is_unvoiced() {
        let seq = FeatureSequence::new(vec![frame(-1.0, 2), frame(220.0, 2)], vec![]).unwrap();
        assert!(!seq.frames()[0].is_voiced());
        assert!(seq.frames()[1].is_voiced());
        assert_eq!(seq.median_voiced_f0(), Some(220.0));
    }

    #[test]
    fn test_median_voiced_f0_ignores_unvoiced() {
        let frames = vec![frame(0.0, 1), frame(200.0, 1), frame(220.0, 1), frame(240.0, 1)];
        let seq = FeatureSequence::new(frames, vec![]).unwrap();
        assert_eq!(seq.median_voiced_f0(), Some(220.0));

        let silent = FeatureSequence::new(vec![frame(0.0, 1)], vec![]).unwrap();
        assert_eq!(silent.median_voiced_f0(), None);
    }

    #[test]
    fn test_serde_validates() {
        let json = r#"{"frames": [], "onsets": []}"#;
        assert!(serde_json::from_str::<FeatureSequence>(json).is_err());

        let seq = FeatureSequence::new(vec![frame(110.0, 2)], vec![]).unwrap();
        let text = serde_json::to_string(&seq).unwrap();
        let back: FeatureSequence = serde_json::from_str(&text).unwrap();
        assert_eq!(back, seq);
    }
}
