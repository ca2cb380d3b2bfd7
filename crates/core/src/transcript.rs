//! Transcript events produced by the STT adapter

use serde::{Deserialize, Serialize};

/// One streaming recognition result
///
/// `segment_final` marks a stabilized segment; `speech_final` marks the
/// recognizer's own end-of-utterance signal. Either the adaptive turn timer
/// or `speech_final` may end a turn, whichever fires first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEvent {
    /// Recognized text for this segment
    pub text: String,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,

    /// Segment will not be revised further
    pub segment_final: bool,

    /// Recognizer detected end of utterance
    pub speech_final: bool,
}

impl TranscriptEvent {
    pub fn partial(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            segment_final: false,
            speech_final: false,
        }
    }

    pub fn segment(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            segment_final: true,
            speech_final: false,
        }
    }

    pub fn end_of_utterance(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            segment_final: true,
            speech_final: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}
