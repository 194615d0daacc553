//! Core types used throughout the pronunciation engine

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-side id of a pronunciation exercise
pub type ExerciseId = i64;

/// Unique identifier for one recognition session
pub type SessionId = Uuid;

/// The expected text an utterance is scored against
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceUtterance {
    pub exercise_id: ExerciseId,
    pub reference_text: String,
    /// BCP-47 recognition language tag (e.g. "es-ES", "es-MX")
    pub language: String,
}

impl ReferenceUtterance {
    pub fn new(exercise_id: ExerciseId, reference_text: impl Into<String>) -> Self {
        Self {
            exercise_id,
            reference_text: reference_text.into(),
            language: "es-ES".to_string(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

/// Per-session transcript accumulator.
///
/// `finalized` only ever grows (closed segments, space-joined); `interim`
/// is replaced wholesale on every engine callback.
#[derive(Debug, Clone, Default)]
pub struct TranscriptState {
    finalized: String,
    interim: String,
}

impl TranscriptState {
    /// Append a closed segment to the finalized text
    pub fn push_final(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.finalized.is_empty() {
            self.finalized.push(' ');
        }
        self.finalized.push_str(text);
    }

    /// Replace the provisional tail of the transcript
    pub fn set_interim(&mut self, text: impl Into<String>) {
        self.interim = text.into();
    }

    pub fn finalized(&self) -> &str {
        &self.finalized
    }

    /// Finalized text plus the current interim tail
    pub fn combined(&self) -> String {
        format!("{} {}", self.finalized, self.interim)
            .trim()
            .to_string()
    }
}

/// Scores for one utterance, all on a 0-100 scale
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSet {
    pub accuracy: f64,
    pub fluency: f64,
    pub completeness: f64,
    /// Only cloud assessment supplies this; 0 otherwise
    pub prosody: f64,
}

impl ScoreSet {
    /// Equal-weight mean of accuracy, fluency and completeness
    pub fn overall(&self) -> f64 {
        (self.accuracy + self.fluency + self.completeness) / 3.0
    }
}

/// Normalized events emitted by a recognition provider
#[derive(Debug, Clone)]
pub enum RecognitionEvent {
    /// Provisional transcript, still revisable
    Interim(String),
    /// Closed transcript; scored and persisted exactly once
    Final(String),
    /// Pre-computed scores from a phoneme-level cloud assessment
    ProviderScored(ScoreSet),
    /// Fatal mid-session engine failure
    Error(String),
    /// The engine ended the stream on its own
    Ended,
}

/// Lifecycle of a recognition session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
    Ended,
    Error,
}

/// Wire body for a finalized attempt (`POST /attempt`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedAttempt {
    pub exercise_id: ExerciseId,
    pub expected_text: String,
    pub accuracy_score: f64,
    pub fluency_score: f64,
    pub completeness_score: f64,
    pub prosody_score: f64,
}

impl PersistedAttempt {
    pub fn new(exercise_id: ExerciseId, expected_text: &str, scores: &ScoreSet) -> Self {
        Self {
            exercise_id,
            expected_text: expected_text.to_string(),
            accuracy_score: scores.accuracy,
            fluency_score: scores.fluency,
            completeness_score: scores.completeness,
            prosody_score: scores.prosody,
        }
    }
}
