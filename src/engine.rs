//! Capability surface: the external speech engines providers wrap
//!
//! Neither engine ships with this crate. A deployment binds whichever SDK
//! it has (a continuous on-device recognizer, a cloud assessment stream)
//! by implementing these traits; tests inject channel-backed fakes.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// One transcript fragment from a recognizer callback
#[derive(Debug, Clone)]
pub struct Segment {
    pub text: String,
    pub is_final: bool,
}

impl Segment {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn fin(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// One callback from a continuous recognizer
#[derive(Debug, Clone)]
pub enum RecognizerUpdate {
    /// Segments recognized since the previous callback
    Results(Vec<Segment>),
    /// The engine failed mid-stream
    Error(String),
}

/// A continuous, interim-enabled speech recognition engine.
///
/// Updates arrive on the returned channel until the engine ends on its own
/// or `stop` is called; channel close means the stream ended.
#[async_trait]
pub trait ContinuousRecognizer: Send + Sync {
    /// Begin streaming recognition. Fails with [`crate::Error::Acquisition`]
    /// when the input device cannot be obtained.
    async fn start(&mut self, language: &str) -> Result<mpsc::Receiver<RecognizerUpdate>>;

    /// Idempotent; safe before `start` and after the stream closes.
    fn stop(&mut self);
}

/// Opaque scored result from a phoneme-level cloud assessment
pub type AssessmentPayload = serde_json::Value;

/// One callback from a cloud assessment stream
#[derive(Debug, Clone)]
pub enum AssessmentUpdate {
    /// A recognized utterance with pre-computed scores
    Scored(AssessmentPayload),
    /// The stream failed mid-session
    Error(String),
}

/// A cloud pronunciation-assessment stream configured with a reference text
#[async_trait]
pub trait AssessmentEngine: Send + Sync {
    /// Begin the assessment stream with an already-exchanged credential.
    async fn start(
        &mut self,
        language: &str,
        reference_text: &str,
        token: &str,
        region: &str,
    ) -> Result<mpsc::Receiver<AssessmentUpdate>>;

    /// Idempotent; safe before `start` and after the stream closes.
    fn stop(&mut self);
}
