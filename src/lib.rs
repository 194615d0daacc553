//! Habla - real-time pronunciation assessment core
//!
//! Captures a spoken utterance through a pluggable recognition engine,
//! scores it against a reference text while speech is still arriving, and
//! persists finalized attempts exactly once, best-effort. Two strategies
//! sit behind one provider contract: an on-device heuristic over a live
//! transcript and a cloud phoneme-level assessment.

pub mod engine;
pub mod error;
pub mod normalize;
pub mod persistence;
pub mod providers;
pub mod scoring;
pub mod session;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

/// Re-export the main components for convenience
pub use engine::{AssessmentEngine, AssessmentUpdate, ContinuousRecognizer, RecognizerUpdate, Segment};
pub use persistence::{AttemptSink, PersistenceClient};
pub use providers::{
    Capabilities, CredentialSource, EventStream, LocalHeuristicProvider, RecognitionProvider,
    RemoteAssessmentProvider, SpeechToken, TokenClient,
};
pub use session::{ScoreSink, SessionManager};
