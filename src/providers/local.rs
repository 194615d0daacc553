//! On-device heuristic provider over a live transcript
//!
//! Wraps a continuous, interim-enabled recognizer and maintains the
//! per-session transcript; it emits text only. Scoring happens in the
//! session manager against the reference.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::engine::{ContinuousRecognizer, RecognizerUpdate, Segment};
use crate::error::Result;
use crate::types::{RecognitionEvent, ReferenceUtterance, TranscriptState};

use super::{EventStream, RecognitionProvider};

pub struct LocalHeuristicProvider {
    engine: Box<dyn ContinuousRecognizer>,
}

impl LocalHeuristicProvider {
    pub fn new(engine: Box<dyn ContinuousRecognizer>) -> Self {
        Self { engine }
    }
}

struct PumpState {
    updates: mpsc::Receiver<RecognizerUpdate>,
    transcript: TranscriptState,
    ended: bool,
}

/// Fold one recognizer callback into the transcript. Returns the combined
/// text and whether the batch closed a segment.
fn apply_batch(transcript: &mut TranscriptState, segments: Vec<Segment>) -> (String, bool) {
    let mut interim = String::new();
    let mut saw_final = false;
    for segment in segments {
        if segment.is_final {
            transcript.push_final(&segment.text);
            saw_final = true;
        } else {
            interim.push_str(&segment.text);
        }
    }
    transcript.set_interim(interim);
    (transcript.combined(), saw_final)
}

#[async_trait]
impl RecognitionProvider for LocalHeuristicProvider {
    fn name(&self) -> &'static str {
        "local-heuristic"
    }

    async fn start(&mut self, reference: &ReferenceUtterance) -> Result<EventStream> {
        debug!(
            "starting continuous recognition for exercise {} ({})",
            reference.exercise_id, reference.language
        );
        let updates = self.engine.start(&reference.language).await?;

        let state = PumpState {
            updates,
            transcript: TranscriptState::default(),
            ended: false,
        };
        let stream = futures::stream::unfold(state, |mut state| async move {
            loop {
                match state.updates.recv().await {
                    Some(RecognizerUpdate::Results(segments)) => {
                        let (combined, saw_final) =
                            apply_batch(&mut state.transcript, segments);
                        // nothing heard yet, keep listening
                        if combined.is_empty() {
                            continue;
                        }
                        let event = if saw_final {
                            RecognitionEvent::Final(combined)
                        } else {
                            RecognitionEvent::Interim(combined)
                        };
                        return Some((event, state));
                    }
                    Some(RecognizerUpdate::Error(reason)) => {
                        return Some((RecognitionEvent::Error(reason), state));
                    }
                    None => {
                        if state.ended {
                            return None;
                        }
                        state.ended = true;
                        return Some((RecognitionEvent::Ended, state));
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }

    fn stop(&mut self) {
        self.engine.stop();
    }
}
