//! Session lifecycle: at most one live recognition session per exercise
//!
//! The manager owns the session registry, drives the bound provider, runs
//! the scorer over emitted text, pushes results to the UI sink and, on
//! finalized events only, submits an attempt. A session's identity is
//! invalidated before its engine is asked to stop, so late engine
//! callbacks are detected as stale and dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::persistence::AttemptSink;
use crate::providers::{Capabilities, EventStream, RecognitionProvider};
use crate::scoring;
use crate::types::{
    ExerciseId, PersistedAttempt, RecognitionEvent, ReferenceUtterance, ScoreSet, SessionId,
    SessionState,
};

/// Receives live score and transcript updates; the UI seam
pub trait ScoreSink: Send + Sync {
    /// Live transcript text, interim or finalized
    fn on_transcript(&self, exercise_id: ExerciseId, text: &str);

    /// Recomputed or provider-supplied scores
    fn on_scores(&self, exercise_id: ExerciseId, scores: &ScoreSet);

    /// User-visible failure message
    fn on_error(&self, exercise_id: ExerciseId, message: &str);
}

#[derive(Clone)]
struct SessionHandle {
    session_id: SessionId,
    /// Cleared before the engine is asked to stop; every side effect is
    /// gated on it
    alive: Arc<AtomicBool>,
    state: Arc<Mutex<SessionState>>,
    /// None while the engine is still being acquired
    provider: Arc<Mutex<Option<Box<dyn RecognitionProvider>>>>,
    started_at: DateTime<Utc>,
}

impl SessionHandle {
    fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            alive: Arc::new(AtomicBool::new(true)),
            state: Arc::new(Mutex::new(SessionState::Starting)),
            provider: Arc::new(Mutex::new(None)),
            started_at: Utc::now(),
        }
    }

    fn stop_provider(&self) {
        if let Some(provider) = self.provider.lock().as_mut() {
            provider.stop();
        }
    }
}

type Registry = Arc<Mutex<HashMap<ExerciseId, SessionHandle>>>;

/// Remove the entry only if it still belongs to this session; a fresh
/// start for the same exercise must not be evicted by a stale task.
fn deregister(registry: &Registry, exercise_id: ExerciseId, session_id: SessionId) {
    let mut registry = registry.lock();
    if registry
        .get(&exercise_id)
        .is_some_and(|handle| handle.session_id == session_id)
    {
        registry.remove(&exercise_id);
    }
}

pub struct SessionManager {
    capabilities: Capabilities,
    registry: Registry,
    sink: Arc<dyn ScoreSink>,
    attempts: Arc<dyn AttemptSink>,
}

impl SessionManager {
    pub fn new(
        capabilities: Capabilities,
        sink: Arc<dyn ScoreSink>,
        attempts: Arc<dyn AttemptSink>,
    ) -> Self {
        Self {
            capabilities,
            registry: Arc::new(Mutex::new(HashMap::new())),
            sink,
            attempts,
        }
    }

    /// Begin a recognition session for an exercise.
    ///
    /// A second start while a session is live (including one still
    /// acquiring its engine) is a no-op; a second engine is never created
    /// for the same exercise. Failures that prevent the session from
    /// becoming active are surfaced through the sink and returned; nothing
    /// stays registered.
    pub async fn start(&self, reference: ReferenceUtterance) -> Result<()> {
        let exercise_id = reference.exercise_id;

        let (handle, mut provider) = {
            let mut registry = self.registry.lock();
            if registry.contains_key(&exercise_id) {
                debug!("session already running for exercise {exercise_id}, ignoring start");
                return Ok(());
            }
            let provider = match self.capabilities.resolve() {
                Ok(provider) => provider,
                Err(e) => {
                    drop(registry);
                    self.sink.on_error(exercise_id, &e.to_string());
                    return Err(e);
                }
            };
            let handle = SessionHandle::new();
            registry.insert(exercise_id, handle.clone());
            (handle, provider)
        };

        debug!(
            "starting session {} for exercise {exercise_id} via {}",
            handle.session_id,
            provider.name()
        );

        let stream = match provider.start(&reference).await {
            Ok(stream) => stream,
            Err(e) => {
                provider.stop();
                *handle.state.lock() = SessionState::Error;
                deregister(&self.registry, exercise_id, handle.session_id);
                self.sink.on_error(exercise_id, &e.to_string());
                return Err(e);
            }
        };

        *handle.provider.lock() = Some(provider);

        // a stop that landed while the engine was acquiring saw an empty
        // provider slot; release the engine on its behalf
        if !handle.alive.load(Ordering::SeqCst) {
            handle.stop_provider();
            deregister(&self.registry, exercise_id, handle.session_id);
            return Ok(());
        }

        *handle.state.lock() = SessionState::Active;
        info!("session {} active for exercise {exercise_id}", handle.session_id);

        let registry = Arc::clone(&self.registry);
        let sink = Arc::clone(&self.sink);
        let attempts = Arc::clone(&self.attempts);
        tokio::spawn(pump_events(
            reference, handle, stream, registry, sink, attempts,
        ));
        Ok(())
    }

    /// Stop the session for an exercise, if any.
    ///
    /// Safe in every state and idempotent. The session's identity is
    /// invalidated before the engine is asked to stop, so any event the
    /// engine emits afterwards is dropped; the recording resource is
    /// released synchronously with this call.
    pub fn stop(&self, exercise_id: ExerciseId) {
        let Some(handle) = self.registry.lock().remove(&exercise_id) else {
            debug!("no session to stop for exercise {exercise_id}");
            return;
        };
        *handle.state.lock() = SessionState::Stopping;
        handle.alive.store(false, Ordering::SeqCst);
        handle.stop_provider();
        *handle.state.lock() = SessionState::Ended;
        info!("session {} stopped for exercise {exercise_id}", handle.session_id);
    }

    /// Whether a live session is registered for the exercise
    pub fn is_active(&self, exercise_id: ExerciseId) -> bool {
        self.registry.lock().contains_key(&exercise_id)
    }

    pub fn active_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// State of the exercise's session; `Idle` when none is registered
    pub fn state_of(&self, exercise_id: ExerciseId) -> SessionState {
        self.registry
            .lock()
            .get(&exercise_id)
            .map(|handle| *handle.state.lock())
            .unwrap_or(SessionState::Idle)
    }
}

/// Drive one session's event stream to completion.
///
/// Events are consumed strictly in arrival order; each event's scoring,
/// UI push and persistence dispatch completes before the next event is
/// taken, and nothing happens for events arriving after invalidation.
async fn pump_events(
    reference: ReferenceUtterance,
    handle: SessionHandle,
    mut stream: EventStream,
    registry: Registry,
    sink: Arc<dyn ScoreSink>,
    attempts: Arc<dyn AttemptSink>,
) {
    let exercise_id = reference.exercise_id;

    while let Some(event) = stream.next().await {
        if !handle.alive.load(Ordering::SeqCst) {
            debug!("dropping stale event for exercise {exercise_id}");
            continue;
        }
        match event {
            RecognitionEvent::Interim(text) => {
                let scores = scoring::score_against(
                    &text,
                    &reference.reference_text,
                    elapsed_seconds(handle.started_at),
                );
                sink.on_transcript(exercise_id, &text);
                sink.on_scores(exercise_id, &scores);
            }
            RecognitionEvent::Final(text) => {
                let scores = scoring::score_against(
                    &text,
                    &reference.reference_text,
                    elapsed_seconds(handle.started_at),
                );
                sink.on_transcript(exercise_id, &text);
                sink.on_scores(exercise_id, &scores);
                attempts
                    .submit(PersistedAttempt::new(
                        exercise_id,
                        &reference.reference_text,
                        &scores,
                    ))
                    .await;
            }
            RecognitionEvent::ProviderScored(scores) => {
                sink.on_scores(exercise_id, &scores);
                attempts
                    .submit(PersistedAttempt::new(
                        exercise_id,
                        &reference.reference_text,
                        &scores,
                    ))
                    .await;
            }
            RecognitionEvent::Error(reason) => {
                let error = crate::error::Error::Recognition(reason);
                warn!("session {} for exercise {exercise_id}: {error}", handle.session_id);
                handle.alive.store(false, Ordering::SeqCst);
                handle.stop_provider();
                *handle.state.lock() = SessionState::Error;
                deregister(&registry, exercise_id, handle.session_id);
                sink.on_error(exercise_id, &error.to_string());
                break;
            }
            RecognitionEvent::Ended => {
                debug!("engine ended session {} on its own", handle.session_id);
                handle.alive.store(false, Ordering::SeqCst);
                *handle.state.lock() = SessionState::Ended;
                deregister(&registry, exercise_id, handle.session_id);
                break;
            }
        }
    }

    // stream exhausted after a stop or without an Ended event
    deregister(&registry, exercise_id, handle.session_id);
}

fn elapsed_seconds(started_at: DateTime<Utc>) -> f64 {
    let seconds = (Utc::now() - started_at).num_milliseconds() as f64 / 1000.0;
    seconds.max(1.0)
}
