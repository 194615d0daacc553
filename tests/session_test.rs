//! Integration tests for the session state machine
//!
//! These drive the manager with channel-backed fake engines and recording
//! sinks: start idempotence, safe stop in every state, late-callback
//! staleness, malformed-payload tolerance and persistence counts.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use habla::{
    AssessmentEngine, AssessmentUpdate, AttemptSink, Capabilities, ContinuousRecognizer,
    CredentialSource, Error, ExerciseId, PersistedAttempt, RecognizerUpdate, ReferenceUtterance,
    ScoreSet, ScoreSink, Segment, SessionManager, SessionState, SpeechToken,
};

// ============ Fakes ============

struct FakeRecognizer {
    rx: Option<mpsc::Receiver<RecognizerUpdate>>,
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl ContinuousRecognizer for FakeRecognizer {
    async fn start(&mut self, _language: &str) -> habla::Result<mpsc::Receiver<RecognizerUpdate>> {
        self.rx
            .take()
            .ok_or_else(|| Error::Acquisition("microphone permission denied".to_string()))
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Builds recognizer capabilities around a queue of scripted receivers;
/// an empty queue makes acquisition fail.
struct RecognizerRig {
    slots: Arc<Mutex<VecDeque<mpsc::Receiver<RecognizerUpdate>>>>,
    built: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl RecognizerRig {
    fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(VecDeque::new())),
            built: Arc::new(AtomicUsize::new(0)),
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn feed(&self) -> mpsc::Sender<RecognizerUpdate> {
        let (tx, rx) = mpsc::channel(16);
        self.slots.lock().push_back(rx);
        tx
    }

    fn capabilities(&self) -> Capabilities {
        let slots = Arc::clone(&self.slots);
        let built = Arc::clone(&self.built);
        let stops = Arc::clone(&self.stops);
        Capabilities::none().with_recognizer(move || {
            built.fetch_add(1, Ordering::SeqCst);
            Box::new(FakeRecognizer {
                rx: slots.lock().pop_front(),
                stops: Arc::clone(&stops),
            })
        })
    }
}

struct FakeAssessment {
    rx: Option<mpsc::Receiver<AssessmentUpdate>>,
    started: Arc<AtomicUsize>,
}

#[async_trait]
impl AssessmentEngine for FakeAssessment {
    async fn start(
        &mut self,
        _language: &str,
        _reference_text: &str,
        _token: &str,
        _region: &str,
    ) -> habla::Result<mpsc::Receiver<AssessmentUpdate>> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.rx
            .take()
            .ok_or_else(|| Error::Acquisition("assessment stream unavailable".to_string()))
    }

    fn stop(&mut self) {}
}

struct StaticCredentials;

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn fetch(&self) -> habla::Result<SpeechToken> {
        Ok(SpeechToken {
            token: "tok".to_string(),
            region: "eastus".to_string(),
        })
    }
}

struct FailingCredentials;

#[async_trait]
impl CredentialSource for FailingCredentials {
    async fn fetch(&self) -> habla::Result<SpeechToken> {
        Err(Error::Acquisition("token endpoint returned 500".to_string()))
    }
}

// ============ Recorders ============

struct RecordingSink {
    scores: Mutex<Vec<(ExerciseId, ScoreSet)>>,
    transcripts: Mutex<Vec<(ExerciseId, String)>>,
    errors: Mutex<Vec<(ExerciseId, String)>>,
    tick: mpsc::UnboundedSender<()>,
}

impl RecordingSink {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
        let (tick, ticks) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                scores: Mutex::new(Vec::new()),
                transcripts: Mutex::new(Vec::new()),
                errors: Mutex::new(Vec::new()),
                tick,
            }),
            ticks,
        )
    }
}

impl ScoreSink for RecordingSink {
    fn on_transcript(&self, exercise_id: ExerciseId, text: &str) {
        self.transcripts.lock().push((exercise_id, text.to_string()));
    }

    fn on_scores(&self, exercise_id: ExerciseId, scores: &ScoreSet) {
        self.scores.lock().push((exercise_id, *scores));
        let _ = self.tick.send(());
    }

    fn on_error(&self, exercise_id: ExerciseId, message: &str) {
        self.errors.lock().push((exercise_id, message.to_string()));
        let _ = self.tick.send(());
    }
}

struct RecordingAttempts {
    attempts: Mutex<Vec<PersistedAttempt>>,
    tick: mpsc::UnboundedSender<()>,
}

impl RecordingAttempts {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
        let (tick, ticks) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                attempts: Mutex::new(Vec::new()),
                tick,
            }),
            ticks,
        )
    }
}

#[async_trait]
impl AttemptSink for RecordingAttempts {
    async fn submit(&self, attempt: PersistedAttempt) {
        self.attempts.lock().push(attempt);
        let _ = self.tick.send(());
    }
}

async fn next_tick(ticks: &mut mpsc::UnboundedReceiver<()>) {
    tokio::time::timeout(Duration::from_secs(5), ticks.recv())
        .await
        .expect("timed out waiting for event")
        .expect("tick channel closed");
}

/// Give spawned session tasks a chance to process anything pending
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn results(segments: Vec<Segment>) -> RecognizerUpdate {
    RecognizerUpdate::Results(segments)
}

// ============ Local provider sessions ============

#[tokio::test]
async fn test_start_twice_registers_one_session_and_one_engine() {
    let rig = RecognizerRig::new();
    let _feed = rig.feed();
    let (sink, _) = RecordingSink::new();
    let (attempts, _) = RecordingAttempts::new();
    let manager = SessionManager::new(rig.capabilities(), sink, attempts);

    manager.start(ReferenceUtterance::new(1, "hola")).await.unwrap();
    manager.start(ReferenceUtterance::new(1, "hola")).await.unwrap();

    assert_eq!(rig.built.load(Ordering::SeqCst), 1);
    assert_eq!(manager.active_count(), 1);
    assert!(manager.is_active(1));
    assert_eq!(manager.state_of(1), SessionState::Active);
}

#[tokio::test]
async fn test_stop_before_start_and_double_stop_are_safe() {
    let rig = RecognizerRig::new();
    let (sink, _) = RecordingSink::new();
    let (attempts, _) = RecordingAttempts::new();
    let manager = SessionManager::new(rig.capabilities(), sink, attempts);

    manager.stop(42);
    manager.stop(42);

    assert!(!manager.is_active(42));
    assert_eq!(manager.state_of(42), SessionState::Idle);
    assert_eq!(rig.stops.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_restart_after_stop_builds_a_fresh_engine() {
    let rig = RecognizerRig::new();
    let _feed_a = rig.feed();
    let _feed_b = rig.feed();
    let (sink, _) = RecordingSink::new();
    let (attempts, _) = RecordingAttempts::new();
    let manager = SessionManager::new(rig.capabilities(), sink, attempts);

    manager.start(ReferenceUtterance::new(1, "hola")).await.unwrap();
    manager.stop(1);
    assert!(!manager.is_active(1));

    manager.start(ReferenceUtterance::new(1, "hola")).await.unwrap();
    assert!(manager.is_active(1));
    assert_eq!(rig.built.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unsupported_capability_is_fatal_before_session() {
    let (sink, _) = RecordingSink::new();
    let (attempts, _) = RecordingAttempts::new();
    let manager = SessionManager::new(Capabilities::none(), sink.clone(), attempts);

    let result = manager.start(ReferenceUtterance::new(5, "hola")).await;

    assert!(matches!(result, Err(Error::UnsupportedCapability)));
    assert!(!manager.is_active(5));
    assert_eq!(sink.errors.lock().len(), 1);
}

#[tokio::test]
async fn test_device_acquisition_failure_leaves_nothing_registered() {
    let rig = RecognizerRig::new();
    // no feed queued: the fake recognizer fails to acquire
    let (sink, _) = RecordingSink::new();
    let (attempts, _) = RecordingAttempts::new();
    let manager = SessionManager::new(rig.capabilities(), sink.clone(), attempts);

    let result = manager.start(ReferenceUtterance::new(5, "hola")).await;

    assert!(matches!(result, Err(Error::Acquisition(_))));
    assert!(!manager.is_active(5));
    let errors = sink.errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].1.contains("microphone"));
}

#[tokio::test]
async fn test_interim_never_persists_and_final_persists_once() {
    let rig = RecognizerRig::new();
    let feed = rig.feed();
    let (sink, mut sink_ticks) = RecordingSink::new();
    let (attempts, mut attempt_ticks) = RecordingAttempts::new();
    let manager = SessionManager::new(
        rig.capabilities(),
        sink.clone(),
        attempts.clone(),
    );

    let reference = ReferenceUtterance::new(7, "hola como estas");
    manager.start(reference).await.unwrap();

    feed.send(results(vec![Segment::interim("hola")])).await.unwrap();
    next_tick(&mut sink_ticks).await;
    assert!(attempts.attempts.lock().is_empty());

    feed.send(results(vec![Segment::fin("hola como estas")]))
        .await
        .unwrap();
    next_tick(&mut attempt_ticks).await;
    assert_eq!(attempts.attempts.lock().len(), 1);
    assert_eq!(sink.scores.lock().len(), 2);
}

#[tokio::test]
async fn test_end_to_end_scoring_of_a_perfect_final() {
    let rig = RecognizerRig::new();
    let feed = rig.feed();
    let (sink, mut sink_ticks) = RecordingSink::new();
    let (attempts, mut attempt_ticks) = RecordingAttempts::new();
    let manager = SessionManager::new(
        rig.capabilities(),
        sink.clone(),
        attempts.clone(),
    );

    manager
        .start(ReferenceUtterance::new(9, "hola como estas"))
        .await
        .unwrap();

    feed.send(results(vec![Segment::interim("hola")])).await.unwrap();
    next_tick(&mut sink_ticks).await;

    feed.send(results(vec![Segment::fin("hola como estas")]))
        .await
        .unwrap();
    next_tick(&mut attempt_ticks).await;

    let attempts = attempts.attempts.lock();
    assert_eq!(attempts.len(), 1);
    let attempt = &attempts[0];
    assert_eq!(attempt.exercise_id, 9);
    assert_eq!(attempt.expected_text, "hola como estas");
    assert_eq!(attempt.accuracy_score, 100.0);
    assert_eq!(attempt.completeness_score, 100.0);
    assert!(attempt.fluency_score >= 60.0);
    assert_eq!(attempt.prosody_score, 0.0);

    let transcripts = sink.transcripts.lock();
    assert_eq!(transcripts.last().unwrap().1, "hola como estas");
}

#[tokio::test]
async fn test_late_event_after_stop_is_dropped() {
    let rig = RecognizerRig::new();
    let feed = rig.feed();
    let (sink, mut sink_ticks) = RecordingSink::new();
    let (attempts, _) = RecordingAttempts::new();
    let manager = SessionManager::new(
        rig.capabilities(),
        sink.clone(),
        attempts.clone(),
    );

    manager.start(ReferenceUtterance::new(3, "hola")).await.unwrap();
    feed.send(results(vec![Segment::interim("ho")])).await.unwrap();
    next_tick(&mut sink_ticks).await;

    manager.stop(3);
    assert_eq!(rig.stops.load(Ordering::SeqCst), 1);

    // the engine fires one more callback after the stop request
    feed.send(results(vec![Segment::fin("hola")])).await.unwrap();
    settle().await;

    assert_eq!(sink.scores.lock().len(), 1);
    assert!(attempts.attempts.lock().is_empty());
    assert!(!manager.is_active(3));
}

#[tokio::test]
async fn test_engine_error_ends_session_and_allows_restart() {
    let rig = RecognizerRig::new();
    let feed = rig.feed();
    let _spare = rig.feed();
    let (sink, mut sink_ticks) = RecordingSink::new();
    let (attempts, _) = RecordingAttempts::new();
    let manager = SessionManager::new(
        rig.capabilities(),
        sink.clone(),
        attempts.clone(),
    );

    manager.start(ReferenceUtterance::new(4, "hola")).await.unwrap();
    feed.send(RecognizerUpdate::Error("audio device lost".to_string()))
        .await
        .unwrap();
    next_tick(&mut sink_ticks).await;

    assert!(!manager.is_active(4));
    assert_eq!(sink.errors.lock().len(), 1);
    assert_eq!(rig.stops.load(Ordering::SeqCst), 1);

    // a fresh start afterwards is allowed
    manager.start(ReferenceUtterance::new(4, "hola")).await.unwrap();
    assert!(manager.is_active(4));
}

#[tokio::test]
async fn test_engine_initiated_end_removes_session() {
    let rig = RecognizerRig::new();
    let feed = rig.feed();
    let (sink, _) = RecordingSink::new();
    let (attempts, _) = RecordingAttempts::new();
    let manager = SessionManager::new(rig.capabilities(), sink, attempts);

    manager.start(ReferenceUtterance::new(2, "hola")).await.unwrap();
    assert!(manager.is_active(2));

    drop(feed);
    for _ in 0..100 {
        if !manager.is_active(2) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session was not removed after the engine ended");
}

// ============ Remote provider sessions ============

fn assessment_capabilities(
    slots: Arc<Mutex<VecDeque<mpsc::Receiver<AssessmentUpdate>>>>,
    started: Arc<AtomicUsize>,
    credentials: Arc<dyn CredentialSource>,
) -> Capabilities {
    Capabilities::none().with_assessment(
        move || {
            Box::new(FakeAssessment {
                rx: slots.lock().pop_front(),
                started: Arc::clone(&started),
            })
        },
        credentials,
    )
}

#[tokio::test]
async fn test_malformed_payload_is_skipped_and_session_stays_active() {
    let (tx, rx) = mpsc::channel(16);
    let slots = Arc::new(Mutex::new(VecDeque::from([rx])));
    let started = Arc::new(AtomicUsize::new(0));
    let caps = assessment_capabilities(slots, started, Arc::new(StaticCredentials));

    let (sink, mut sink_ticks) = RecordingSink::new();
    let (attempts, mut attempt_ticks) = RecordingAttempts::new();
    let manager = SessionManager::new(caps, sink.clone(), attempts.clone());

    manager.start(ReferenceUtterance::new(11, "hola")).await.unwrap();

    tx.send(AssessmentUpdate::Scored(serde_json::json!({"garbage": true})))
        .await
        .unwrap();
    tx.send(AssessmentUpdate::Scored(serde_json::json!({
        "NBest": [{
            "PronunciationAssessment": {
                "AccuracyScore": 90.0,
                "FluencyScore": 85.0,
                "CompletenessScore": 100.0,
                "ProsodyScore": 70.0
            }
        }]
    })))
    .await
    .unwrap();

    next_tick(&mut sink_ticks).await;
    next_tick(&mut attempt_ticks).await;

    assert!(manager.is_active(11));
    assert!(sink.errors.lock().is_empty());
    let scores = sink.scores.lock();
    assert_eq!(scores.len(), 1);
    assert_eq!(scores[0].1.prosody, 70.0);
    assert_eq!(attempts.attempts.lock().len(), 1);
}

#[tokio::test]
async fn test_token_failure_is_fatal_before_session() {
    let slots = Arc::new(Mutex::new(VecDeque::new()));
    let started = Arc::new(AtomicUsize::new(0));
    let caps = assessment_capabilities(
        slots,
        Arc::clone(&started),
        Arc::new(FailingCredentials),
    );

    let (sink, _) = RecordingSink::new();
    let (attempts, _) = RecordingAttempts::new();
    let manager = SessionManager::new(caps, sink.clone(), attempts);

    let result = manager.start(ReferenceUtterance::new(12, "hola")).await;

    assert!(matches!(result, Err(Error::Acquisition(_))));
    assert!(!manager.is_active(12));
    assert_eq!(sink.errors.lock().len(), 1);
    // the assessment stream was never opened
    assert_eq!(started.load(Ordering::SeqCst), 0);
}
