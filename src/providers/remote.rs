//! Cloud phoneme-level assessment provider
//!
//! Exchanges a short-lived speech credential, then streams pre-scored
//! results from a pronunciation-assessment engine configured with the
//! reference text. Malformed payloads are logged and skipped; the session
//! keeps running.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::{AssessmentEngine, AssessmentPayload, AssessmentUpdate};
use crate::error::{Error, Result};
use crate::types::{RecognitionEvent, ReferenceUtterance, ScoreSet};

use super::{EventStream, RecognitionProvider};

/// Short-lived credential for the cloud speech service
#[derive(Debug, Clone, Deserialize)]
pub struct SpeechToken {
    pub token: String,
    pub region: String,
}

/// Source of speech credentials, consumed once per session start
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self) -> Result<SpeechToken>;
}

/// HTTP credential source hitting the backend's `GET /token` endpoint
pub struct TokenClient {
    client: Client,
    base_url: String,
}

impl TokenClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl CredentialSource for TokenClient {
    async fn fetch(&self) -> Result<SpeechToken> {
        debug!("requesting speech token");
        let response = self
            .client
            .get(format!("{}/token", self.base_url))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Acquisition(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}

pub struct RemoteAssessmentProvider {
    engine: Box<dyn AssessmentEngine>,
    credentials: Arc<dyn CredentialSource>,
}

impl RemoteAssessmentProvider {
    pub fn new(engine: Box<dyn AssessmentEngine>, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            engine,
            credentials,
        }
    }
}

/// Decode a scored utterance out of the assessment payload.
///
/// The n-best shape is the cloud service's native JSON
/// (`NBest[0].PronunciationAssessment.*Score`); flat fields are accepted
/// as a fallback. Prosody is optional and defaults to 0.
fn parse_scores(payload: &AssessmentPayload) -> Result<ScoreSet> {
    let assessment = payload
        .get("NBest")
        .and_then(|nbest| nbest.get(0))
        .and_then(|best| best.get("PronunciationAssessment"))
        .or_else(|| payload.get("PronunciationAssessment"))
        .ok_or_else(|| Error::MalformedPayload("missing PronunciationAssessment".to_string()))?;

    let score = |key: &str| {
        assessment
            .get(key)
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| Error::MalformedPayload(format!("missing {key}")))
    };

    Ok(ScoreSet {
        accuracy: score("AccuracyScore")?,
        fluency: score("FluencyScore")?,
        completeness: score("CompletenessScore")?,
        prosody: assessment
            .get("ProsodyScore")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0),
    })
}

struct PumpState {
    updates: mpsc::Receiver<AssessmentUpdate>,
    ended: bool,
}

#[async_trait]
impl RecognitionProvider for RemoteAssessmentProvider {
    fn name(&self) -> &'static str {
        "remote-assessment"
    }

    async fn start(&mut self, reference: &ReferenceUtterance) -> Result<EventStream> {
        // credential first: failure here is fatal before any session exists
        let token = match self.credentials.fetch().await {
            Ok(token) => token,
            Err(err @ Error::Acquisition(_)) => return Err(err),
            Err(other) => return Err(Error::Acquisition(other.to_string())),
        };
        debug!("speech token acquired for region {}", token.region);

        let updates = self
            .engine
            .start(
                &reference.language,
                &reference.reference_text,
                &token.token,
                &token.region,
            )
            .await?;

        let state = PumpState {
            updates,
            ended: false,
        };
        let stream = futures::stream::unfold(state, |mut state| async move {
            loop {
                match state.updates.recv().await {
                    Some(AssessmentUpdate::Scored(payload)) => match parse_scores(&payload) {
                        Ok(scores) => {
                            return Some((RecognitionEvent::ProviderScored(scores), state));
                        }
                        Err(e) => {
                            // skip the event, keep the session alive
                            warn!("skipping assessment payload: {e}");
                            continue;
                        }
                    },
                    Some(AssessmentUpdate::Error(reason)) => {
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
