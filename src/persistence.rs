//! Best-effort persistence of finalized pronunciation attempts
//!
//! At-most-once per finalized event: failures are logged, never retried,
//! never surfaced to the session.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::types::PersistedAttempt;

/// Sink for finalized attempts. Implementations are best-effort by
/// contract; `submit` cannot fail from the caller's point of view.
#[async_trait]
pub trait AttemptSink: Send + Sync {
    async fn submit(&self, attempt: PersistedAttempt);
}

/// HTTP implementation posting to the learning backend's `POST /attempt`
pub struct PersistenceClient {
    client: Client,
    base_url: String,
}

impl PersistenceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn post(&self, attempt: &PersistedAttempt) -> Result<(), reqwest::Error> {
        // response body ignored, only success/failure observed
        self.client
            .post(format!("{}/attempt", self.base_url))
            .json(attempt)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl AttemptSink for PersistenceClient {
    async fn submit(&self, attempt: PersistedAttempt) {
        debug!("submitting attempt for exercise {}", attempt.exercise_id);
        if let Err(e) = self.post(&attempt).await {
            warn!(
                "attempt submission failed for exercise {}: {e}",
                attempt.exercise_id
            );
        }
    }
}
