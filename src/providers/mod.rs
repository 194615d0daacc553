//! Recognition provider abstraction
//!
//! Two interchangeable strategies behind one contract: an on-device
//! heuristic over a live transcript, and a cloud phoneme-level assessment.

mod local;
mod remote;

pub use local::LocalHeuristicProvider;
pub use remote::{CredentialSource, RemoteAssessmentProvider, SpeechToken, TokenClient};

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::engine::{AssessmentEngine, ContinuousRecognizer};
use crate::error::{Error, Result};
use crate::types::{RecognitionEvent, ReferenceUtterance};

/// Boxed stream of normalized recognition events
pub type EventStream = Pin<Box<dyn Stream<Item = RecognitionEvent> + Send>>;

/// A live, cancellable recognition strategy bound to one session
#[async_trait]
pub trait RecognitionProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &'static str;

    /// Begin recognition against the reference. Fails with
    /// [`Error::Acquisition`] when the device or credential cannot be
    /// obtained; no events are emitted in that case.
    async fn start(&mut self, reference: &ReferenceUtterance) -> Result<EventStream>;

    /// Idempotent and always safe, including before `start` succeeds and
    /// after the stream ended. Releases the underlying engine synchronously.
    fn stop(&mut self);
}

type RecognizerFactory = Box<dyn Fn() -> Box<dyn ContinuousRecognizer> + Send + Sync>;
type AssessmentFactory = Box<dyn Fn() -> Box<dyn AssessmentEngine> + Send + Sync>;

/// Engines available to this deployment. Binding is a configuration
/// decision made once at construction; resolution happens once per
/// session start. Each factory builds a fresh engine per session.
#[derive(Default)]
pub struct Capabilities {
    recognizer: Option<RecognizerFactory>,
    assessment: Option<(AssessmentFactory, Arc<dyn CredentialSource>)>,
}

impl Capabilities {
    /// No engines bound; every start fails with `UnsupportedCapability`
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_recognizer(
        mut self,
        factory: impl Fn() -> Box<dyn ContinuousRecognizer> + Send + Sync + 'static,
    ) -> Self {
        self.recognizer = Some(Box::new(factory));
        self
    }

    pub fn with_assessment(
        mut self,
        factory: impl Fn() -> Box<dyn AssessmentEngine> + Send + Sync + 'static,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        self.assessment = Some((Box::new(factory), credentials));
        self
    }

    pub fn has_any(&self) -> bool {
        self.recognizer.is_some() || self.assessment.is_some()
    }

    /// Build a provider for a new session. The cloud assessment wins when
    /// both engines are bound.
    pub fn resolve(&self) -> Result<Box<dyn RecognitionProvider>> {
        if let Some((factory, credentials)) = &self.assessment {
            return Ok(Box::new(RemoteAssessmentProvider::new(
                factory(),
                Arc::clone(credentials),
            )));
        }
        if let Some(factory) = &self.recognizer {
            return Ok(Box::new(LocalHeuristicProvider::new(factory())));
        }
        Err(Error::UnsupportedCapability)
    }
}
