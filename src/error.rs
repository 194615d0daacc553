//! Error types for Habla

use thiserror::Error;

/// Result type alias using Habla's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in the pronunciation engine
#[derive(Error, Debug)]
pub enum Error {
    /// Neither recognition strategy is available in this deployment
    #[error("no recognition capability available")]
    UnsupportedCapability,

    /// Device or credential could not be obtained; no session was created
    #[error("acquisition failed: {0}")]
    Acquisition(String),

    /// Mid-session engine failure; fatal to the session, not the process
    #[error("recognition failed: {0}")]
    Recognition(String),

    /// A scored payload that cannot be decoded; the event is skipped
    #[error("malformed provider payload: {0}")]
    MalformedPayload(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
