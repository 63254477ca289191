//! The remote completion service seam.
//!
//! The call client depends only on this classification of outcomes, not on any
//! concrete transport. Tests inject scripted implementations; production wires
//! [`openai::OpenAiClient`].

pub mod openai;

pub use openai::OpenAiClient;

use crate::model::CallParams;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// One request to the completion service. `timeout` bounds the whole exchange;
/// exceeding it is a retryable outcome, not a crash.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub params: CallParams,
    pub timeout: Duration,
}

/// Structurally successful response, before any decoding or validation.
#[derive(Debug, Clone)]
pub struct RawCompletion {
    pub text: String,
    /// Service-reported reason the generation stopped ("stop", "length", ...).
    pub finish_reason: Option<String>,
    pub model: String,
}

impl RawCompletion {
    /// The service says generation was cut off by the token ceiling.
    pub fn truncated_by_length(&self) -> bool {
        self.finish_reason.as_deref() == Some("length")
    }
}

/// Classified service failures. The call client's retry policy branches on
/// these variants and nothing else.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("request timed out")]
    Timeout,

    #[error("server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("client error (status {status}): {message}")]
    Client { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, req: &CompletionRequest) -> Result<RawCompletion, ServiceError>;

    fn provider_name(&self) -> &'static str;
}
