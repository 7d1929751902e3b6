//! Completion provider contract.

use std::future::Future;

use crate::chatbot::message::Turn;

/// Anything that can turn a system prompt and a history into a reply.
///
/// Implementations own their timeout and retry policy. The scheduler only
/// cares whether the call succeeded.
pub trait CompletionProvider: Send + Sync + 'static {
    fn generate(
        &self,
        system_prompt: &str,
        history: &[Turn],
    ) -> impl Future<Output = Result<String, ProviderError>> + Send;
}

#[derive(Debug)]
pub enum ProviderError {
    Http(String),
    Timeout,
    Api { status: u16, body: String },
    Parse(String),
    Empty,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Http(e) => write!(f, "HTTP error: {e}"),
            ProviderError::Timeout => write!(f, "request timed out"),
            ProviderError::Api { status, body } => write!(f, "API error: {status}: {body}"),
            ProviderError::Parse(e) => write!(f, "Parse error: {e}"),
            ProviderError::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for ProviderError {}
