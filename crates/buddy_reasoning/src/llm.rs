use crate::api_types::{Message, MessagesResponse};
use anyhow::Result;
use async_trait::async_trait;

/// Parameters for one completion round trip.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    /// Maximum tokens to generate (will be clamped to provider limits)
    pub max_tokens: u32,
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: f32,
    /// Attempts made on transient HTTP failures, including the first.
    pub max_attempts: u32,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.7,
            max_attempts: 3,
        }
    }
}

impl CompletionParams {
    /// One round trip, no retry.
    pub fn single_shot(max_tokens: u32, temperature: f32) -> Self {
        Self {
            max_tokens,
            temperature,
            max_attempts: 1,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Result<MessagesResponse>;
}
