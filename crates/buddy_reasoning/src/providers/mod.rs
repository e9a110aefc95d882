pub mod anthropic;
pub mod mock;
pub mod openai;

use crate::llm::LlmClient;
use anyhow::Result;
use buddy_core::config::LlmConfig;
use std::sync::Arc;

pub use anthropic::AnthropicClient;
pub use mock::{MockProvider, RecordedRequest, ScriptedProvider, ScriptedReply};
pub use openai::OpenAiClient;

/// Build the client named by `config.provider`.
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let client: Arc<dyn LlmClient> = match config.provider.to_ascii_lowercase().as_str() {
        "anthropic" | "claude" => Arc::new(AnthropicClient::new(
            &config.model,
            config.base_url.as_deref(),
        )?),
        "openai" | "deepseek" | "gemini" => {
            Arc::new(OpenAiClient::new(&config.model, config.base_url.as_deref())?)
        }
        "mock" => Arc::new(MockProvider::new(&config.model)),
        other => anyhow::bail!("Unknown LLM provider: {}", other),
    };
    tracing::info!(provider = %config.provider, model = %config.model, "LLM client ready");
    Ok(client)
}
