use crate::api_types::{ContentBlock, Message, MessagesRequest, MessagesResponse};
use crate::llm::{CompletionParams, LlmClient};
use crate::retry::{with_retry, RetryConfig};
use anyhow::{Context, Result};
use reqwest::Client;
use std::env;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AnthropicClient {
    /// Key from `ANTHROPIC_API_KEY`; when absent the client answers locally.
    pub fn new(model: &str, base_url: Option<&str>) -> Result<Self> {
        let api_key = env::var("ANTHROPIC_API_KEY").unwrap_or_else(|_| "mock".to_string());
        let base_url = base_url
            .map(str::to_string)
            .or_else(|| env::var("ANTHROPIC_BASE_URL").ok())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(60)).build()?,
            api_key,
            base_url,
            model: model.to_string(),
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    #[tracing::instrument(skip(self, system, messages, params), fields(model = %self.model))]
    async fn complete(
        &self,
        system: &str,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Result<MessagesResponse> {
        if self.api_key == "mock" {
            return Ok(MessagesResponse {
                content: vec![ContentBlock::Text {
                    text: "(Mock Response) I received your prompt.".to_string(),
                }],
                stop_reason: Some("end_turn".to_string()),
            });
        }

        let url = format!("{}/v1/messages", self.base_url);
        let request_body = MessagesRequest {
            model: self.model.clone(),
            system: (!system.is_empty()).then(|| system.to_string()),
            messages,
            max_tokens: params.max_tokens,
            temperature: Some(params.temperature),
        };

        tracing::debug!(
            "LLM params: max_tokens={}, temperature={:.2}, attempts={}",
            params.max_tokens,
            params.temperature,
            params.max_attempts
        );

        let retry_config = RetryConfig::with_attempts(params.max_attempts);
        let client = &self.client;
        let api_key = &self.api_key;

        let response = with_retry(&retry_config, "Anthropic", || async {
            let resp = client
                .post(&url)
                .header("x-api-key", api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&request_body)
                .send()
                .await
                .context("Failed to send request to Anthropic")?;
            Ok(resp)
        })
        .await?;

        let resp_text = response.text().await?;
        let api_response: MessagesResponse =
            serde_json::from_str(&resp_text).context("Failed to parse Anthropic response")?;
        Ok(api_response)
    }
}
