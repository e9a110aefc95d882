use crate::api_types::{ContentBlock, Message, MessagesResponse, Role};
use crate::llm::{CompletionParams, LlmClient};
use crate::retry::{with_retry, RetryConfig};
use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;

/// Any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(model: &str, base_url: Option<&str>) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY").unwrap_or_else(|_| "mock".to_string());
        let base_url = base_url
            .map(str::to_string)
            .or_else(|| env::var("OPENAI_BASE_URL").ok())
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
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

    fn build_payload(&self, system: &str, messages: &[Message], params: &CompletionParams) -> Value {
        // System prompt goes first with role "system"
        let mut openai_messages = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            openai_messages.push(json!({"role": "system", "content": system}));
        }
        for msg in messages {
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            openai_messages.push(json!({"role": role, "content": msg.text()}));
        }

        json!({
            "model": self.model,
            "messages": openai_messages,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        })
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
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
                    text: "(Mock OpenAI Response) I received your prompt.".to_string(),
                }],
                stop_reason: Some("stop".to_string()),
            });
        }

        let payload = self.build_payload(system, &messages, &params);
        let url = format!("{}/chat/completions", self.base_url);
        let retry_config = RetryConfig::with_attempts(params.max_attempts);
        let client = &self.client;
        let auth = format!("Bearer {}", self.api_key);

        let response = with_retry(&retry_config, "OpenAI", || async {
            let resp = client
                .post(&url)
                .header("Authorization", &auth)
                .json(&payload)
                .send()
                .await
                .context("Failed to send request to OpenAI")?;
            Ok(resp)
        })
        .await?;

        let resp_json: Value = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;
        let choice = &resp_json["choices"][0];
        let finish_reason = choice["finish_reason"].as_str().map(|s| s.to_string());

        let mut content = Vec::new();
        if let Some(text) = choice["message"]["content"].as_str() {
            if !text.is_empty() {
                content.push(ContentBlock::Text {
                    text: text.to_string(),
                });
            }
        }

        Ok(MessagesResponse {
            content,
            stop_reason: finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion(text: &str) -> serde_json::Value {
        json!({
            "choices": [{
                "message": {"role": "assistant", "content": text},
                "finish_reason": "stop"
            }]
        })
    }

    #[tokio::test]
    async fn test_chat_completion_payload_and_parse() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-test",
                "temperature": 0.5,
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hello"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("Woof! Hello!")))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiClient::new("gpt-test", Some(&server.uri()))
            .unwrap()
            .with_api_key("sk-test");
        let resp = client
            .complete(
                "be brief",
                vec![Message::user("hello")],
                CompletionParams::single_shot(64, 0.5),
            )
            .await
            .unwrap();
        assert_eq!(resp.text(), "Woof! Hello!");
        assert_eq!(resp.stop_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("fine")))
            .mount(&server)
            .await;

        let client = OpenAiClient::new("gpt-test", Some(&server.uri()))
            .unwrap()
            .with_api_key("sk-test");
        let resp = client
            .complete("", vec![Message::user("hi")], CompletionParams::default())
            .await
            .unwrap();
        assert_eq!(resp.text(), "fine");
    }

    #[tokio::test]
    async fn test_single_shot_does_not_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiClient::new("gpt-test", Some(&server.uri()))
            .unwrap()
            .with_api_key("sk-test");
        let result = client
            .complete(
                "",
                vec![Message::user("hi")],
                CompletionParams::single_shot(8, 0.0),
            )
            .await;
        assert!(result.is_err());
    }
}
