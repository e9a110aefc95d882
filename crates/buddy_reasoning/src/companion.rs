use crate::api_types::Message;
use crate::llm::{CompletionParams, LlmClient};
use crate::prompts::companion_system_prompt;
use anyhow::{Context, Result};
use async_trait::async_trait;
use buddy_core::config::{LlmConfig, PipelineConfig};
use buddy_core::SpeechSink;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

static RE_PICTOGRAPH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\p{Extended_Pictographic}\u{1F1E6}-\u{1F1FF}\u{1F3FB}-\u{1F3FF}\u{FE0F}\u{200D}\u{20E3}]").unwrap()
});
static RE_BULLET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-+]|\d+\.)\s+").unwrap());
static RE_MARKDOWN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[*_~`#>|\[\]]").unwrap());
static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Strip what a speech synthesizer cannot say: emoji, pictographs and
/// markdown markers. Runs of whitespace collapse to one space.
pub fn clean_for_speech(text: &str) -> String {
    let text = RE_PICTOGRAPH.replace_all(text, "");
    let text = RE_BULLET.replace_all(&text, "");
    let text = RE_MARKDOWN.replace_all(&text, "");
    RE_WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Persona-constrained reply generator.
#[derive(Clone)]
pub struct CompanionResponder {
    client: Arc<dyn LlmClient>,
    system_prompt: String,
    timeout: Duration,
    fallback: String,
    params: CompletionParams,
}

impl CompanionResponder {
    pub fn new(client: Arc<dyn LlmClient>, llm: &LlmConfig, pipeline: &PipelineConfig) -> Self {
        Self {
            client,
            system_prompt: companion_system_prompt(&pipeline.companion_name),
            timeout: Duration::from_millis(pipeline.reply_timeout_ms),
            fallback: pipeline.fallback_reply.clone(),
            params: CompletionParams {
                max_tokens: llm.max_tokens,
                temperature: llm.temperature,
                ..CompletionParams::default()
            },
        }
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// One reply within the time budget. Errors on timeout, transport
    /// failure or an empty answer.
    pub async fn generate(&self, text: &str) -> Result<String> {
        let call = self.client.complete(
            &self.system_prompt,
            vec![Message::user(text)],
            self.params.clone(),
        );
        let response = tokio::time::timeout(self.timeout, call)
            .await
            .context("reply generation timed out")??;

        let reply = response.text().trim().to_string();
        if reply.is_empty() {
            anyhow::bail!("engine returned an empty reply");
        }
        Ok(reply)
    }

    /// Like [`generate`](Self::generate) but substitutes the fallback line.
    pub async fn reply(&self, text: &str) -> String {
        match self.generate(text).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("reply generation failed, using fallback: {:#}", e);
                self.fallback.clone()
            }
        }
    }
}

/// Speech hand-off that only logs the line. Used when no synthesizer is wired.
#[derive(Debug, Default, Clone)]
pub struct TracingSpeechSink;

#[async_trait]
impl SpeechSink for TracingSpeechSink {
    async fn speak(&self, text: &str) -> Result<()> {
        tracing::info!(target: "speech", chars = text.chars().count(), "speak: {}", text);
        Ok(())
    }
}
