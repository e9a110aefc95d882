use crate::api_types::Message;
use crate::llm::{CompletionParams, LlmClient};
use crate::prompts::CLASSIFIER_SYSTEM_PROMPT;
use buddy_core::EmotionLabel;
use std::sync::Arc;
use std::time::Duration;

/// Maps free text onto the closed label set with one bounded round trip.
///
/// Never fails: timeouts, transport errors and out-of-set answers all
/// collapse to [`EmotionLabel::Neutral`].
#[derive(Clone)]
pub struct EmotionClassifier {
    client: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl EmotionClassifier {
    pub fn new(client: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    #[tracing::instrument(skip(self, text), fields(chars = text.chars().count()))]
    pub async fn classify(&self, text: &str) -> EmotionLabel {
        let call = self.client.complete(
            CLASSIFIER_SYSTEM_PROMPT,
            vec![Message::user(text)],
            CompletionParams::single_shot(16, 0.0),
        );

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(response)) => {
                let raw = response.text();
                match EmotionLabel::decode(&raw) {
                    Some(label) => label,
                    None => {
                        tracing::warn!(raw = %raw, "classifier answered outside the label set");
                        EmotionLabel::Neutral
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("classifier call failed: {:#}", e);
                EmotionLabel::Neutral
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "classifier timed out");
                EmotionLabel::Neutral
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ScriptedProvider, ScriptedReply};

    fn classifier(provider: Arc<ScriptedProvider>, timeout_ms: u64) -> EmotionClassifier {
        EmotionClassifier::new(provider, Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn test_decodes_noisy_answer() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push(ScriptedReply::text("  \"Pain-Suspected.\"\n"));
        let label = classifier(provider.clone(), 1_000).classify("my hip aches").await;
        assert_eq!(label, EmotionLabel::PainSuspected);

        let req = &provider.requests()[0];
        assert_eq!(req.system, CLASSIFIER_SYSTEM_PROMPT);
        assert_eq!(req.user_text, "my hip aches");
        assert_eq!(req.max_attempts, 1);
    }

    #[tokio::test]
    async fn test_out_of_set_is_neutral() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push(ScriptedReply::text("melancholy"));
        let label = classifier(provider, 1_000).classify("hmm").await;
        assert_eq!(label, EmotionLabel::Neutral);
    }

    #[tokio::test]
    async fn test_error_is_neutral() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push(ScriptedReply::error("502 bad gateway"));
        let label = classifier(provider, 1_000).classify("hello").await;
        assert_eq!(label, EmotionLabel::Neutral);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_neutral() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push(ScriptedReply::text("sad").after(Duration::from_secs(30)));
        let label = classifier(provider, 8_000).classify("I miss Tom").await;
        assert_eq!(label, EmotionLabel::Neutral);
    }
}
