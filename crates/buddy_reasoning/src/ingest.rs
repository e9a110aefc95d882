use crate::classifier::EmotionClassifier;
use crate::companion::{clean_for_speech, CompanionResponder};
use buddy_core::{Author, EmotionLabel, IngestError, SpeechSink, UtteranceLog};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

/// What the subject's client gets back for one message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReply {
    pub subject_utterance_id: String,
    pub companion_reply_text: String,
    pub emotion_label: EmotionLabel,
}

/// Persists a subject message, labels it, answers it and persists the answer.
pub struct IngestionPipeline {
    log: Arc<dyn UtteranceLog>,
    classifier: EmotionClassifier,
    responder: CompanionResponder,
    speech: Option<Arc<dyn SpeechSink>>,
}

impl IngestionPipeline {
    pub fn new(
        log: Arc<dyn UtteranceLog>,
        classifier: EmotionClassifier,
        responder: CompanionResponder,
    ) -> Self {
        Self {
            log,
            classifier,
            responder,
            speech: None,
        }
    }

    pub fn with_speech(mut self, speech: Arc<dyn SpeechSink>) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Only an empty message or a failed write of the subject's own
    /// utterance is reported. Engine trouble degrades to `neutral` and the
    /// fallback line.
    #[tracing::instrument(skip_all, fields(subject = %subject_user_id))]
    pub async fn ingest(
        &self,
        subject_user_id: &str,
        text: &str,
    ) -> Result<IngestReply, IngestError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(IngestError::EmptyText);
        }

        let utterance = self
            .log
            .append_utterance(subject_user_id, Author::Subject, text)
            .await
            .map_err(IngestError::Persist)?;

        let (label, reply_text) = tokio::join!(
            self.classifier.classify(text),
            self.responder.reply(text)
        );

        match self.log.attach_label(&utterance.id, label).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(utterance = %utterance.id, "label was already attached"),
            Err(e) => tracing::warn!(utterance = %utterance.id, "failed to attach label: {:#}", e),
        }

        if let Err(e) = self
            .log
            .append_utterance(subject_user_id, Author::Companion, &reply_text)
            .await
        {
            tracing::warn!("failed to persist companion reply: {:#}", e);
        }

        if let Err(e) = self.log.touch_activity(subject_user_id, Utc::now()).await {
            tracing::debug!("failed to record activity: {:#}", e);
        }

        self.hand_off_speech(&reply_text);

        tracing::info!(label = %label, utterance = %utterance.id, "message ingested");
        Ok(IngestReply {
            subject_utterance_id: utterance.id,
            companion_reply_text: reply_text,
            emotion_label: label,
        })
    }

    fn hand_off_speech(&self, reply_text: &str) {
        let Some(speech) = self.speech.clone() else {
            return;
        };
        let spoken = clean_for_speech(reply_text);
        if spoken.is_empty() {
            return;
        }
        tokio::spawn(async move {
            if let Err(e) = speech.speak(&spoken).await {
                tracing::warn!("speech hand-off failed: {:#}", e);
            }
        });
    }
}
