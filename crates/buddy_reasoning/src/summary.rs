//! Daily narrative and concern detection over one subject-day of utterances.
//!
//! Results are cached through [`SummaryStore`] keyed by (subject, date). The
//! lazy refresh walks the lookback window oldest first, one engine call at a
//! time with a pause in between, and never lets one bad day abort the rest.

use crate::api_types::Message;
use crate::llm::{CompletionParams, LlmClient};
use crate::prompts::{render_transcript, summary_system_prompt};
use anyhow::{Context, Result};
use buddy_core::config::SummaryConfig;
use buddy_core::time::{day_bounds, lookback_window};
use buddy_core::{DailySummary, SummaryStore, Utterance};
use chrono::{NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

pub const EMPTY_DAY_SUMMARY: &str = "No conversations on this day.";
pub const GENERIC_CONCERN_REASON: &str = "Potential concern detected in today's conversation.";

static RE_FENCED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)```").unwrap());

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSummary {
    summary: String,
    #[serde(default)]
    has_concern: bool,
    #[serde(default)]
    concern_reason: Option<String>,
}

/// Parsed engine verdict for one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryOutcome {
    pub summary: String,
    pub has_concern: bool,
    pub concern_reason: Option<String>,
    /// False for the canned empty-day result, which is never cached.
    #[serde(skip)]
    pub persisted: bool,
}

impl SummaryOutcome {
    pub fn empty_day() -> Self {
        Self {
            summary: EMPTY_DAY_SUMMARY.to_string(),
            has_concern: false,
            concern_reason: None,
            persisted: false,
        }
    }
}

impl From<&DailySummary> for SummaryOutcome {
    fn from(row: &DailySummary) -> Self {
        Self {
            summary: row.summary.clone(),
            has_concern: row.has_concern,
            concern_reason: row.concern_reason.clone(),
            persisted: true,
        }
    }
}

/// Per-day result of a lazy refresh.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DayStatus {
    Cached { summary: DailySummary },
    Generated { summary: DailySummary },
    Empty,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct DayReport {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub status: DayStatus,
}

impl DayReport {
    pub fn summary(&self) -> Option<&DailySummary> {
        match &self.status {
            DayStatus::Cached { summary } | DayStatus::Generated { summary } => Some(summary),
            DayStatus::Empty | DayStatus::Failed { .. } => None,
        }
    }
}

/// Extract `{summary, hasConcern, concernReason}` from engine output.
///
/// A fenced code block wins; otherwise the first JSON object that has the
/// expected shape, scanning left to right. The reason is normalized so it is
/// present exactly when `has_concern` is set.
pub fn parse_summary_response(text: &str) -> Result<SummaryOutcome> {
    let raw = RE_FENCED
        .captures(text)
        .and_then(|caps| serde_json::from_str::<RawSummary>(caps[1].trim()).ok())
        .or_else(|| first_summary_object(text))
        .with_context(|| format!("no summary JSON in engine output: {:.200}", text))?;

    let summary = raw.summary.trim().to_string();
    if summary.is_empty() {
        anyhow::bail!("engine returned an empty summary");
    }

    let concern_reason = if raw.has_concern {
        Some(
            raw.concern_reason
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty() && r != "null")
                .unwrap_or_else(|| GENERIC_CONCERN_REASON.to_string()),
        )
    } else {
        None
    };

    Ok(SummaryOutcome {
        summary,
        has_concern: raw.has_concern,
        concern_reason,
        persisted: false,
    })
}

fn first_summary_object(text: &str) -> Option<RawSummary> {
    text.match_indices('{').find_map(|(i, _)| {
        let mut stream = serde_json::Deserializer::from_str(&text[i..]).into_iter::<RawSummary>();
        stream.next().and_then(|parsed| parsed.ok())
    })
}

enum Pending {
    Cached(DailySummary),
    Utterances(Vec<Utterance>),
}

/// Summarizes subject-days and keeps the cache filled.
pub struct DailySummarizer {
    client: Arc<dyn LlmClient>,
    store: Arc<dyn SummaryStore>,
    config: SummaryConfig,
    companion_name: String,
    max_tokens: u32,
    in_flight: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DailySummarizer {
    pub fn new(
        client: Arc<dyn LlmClient>,
        store: Arc<dyn SummaryStore>,
        config: SummaryConfig,
        companion_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            store,
            config,
            companion_name: companion_name.into(),
            max_tokens: 1024,
            in_flight: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Summarize one day and upsert the result. Empty days return the
    /// canned result without touching the cache.
    pub async fn summarize_day(
        &self,
        subject_user_id: &str,
        subject_name: &str,
        date: NaiveDate,
        utterances: &[Utterance],
    ) -> Result<SummaryOutcome> {
        Ok(self
            .summarize_row(subject_user_id, subject_name, date, utterances)
            .await?
            .as_ref()
            .map_or_else(SummaryOutcome::empty_day, SummaryOutcome::from))
    }

    #[tracing::instrument(skip(self, subject_name, utterances), fields(count = utterances.len()))]
    async fn summarize_row(
        &self,
        subject_user_id: &str,
        subject_name: &str,
        date: NaiveDate,
        utterances: &[Utterance],
    ) -> Result<Option<DailySummary>> {
        if utterances.is_empty() {
            return Ok(None);
        }

        let system = summary_system_prompt(subject_name, &self.companion_name);
        let transcript = render_transcript(utterances);
        let params = CompletionParams {
            max_tokens: self.max_tokens,
            temperature: self.config.temperature,
            ..CompletionParams::default()
        };

        let response = self
            .client
            .complete(&system, vec![Message::user(transcript)], params)
            .await
            .context("summary request failed")?;
        let outcome = parse_summary_response(&response.text())?;

        let row = DailySummary {
            subject_user_id: subject_user_id.to_string(),
            date,
            summary: outcome.summary,
            has_concern: outcome.has_concern,
            concern_reason: outcome.concern_reason,
            generated_at: Utc::now(),
        };
        self.store
            .upsert_summary(&row)
            .await
            .context("failed to cache daily summary")?;

        tracing::info!(
            subject = %subject_user_id,
            %date,
            has_concern = row.has_concern,
            "daily summary cached"
        );
        Ok(Some(row))
    }

    /// Fill every missing day of the lookback window ending at `today`.
    ///
    /// A cached row written before its day closed is regenerated when the
    /// subject has spoken since it was generated. A second call for the same
    /// subject while one is running waits for it and then only sees cached
    /// days.
    pub async fn refresh_missing(
        &self,
        subject_user_id: &str,
        subject_name: &str,
        today: NaiveDate,
    ) -> Vec<DayReport> {
        let gate = self.gate_for(subject_user_id);
        let _guard = gate.lock().await;

        let pause = Duration::from_millis(self.config.pause_ms);
        let mut engine_calls = 0usize;
        let mut reports = Vec::new();

        for date in lookback_window(today, self.config.lookback_days) {
            let status = match self.pending_utterances(subject_user_id, date).await {
                Ok(Pending::Cached(summary)) => DayStatus::Cached { summary },
                Ok(Pending::Utterances(utterances)) if utterances.is_empty() => DayStatus::Empty,
                Ok(Pending::Utterances(utterances)) => {
                    if engine_calls > 0 && !pause.is_zero() {
                        tokio::time::sleep(pause).await;
                    }
                    engine_calls += 1;
                    self.generate_row(subject_user_id, subject_name, date, &utterances)
                        .await
                }
                Err(e) => DayStatus::Failed {
                    error: format!("{:#}", e),
                },
            };

            if let DayStatus::Failed { error } = &status {
                tracing::warn!(subject = %subject_user_id, %date, "summary refresh failed: {}", error);
            }
            reports.push(DayReport { date, status });
        }

        self.release_gate(subject_user_id, &gate);
        reports
    }

    /// The cached row if it is still current, otherwise the day's utterances.
    async fn pending_utterances(&self, subject_user_id: &str, date: NaiveDate) -> Result<Pending> {
        let offset = self.config.utc_offset_minutes;
        let cached = self.store.cached_summary(subject_user_id, date).await?;
        if let Some(summary) = &cached {
            let (_, day_end) = day_bounds(date, offset);
            if summary.generated_at >= day_end {
                return Ok(Pending::Cached(summary.clone()));
            }
        }

        let utterances = self
            .store
            .utterances_for_day(subject_user_id, date, offset)
            .await?;
        match cached {
            Some(summary) if !utterances.iter().any(|u| u.created_at > summary.generated_at) => {
                Ok(Pending::Cached(summary))
            }
            Some(_) => {
                tracing::debug!(subject = %subject_user_id, %date, "cached summary is behind the log");
                Ok(Pending::Utterances(utterances))
            }
            None => Ok(Pending::Utterances(utterances)),
        }
    }

    async fn generate_row(
        &self,
        subject_user_id: &str,
        subject_name: &str,
        date: NaiveDate,
        utterances: &[Utterance],
    ) -> DayStatus {
        match self
            .summarize_row(subject_user_id, subject_name, date, utterances)
            .await
        {
            Ok(Some(summary)) => DayStatus::Generated { summary },
            Ok(None) => DayStatus::Empty,
            Err(e) => DayStatus::Failed {
                error: format!("{:#}", e),
            },
        }
    }

    fn gate_for(&self, subject_user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.entry(subject_user_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release_gate(&self, subject_user_id: &str, gate: &Arc<tokio::sync::Mutex<()>>) {
        let mut map = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Drop the entry once only the map and this caller hold it
        if Arc::strong_count(gate) <= 2 {
            map.remove(subject_user_id);
        }
    }
}
