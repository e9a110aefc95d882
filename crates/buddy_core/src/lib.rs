pub mod attention;
pub mod config;
pub mod emotion;
pub mod error;
pub mod model;
pub mod time;

pub use attention::{assess_attention, AttentionReport};
pub use config::BuddyConfig;
pub use emotion::EmotionLabel;
pub use error::IngestError;
pub use model::{
    ActivityEvent, Author, Channel, Coupon, DailySummary, HeartEvent, MissionCompletion,
    MissionType, SubjectActivity, SubjectLink, Utterance,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Append-only conversation log the ingestion pipeline writes into.
#[async_trait]
pub trait UtteranceLog: Send + Sync {
    /// Persist a new utterance without a label. The returned row is what
    /// subscribers see on the `utterances` channel.
    async fn append_utterance(
        &self,
        subject_user_id: &str,
        author: Author,
        text: &str,
    ) -> anyhow::Result<Utterance>;

    /// Attach the emotion label. Only succeeds while the label is still
    /// absent; returns `false` if a label was already present.
    async fn attach_label(&self, utterance_id: &str, label: EmotionLabel) -> anyhow::Result<bool>;

    /// Record that the subject was active at `at`.
    async fn touch_activity(&self, subject_user_id: &str, at: DateTime<Utc>) -> anyhow::Result<()>;
}

/// Read-through cache of per-day summaries, keyed by (subject, date).
#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn utterances_for_day(
        &self,
        subject_user_id: &str,
        date: NaiveDate,
        utc_offset_minutes: i32,
    ) -> anyhow::Result<Vec<Utterance>>;

    async fn cached_summary(
        &self,
        subject_user_id: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Option<DailySummary>>;

    /// Insert or overwrite the row for (subject, date).
    async fn upsert_summary(&self, summary: &DailySummary) -> anyhow::Result<()>;
}

/// Resolves which subject a caregiver watches over.
#[async_trait]
pub trait LinkageResolver: Send + Sync {
    async fn linked_subject(&self, caregiver_id: &str) -> anyhow::Result<Option<SubjectLink>>;
}

/// Hand-off point to an external speech synthesizer.
#[async_trait]
pub trait SpeechSink: Send + Sync {
    async fn speak(&self, text: &str) -> anyhow::Result<()>;
}
