use crate::bus::ActivityBus;
use anyhow::{Context, Result};
use async_trait::async_trait;
use buddy_core::time::{day_bounds, local_date};
use buddy_core::{
    ActivityEvent, Author, Coupon, DailySummary, EmotionLabel, HeartEvent, LinkageResolver,
    MissionCompletion, MissionType, SubjectActivity, SubjectLink, SummaryStore, Utterance,
    UtteranceLog,
};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Fields of a coupon about to be issued; the store assigns `claim_seq`.
#[derive(Debug, Clone)]
pub struct NewCoupon {
    pub caregiver_id: String,
    pub code: String,
    pub coupon_type: String,
    pub title: String,
    pub description: String,
    pub hearts_required: i64,
    pub earned_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum IssueResult {
    Issued(Coupon),
    /// Issued count already meets entitlement, or a concurrent claim took
    /// the same sequence number.
    NotEntitled,
    /// The generated code is taken; retry with a fresh one.
    CodeTaken,
}

#[derive(Debug)]
pub enum RedeemResult {
    Redeemed(Coupon),
    AlreadyRedeemed(Coupon),
    NotFound,
}

/// SQLite-backed store for every persisted entity. Each committed insert is
/// published on the [`ActivityBus`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    bus: Arc<ActivityBus>,
    utc_offset_minutes: i32,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `db_path`. `":memory:"`
    /// gives a private in-memory database.
    pub async fn new<P: AsRef<Path>>(db_path: P, bus: Arc<ActivityBus>) -> Result<Self> {
        let path = db_path.as_ref().display().to_string();
        let in_memory = path == ":memory:";

        let pool = if in_memory {
            // Every connection would get its own database
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
                .await
        } else {
            let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(5));
            SqlitePoolOptions::new()
                .max_connections(8)
                .connect_with(options)
                .await
        }
        .context("Failed to connect to SQLite database")?;

        let store = Self {
            pool,
            bus,
            utc_offset_minutes: 0,
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Offset used for "today" and for mission de-duplication.
    pub fn with_utc_offset(mut self, utc_offset_minutes: i32) -> Self {
        self.utc_offset_minutes = utc_offset_minutes;
        self
    }

    pub fn utc_offset_minutes(&self) -> i32 {
        self.utc_offset_minutes
    }

    pub fn bus(&self) -> &Arc<ActivityBus> {
        &self.bus
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS utterances (
                id TEXT PRIMARY KEY,
                subject_user_id TEXT NOT NULL,
                author TEXT NOT NULL,
                text TEXT NOT NULL,
                emotion_label TEXT,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create utterances table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_utterances_subject_time ON utterances(subject_user_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create utterances index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_summaries (
                subject_user_id TEXT NOT NULL,
                date TEXT NOT NULL,
                summary TEXT NOT NULL,
                has_concern INTEGER NOT NULL,
                concern_reason TEXT,
                generated_at INTEGER NOT NULL,
                PRIMARY KEY (subject_user_id, date)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create daily_summaries table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS heart_events (
                id TEXT PRIMARY KEY,
                from_user_id TEXT NOT NULL,
                to_user_id TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create heart_events table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_hearts_to ON heart_events(to_user_id)")
            .execute(&self.pool)
            .await
            .context("Failed to create hearts recipient index")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_hearts_from_time ON heart_events(from_user_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create hearts sender index")?;

        // One completion per mission type per local day
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mission_completions (
                id TEXT PRIMARY KEY,
                subject_user_id TEXT NOT NULL,
                mission_type TEXT NOT NULL,
                local_date TEXT NOT NULL,
                completed_at INTEGER NOT NULL,
                UNIQUE (subject_user_id, mission_type, local_date)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create mission_completions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS coupons (
                id TEXT PRIMARY KEY,
                caregiver_id TEXT NOT NULL,
                code TEXT NOT NULL UNIQUE,
                coupon_type TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                hearts_required INTEGER NOT NULL,
                claim_seq INTEGER NOT NULL,
                earned_at INTEGER NOT NULL,
                redeemed_at INTEGER,
                is_redeemed INTEGER NOT NULL DEFAULT 0,
                expires_at INTEGER NOT NULL,
                UNIQUE (caregiver_id, claim_seq)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create coupons table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS caregiver_links (
                caregiver_id TEXT PRIMARY KEY,
                subject_user_id TEXT NOT NULL,
                subject_name TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create caregiver_links table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subject_activity (
                subject_user_id TEXT PRIMARY KEY,
                last_activity_at INTEGER,
                step_count INTEGER NOT NULL DEFAULT 0,
                step_date TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create subject_activity table")?;

        Ok(())
    }

    // ========================================================================
    // Hearts
    // ========================================================================

    pub async fn record_heart(&self, from_user_id: &str, to_user_id: &str) -> Result<HeartEvent> {
        let row = HeartEvent {
            id: Uuid::new_v4().to_string(),
            from_user_id: from_user_id.to_string(),
            to_user_id: to_user_id.to_string(),
            created_at: now_millis(),
        };
        sqlx::query(
            "INSERT INTO heart_events (id, from_user_id, to_user_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&row.id)
        .bind(&row.from_user_id)
        .bind(&row.to_user_id)
        .bind(row.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to insert heart event")?;

        self.bus.publish(ActivityEvent::HeartInserted { row: row.clone() });
        Ok(row)
    }

    /// Hearts ever received by `user_id`, counted from rows.
    pub async fn lifetime_hearts_received(&self, user_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM heart_events WHERE to_user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count hearts")?;
        Ok(count)
    }

    /// Ids of hearts sent by `user_id` on the local day `date`.
    pub async fn heart_ids_sent_on(&self, user_id: &str, date: NaiveDate) -> Result<Vec<String>> {
        let (start, end) = day_bounds(date, self.utc_offset_minutes);
        let ids = sqlx::query_scalar(
            "SELECT id FROM heart_events WHERE from_user_id = ? AND created_at >= ? AND created_at < ?",
        )
        .bind(user_id)
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load today's hearts")?;
        Ok(ids)
    }

    // ========================================================================
    // Missions
    // ========================================================================

    /// Record a completion. Returns `None` when this type was already
    /// completed on the same local day.
    pub async fn record_mission(
        &self,
        subject_user_id: &str,
        mission_type: MissionType,
    ) -> Result<Option<MissionCompletion>> {
        let row = MissionCompletion {
            id: Uuid::new_v4().to_string(),
            subject_user_id: subject_user_id.to_string(),
            mission_type,
            completed_at: now_millis(),
        };
        let day = local_date(row.completed_at, self.utc_offset_minutes);

        let result = sqlx::query(
            "INSERT INTO mission_completions (id, subject_user_id, mission_type, local_date, completed_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(subject_user_id, mission_type, local_date) DO NOTHING",
        )
        .bind(&row.id)
        .bind(&row.subject_user_id)
        .bind(mission_type.as_str())
        .bind(day.to_string())
        .bind(row.completed_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to insert mission completion")?;

        if result.rows_affected() == 0 {
            tracing::debug!(subject = %subject_user_id, mission = %mission_type, "mission already completed today");
            return Ok(None);
        }
        self.bus.publish(ActivityEvent::MissionInserted { row: row.clone() });
        Ok(Some(row))
    }

    /// Distinct mission types completed on the local day `date`.
    pub async fn missions_on(&self, subject_user_id: &str, date: NaiveDate) -> Result<Vec<MissionType>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT mission_type FROM mission_completions
             WHERE subject_user_id = ? AND local_date = ? ORDER BY mission_type",
        )
        .bind(subject_user_id)
        .bind(date.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load missions")?;

        rows.iter().map(|s| s.parse::<MissionType>()).collect()
    }

    // ========================================================================
    // Utterance labels (feed resync)
    // ========================================================================

    /// Labeled subject utterances on the local day `date`, chronological.
    pub async fn labels_on(
        &self,
        subject_user_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<(String, EmotionLabel)>> {
        let (start, end) = day_bounds(date, self.utc_offset_minutes);
        let rows = sqlx::query(
            "SELECT id, emotion_label FROM utterances
             WHERE subject_user_id = ? AND author = 'subject' AND emotion_label IS NOT NULL
               AND created_at >= ? AND created_at < ?
             ORDER BY created_at, rowid",
        )
        .bind(subject_user_id)
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load labels")?;

        let mut labels = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let raw: String = row.get("emotion_label");
            match EmotionLabel::decode(&raw) {
                Some(label) => labels.push((id, label)),
                None => tracing::warn!(utterance = %id, raw = %raw, "skipping unknown stored label"),
            }
        }
        Ok(labels)
    }

    // ========================================================================
    // Coupons
    // ========================================================================

    /// Coupons issued to the caregiver so far.
    pub async fn coupon_count(&self, caregiver_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM coupons WHERE caregiver_id = ?")
            .bind(caregiver_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count coupons")?;
        Ok(count)
    }

    /// Insert one coupon only while issued < floor(hearts / hearts_per_coupon).
    ///
    /// Check and insert are one statement; `UNIQUE(caregiver_id, claim_seq)`
    /// rejects a concurrent claim that read the same issued count.
    pub async fn try_issue_coupon(
        &self,
        coupon: &NewCoupon,
        hearts_per_coupon: i64,
    ) -> Result<IssueResult> {
        anyhow::ensure!(hearts_per_coupon > 0, "hearts_per_coupon must be positive");
        let id = Uuid::new_v4().to_string();

        let inserted = sqlx::query(
            r#"
            INSERT INTO coupons (id, caregiver_id, code, coupon_type, title, description,
                                 hearts_required, claim_seq, earned_at, is_redeemed, expires_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, issued.n + 1, ?8, 0, ?9
            FROM (SELECT COUNT(*) AS n FROM coupons WHERE caregiver_id = ?2) AS issued
            WHERE issued.n < (SELECT COUNT(*) FROM heart_events WHERE to_user_id = ?2) / ?10
            "#,
        )
        .bind(&id)
        .bind(&coupon.caregiver_id)
        .bind(&coupon.code)
        .bind(&coupon.coupon_type)
        .bind(&coupon.title)
        .bind(&coupon.description)
        .bind(coupon.hearts_required)
        .bind(coupon.earned_at.timestamp_millis())
        .bind(coupon.expires_at.timestamp_millis())
        .bind(hearts_per_coupon)
        .execute(&self.pool)
        .await;

        let result = match inserted {
            Ok(result) => result,
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                if db.message().contains("coupons.code") {
                    return Ok(IssueResult::CodeTaken);
                }
                tracing::debug!(caregiver = %coupon.caregiver_id, "lost a concurrent claim race");
                return Ok(IssueResult::NotEntitled);
            }
            Err(e) => return Err(e).context("Failed to insert coupon"),
        };

        if result.rows_affected() == 0 {
            return Ok(IssueResult::NotEntitled);
        }

        let coupon = self
            .coupon_by_id(&id)
            .await?
            .context("issued coupon vanished")?;
        Ok(IssueResult::Issued(coupon))
    }

    pub async fn coupon_by_id(&self, coupon_id: &str) -> Result<Option<Coupon>> {
        let row = sqlx::query("SELECT * FROM coupons WHERE id = ?")
            .bind(coupon_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load coupon")?;
        row.as_ref().map(row_to_coupon).transpose()
    }

    /// Newest first.
    pub async fn coupons_for(&self, caregiver_id: &str) -> Result<Vec<Coupon>> {
        let rows = sqlx::query("SELECT * FROM coupons WHERE caregiver_id = ? ORDER BY claim_seq DESC")
            .bind(caregiver_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list coupons")?;
        rows.iter().map(row_to_coupon).collect()
    }

    /// Flip the redemption flag once. Only the owning caregiver may redeem.
    pub async fn redeem_coupon(
        &self,
        caregiver_id: &str,
        coupon_id: &str,
        at: DateTime<Utc>,
    ) -> Result<RedeemResult> {
        let result = sqlx::query(
            "UPDATE coupons SET is_redeemed = 1, redeemed_at = ?
             WHERE id = ? AND caregiver_id = ? AND is_redeemed = 0",
        )
        .bind(at.timestamp_millis())
        .bind(coupon_id)
        .bind(caregiver_id)
        .execute(&self.pool)
        .await
        .context("Failed to redeem coupon")?;

        let coupon = match self.coupon_by_id(coupon_id).await? {
            Some(c) if c.caregiver_id == caregiver_id => c,
            _ => return Ok(RedeemResult::NotFound),
        };
        if result.rows_affected() == 1 {
            Ok(RedeemResult::Redeemed(coupon))
        } else {
            Ok(RedeemResult::AlreadyRedeemed(coupon))
        }
    }

    // ========================================================================
    // Links & activity
    // ========================================================================

    pub async fn link_subject(&self, link: &SubjectLink) -> Result<()> {
        sqlx::query(
            "INSERT INTO caregiver_links (caregiver_id, subject_user_id, subject_name) VALUES (?, ?, ?)
             ON CONFLICT(caregiver_id) DO UPDATE SET
                subject_user_id = excluded.subject_user_id,
                subject_name = excluded.subject_name",
        )
        .bind(&link.caregiver_id)
        .bind(&link.subject_user_id)
        .bind(&link.subject_name)
        .execute(&self.pool)
        .await
        .context("Failed to upsert caregiver link")?;
        Ok(())
    }

    /// Replace today's step count for the subject.
    pub async fn record_steps(&self, subject_user_id: &str, step_count: i64, date: NaiveDate) -> Result<()> {
        sqlx::query(
            "INSERT INTO subject_activity (subject_user_id, step_count, step_date) VALUES (?, ?, ?)
             ON CONFLICT(subject_user_id) DO UPDATE SET
                step_count = excluded.step_count,
                step_date = excluded.step_date",
        )
        .bind(subject_user_id)
        .bind(step_count.max(0))
        .bind(date.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to record steps")?;
        Ok(())
    }

    pub async fn subject_activity(&self, subject_user_id: &str) -> Result<Option<SubjectActivity>> {
        let row = sqlx::query("SELECT * FROM subject_activity WHERE subject_user_id = ?")
            .bind(subject_user_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load subject activity")?;

        row.map(|row| -> Result<SubjectActivity> {
            let last: Option<i64> = row.get("last_activity_at");
            let step_date: Option<String> = row.get("step_date");
            Ok(SubjectActivity {
                subject_user_id: row.get("subject_user_id"),
                last_activity_at: last.map(from_millis).transpose()?,
                step_count: row.get("step_count"),
                step_date: step_date.map(|d| d.parse::<NaiveDate>()).transpose()?,
            })
        })
        .transpose()
    }

    /// Recent summaries for the subject, oldest first.
    pub async fn summaries_between(
        &self,
        subject_user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailySummary>> {
        let rows = sqlx::query(
            "SELECT * FROM daily_summaries WHERE subject_user_id = ? AND date >= ? AND date <= ? ORDER BY date",
        )
        .bind(subject_user_id)
        .bind(from.to_string())
        .bind(to.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list summaries")?;
        rows.iter().map(row_to_summary).collect()
    }
}

#[async_trait]
impl UtteranceLog for SqliteStore {
    async fn append_utterance(
        &self,
        subject_user_id: &str,
        author: Author,
        text: &str,
    ) -> Result<Utterance> {
        let row = Utterance {
            id: Uuid::new_v4().to_string(),
            subject_user_id: subject_user_id.to_string(),
            author,
            text: text.to_string(),
            emotion_label: None,
            created_at: now_millis(),
        };
        sqlx::query(
            "INSERT INTO utterances (id, subject_user_id, author, text, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&row.id)
        .bind(&row.subject_user_id)
        .bind(author.as_str())
        .bind(&row.text)
        .bind(row.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to insert utterance")?;

        self.bus.publish(ActivityEvent::UtteranceInserted { row: row.clone() });
        Ok(row)
    }

    async fn attach_label(&self, utterance_id: &str, label: EmotionLabel) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE utterances SET emotion_label = ? WHERE id = ? AND emotion_label IS NULL
             RETURNING subject_user_id, created_at",
        )
        .bind(label.as_str())
        .bind(utterance_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to attach emotion label")?;

        let Some(row) = updated else {
            return Ok(false);
        };
        let created_at: i64 = row.get("created_at");
        self.bus.publish(ActivityEvent::UtteranceLabeled {
            utterance_id: utterance_id.to_string(),
            subject_user_id: row.get("subject_user_id"),
            label,
            created_at: from_millis(created_at)?,
        });
        Ok(true)
    }

    async fn touch_activity(&self, subject_user_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO subject_activity (subject_user_id, last_activity_at) VALUES (?, ?)
             ON CONFLICT(subject_user_id) DO UPDATE SET
                last_activity_at = MAX(COALESCE(last_activity_at, 0), excluded.last_activity_at)",
        )
        .bind(subject_user_id)
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to record activity")?;
        Ok(())
    }
}

#[async_trait]
impl SummaryStore for SqliteStore {
    async fn utterances_for_day(
        &self,
        subject_user_id: &str,
        date: NaiveDate,
        utc_offset_minutes: i32,
    ) -> Result<Vec<Utterance>> {
        let (start, end) = day_bounds(date, utc_offset_minutes);
        let rows = sqlx::query(
            "SELECT * FROM utterances
             WHERE subject_user_id = ? AND created_at >= ? AND created_at < ?
             ORDER BY created_at, rowid",
        )
        .bind(subject_user_id)
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load utterances")?;
        rows.iter().map(row_to_utterance).collect()
    }

    async fn cached_summary(
        &self,
        subject_user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<DailySummary>> {
        let row = sqlx::query("SELECT * FROM daily_summaries WHERE subject_user_id = ? AND date = ?")
            .bind(subject_user_id)
            .bind(date.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load cached summary")?;
        row.as_ref().map(row_to_summary).transpose()
    }

    async fn upsert_summary(&self, summary: &DailySummary) -> Result<()> {
        sqlx::query(
            "INSERT INTO daily_summaries (subject_user_id, date, summary, has_concern, concern_reason, generated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(subject_user_id, date) DO UPDATE SET
                summary = excluded.summary,
                has_concern = excluded.has_concern,
                concern_reason = excluded.concern_reason,
                generated_at = excluded.generated_at",
        )
        .bind(&summary.subject_user_id)
        .bind(summary.date.to_string())
        .bind(&summary.summary)
        .bind(summary.has_concern)
        .bind(&summary.concern_reason)
        .bind(summary.generated_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to upsert daily summary")?;
        Ok(())
    }
}

#[async_trait]
impl LinkageResolver for SqliteStore {
    async fn linked_subject(&self, caregiver_id: &str) -> Result<Option<SubjectLink>> {
        let row = sqlx::query("SELECT * FROM caregiver_links WHERE caregiver_id = ?")
            .bind(caregiver_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to resolve caregiver link")?;
        Ok(row.map(|row| SubjectLink {
            subject_user_id: row.get("subject_user_id"),
            caregiver_id: row.get("caregiver_id"),
            subject_name: row.get("subject_name"),
        }))
    }
}

/// Stored timestamps have millisecond precision; truncate up front so the
/// returned row equals what a later read yields.
fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).with_context(|| format!("timestamp out of range: {}", ms))
}

fn row_to_utterance(row: &SqliteRow) -> Result<Utterance> {
    let author: String = row.get("author");
    let label: Option<String> = row.get("emotion_label");
    Ok(Utterance {
        id: row.get("id"),
        subject_user_id: row.get("subject_user_id"),
        author: author.parse()?,
        text: row.get("text"),
        emotion_label: label.as_deref().and_then(EmotionLabel::decode),
        created_at: from_millis(row.get("created_at"))?,
    })
}

fn row_to_summary(row: &SqliteRow) -> Result<DailySummary> {
    let date: String = row.get("date");
    Ok(DailySummary {
        subject_user_id: row.get("subject_user_id"),
        date: date.parse().with_context(|| format!("bad summary date: {}", date))?,
        summary: row.get("summary"),
        has_concern: row.get("has_concern"),
        concern_reason: row.get("concern_reason"),
        generated_at: from_millis(row.get("generated_at"))?,
    })
}

fn row_to_coupon(row: &SqliteRow) -> Result<Coupon> {
    let redeemed_at: Option<i64> = row.get("redeemed_at");
    Ok(Coupon {
        id: row.get("id"),
        caregiver_id: row.get("caregiver_id"),
        code: row.get("code"),
        coupon_type: row.get("coupon_type"),
        title: row.get("title"),
        description: row.get("description"),
        hearts_required: row.get("hearts_required"),
        claim_seq: row.get("claim_seq"),
        earned_at: from_millis(row.get("earned_at"))?,
        redeemed_at: redeemed_at.map(from_millis).transpose()?,
        is_redeemed: row.get("is_redeemed"),
        expires_at: from_millis(row.get("expires_at"))?,
    })
}
