//! Persisted rows and the realtime events that carry them.

use crate::emotion::EmotionLabel;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    Subject,
    Companion,
}

impl Author {
    pub fn as_str(&self) -> &'static str {
        match self {
            Author::Subject => "subject",
            Author::Companion => "companion",
        }
    }
}

impl FromStr for Author {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subject" => Ok(Author::Subject),
            "companion" => Ok(Author::Companion),
            other => anyhow::bail!("unknown author: {}", other),
        }
    }
}

/// One conversational turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utterance {
    pub id: String,
    pub subject_user_id: String,
    pub author: Author,
    pub text: String,
    #[serde(default)]
    pub emotion_label: Option<EmotionLabel>,
    pub created_at: DateTime<Utc>,
}

/// Derived narrative for one subject-day. Never authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    pub subject_user_id: String,
    pub date: NaiveDate,
    pub summary: String,
    pub has_concern: bool,
    #[serde(default)]
    pub concern_reason: Option<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartEvent {
    pub id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionType {
    Medicine,
    Meal,
    Exercise,
    Mood,
}

impl MissionType {
    pub const ALL: [MissionType; 4] = [
        MissionType::Medicine,
        MissionType::Meal,
        MissionType::Exercise,
        MissionType::Mood,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MissionType::Medicine => "medicine",
            MissionType::Meal => "meal",
            MissionType::Exercise => "exercise",
            MissionType::Mood => "mood",
        }
    }
}

impl fmt::Display for MissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MissionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "medicine" => Ok(MissionType::Medicine),
            "meal" => Ok(MissionType::Meal),
            "exercise" => Ok(MissionType::Exercise),
            "mood" => Ok(MissionType::Mood),
            other => anyhow::bail!("unknown mission type: {}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionCompletion {
    pub id: String,
    pub subject_user_id: String,
    pub mission_type: MissionType,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub id: String,
    pub caregiver_id: String,
    pub code: String,
    pub coupon_type: String,
    pub title: String,
    pub description: String,
    pub hearts_required: i64,
    /// 1-based ordinal of this claim for the caregiver.
    pub claim_seq: i64,
    pub earned_at: DateTime<Utc>,
    #[serde(default)]
    pub redeemed_at: Option<DateTime<Utc>>,
    pub is_redeemed: bool,
    pub expires_at: DateTime<Utc>,
}

impl Coupon {
    /// Whole days until expiry; negative once expired.
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_days()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectLink {
    pub subject_user_id: String,
    pub caregiver_id: String,
    pub subject_name: String,
}

/// Collaborator-fed activity values for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectActivity {
    pub subject_user_id: String,
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
    pub step_count: i64,
    #[serde(default)]
    pub step_date: Option<NaiveDate>,
}

/// Realtime channels, one per source table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Utterances,
    Hearts,
    Missions,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Utterances, Channel::Hearts, Channel::Missions];
}

/// Insert notification carrying the committed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityEvent {
    UtteranceInserted { row: Utterance },
    UtteranceLabeled {
        utterance_id: String,
        subject_user_id: String,
        label: EmotionLabel,
        created_at: DateTime<Utc>,
    },
    HeartInserted { row: HeartEvent },
    MissionInserted { row: MissionCompletion },
}

impl ActivityEvent {
    pub fn channel(&self) -> Channel {
        match self {
            ActivityEvent::UtteranceInserted { .. } | ActivityEvent::UtteranceLabeled { .. } => {
                Channel::Utterances
            }
            ActivityEvent::HeartInserted { .. } => Channel::Hearts,
            ActivityEvent::MissionInserted { .. } => Channel::Missions,
        }
    }

    /// The subject this event concerns. Hearts are attributed to the sender.
    pub fn subject_user_id(&self) -> &str {
        match self {
            ActivityEvent::UtteranceInserted { row } => &row.subject_user_id,
            ActivityEvent::UtteranceLabeled { subject_user_id, .. } => subject_user_id,
            ActivityEvent::HeartInserted { row } => &row.from_user_id,
            ActivityEvent::MissionInserted { row } => &row.subject_user_id,
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ActivityEvent::UtteranceInserted { row } => row.created_at,
            ActivityEvent::UtteranceLabeled { created_at, .. } => *created_at,
            ActivityEvent::HeartInserted { row } => row.created_at,
            ActivityEvent::MissionInserted { row } => row.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn heart() -> HeartEvent {
        HeartEvent {
            id: "h1".into(),
            from_user_id: "grandma".into(),
            to_user_id: "carer".into(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_event_channel_routing() {
        let ev = ActivityEvent::HeartInserted { row: heart() };
        assert_eq!(ev.channel(), Channel::Hearts);
        assert_eq!(ev.subject_user_id(), "grandma");
    }

    #[test]
    fn test_event_json_is_tagged() {
        let ev = ActivityEvent::HeartInserted { row: heart() };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "heart_inserted");
        assert_eq!(json["row"]["fromUserId"], "grandma");
    }

    #[test]
    fn test_mission_type_parse() {
        assert_eq!("meal".parse::<MissionType>().unwrap(), MissionType::Meal);
        assert!("nap".parse::<MissionType>().is_err());
    }

    #[test]
    fn test_coupon_expiry() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let coupon = Coupon {
            id: "c".into(),
            caregiver_id: "carer".into(),
            code: "LOVE-ABCDEFGH".into(),
            coupon_type: "coffee".into(),
            title: "t".into(),
            description: "d".into(),
            hearts_required: 20,
            claim_seq: 1,
            earned_at: now,
            redeemed_at: None,
            is_redeemed: false,
            expires_at: now + chrono::Duration::days(10),
        };
        assert_eq!(coupon.days_until_expiry(now), 10);
        assert!(!coupon.is_expired(now));
        assert!(coupon.is_expired(now + chrono::Duration::days(11)));
    }
}
