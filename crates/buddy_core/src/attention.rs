//! Inactivity/attention view for the caregiver dashboard.
//!
//! Pure function of the last-activity timestamp and today's step count.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttentionReport {
    pub inactive: bool,
    pub no_steps: bool,
    pub hours_since_activity: Option<i64>,
    pub message: Option<String>,
}

impl AttentionReport {
    pub fn needs_attention(&self) -> bool {
        self.inactive || self.no_steps
    }
}

/// A subject with no recorded activity counts as inactive.
pub fn assess_attention(
    subject_name: &str,
    last_activity_at: Option<DateTime<Utc>>,
    step_count: i64,
    now: DateTime<Utc>,
    inactivity_hours: i64,
) -> AttentionReport {
    let hours_since_activity = last_activity_at.map(|ts| (now - ts).num_hours());
    let inactive = match hours_since_activity {
        None => true,
        Some(h) => h >= inactivity_hours,
    };
    let no_steps = step_count == 0;

    let name = if subject_name.trim().is_empty() {
        "Patient"
    } else {
        subject_name
    };
    let message = match (inactive, no_steps) {
        (true, true) => Some(format!(
            "⚠️ {} hasn't opened the app in {}+ hours and has 0 steps today!",
            name, inactivity_hours
        )),
        (true, false) => Some(format!(
            "⚠️ {} hasn't opened the app in over {} hours!",
            name, inactivity_hours
        )),
        (false, true) => Some(format!(
            "⚠️ {} has 0 steps recorded today. Consider checking in.",
            name
        )),
        (false, false) => None,
    };

    AttentionReport {
        inactive,
        no_steps,
        hours_since_activity,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_recent_activity_with_steps_is_quiet() {
        let now = Utc::now();
        let report = assess_attention("Grace", Some(now - Duration::hours(2)), 1200, now, 24);
        assert!(!report.needs_attention());
        assert!(report.message.is_none());
        assert_eq!(report.hours_since_activity, Some(2));
    }

    #[test]
    fn test_no_activity_recorded_is_inactive() {
        let report = assess_attention("Grace", None, 500, Utc::now(), 24);
        assert!(report.inactive);
        assert!(!report.no_steps);
        assert!(report.message.unwrap().contains("over 24 hours"));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let now = Utc::now();
        let report = assess_attention("Grace", Some(now - Duration::hours(24)), 10, now, 24);
        assert!(report.inactive);
    }

    #[test]
    fn test_combined_message() {
        let now = Utc::now();
        let report = assess_attention("Grace", Some(now - Duration::hours(30)), 0, now, 24);
        assert!(report.inactive && report.no_steps);
        let msg = report.message.unwrap();
        assert!(msg.contains("Grace"));
        assert!(msg.contains("0 steps"));
    }

    #[test]
    fn test_zero_steps_only() {
        let now = Utc::now();
        let report = assess_attention("", Some(now), 0, now, 24);
        assert!(!report.inactive);
        assert!(report.message.unwrap().starts_with("⚠️ Patient has 0 steps"));
    }
}
