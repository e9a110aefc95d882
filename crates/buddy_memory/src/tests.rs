use crate::bus::ActivityBus;
use crate::ledger::{ClaimOutcome, RedeemOutcome, RewardLedger};
use crate::sqlite::SqliteStore;
use buddy_core::config::RewardConfig;
use buddy_core::time::today;
use buddy_core::{
    ActivityEvent, Author, Channel, DailySummary, EmotionLabel, LinkageResolver, MissionType,
    SubjectLink, SummaryStore, UtteranceLog,
};
use chrono::{Duration, Utc};
use std::sync::Arc;

async fn store() -> SqliteStore {
    SqliteStore::new(":memory:", Arc::new(ActivityBus::new()))
        .await
        .expect("Failed to open store")
}

async fn seed_hearts(store: &SqliteStore, from: &str, to: &str, n: usize) {
    for _ in 0..n {
        store.record_heart(from, to).await.unwrap();
    }
}

#[tokio::test]
async fn test_append_and_read_day() {
    let store = store().await;
    let first = store
        .append_utterance("grace", Author::Subject, "Good morning")
        .await
        .unwrap();
    store
        .append_utterance("grace", Author::Companion, "Woof! Morning!")
        .await
        .unwrap();
    store
        .append_utterance("someone-else", Author::Subject, "hi")
        .await
        .unwrap();

    let rows = store.utterances_for_day("grace", today(0), 0).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], first);
    assert_eq!(rows[1].author, Author::Companion);

    let yesterday = today(0) - Duration::days(1);
    assert!(store
        .utterances_for_day("grace", yesterday, 0)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_label_attaches_once_and_publishes() {
    let store = store().await;
    let mut rx = store.bus().subscribe(Channel::Utterances);

    let row = store
        .append_utterance("grace", Author::Subject, "My knee aches")
        .await
        .unwrap();
    assert!(matches!(rx.recv().await.unwrap(), ActivityEvent::UtteranceInserted { .. }));

    assert!(store.attach_label(&row.id, EmotionLabel::PainSuspected).await.unwrap());
    assert!(!store.attach_label(&row.id, EmotionLabel::Happy).await.unwrap());

    match rx.recv().await.unwrap() {
        ActivityEvent::UtteranceLabeled {
            utterance_id,
            subject_user_id,
            label,
            ..
        } => {
            assert_eq!(utterance_id, row.id);
            assert_eq!(subject_user_id, "grace");
            assert_eq!(label, EmotionLabel::PainSuspected);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(rx.try_recv().is_err());

    let rows = store.utterances_for_day("grace", today(0), 0).await.unwrap();
    assert_eq!(rows[0].emotion_label, Some(EmotionLabel::PainSuspected));
}

#[tokio::test]
async fn test_summary_upsert_is_idempotent() {
    let store = store().await;
    let date = today(0);
    let mut summary = DailySummary {
        subject_user_id: "grace".into(),
        date,
        summary: "Quiet day.".into(),
        has_concern: false,
        concern_reason: None,
        generated_at: Utc::now(),
    };
    store.upsert_summary(&summary).await.unwrap();
    summary.summary = "Talked about knee pain.".into();
    summary.has_concern = true;
    summary.concern_reason = Some("Knee pain".into());
    store.upsert_summary(&summary).await.unwrap();

    let cached = store.cached_summary("grace", date).await.unwrap().unwrap();
    assert_eq!(cached.summary, "Talked about knee pain.");
    assert!(cached.has_concern);
    let all = store.summaries_between("grace", date, date).await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_missions_distinct_per_day() {
    let store = store().await;
    assert!(store.record_mission("grace", MissionType::Meal).await.unwrap().is_some());
    assert!(store.record_mission("grace", MissionType::Meal).await.unwrap().is_none());
    assert!(store.record_mission("grace", MissionType::Medicine).await.unwrap().is_some());

    let today_missions = store.missions_on("grace", today(0)).await.unwrap();
    assert_eq!(today_missions, vec![MissionType::Meal, MissionType::Medicine]);
}

#[tokio::test]
async fn test_links_and_activity() {
    let store = store().await;
    assert!(store.linked_subject("carer").await.unwrap().is_none());

    let link = SubjectLink {
        subject_user_id: "grace".into(),
        caregiver_id: "carer".into(),
        subject_name: "Grace".into(),
    };
    store.link_subject(&link).await.unwrap();
    assert_eq!(store.linked_subject("carer").await.unwrap(), Some(link));

    let earlier = Utc::now() - Duration::hours(3);
    let later = Utc::now();
    store.touch_activity("grace", later).await.unwrap();
    store.touch_activity("grace", earlier).await.unwrap();
    store.record_steps("grace", 1200, today(0)).await.unwrap();

    let activity = store.subject_activity("grace").await.unwrap().unwrap();
    assert_eq!(
        activity.last_activity_at.map(|t| t.timestamp_millis()),
        Some(later.timestamp_millis())
    );
    assert_eq!(activity.step_count, 1200);
    assert_eq!(activity.step_date, Some(today(0)));
}

#[tokio::test]
async fn test_claim_after_threshold_then_noop() {
    let store = store().await;
    let ledger = RewardLedger::new(store.clone(), RewardConfig::default());

    seed_hearts(&store, "grace", "carer", 45).await;
    let first = ledger.claim("carer").await.unwrap();
    assert_eq!(first.coupon().unwrap().claim_seq, 1);

    let status = ledger.status("carer").await.unwrap();
    assert_eq!(status.entitlement, 2);
    assert_eq!(status.issued, 1);

    let second = ledger.claim("carer").await.unwrap();
    let coupon = second.coupon().unwrap();
    assert_eq!(coupon.claim_seq, 2);
    assert_eq!(coupon.coupon_type, "coffee");
    assert_eq!(coupon.title, "☕ Free Coffee Coupon");
    assert_eq!(coupon.hearts_required, 20);
    assert!(coupon.code.starts_with("LOVE-"));

    let third = ledger.claim("carer").await.unwrap();
    assert!(matches!(third, ClaimOutcome::NotEntitled { .. }));
    assert_eq!(store.coupon_count("carer").await.unwrap(), 2);
}

#[tokio::test]
async fn test_zero_threshold_claims_like_status_reports() {
    let store = store().await;
    let config = RewardConfig {
        hearts_per_coupon: 0,
        ..RewardConfig::default()
    };
    let ledger = RewardLedger::new(store.clone(), config);

    seed_hearts(&store, "grace", "carer", 2).await;
    let status = ledger.status("carer").await.unwrap();
    assert_eq!(status.hearts_per_coupon, 1);
    assert_eq!(status.unclaimed, 2);

    for seq in 1..=2 {
        let outcome = ledger.claim("carer").await.unwrap();
        assert_eq!(outcome.coupon().unwrap().claim_seq, seq);
    }
    assert!(matches!(
        ledger.claim("carer").await.unwrap(),
        ClaimOutcome::NotEntitled { .. }
    ));
}

#[tokio::test]
async fn test_coupon_expires_three_months_out() {
    let store = store().await;
    let ledger = RewardLedger::new(store.clone(), RewardConfig::default());
    seed_hearts(&store, "grace", "carer", 20).await;

    let outcome = ledger.claim("carer").await.unwrap();
    let coupon = outcome.coupon().unwrap();
    let days = (coupon.expires_at - coupon.earned_at).num_days();
    assert!((89..=92).contains(&days), "unexpected expiry span {}", days);
}

#[tokio::test]
async fn test_redeem_once_by_owner() {
    let store = store().await;
    let ledger = RewardLedger::new(store.clone(), RewardConfig::default());
    seed_hearts(&store, "grace", "carer", 20).await;
    let coupon = ledger.claim("carer").await.unwrap().coupon().unwrap().clone();

    let now = Utc::now();
    assert!(matches!(
        ledger.redeem("someone-else", &coupon.id, now).await.unwrap(),
        RedeemOutcome::NotFound
    ));
    match ledger.redeem("carer", &coupon.id, now).await.unwrap() {
        RedeemOutcome::Redeemed { coupon } => {
            assert!(coupon.is_redeemed);
            assert!(coupon.redeemed_at.is_some());
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(matches!(
        ledger.redeem("carer", &coupon.id, now).await.unwrap(),
        RedeemOutcome::AlreadyRedeemed { .. }
    ));

    let listed = ledger.list("carer", now).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, "Redeemed");
}

#[tokio::test]
async fn test_expired_coupon_cannot_be_redeemed() {
    let store = store().await;
    let ledger = RewardLedger::new(store.clone(), RewardConfig::default());
    seed_hearts(&store, "grace", "carer", 20).await;
    let coupon = ledger.claim("carer").await.unwrap().coupon().unwrap().clone();

    let later = coupon.expires_at + Duration::days(1);
    assert!(matches!(
        ledger.redeem("carer", &coupon.id, later).await.unwrap(),
        RedeemOutcome::Expired { .. }
    ));
    assert_eq!(ledger.list("carer", later).await.unwrap()[0].status, "Expired");
}
