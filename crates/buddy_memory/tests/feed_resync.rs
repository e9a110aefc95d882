use buddy_core::{Author, EmotionLabel, MissionType, SubjectLink, UtteranceLog};
use buddy_memory::{ActivityBus, CaregiverFeed, FeedMessage, FeedUpdate, SqliteStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const RESYNC: Duration = Duration::from_secs(60);

async fn linked_store(bus: ActivityBus) -> SqliteStore {
    let store = SqliteStore::new(":memory:", Arc::new(bus)).await.unwrap();
    store
        .link_subject(&SubjectLink {
            subject_user_id: "grace".into(),
            caregiver_id: "carer".into(),
            subject_name: "Grace".into(),
        })
        .await
        .unwrap();
    store
}

async fn next(rx: &mut mpsc::Receiver<FeedMessage>) -> FeedMessage {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("feed went quiet")
        .expect("feed stopped")
}

fn snapshot_of(message: &FeedMessage) -> &buddy_memory::FeedSnapshot {
    match message {
        FeedMessage::Snapshot { snapshot } | FeedMessage::Event { snapshot, .. } => snapshot,
    }
}

#[tokio::test]
async fn test_unlinked_caregiver_gets_no_feed() {
    let store = linked_store(ActivityBus::new()).await;
    let feed = CaregiverFeed::connect(store.clone(), &store, "stranger", RESYNC)
        .await
        .unwrap();
    assert!(feed.is_none());
}

#[tokio::test]
async fn test_connect_loads_existing_counts() {
    let store = linked_store(ActivityBus::new()).await;
    store.record_heart("grace", "carer").await.unwrap();
    store.record_heart("grace", "carer").await.unwrap();
    store.record_mission("grace", MissionType::Exercise).await.unwrap();
    let row = store
        .append_utterance("grace", Author::Subject, "I feel so alone")
        .await
        .unwrap();
    store.attach_label(&row.id, EmotionLabel::Sad).await.unwrap();

    let feed = CaregiverFeed::connect(store.clone(), &store, "carer", RESYNC)
        .await
        .unwrap()
        .unwrap();
    let snap = feed.snapshot();
    assert_eq!(snap.subject_name, "Grace");
    assert_eq!(snap.hearts_sent_today, 2);
    assert_eq!(snap.missions_today, vec![MissionType::Exercise]);
    assert_eq!(snap.concern_count, 1);
    assert_eq!(snap.last_concern_label, Some(EmotionLabel::Sad));
}

#[tokio::test]
async fn test_apply_dedupes_and_filters() {
    let store = linked_store(ActivityBus::new()).await;
    let mut feed = CaregiverFeed::connect(store.clone(), &store, "carer", RESYNC)
        .await
        .unwrap()
        .unwrap();
    let mut hearts = store.bus().subscribe(buddy_core::Channel::Hearts);

    store.record_heart("grace", "carer").await.unwrap();
    store.record_heart("someone-else", "carer").await.unwrap();

    let own = hearts.recv().await.unwrap();
    let other = hearts.recv().await.unwrap();
    assert_eq!(feed.apply(&own), FeedUpdate::Changed);
    assert_eq!(feed.apply(&own), FeedUpdate::Duplicate);
    assert_eq!(feed.apply(&other), FeedUpdate::Ignored);
    assert_eq!(feed.snapshot().hearts_sent_today, 1);

    // A resync after the event was already counted must not double it
    feed.resync().await.unwrap();
    assert_eq!(feed.snapshot().hearts_sent_today, 1);
}

#[tokio::test]
async fn test_missed_event_is_repaired_by_resync() {
    let store = linked_store(ActivityBus::new()).await;
    let mut feed = CaregiverFeed::connect(store.clone(), &store, "carer", RESYNC)
        .await
        .unwrap()
        .unwrap();

    // Three hearts committed, only two ever reach the feed
    let mut hearts = store.bus().subscribe(buddy_core::Channel::Hearts);
    for _ in 0..3 {
        store.record_heart("grace", "carer").await.unwrap();
    }
    for _ in 0..2 {
        let event = hearts.recv().await.unwrap();
        feed.apply(&event);
    }
    assert_eq!(feed.snapshot().hearts_sent_today, 2);

    feed.resync().await.unwrap();
    assert_eq!(feed.snapshot().hearts_sent_today, 3);

    // A fresh connection sees the same truth
    let reconnected = CaregiverFeed::connect(store.clone(), &store, "carer", RESYNC)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reconnected.snapshot(), feed.snapshot());
}

#[tokio::test]
async fn test_run_pushes_counted_events() {
    let store = linked_store(ActivityBus::new()).await;
    let feed = CaregiverFeed::connect(store.clone(), &store, "carer", RESYNC)
        .await
        .unwrap()
        .unwrap();
    let (tx, mut rx) = mpsc::channel(16);
    let handle = tokio::spawn(feed.run(tx));

    let first = next(&mut rx).await;
    assert!(matches!(first, FeedMessage::Snapshot { .. }));
    assert_eq!(snapshot_of(&first).hearts_sent_today, 0);

    store.record_heart("grace", "carer").await.unwrap();
    let row = store
        .append_utterance("grace", Author::Subject, "My back hurts")
        .await
        .unwrap();
    store
        .attach_label(&row.id, EmotionLabel::PainSuspected)
        .await
        .unwrap();

    // Heart and label arrive on different channels, so order is not fixed
    let a = next(&mut rx).await;
    let b = next(&mut rx).await;
    assert!(matches!(a, FeedMessage::Event { .. }));
    assert!(matches!(b, FeedMessage::Event { .. }));
    let last = snapshot_of(&b);
    assert_eq!(last.hearts_sent_today, 1);
    assert_eq!(last.concern_count, 1);
    assert_eq!(last.last_concern_label, Some(EmotionLabel::PainSuspected));

    drop(rx);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("feed did not stop after consumer left")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_lagged_feed_resyncs() {
    let store = linked_store(ActivityBus::with_capacity(2)).await;
    let feed = CaregiverFeed::connect(store.clone(), &store, "carer", RESYNC)
        .await
        .unwrap()
        .unwrap();

    for _ in 0..5 {
        store.record_heart("grace", "carer").await.unwrap();
    }

    let (tx, mut rx) = mpsc::channel(16);
    tokio::spawn(feed.run(tx));

    assert_eq!(snapshot_of(&next(&mut rx).await).hearts_sent_today, 0);
    let repaired = next(&mut rx).await;
    assert!(matches!(repaired, FeedMessage::Snapshot { .. }));
    assert_eq!(snapshot_of(&repaired).hearts_sent_today, 5);

    // The two buffered events are duplicates of the resync
    assert!(
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .is_err()
    );
}
