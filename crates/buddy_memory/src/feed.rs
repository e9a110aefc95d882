//! Caregiver-side realtime view of one subject's day.
//!
//! Counters are bumped from bus events but never trusted on their own: the
//! feed re-derives them from the store on connect, on a fixed interval, after
//! a lag notice and after resubscribing. Heart and label events are
//! de-duplicated by id between resyncs.

use crate::bus::ActivityBus;
use crate::sqlite::SqliteStore;
use anyhow::Result;
use buddy_core::time::{local_date, today};
use buddy_core::{ActivityEvent, Channel, EmotionLabel, LinkageResolver, MissionType, SubjectLink};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    pub subject_user_id: String,
    pub subject_name: String,
    pub date: NaiveDate,
    pub hearts_sent_today: usize,
    pub missions_today: Vec<MissionType>,
    pub concern_count: usize,
    pub last_concern_label: Option<EmotionLabel>,
}

/// What the feed pushes to its consumer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedMessage {
    Snapshot { snapshot: FeedSnapshot },
    Event { event: ActivityEvent, snapshot: FeedSnapshot },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedUpdate {
    /// Not for this subject, not today, or not counted.
    Ignored,
    /// Already counted since the last resync.
    Duplicate,
    Changed,
    /// The event belongs to a later day; counters must be rebuilt.
    DayRolled,
}

#[derive(Debug, Default)]
struct Counters {
    heart_ids: HashSet<String>,
    missions: BTreeSet<MissionType>,
    concern_ids: HashSet<String>,
    last_concern: Option<EmotionLabel>,
}

struct Subscriptions {
    utterances: broadcast::Receiver<ActivityEvent>,
    hearts: broadcast::Receiver<ActivityEvent>,
    missions: broadcast::Receiver<ActivityEvent>,
}

impl Subscriptions {
    fn open(bus: &ActivityBus) -> Self {
        Self {
            utterances: bus.subscribe(Channel::Utterances),
            hearts: bus.subscribe(Channel::Hearts),
            missions: bus.subscribe(Channel::Missions),
        }
    }
}

pub struct CaregiverFeed {
    store: SqliteStore,
    bus: Arc<ActivityBus>,
    link: SubjectLink,
    resync_every: Duration,
    date: NaiveDate,
    counters: Counters,
    subscriptions: Subscriptions,
}

impl CaregiverFeed {
    /// Resolve the caregiver's subject, subscribe, then load today's counters.
    /// `None` when the caregiver has no linked subject.
    pub async fn connect(
        store: SqliteStore,
        resolver: &dyn LinkageResolver,
        caregiver_id: &str,
        resync_every: Duration,
    ) -> Result<Option<Self>> {
        let Some(link) = resolver.linked_subject(caregiver_id).await? else {
            tracing::info!(caregiver = %caregiver_id, "no linked subject, feed not started");
            return Ok(None);
        };

        let bus = store.bus().clone();
        // Subscribe before reading so nothing committed in between is lost
        let subscriptions = Subscriptions::open(&bus);
        let mut feed = Self {
            date: today(store.utc_offset_minutes()),
            store,
            bus,
            link,
            resync_every,
            counters: Counters::default(),
            subscriptions,
        };
        feed.resync().await?;
        Ok(Some(feed))
    }

    pub fn link(&self) -> &SubjectLink {
        &self.link
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            subject_user_id: self.link.subject_user_id.clone(),
            subject_name: self.link.subject_name.clone(),
            date: self.date,
            hearts_sent_today: self.counters.heart_ids.len(),
            missions_today: self.counters.missions.iter().copied().collect(),
            concern_count: self.counters.concern_ids.len(),
            last_concern_label: self.counters.last_concern,
        }
    }

    /// Rebuild all counters for today from the store.
    pub async fn resync(&mut self) -> Result<()> {
        let subject = &self.link.subject_user_id;
        let date = today(self.store.utc_offset_minutes());

        let heart_ids = self.store.heart_ids_sent_on(subject, date).await?;
        let missions = self.store.missions_on(subject, date).await?;
        let labels = self.store.labels_on(subject, date).await?;

        let mut counters = Counters {
            heart_ids: heart_ids.into_iter().collect(),
            missions: missions.into_iter().collect(),
            ..Counters::default()
        };
        for (id, label) in labels.into_iter().filter(|(_, l)| l.is_concerning()) {
            counters.concern_ids.insert(id);
            counters.last_concern = Some(label);
        }

        self.date = date;
        self.counters = counters;
        tracing::debug!(subject = %subject, %date, "feed resynced");
        Ok(())
    }

    /// Fold one bus event into the counters.
    pub fn apply(&mut self, event: &ActivityEvent) -> FeedUpdate {
        if event.subject_user_id() != self.link.subject_user_id {
            return FeedUpdate::Ignored;
        }
        let day = local_date(event.occurred_at(), self.store.utc_offset_minutes());
        if day > self.date {
            return FeedUpdate::DayRolled;
        }
        if day < self.date {
            return FeedUpdate::Ignored;
        }

        match event {
            ActivityEvent::HeartInserted { row } => {
                if self.counters.heart_ids.insert(row.id.clone()) {
                    FeedUpdate::Changed
                } else {
                    FeedUpdate::Duplicate
                }
            }
            ActivityEvent::MissionInserted { row } => {
                if self.counters.missions.insert(row.mission_type) {
                    FeedUpdate::Changed
                } else {
                    FeedUpdate::Duplicate
                }
            }
            ActivityEvent::UtteranceLabeled {
                utterance_id, label, ..
            } if label.is_concerning() => {
                if self.counters.concern_ids.insert(utterance_id.clone()) {
                    self.counters.last_concern = Some(*label);
                    FeedUpdate::Changed
                } else {
                    FeedUpdate::Duplicate
                }
            }
            ActivityEvent::UtteranceLabeled { .. } | ActivityEvent::UtteranceInserted { .. } => {
                FeedUpdate::Ignored
            }
        }
    }

    /// Drive the feed until the consumer goes away. Sends a snapshot first,
    /// then one message per counted event and one per periodic resync.
    pub async fn run(mut self, tx: mpsc::Sender<FeedMessage>) -> Result<()> {
        if tx
            .send(FeedMessage::Snapshot {
                snapshot: self.snapshot(),
            })
            .await
            .is_err()
        {
            return Ok(());
        }

        let start = tokio::time::Instant::now() + self.resync_every;
        let mut ticker = tokio::time::interval_at(start, self.resync_every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let received = tokio::select! {
                _ = tx.closed() => return Ok(()),
                _ = ticker.tick() => None,
                r = self.subscriptions.utterances.recv() => Some(r),
                r = self.subscriptions.hearts.recv() => Some(r),
                r = self.subscriptions.missions.recv() => Some(r),
            };

            let message = match received {
                None => {
                    self.resync_logged().await;
                    Some(FeedMessage::Snapshot {
                        snapshot: self.snapshot(),
                    })
                }
                Some(Ok(event)) => match self.apply(&event) {
                    FeedUpdate::Changed => Some(FeedMessage::Event {
                        event,
                        snapshot: self.snapshot(),
                    }),
                    FeedUpdate::DayRolled => {
                        self.resync_logged().await;
                        Some(FeedMessage::Snapshot {
                            snapshot: self.snapshot(),
                        })
                    }
                    FeedUpdate::Ignored | FeedUpdate::Duplicate => None,
                },
                Some(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, subject = %self.link.subject_user_id, "feed lagged, resyncing");
                    self.resync_logged().await;
                    Some(FeedMessage::Snapshot {
                        snapshot: self.snapshot(),
                    })
                }
                Some(Err(broadcast::error::RecvError::Closed)) => {
                    tracing::info!("activity channel closed, resubscribing");
                    self.subscriptions = Subscriptions::open(&self.bus);
                    self.resync_logged().await;
                    Some(FeedMessage::Snapshot {
                        snapshot: self.snapshot(),
                    })
                }
            };

            if let Some(message) = message {
                if tx.send(message).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    async fn resync_logged(&mut self) {
        if let Err(e) = self.resync().await {
            tracing::warn!("feed resync failed, keeping current counters: {:#}", e);
        }
    }
}
