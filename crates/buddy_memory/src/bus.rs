//! In-process realtime fan-out, one broadcast channel per source table.
//!
//! Publishing never blocks the writer. A slow subscriber sees `Lagged` and is
//! expected to resync from the store.

use buddy_core::{ActivityEvent, Channel};
use tokio::sync::broadcast;
use tracing::trace;

pub struct ActivityBus {
    utterances: broadcast::Sender<ActivityEvent>,
    hearts: broadcast::Sender<ActivityEvent>,
    missions: broadcast::Sender<ActivityEvent>,
}

impl ActivityBus {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            utterances: broadcast::channel(capacity).0,
            hearts: broadcast::channel(capacity).0,
            missions: broadcast::channel(capacity).0,
        }
    }

    fn sender(&self, channel: Channel) -> &broadcast::Sender<ActivityEvent> {
        match channel {
            Channel::Utterances => &self.utterances,
            Channel::Hearts => &self.hearts,
            Channel::Missions => &self.missions,
        }
    }

    /// Fire-and-forget. Returns how many subscribers were reached.
    pub fn publish(&self, event: ActivityEvent) -> usize {
        let channel = event.channel();
        trace!(?channel, "publishing activity event");
        // No subscribers is not an error
        self.sender(channel).send(event).unwrap_or(0)
    }

    pub fn subscribe(&self, channel: Channel) -> broadcast::Receiver<ActivityEvent> {
        self.sender(channel).subscribe()
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.sender(channel).receiver_count()
    }
}

impl Default for ActivityBus {
    fn default() -> Self {
        Self::new()
    }
}
