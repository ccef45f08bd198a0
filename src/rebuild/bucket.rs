//! Grouping of consecutive events into commits.

use crate::core::{AccountId, Timestamp};
use crate::notes::{Event, EventKind};

/// Longest span of one bucket, first event to last.
pub const MAX_WINDOW_MS: u64 = 3_000;
/// Longest gap between neighbouring events of one bucket.
pub const MAX_DELTA_MS: u64 = 1_000;

#[derive(Clone, Debug)]
pub struct Bucket {
    pub who: Option<AccountId>,
    pub events: Vec<Event>,
}

impl Bucket {
    fn start(event: Event) -> Self {
        Self {
            who: event.who,
            events: vec![event],
        }
    }

    fn first(&self) -> Timestamp {
        self.events[0].when
    }

    /// Commit time of the bucket.
    pub fn when(&self) -> Timestamp {
        self.events[self.events.len() - 1].when
    }

    fn creates_patch_set(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e.kind, EventKind::PatchSetCreated { .. }))
    }

    fn accepts(&self, event: &Event) -> bool {
        if event.who != self.who
            || event.when.distance_ms(self.first()) > MAX_WINDOW_MS
            || event.when.distance_ms(self.when()) > MAX_DELTA_MS
        {
            return false;
        }
        match event.kind {
            EventKind::CreateChange { .. } => false,
            EventKind::PatchSetCreated { .. } => !self.creates_patch_set(),
            _ => true,
        }
    }
}

/// Split sorted events into buckets, preserving order.
pub fn bucket_events(events: impl IntoIterator<Item = Event>) -> Vec<Bucket> {
    let mut buckets: Vec<Bucket> = Vec::new();
    for event in events {
        match buckets.last_mut() {
            Some(current) if current.accepts(&event) => current.events.push(event),
            _ => buckets.push(Bucket::start(event)),
        }
    }
    buckets
}
