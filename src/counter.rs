//! Category x direction crossing totals.
//!
//! `CounterStore` is shared between the worker (which applies events) and
//! the presentation side (which reads snapshots and may reset). Every
//! operation takes the same lock, so a reader never sees half of a frame's
//! events.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::{CrossingEvent, Direction};

/// Crossing counts for one category, or for the whole session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DirectionCounts {
    pub left_to_right: u64,
    pub right_to_left: u64,
}

impl DirectionCounts {
    pub fn total(&self) -> u64 {
        self.left_to_right + self.right_to_left
    }

    pub fn get(&self, direction: Direction) -> u64 {
        match direction {
            Direction::LeftToRight => self.left_to_right,
            Direction::RightToLeft => self.right_to_left,
        }
    }

    fn increment(&mut self, direction: Direction) {
        match direction {
            Direction::LeftToRight => self.left_to_right += 1,
            Direction::RightToLeft => self.right_to_left += 1,
        }
    }

    fn add(&mut self, other: &DirectionCounts) {
        self.left_to_right += other.left_to_right;
        self.right_to_left += other.right_to_left;
    }
}

/// Independent copy of the counters at one instant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub categories: BTreeMap<String, DirectionCounts>,
}

impl CounterSnapshot {
    /// Counts for `category`, zero when nothing has crossed yet.
    pub fn get(&self, category: &str) -> DirectionCounts {
        self.categories.get(category).copied().unwrap_or_default()
    }

    /// Session totals per direction across all categories.
    pub fn totals(&self) -> DirectionCounts {
        let mut totals = DirectionCounts::default();
        for counts in self.categories.values() {
            totals.add(counts);
        }
        totals
    }

    pub fn total(&self) -> u64 {
        self.totals().total()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

/// One applied event with the counts as they stood right after it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CrossingTally {
    pub event: CrossingEvent,
    /// Counts of the event's category.
    pub category: DirectionCounts,
    /// Session totals across all categories.
    pub session: DirectionCounts,
}

#[derive(Default)]
struct Counts {
    categories: BTreeMap<String, DirectionCounts>,
    session: DirectionCounts,
}

#[derive(Default)]
pub struct CounterStore {
    inner: Mutex<Counts>,
}

impl CounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a frame's events under a single lock acquisition.
    pub fn apply(&self, events: &[CrossingEvent]) -> Vec<CrossingTally> {
        if events.is_empty() {
            return Vec::new();
        }
        let mut counts = self.lock();
        let mut tallies = Vec::with_capacity(events.len());
        for event in events {
            let category = {
                let entry = counts.categories.entry(event.category.clone()).or_default();
                entry.increment(event.direction);
                *entry
            };
            counts.session.increment(event.direction);
            tallies.push(CrossingTally {
                event: event.clone(),
                category,
                session: counts.session,
            });
        }
        tallies
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let counts = self.lock();
        CounterSnapshot {
            categories: counts.categories.clone(),
        }
    }

    /// Counts for a single category.
    pub fn category(&self, category: &str) -> DirectionCounts {
        self.lock()
            .categories
            .get(category)
            .copied()
            .unwrap_or_default()
    }

    pub fn totals(&self) -> DirectionCounts {
        self.lock().session
    }

    /// Zero every category and direction.
    pub fn reset(&self) {
        let mut counts = self.lock();
        *counts = Counts::default();
        log::info!("counters reset");
    }

    // Counts are plain integers; a panic while holding the lock cannot leave
    // them half-updated in a way that matters, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Counts> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
