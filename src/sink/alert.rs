use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::counter::CrossingTally;
use crate::pipeline::CrossingHandler;

pub const DEFAULT_ALERT_CATEGORIES: [&str; 2] = ["wheelchair", "reduced_mobility"];

/// Raises a warning when a watched category crosses.
pub struct AlertHandler {
    categories: HashSet<String>,
    raised: Arc<AtomicU64>,
}

impl AlertHandler {
    pub fn new<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            categories: categories.into_iter().map(Into::into).collect(),
            raised: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared count of alerts raised so far.
    pub fn raised(&self) -> Arc<AtomicU64> {
        self.raised.clone()
    }

    pub fn watches(&self, category: &str) -> bool {
        self.categories.contains(category)
    }
}

impl CrossingHandler for AlertHandler {
    fn on_crossings(&mut self, tallies: &[CrossingTally]) {
        for tally in tallies {
            if !self.watches(&tally.event.category) {
                continue;
            }
            self.raised.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "alert: {} crossed {} (track {}, {} of this category today)",
                tally.event.category,
                tally.event.direction,
                tally.event.track_id,
                tally.category.total()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::CounterStore;
    use crate::{CrossingEvent, Direction};

    #[test]
    fn raises_only_for_watched_categories() {
        let counters = CounterStore::new();
        let tallies = counters.apply(&[
            CrossingEvent {
                track_id: 1,
                category: "adult".into(),
                direction: Direction::LeftToRight,
                frame_index: 0,
            },
            CrossingEvent {
                track_id: 2,
                category: "wheelchair".into(),
                direction: Direction::RightToLeft,
                frame_index: 0,
            },
        ]);
        let mut handler = AlertHandler::new(DEFAULT_ALERT_CATEGORIES);
        let raised = handler.raised();
        handler.on_crossings(&tallies);
        assert_eq!(raised.load(Ordering::Relaxed), 1);
        assert!(handler.watches("reduced_mobility"));
        assert!(!handler.watches("adult"));
    }
}
