//! Mock feed supplier for testing.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::WorkflowError;
use crate::notify::{FeedEntry, FeedSupplier};
use crate::order::Station;

/// Feed supplier with scripted per-station snapshots.
///
/// Stations without a scripted feed return an empty feed. Stations marked
/// with [`fail_station`](Self::fail_station) return a database error.
#[derive(Debug, Default)]
pub struct MockFeedSupplier {
    feeds: Mutex<HashMap<Station, Vec<FeedEntry>>>,
    failing: Mutex<HashSet<Station>>,
    calls: Mutex<Vec<Station>>,
}

impl MockFeedSupplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot returned for `station`.
    pub fn set_feed(&self, station: Station, entries: Vec<FeedEntry>) {
        self.feeds.lock().unwrap().insert(station, entries);
    }

    pub fn fail_station(&self, station: Station) {
        self.failing.lock().unwrap().insert(station);
    }

    pub fn recover_station(&self, station: Station) {
        self.failing.lock().unwrap().remove(&station);
    }

    /// Stations requested so far, in call order.
    pub fn recorded_calls(&self) -> Vec<Station> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedSupplier for MockFeedSupplier {
    async fn current_feed(&self, station: Station) -> Result<Vec<FeedEntry>, WorkflowError> {
        self.calls.lock().unwrap().push(station);

        if self.failing.lock().unwrap().contains(&station) {
            return Err(WorkflowError::Database(format!(
                "simulated feed failure at {}",
                station
            )));
        }

        Ok(self
            .feeds
            .lock()
            .unwrap()
            .get(&station)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_feeds() {
        let mock = MockFeedSupplier::new();
        mock.set_feed(Station::Ironing, vec![FeedEntry::new("o1", "ORD-1")]);

        assert_eq!(mock.current_feed(Station::Ironing).await.unwrap().len(), 1);
        assert!(mock.current_feed(Station::Washing).await.unwrap().is_empty());

        mock.fail_station(Station::Ironing);
        assert!(mock.current_feed(Station::Ironing).await.is_err());
        mock.recover_station(Station::Ironing);
        assert!(mock.current_feed(Station::Ironing).await.is_ok());

        assert_eq!(mock.recorded_calls().len(), 4);
    }
}
