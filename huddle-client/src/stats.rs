//! Network statistics store
//!
//! Keeps the latest `consumer-stats` snapshot per remote producer. The server
//! computes the numbers; this store only retains them for display.

use dashmap::DashMap;
use huddle_proto::{ConsumerStats, ProducerId};

use crate::types::QualityLabel;

#[derive(Debug, Default)]
pub struct NetworkStats {
    latest: DashMap<ProducerId, ConsumerStats>,
}

impl NetworkStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a snapshot, returning the quality label it recommends
    pub fn update(&self, stats: ConsumerStats) -> Option<QualityLabel> {
        let label = stats
            .optimal_configuration
            .video_quality
            .as_deref()
            .and_then(|q| q.parse().ok());
        self.latest.insert(stats.producer_id.clone(), stats);
        label
    }

    #[must_use]
    pub fn get(&self, producer_id: &ProducerId) -> Option<ConsumerStats> {
        self.latest.get(producer_id).map(|entry| entry.clone())
    }

    pub fn remove(&self, producer_id: &ProducerId) -> Option<ConsumerStats> {
        self.latest.remove(producer_id).map(|(_, stats)| stats)
    }

    #[must_use]
    pub fn all(&self) -> Vec<ConsumerStats> {
        self.latest.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn clear(&self) {
        self.latest.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}
