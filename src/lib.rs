pub mod aggregation;
pub mod config;
pub mod error;
pub mod migrations;
pub mod models;
pub mod operating_hours;
pub mod rate_limit;
pub mod retry;
pub mod scheduler;
pub mod shame_score;
pub mod snapshot_store;
pub mod stats_db;
pub mod status_change;
pub mod time;
pub mod verifier;

use std::sync::Arc;

use aggregation::AggregationService;
use config::PipelineConfig;
use operating_hours::OperatingHoursDetector;
use shame_score::ShameScoreCalculator;
use snapshot_store::SnapshotStore;
use stats_db::StatsDb;
use status_change::StatusChangeDetector;
use time::Clock;
use verifier::AggregateVerifier;

/// Composition root: the binaries build one of these and hand out
/// components from it. Store handle, stats db, clock and config are all
/// injected here; nothing reaches for ambient globals.
#[derive(Clone)]
pub struct Pipeline {
    pub store: Arc<dyn SnapshotStore>,
    pub db: Arc<StatsDb>,
    pub clock: Arc<dyn Clock>,
    pub config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        db: Arc<StatsDb>,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            db,
            clock,
            config,
        }
    }

    pub fn aggregation(&self) -> AggregationService {
        AggregationService::new(
            self.store.clone(),
            self.db.clone(),
            self.clock.clone(),
            self.config.clone(),
        )
    }

    pub fn verifier(&self) -> AggregateVerifier {
        AggregateVerifier::new(self.store.clone(), self.db.clone(), self.config.clone())
    }

    pub fn status_changes(&self) -> StatusChangeDetector {
        StatusChangeDetector::new(self.store.clone())
    }

    pub fn operating_hours(&self) -> OperatingHoursDetector {
        OperatingHoursDetector::new(self.store.clone(), self.db.clone())
    }

    pub fn shame(&self) -> ShameScoreCalculator {
        ShameScoreCalculator::new(
            self.store.clone(),
            self.db.clone(),
            self.config.aggregation.default_tier_weight,
        )
    }
}
