use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::RetentionConfig;
use crate::store::TrackingStore;

/// Background retention sweep.
///
/// Location history exists so viewers can seed their trail; once a trip has
/// been over for the grace period, everything but the last known position
/// is dead weight and gets deleted.
pub struct CleanupManager {
    store: Arc<dyn TrackingStore>,
    config: RetentionConfig,
}

impl CleanupManager {
    pub fn new(store: Arc<dyn TrackingStore>, config: RetentionConfig) -> Self {
        Self { store, config }
    }

    /// Run forever: one early pass shortly after startup, then on the
    /// configured interval.
    pub async fn start(self: Arc<Self>) {
        info!(
            interval_secs = self.config.interval_secs,
            grace_period_secs = self.config.grace_period_secs,
            "Starting retention sweep"
        );

        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
        self.sweep().await;

        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(self.config.interval_secs));
        // Skip the first tick which fires immediately (we already swept above)
        interval.tick().await;

        loop {
            interval.tick().await;
            self.sweep().await;
        }
    }

    /// One sweep cycle. Per-trip failures are logged and skipped; the next
    /// cycle retries naturally.
    pub async fn sweep(&self) {
        let cutoff = (Utc::now() - ChronoDuration::seconds(self.config.grace_period_secs as i64))
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        let trips = match self.store.trips_ended_before(&cutoff).await {
            Ok(trips) => trips,
            Err(e) => {
                error!(error = %e, "Retention scan failed");
                return;
            }
        };

        if trips.is_empty() {
            return;
        }

        let mut deleted_total = 0u64;
        for trip_id in &trips {
            match self.store.prune_samples(trip_id).await {
                Ok(deleted) => deleted_total += deleted,
                Err(e) => error!(trip_id = %trip_id, error = %e, "Retention prune failed for trip"),
            }
        }

        if deleted_total > 0 {
            info!(trips = trips.len(), deleted = deleted_total, "Pruned ended trip locations");
        }
    }
}
