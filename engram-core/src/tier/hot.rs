//! Hot tier recorder: scored, TTL-bounded persistence of fresh activity.
//!
//! The recorder is the sole writer to the hot collection. Importance is
//! computed exactly once, at insertion; records arriving with a score
//! already attached (JSONL re-ingest, backups) keep it, which is what
//! makes re-ingesting a file idempotent end to end.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Duration, Utc};
use serde::Serialize;

use engram_model::{Activity, ActivityId, Tier, TierRecord};

use crate::database::ports::{HotTierStore, TierStatistics};
use crate::error::Result;
use crate::registry::{ServiceRegistration, ServiceRegistry};
use crate::score::ImportanceScorer;

/// Batch size for bulk JSONL ingest.
const INGEST_CHUNK: usize = 500;

#[derive(Debug, Default)]
struct RecorderCounters {
    store_failures: AtomicU64,
    data_errors: AtomicU64,
}

/// Hot tier statistics plus the recorder's recovered-error counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HotTierStatistics {
    #[serde(flatten)]
    pub tier: TierStatistics,
    pub recovered_errors: BTreeMap<String, u64>,
}

pub struct HotTierRecorder {
    store: Arc<dyn HotTierStore>,
    scorer: ImportanceScorer,
    collection_name: String,
    hot_ttl: Duration,
    counters: RecorderCounters,
}

impl std::fmt::Debug for HotTierRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotTierRecorder")
            .field("collection_name", &self.collection_name)
            .field("hot_ttl_days", &self.hot_ttl.num_days())
            .finish()
    }
}

impl HotTierRecorder {
    /// Register with the registration service and bind to the collection
    /// name it assigns. The store must already target that collection (or
    /// be collection-agnostic, like the in-memory store).
    pub async fn register(
        registry: &dyn ServiceRegistry,
        store: Arc<dyn HotTierStore>,
        scorer: ImportanceScorer,
        ttl_days: i64,
    ) -> Result<Self> {
        let registration = ServiceRegistration::hot_tier_recorder();
        let registered = registry.register(&registration).await?;
        tracing::info!(
            target: "hot_tier",
            collection = %registered.collection_name,
            ttl_days,
            "hot tier recorder registered"
        );
        Ok(Self::new(store, registered.collection_name, scorer, ttl_days))
    }

    /// Bind to an already-assigned collection name.
    pub fn new(
        store: Arc<dyn HotTierStore>,
        collection_name: String,
        scorer: ImportanceScorer,
        ttl_days: i64,
    ) -> Self {
        HotTierRecorder {
            store,
            scorer,
            collection_name,
            hot_ttl: Duration::days(ttl_days.max(1)),
            counters: RecorderCounters::default(),
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    pub fn hot_ttl(&self) -> Duration {
        self.hot_ttl
    }

    /// Persist a batch. Single-record failures are counted and skipped;
    /// the returned ids cover the successfully written subset, with
    /// duplicates reported as successes (the record is already there).
    pub async fn store_activities(&self, batch: Vec<Activity>) -> Result<Vec<ActivityId>> {
        let now = Utc::now();
        let mut ids = Vec::with_capacity(batch.len());

        for mut activity in batch {
            if activity.importance_score <= 0.0 {
                activity.importance_score = self.scorer.score(&activity, now);
            }
            activity.tier = Tier::Hot;
            let record = TierRecord::hot(activity, self.hot_ttl, now);
            match self.store.insert(&record).await {
                Ok(_) => ids.push(record.activity.activity_id),
                Err(err) => {
                    self.counters.store_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        target: "hot_tier",
                        activity_id = %record.activity.activity_id,
                        error = %err,
                        "failed to store activity"
                    );
                }
            }
        }

        Ok(ids)
    }

    /// Most-recent-first activities from the last `hours` hours. Expired
    /// records never show up, whatever the window.
    pub async fn get_recent(&self, hours: i64, limit: usize) -> Result<Vec<Activity>> {
        let now = Utc::now();
        self.store
            .get_recent(now - Duration::hours(hours.max(0)), limit, now)
            .await
    }

    pub async fn get_statistics(&self) -> Result<HotTierStatistics> {
        let tier = self.store.statistics(Utc::now()).await?;
        let mut recovered_errors = BTreeMap::new();
        recovered_errors.insert(
            "store_failures".to_string(),
            self.counters.store_failures.load(Ordering::Relaxed),
        );
        recovered_errors.insert(
            "data_errors".to_string(),
            self.counters.data_errors.load(Ordering::Relaxed),
        );
        Ok(HotTierStatistics {
            tier,
            recovered_errors,
        })
    }

    /// Bulk ingest from a line-delimited JSON file written by an offline
    /// collector (or one of our own backups). Malformed lines are skipped
    /// and counted; everything parseable goes through the normal insert
    /// path in chunks.
    pub async fn process_jsonl_file(&self, path: &Path) -> Result<Vec<ActivityId>> {
        let (activities, line_errors) = crate::backup::read_activities(path)?;
        if !line_errors.is_empty() {
            self.counters
                .data_errors
                .fetch_add(line_errors.len() as u64, Ordering::Relaxed);
            for line_error in &line_errors {
                tracing::warn!(
                    target: "hot_tier",
                    file = %path.display(),
                    line = line_error.line_number,
                    error = %line_error.error,
                    "skipping malformed JSONL line"
                );
            }
        }

        let total = activities.len();
        let mut ids = Vec::with_capacity(total);
        let mut chunks = activities.into_iter().peekable();
        while chunks.peek().is_some() {
            let chunk: Vec<Activity> = chunks.by_ref().take(INGEST_CHUNK).collect();
            ids.extend(self.store_activities(chunk).await?);
        }

        tracing::info!(
            target: "hot_tier",
            file = %path.display(),
            stored = ids.len(),
            parsed = total,
            skipped = line_errors.len(),
            "processed JSONL file"
        );
        Ok(ids)
    }
}
