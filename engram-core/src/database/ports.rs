//! Persistence ports for the tier stores.
//!
//! The recorder and consolidator only see these traits; Postgres and
//! in-memory implementations live alongside. Bucketing helpers are shared
//! so every implementation reports statistics identically.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use engram_model::{Activity, ActivityId, EntityId, Tier, TierRecord};

use crate::error::Result;

/// Outcome of a primary-keyed insert. Re-inserting an existing id is not
/// an error: ingest must be idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Aggregate view of one tier collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TierStatistics {
    pub total_count: u64,
    pub by_type: BTreeMap<String, u64>,
    /// Keyed by 0.1-wide score buckets: `"0.0-0.1"` through `"0.9-1.0"`.
    pub by_importance: BTreeMap<String, u64>,
    pub by_time: BTreeMap<String, u64>,
}

/// Score bucket label for the statistics histogram.
pub fn importance_bucket(score: f64) -> String {
    let index = ((score * 10.0).floor() as i64).clamp(0, 9);
    format!(
        "{:.1}-{:.1}",
        index as f64 / 10.0,
        (index + 1) as f64 / 10.0
    )
}

/// Age bucket label for the statistics histogram.
pub fn time_bucket(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> &'static str {
    let age = now - timestamp;
    if age <= Duration::hours(1) {
        "last_hour"
    } else if age <= Duration::days(1) {
        "last_day"
    } else if age <= Duration::days(7) {
        "last_week"
    } else {
        "older"
    }
}

/// The hot collection. The recorder is the sole writer; the consolidator
/// reads by filter and deletes by primary key.
#[async_trait]
pub trait HotTierStore: Send + Sync {
    async fn insert(&self, record: &TierRecord) -> Result<InsertOutcome>;

    /// Most-recent-first activities with `timestamp >= since`, excluding
    /// expired records.
    async fn get_recent(
        &self,
        since: DateTime<Utc>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Activity>>;

    /// Live-record statistics (expired records excluded).
    async fn statistics(&self, now: DateTime<Utc>) -> Result<TierStatistics>;

    /// Records whose expiry falls before `deadline`, oldest first.
    async fn expiring_before(&self, deadline: DateTime<Utc>) -> Result<Vec<TierRecord>>;

    /// Every record still present for one entity, oldest first, expired
    /// rows included. Consolidation promotes whole entities, and a row
    /// whose TTL just fired still belongs in the summary it feeds.
    async fn by_entity(&self, entity_id: &EntityId) -> Result<Vec<TierRecord>>;

    /// Delete one record by primary key; false when it was already gone.
    async fn delete(&self, id: &ActivityId) -> Result<bool>;

    /// TTL enforcement: drop records whose expiry has passed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Live record count.
    async fn count(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Warm and cold summary collections, exclusively owned by the
/// consolidator.
#[async_trait]
pub trait SummaryTierStore: Send + Sync {
    async fn insert(&self, tier: Tier, record: &TierRecord) -> Result<InsertOutcome>;

    /// Records in `tier` whose expiry falls before `deadline`. Cold
    /// records never expire, so the cold tier always yields nothing.
    async fn expiring_before(&self, tier: Tier, deadline: DateTime<Utc>) -> Result<Vec<TierRecord>>;

    /// Every record in `tier` for one entity, oldest first, expired rows
    /// included.
    async fn by_entity(&self, tier: Tier, entity_id: &EntityId) -> Result<Vec<TierRecord>>;

    async fn delete(&self, tier: Tier, id: &ActivityId) -> Result<bool>;

    /// TTL enforcement: drop records in `tier` whose expiry has passed.
    /// Groups that never clear their promotion gate leave this way.
    async fn purge_expired(&self, tier: Tier, now: DateTime<Utc>) -> Result<u64>;

    async fn count(&self, tier: Tier) -> Result<u64>;
}
