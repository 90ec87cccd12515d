//! In-memory implementations of the persistence ports.
//!
//! Back the pipeline in tests and in file-only degraded mode, where the
//! database is unreachable but the runner keeps collecting to JSONL.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use engram_model::{Activity, ActivityId, EntityId, Tier, TierRecord};

use crate::database::ports::{
    HotTierStore, InsertOutcome, SummaryTierStore, TierStatistics, importance_bucket, time_bucket,
};
use crate::error::{EngramError, Result};
use crate::registry::{
    RegisteredService, ServiceRegistration, ServiceRegistry, collection_name_for,
};

/// Hot tier store over a sorted map, keyed by activity id.
#[derive(Debug, Default)]
pub struct InMemoryHotStore {
    records: RwLock<BTreeMap<Uuid, TierRecord>>,
}

impl InMemoryHotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw snapshot for test assertions, expired records included.
    pub async fn dump(&self) -> Vec<TierRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl HotTierStore for InMemoryHotStore {
    async fn insert(&self, record: &TierRecord) -> Result<InsertOutcome> {
        let mut records = self.records.write().await;
        let key = record.activity.activity_id.to_uuid();
        if records.contains_key(&key) {
            return Ok(InsertOutcome::Duplicate);
        }
        records.insert(key, record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn get_recent(
        &self,
        since: DateTime<Utc>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Activity>> {
        let records = self.records.read().await;
        let mut live: Vec<&TierRecord> = records
            .values()
            .filter(|record| record.is_live(now) && record.activity.timestamp >= since)
            .collect();
        live.sort_by(|a, b| b.activity.timestamp.cmp(&a.activity.timestamp));
        Ok(live
            .into_iter()
            .take(limit)
            .map(|record| record.activity.clone())
            .collect())
    }

    async fn statistics(&self, now: DateTime<Utc>) -> Result<TierStatistics> {
        let records = self.records.read().await;
        let mut stats = TierStatistics::default();
        for record in records.values().filter(|r| r.is_live(now)) {
            stats.total_count += 1;
            *stats
                .by_type
                .entry(record.activity.activity_type.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_importance
                .entry(importance_bucket(record.activity.importance_score))
                .or_default() += 1;
            *stats
                .by_time
                .entry(time_bucket(record.activity.timestamp, now).to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }

    async fn expiring_before(&self, deadline: DateTime<Utc>) -> Result<Vec<TierRecord>> {
        let records = self.records.read().await;
        let mut expiring: Vec<TierRecord> = records
            .values()
            .filter(|record| record.expires_at.is_some_and(|expiry| expiry <= deadline))
            .cloned()
            .collect();
        expiring.sort_by_key(|record| record.activity.timestamp);
        Ok(expiring)
    }

    async fn by_entity(&self, entity_id: &EntityId) -> Result<Vec<TierRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<TierRecord> = records
            .values()
            .filter(|record| record.activity.entity_id == *entity_id)
            .cloned()
            .collect();
        matching.sort_by_key(|record| record.activity.timestamp);
        Ok(matching)
    }

    async fn delete(&self, id: &ActivityId) -> Result<bool> {
        Ok(self.records.write().await.remove(&id.to_uuid()).is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.is_live(now));
        Ok((before - records.len()) as u64)
    }

    async fn count(&self, now: DateTime<Utc>) -> Result<u64> {
        let records = self.records.read().await;
        Ok(records.values().filter(|r| r.is_live(now)).count() as u64)
    }
}

/// Warm + cold store over two sorted maps.
#[derive(Debug, Default)]
pub struct InMemorySummaryStore {
    warm: RwLock<BTreeMap<Uuid, TierRecord>>,
    cold: RwLock<BTreeMap<Uuid, TierRecord>>,
}

impl InMemorySummaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn dump(&self, tier: Tier) -> Vec<TierRecord> {
        match tier {
            Tier::Warm => self.warm.read().await.values().cloned().collect(),
            Tier::Cold => self.cold.read().await.values().cloned().collect(),
            Tier::Hot => Vec::new(),
        }
    }

    fn map(&self, tier: Tier) -> Result<&RwLock<BTreeMap<Uuid, TierRecord>>> {
        match tier {
            Tier::Warm => Ok(&self.warm),
            Tier::Cold => Ok(&self.cold),
            Tier::Hot => Err(EngramError::Internal(
                "hot tier is not a summary collection".into(),
            )),
        }
    }
}

#[async_trait]
impl SummaryTierStore for InMemorySummaryStore {
    async fn insert(&self, tier: Tier, record: &TierRecord) -> Result<InsertOutcome> {
        let mut records = self.map(tier)?.write().await;
        let key = record.activity.activity_id.to_uuid();
        if records.contains_key(&key) {
            return Ok(InsertOutcome::Duplicate);
        }
        records.insert(key, record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn expiring_before(&self, tier: Tier, deadline: DateTime<Utc>) -> Result<Vec<TierRecord>> {
        let records = self.map(tier)?.read().await;
        let mut expiring: Vec<TierRecord> = records
            .values()
            .filter(|record| record.expires_at.is_some_and(|expiry| expiry <= deadline))
            .cloned()
            .collect();
        expiring.sort_by_key(|record| record.activity.timestamp);
        Ok(expiring)
    }

    async fn by_entity(&self, tier: Tier, entity_id: &EntityId) -> Result<Vec<TierRecord>> {
        let records = self.map(tier)?.read().await;
        let mut matching: Vec<TierRecord> = records
            .values()
            .filter(|record| record.activity.entity_id == *entity_id)
            .cloned()
            .collect();
        matching.sort_by_key(|record| record.activity.timestamp);
        Ok(matching)
    }

    async fn delete(&self, tier: Tier, id: &ActivityId) -> Result<bool> {
        Ok(self.map(tier)?.write().await.remove(&id.to_uuid()).is_some())
    }

    async fn purge_expired(&self, tier: Tier, now: DateTime<Utc>) -> Result<u64> {
        let mut records = self.map(tier)?.write().await;
        let before = records.len();
        records.retain(|_, record| record.is_live(now));
        Ok((before - records.len()) as u64)
    }

    async fn count(&self, tier: Tier) -> Result<u64> {
        Ok(self.map(tier)?.read().await.len() as u64)
    }
}

/// Registry that assigns collection names without a database.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    entries: RwLock<HashMap<Uuid, String>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServiceRegistry for InMemoryRegistry {
    async fn register(&self, registration: &ServiceRegistration) -> Result<RegisteredService> {
        let mut entries = self.entries.write().await;
        let collection_name = entries
            .entry(*registration.service_id.as_uuid())
            .or_insert_with(|| collection_name_for(&registration.service_id))
            .clone();
        Ok(RegisteredService { collection_name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_model::activity::Attributes;
    use engram_model::{ActivityType, EntityId};

    fn hot_record(timestamp: DateTime<Utc>, ttl_days: i64, score: f64) -> TierRecord {
        let activity = Activity {
            activity_id: ActivityId::new(),
            entity_id: EntityId::derive("C:", 1),
            timestamp,
            activity_type: ActivityType::Modify,
            file_path: "C:\\x.txt".into(),
            file_name: "x.txt".into(),
            is_directory: false,
            file_size: None,
            volume: "C:".into(),
            attributes: Attributes::new(),
            importance_score: score,
            tier: Tier::Hot,
            access_count: 0,
            search_hits: 0,
        };
        TierRecord::hot(activity, chrono::Duration::days(ttl_days), Utc::now())
    }

    #[tokio::test]
    async fn duplicate_insert_is_reported_not_failed() {
        let store = InMemoryHotStore::new();
        let record = hot_record(Utc::now(), 4, 0.5);
        assert_eq!(store.insert(&record).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert(&record).await.unwrap(), InsertOutcome::Duplicate);
        assert_eq!(store.count(Utc::now()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_records_are_invisible_to_reads() {
        let store = InMemoryHotStore::new();
        let now = Utc::now();
        // timestamp five days back with a four day TTL: already expired
        store
            .insert(&hot_record(now - chrono::Duration::days(5), 4, 0.5))
            .await
            .unwrap();
        store.insert(&hot_record(now, 4, 0.9)).await.unwrap();

        let recent = store
            .get_recent(now - chrono::Duration::days(30), 100, now)
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(store.statistics(now).await.unwrap().total_count, 1);
        assert_eq!(store.purge_expired(now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn registry_assignments_are_idempotent() {
        let registry = InMemoryRegistry::new();
        let registration = ServiceRegistration::hot_tier_recorder();
        let first = registry.register(&registration).await.unwrap();
        let second = registry.register(&registration).await.unwrap();
        assert_eq!(first.collection_name, second.collection_name);
    }
}
