//! Tier consolidation: summarize expiring records into the next tier.
//!
//! Runs on its own cadence, separate from ingestion. A pass scans for
//! records whose expiry falls inside the next window, promotes whole
//! entities whose combined importance clears the transition gate, and
//! purges whatever expired unpromoted. The consolidator holds no locks
//! against the recorder; every delete is a single-record operation, and a
//! record re-touched mid-pass simply reappears as a fresh hot insert.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use engram_config::ConsolidatorSettings;
use engram_model::{ActivityId, EntityId, Tier, TierRecord, WarmSummary};

use crate::database::ports::{HotTierStore, SummaryTierStore};
use crate::error::Result;
use crate::score::{ConsolidationGate, ImportanceScorer};

/// Consolidation cadence and transition gates.
#[derive(Debug, Clone, Copy)]
pub struct ConsolidatorConfig {
    pub cadence: Duration,
    pub hot_to_warm: ConsolidationGate,
    pub warm_to_cold: ConsolidationGate,
}

impl Default for ConsolidatorConfig {
    fn default() -> Self {
        Self {
            cadence: Duration::hours(1),
            hot_to_warm: ConsolidationGate {
                min_importance: 0.3,
                min_age_hours: 12.0,
            },
            warm_to_cold: ConsolidationGate {
                min_importance: 0.6,
                min_age_hours: 168.0,
            },
        }
    }
}

impl ConsolidatorConfig {
    pub fn from_settings(settings: &ConsolidatorSettings) -> Self {
        Self {
            cadence: Duration::seconds(settings.cadence_secs.max(1) as i64),
            hot_to_warm: ConsolidationGate {
                min_importance: settings.hot_to_warm.min_importance,
                min_age_hours: settings.hot_to_warm.min_age_hours,
            },
            warm_to_cold: ConsolidationGate {
                min_importance: settings.warm_to_cold.min_importance,
                min_age_hours: settings.warm_to_cold.min_age_hours,
            },
        }
    }
}

/// What one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    pub hot_scanned: usize,
    pub warm_written: usize,
    pub hot_consolidated: usize,
    pub cold_written: usize,
    pub warm_consolidated: usize,
    pub groups_deferred: usize,
    pub expired_purged: u64,
    pub warm_purged: u64,
}

pub struct TierConsolidator {
    hot: Arc<dyn HotTierStore>,
    summaries: Arc<dyn SummaryTierStore>,
    scorer: ImportanceScorer,
    config: ConsolidatorConfig,
}

impl std::fmt::Debug for TierConsolidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierConsolidator")
            .field("config", &self.config)
            .finish()
    }
}

fn distinct_entities(records: &[TierRecord]) -> Vec<EntityId> {
    let mut seen = BTreeSet::new();
    records
        .iter()
        .filter_map(|record| {
            seen.insert(record.activity.entity_id.to_uuid())
                .then_some(record.activity.entity_id)
        })
        .collect()
}

impl TierConsolidator {
    pub fn new(
        hot: Arc<dyn HotTierStore>,
        summaries: Arc<dyn SummaryTierStore>,
        scorer: ImportanceScorer,
        config: ConsolidatorConfig,
    ) -> Self {
        TierConsolidator {
            hot,
            summaries,
            scorer,
            config,
        }
    }

    pub fn cadence(&self) -> Duration {
        self.config.cadence
    }

    /// One consolidation pass: hot→warm, TTL purge, then warm→cold.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> Result<ConsolidationReport> {
        let mut report = ConsolidationReport::default();
        let window_end = now + self.config.cadence;

        // Hot records expiring inside the next window nominate their
        // entities; the whole entity is considered, not just the expiring
        // rows, so one warm record summarizes the full burst.
        let expiring = self.hot.expiring_before(window_end).await?;
        report.hot_scanned = expiring.len();

        for entity_id in distinct_entities(&expiring) {
            let group = self.hot.by_entity(&entity_id).await?;
            if group.is_empty() {
                continue;
            }

            let scores: Vec<f64> = group
                .iter()
                .map(|record| record.activity.importance_score)
                .collect();
            let group_score = ImportanceScorer::combine_scores(&scores);
            let oldest = group
                .iter()
                .map(|record| record.activity.timestamp)
                .min()
                .unwrap_or(now);
            let age_hours = (now - oldest).num_seconds() as f64 / 3_600.0;

            if !self.config.hot_to_warm.admits(group_score, age_hours) {
                report.groups_deferred += 1;
                continue;
            }

            let warm = self.build_summary(Tier::Warm, &group, group_score, now);
            let warm_id = warm.activity.activity_id;
            self.summaries.insert(Tier::Warm, &warm).await?;
            report.warm_written += 1;

            for record in &group {
                if self.hot.delete(&record.activity.activity_id).await? {
                    report.hot_consolidated += 1;
                }
            }
            tracing::debug!(
                target: "consolidator",
                entity = %entity_id,
                warm_record = %warm_id,
                sources = group.len(),
                score = group_score,
                "promoted hot records to warm"
            );
        }

        report.expired_purged = self.hot.purge_expired(now).await?;

        // Same shape for warm→cold, with decay applied to the stored
        // scores before gating.
        let due = self.summaries.expiring_before(Tier::Warm, window_end).await?;
        for entity_id in distinct_entities(&due) {
            let group = self.summaries.by_entity(Tier::Warm, &entity_id).await?;
            if group.is_empty() {
                continue;
            }

            let scores: Vec<f64> = group
                .iter()
                .map(|record| {
                    let age_days = (now - record.activity.timestamp).num_seconds() as f64 / 86_400.0;
                    self.scorer.decay(
                        record.activity.importance_score,
                        age_days,
                        record.activity.access_count,
                    )
                })
                .collect();
            let group_score = ImportanceScorer::combine_scores(&scores);
            let oldest = group
                .iter()
                .map(|record| record.activity.timestamp)
                .min()
                .unwrap_or(now);
            let age_hours = (now - oldest).num_seconds() as f64 / 3_600.0;

            if !self.config.warm_to_cold.admits(group_score, age_hours) {
                report.groups_deferred += 1;
                continue;
            }

            let cold = self.build_summary(Tier::Cold, &group, group_score, now);
            self.summaries.insert(Tier::Cold, &cold).await?;
            report.cold_written += 1;

            for record in &group {
                if self
                    .summaries
                    .delete(Tier::Warm, &record.activity.activity_id)
                    .await?
                {
                    report.warm_consolidated += 1;
                }
            }
        }

        // Warm groups that never clear the gate expire the same way hot
        // ones do.
        report.warm_purged = self.summaries.purge_expired(Tier::Warm, now).await?;

        if report != ConsolidationReport::default() {
            tracing::info!(
                target: "consolidator",
                hot_scanned = report.hot_scanned,
                warm_written = report.warm_written,
                cold_written = report.cold_written,
                purged = report.expired_purged,
                warm_purged = report.warm_purged,
                deferred = report.groups_deferred,
                "consolidation pass complete"
            );
        }
        Ok(report)
    }

    /// One summary record for a group of co-referent sources: the
    /// highest-importance activity's attributes, the union of observed
    /// paths, aggregate access count, and the recombined score.
    fn build_summary(
        &self,
        tier: Tier,
        sources: &[TierRecord],
        group_score: f64,
        now: DateTime<Utc>,
    ) -> TierRecord {
        let best = sources
            .iter()
            .max_by(|a, b| {
                a.activity
                    .importance_score
                    .total_cmp(&b.activity.importance_score)
            })
            .expect("summary groups are non-empty");

        let paths: BTreeSet<String> = sources
            .iter()
            .map(|record| record.activity.file_path.clone())
            .collect();
        let access_count: u64 = sources
            .iter()
            .map(|record| record.activity.access_count)
            .sum();

        let mut activity = best.activity.clone();
        activity.activity_id = ActivityId::new();
        activity.tier = tier;
        activity.importance_score = group_score;
        activity.access_count = access_count;

        let expires_at = match tier {
            // Warm records live for the short-term retention the score
            // earns; cold records never expire.
            Tier::Warm => {
                let days = self
                    .scorer
                    .retention_days(group_score, engram_model::MemoryStage::ShortTerm);
                Some(now + Duration::days(days as i64))
            }
            _ => None,
        };

        TierRecord {
            activity,
            version: 1,
            inserted_at: now,
            expires_at,
            back_references: sources
                .iter()
                .map(|record| record.activity.activity_id)
                .collect(),
            summary: Some(WarmSummary {
                paths: paths.into_iter().collect(),
                access_count,
                source_count: sources.len() as u32,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::{InMemoryHotStore, InMemorySummaryStore};
    use engram_model::activity::Attributes;
    use engram_model::{Activity, ActivityType};

    fn hot_record(
        entity_id: EntityId,
        timestamp: DateTime<Utc>,
        score: f64,
        ttl_days: i64,
        path: &str,
    ) -> TierRecord {
        let activity = Activity {
            activity_id: ActivityId::new(),
            entity_id,
            timestamp,
            activity_type: ActivityType::Modify,
            file_path: path.into(),
            file_name: path.rsplit('\\').next().unwrap_or(path).into(),
            is_directory: false,
            file_size: None,
            volume: "C:".into(),
            attributes: Attributes::new(),
            importance_score: score,
            tier: Tier::Hot,
            access_count: 1,
            search_hits: 0,
        };
        TierRecord::hot(activity, Duration::days(ttl_days), timestamp)
    }

    fn consolidator(
        hot: Arc<InMemoryHotStore>,
        summaries: Arc<InMemorySummaryStore>,
        config: ConsolidatorConfig,
    ) -> TierConsolidator {
        TierConsolidator::new(hot, summaries, ImportanceScorer::new(), config)
    }

    #[tokio::test]
    async fn entity_burst_consolidates_into_one_warm_record() {
        let hot = Arc::new(InMemoryHotStore::new());
        let summaries = Arc::new(InMemorySummaryStore::new());
        let now = Utc::now();
        let entity = EntityId::derive("C:", 99);

        // Ten records over seven days, uniform 0.7 importance.
        for day in 0..10 {
            let timestamp = now - Duration::hours(day * 17);
            hot.insert(&hot_record(
                entity,
                timestamp,
                0.7,
                4,
                "C:\\Users\\A\\Documents\\thesis.tex",
            ))
            .await
            .unwrap();
        }

        let config = ConsolidatorConfig {
            cadence: Duration::hours(1),
            hot_to_warm: ConsolidationGate {
                min_importance: 0.6,
                min_age_hours: 168.0,
            },
            ..ConsolidatorConfig::default()
        };
        let report = consolidator(Arc::clone(&hot), Arc::clone(&summaries), config)
            .run_pass(now)
            .await
            .unwrap();

        assert_eq!(report.warm_written, 1);
        let warm = summaries.dump(Tier::Warm).await;
        assert_eq!(warm.len(), 1);
        assert_eq!(warm[0].back_references.len(), 10);
        let combined = warm[0].activity.importance_score;
        assert!((0.7..=0.75).contains(&combined), "combined {combined}");
        assert_eq!(warm[0].activity.tier, Tier::Warm);
        assert_eq!(warm[0].summary.as_ref().unwrap().source_count, 10);

        // The source hot records are gone.
        assert_eq!(hot.dump().await.len(), 0);
    }

    #[tokio::test]
    async fn back_reference_importance_is_bounded_by_count() {
        let hot = Arc::new(InMemoryHotStore::new());
        let summaries = Arc::new(InMemorySummaryStore::new());
        let now = Utc::now();
        let entity = EntityId::derive("C:", 5);

        let mut total = 0.0;
        for i in 0..4 {
            let record = hot_record(
                entity,
                now - Duration::days(5) + Duration::hours(i),
                0.9,
                4,
                "C:\\Users\\A\\Documents\\x.docx",
            );
            total += record.activity.importance_score;
            hot.insert(&record).await.unwrap();
        }

        let report = consolidator(
            Arc::clone(&hot),
            Arc::clone(&summaries),
            ConsolidatorConfig::default(),
        )
        .run_pass(now)
        .await
        .unwrap();
        assert_eq!(report.warm_written, 1);

        let warm = summaries.dump(Tier::Warm).await.remove(0);
        assert!(total <= warm.back_references.len() as f64);
    }

    #[tokio::test]
    async fn low_importance_groups_expire_instead_of_promoting() {
        let hot = Arc::new(InMemoryHotStore::new());
        let summaries = Arc::new(InMemorySummaryStore::new());
        let now = Utc::now();
        let entity = EntityId::derive("C:", 6);

        // Expired and unimportant: fails the gate, gets purged.
        hot.insert(&hot_record(
            entity,
            now - Duration::days(5),
            0.15,
            4,
            "C:\\Windows\\Temp\\junk.tmp",
        ))
        .await
        .unwrap();

        let report = consolidator(
            Arc::clone(&hot),
            Arc::clone(&summaries),
            ConsolidatorConfig::default(),
        )
        .run_pass(now)
        .await
        .unwrap();

        assert_eq!(report.warm_written, 0);
        assert_eq!(report.groups_deferred, 1);
        assert_eq!(report.expired_purged, 1);
        assert!(summaries.dump(Tier::Warm).await.is_empty());
        assert!(hot.dump().await.is_empty());
    }

    #[tokio::test]
    async fn warm_records_promote_to_cold_with_decayed_scores() {
        let hot = Arc::new(InMemoryHotStore::new());
        let summaries = Arc::new(InMemorySummaryStore::new());
        let now = Utc::now();
        let entity = EntityId::derive("C:", 7);

        // A warm summary two weeks old whose expiry is imminent.
        let mut warm = hot_record(
            entity,
            now - Duration::days(14),
            0.9,
            4,
            "C:\\Users\\A\\Documents\\paper.pdf",
        );
        warm.activity.tier = Tier::Warm;
        warm.expires_at = Some(now + Duration::minutes(10));
        warm.back_references = vec![ActivityId::new(), ActivityId::new()];
        summaries.insert(Tier::Warm, &warm).await.unwrap();

        let report = consolidator(
            Arc::clone(&hot),
            Arc::clone(&summaries),
            ConsolidatorConfig::default(),
        )
        .run_pass(now)
        .await
        .unwrap();

        assert_eq!(report.cold_written, 1);
        assert_eq!(report.warm_consolidated, 1);

        let cold = summaries.dump(Tier::Cold).await;
        assert_eq!(cold.len(), 1);
        assert_eq!(cold[0].activity.tier, Tier::Cold);
        assert!(cold[0].expires_at.is_none());
        assert_eq!(cold[0].back_references, vec![warm.activity.activity_id]);
        assert!(summaries.dump(Tier::Warm).await.is_empty());
    }

    #[tokio::test]
    async fn unpromotable_warm_groups_expire_instead_of_lingering() {
        let hot = Arc::new(InMemoryHotStore::new());
        let summaries = Arc::new(InMemorySummaryStore::new());
        let now = Utc::now();
        let entity = EntityId::derive("C:", 9);

        // A warm summary too unimportant for the cold tier, past its TTL.
        let mut warm = hot_record(
            entity,
            now - Duration::days(30),
            0.3,
            4,
            "C:\\Users\\A\\Downloads\\setup.exe",
        );
        warm.activity.tier = Tier::Warm;
        warm.expires_at = Some(now - Duration::minutes(1));
        warm.back_references = vec![ActivityId::new()];
        summaries.insert(Tier::Warm, &warm).await.unwrap();

        let report = consolidator(
            Arc::clone(&hot),
            Arc::clone(&summaries),
            ConsolidatorConfig::default(),
        )
        .run_pass(now)
        .await
        .unwrap();

        assert_eq!(report.cold_written, 0);
        assert_eq!(report.groups_deferred, 1);
        assert_eq!(report.warm_purged, 1);
        assert!(summaries.dump(Tier::Warm).await.is_empty());
        assert!(summaries.dump(Tier::Cold).await.is_empty());
    }

    #[tokio::test]
    async fn records_outside_the_window_are_left_alone() {
        let hot = Arc::new(InMemoryHotStore::new());
        let summaries = Arc::new(InMemorySummaryStore::new());
        let now = Utc::now();
        let entity = EntityId::derive("C:", 8);

        // Fresh record: expiry four days out, far past the next window.
        hot.insert(&hot_record(
            entity,
            now,
            0.9,
            4,
            "C:\\Users\\A\\Documents\\fresh.docx",
        ))
        .await
        .unwrap();

        let report = consolidator(
            Arc::clone(&hot),
            Arc::clone(&summaries),
            ConsolidatorConfig::default(),
        )
        .run_pass(now)
        .await
        .unwrap();

        assert_eq!(report.hot_scanned, 0);
        assert_eq!(report.warm_written, 0);
        assert_eq!(hot.dump().await.len(), 1);
    }
}
