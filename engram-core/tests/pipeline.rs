//! End-to-end pipeline tests over the in-memory stores: journal records in,
//! scored hot tier records out, consolidation behind them.

use std::sync::Arc;

use chrono::{Duration, Utc};

use engram_core::backup::BackupWriter;
use engram_core::collect::{ActivityCollector, CollectorConfig, StartPosition};
use engram_core::database::memory::{InMemoryHotStore, InMemoryRegistry, InMemorySummaryStore};
use engram_core::database::ports::{HotTierStore, SummaryTierStore};
use engram_core::journal::JournalReader;
use engram_core::journal::replay::ReplayJournalSource;
use engram_core::score::ImportanceScorer;
use engram_core::tier::{ConsolidatorConfig, HotTierRecorder, TierConsolidator};
use engram_model::{ActivityType, EntityId, RawJournalRecord, ReasonFlags, Tier};

fn record(
    usn: i64,
    frn: u64,
    reasons: ReasonFlags,
    name: &str,
    seconds_ago: i64,
    size: Option<u64>,
) -> RawJournalRecord {
    RawJournalRecord {
        usn,
        file_reference_number: frn,
        parent_reference_number: 0,
        reasons,
        name: name.into(),
        timestamp: Utc::now() - Duration::seconds(seconds_ago),
        is_directory: false,
        file_size: size,
    }
}

fn collector_over(records: Vec<RawJournalRecord>) -> ActivityCollector {
    let source = ReplayJournalSource::from_records("C:", records);
    let reader = JournalReader::new(Arc::new(source));
    let config = CollectorConfig {
        start_position: StartPosition::First,
        ..CollectorConfig::default()
    };
    ActivityCollector::new(vec![reader], config).unwrap()
}

#[tokio::test]
async fn document_lifecycle_flows_into_the_hot_tier() {
    let path = "C:\\Users\\Alice\\Documents\\report.docx";
    let size = Some(12_288);
    let mut collector = collector_over(vec![
        record(1, 77, ReasonFlags::FILE_CREATE, path, 20, size),
        record(
            2,
            77,
            ReasonFlags::DATA_EXTEND | ReasonFlags::DATA_OVERWRITE,
            path,
            10,
            size,
        ),
        record(3, 77, ReasonFlags::CLOSE, path, 0, size),
    ]);

    let batch = collector
        .collect(Utc::now() + Duration::seconds(30))
        .await
        .unwrap();
    assert_eq!(batch.activities.len(), 3);

    let store = Arc::new(InMemoryHotStore::new());
    let registry = InMemoryRegistry::new();
    let recorder = HotTierRecorder::register(
        &registry,
        Arc::clone(&store) as Arc<dyn HotTierStore>,
        ImportanceScorer::new(),
        4,
    )
    .await
    .unwrap();

    let ids = recorder.store_activities(batch.activities).await.unwrap();
    assert_eq!(ids.len(), 3);

    let records = store.dump().await;
    let entity = EntityId::derive("C:", 77);
    assert!(records.iter().all(|r| r.activity.entity_id == entity));

    // Every record expires exactly hot-TTL after its own timestamp.
    for stored in &records {
        let expiry = stored.expires_at.expect("hot records expire");
        assert_eq!(expiry - stored.activity.timestamp, Duration::days(4));
    }

    let score_of = |kind: ActivityType| {
        records
            .iter()
            .find(|r| r.activity.activity_type == kind)
            .map(|r| r.activity.importance_score)
            .unwrap()
    };
    assert!(score_of(ActivityType::Create) >= 0.75);
    assert!(score_of(ActivityType::Modify) >= 0.80);
    assert!(score_of(ActivityType::Close) >= 0.30);
}

#[tokio::test]
async fn rename_and_lifecycle_share_one_entity_through_consolidation() {
    let old = "C:\\Users\\Alice\\Projects\\draft.md";
    let new = "C:\\Users\\Alice\\Projects\\final.md";
    let week = 7 * 24 * 3600;

    let mut collector = collector_over(vec![
        record(1, 88, ReasonFlags::FILE_CREATE, old, week, Some(2_048)),
        record(2, 88, ReasonFlags::RENAME_OLD_NAME, old, week - 3600, None),
        record(
            3,
            88,
            ReasonFlags::RENAME_NEW_NAME,
            new,
            week - 3600,
            Some(2_048),
        ),
        record(4, 88, ReasonFlags::DATA_EXTEND, new, week - 7200, Some(4_096)),
    ]);

    let batch = collector
        .collect(Utc::now() + Duration::seconds(30))
        .await
        .unwrap();
    // create + folded rename + modify
    assert_eq!(batch.activities.len(), 3);
    let entity = EntityId::derive("C:", 88);
    assert!(batch.activities.iter().all(|a| a.entity_id == entity));

    let resolved = collector.resolver().entity(&entity).unwrap();
    assert_eq!(resolved.path, new);
    assert_eq!(resolved.prior_paths[0].path, old);

    let hot = Arc::new(InMemoryHotStore::new());
    let summaries = Arc::new(InMemorySummaryStore::new());
    let recorder = HotTierRecorder::new(
        Arc::clone(&hot) as Arc<dyn HotTierStore>,
        "activity_hot_test".into(),
        ImportanceScorer::new(),
        4,
    );
    recorder.store_activities(batch.activities).await.unwrap();

    // A week of age against a four day TTL: the whole entity is due.
    let consolidator = TierConsolidator::new(
        Arc::clone(&hot) as Arc<dyn HotTierStore>,
        Arc::clone(&summaries) as Arc<dyn SummaryTierStore>,
        ImportanceScorer::new(),
        ConsolidatorConfig::default(),
    );
    let report = consolidator.run_pass(Utc::now()).await.unwrap();
    assert_eq!(report.warm_written, 1);

    let warm = summaries.dump(Tier::Warm).await;
    assert_eq!(warm.len(), 1);
    assert_eq!(warm[0].activity.entity_id, entity);
    assert_eq!(warm[0].back_references.len(), 3);
    let summary = warm[0].summary.as_ref().unwrap();
    assert!(summary.paths.contains(&old.to_string()));
    assert!(summary.paths.contains(&new.to_string()));

    // Source records are gone from the hot tier.
    assert!(hot.dump().await.is_empty());
}

#[tokio::test]
async fn backup_files_replay_into_the_hot_tier() {
    let dir = tempfile::tempdir().unwrap();
    let mut collector = collector_over(vec![
        record(
            1,
            7,
            ReasonFlags::FILE_CREATE,
            "C:\\Users\\Alice\\Documents\\notes.md",
            5,
            Some(1_024),
        ),
        record(
            2,
            7,
            ReasonFlags::DATA_OVERWRITE,
            "C:\\Users\\Alice\\Documents\\notes.md",
            0,
            Some(2_048),
        ),
    ]);

    // Database down: the batch only reaches the backup file.
    let batch = collector
        .collect(Utc::now() + Duration::seconds(30))
        .await
        .unwrap();
    let mut writer = BackupWriter::new(dir.path(), 100).unwrap();
    let backup_path = writer.write_batch(&batch.activities).unwrap();
    writer.close().unwrap();

    // Later, the capture is ingested through the same hot tier path.
    let store = Arc::new(InMemoryHotStore::new());
    let recorder = HotTierRecorder::new(
        Arc::clone(&store) as Arc<dyn HotTierStore>,
        "activity_hot_test".into(),
        ImportanceScorer::new(),
        4,
    );
    let ids = recorder.process_jsonl_file(&backup_path).await.unwrap();
    assert_eq!(ids.len(), 2);

    // The ingest scored what the collector left unscored.
    let recent = recorder.get_recent(24, 10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert!(recent.iter().all(|a| a.importance_score >= 0.1));
    assert!(
        recent
            .iter()
            .all(|a| a.entity_id == EntityId::derive("C:", 7))
    );

    // Replaying the same file again changes nothing.
    recorder.process_jsonl_file(&backup_path).await.unwrap();
    assert_eq!(store.count(Utc::now()).await.unwrap(), 2);
}
