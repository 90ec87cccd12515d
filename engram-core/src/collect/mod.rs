//! Activity collection: raw journal records to normalized activities.
//!
//! One collector owns every configured reader plus the per-volume cursors,
//! the rename-pairing state, and the entity resolver. Batches hand
//! ownership of their activities to the recorder; nothing flows back.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use engram_model::activity::{Attributes, attr};
use engram_model::{
    Activity, ActivityType, EntityId, JournalCursor, RawJournalRecord, ReasonFlags, Tier,
};

use crate::entity::EntityResolver;
use crate::error::Result;
use crate::journal::{DEFAULT_BATCH_SIZE, JournalReader, ReaderCounterSnapshot};

pub mod state;

/// Where a fresh cursor starts when no stored position exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// Only events after the collector started. The normal mode for a
    /// long-running daemon.
    #[default]
    Head,
    /// Everything the journal still holds. Used by replays and tests.
    First,
}

/// Collector tuning knobs.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Upper bound on records pulled from one reader per cycle.
    pub max_records_per_cycle: usize,
    /// How long an unmatched rename-old-name waits for its new-name half
    /// before it degrades to a delete.
    pub rename_pairing_window: Duration,
    /// Persist cursors to `state_file` after every cycle.
    pub use_state_file: bool,
    pub state_file: Option<PathBuf>,
    pub start_position: StartPosition,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_records_per_cycle: DEFAULT_BATCH_SIZE * 4,
            rename_pairing_window: Duration::seconds(60),
            use_state_file: false,
            state_file: None,
            start_position: StartPosition::Head,
        }
    }
}

/// One cycle's output. Activities arrive in journal order per volume.
#[derive(Debug, Default)]
pub struct CollectedBatch {
    pub activities: Vec<Activity>,
    pub records_seen: usize,
}

impl CollectedBatch {
    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}

/// Running totals the collector surfaces through statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorCounters {
    pub cycles: u64,
    pub records_seen: u64,
    pub activities_emitted: u64,
    pub renames_paired: u64,
    pub renames_orphaned: u64,
    pub renames_expired: u64,
    pub state_resets: u64,
}

#[derive(Debug, Clone)]
struct PendingRename {
    volume: String,
    old_path: String,
    usn: i64,
    seen_at: DateTime<Utc>,
}

pub struct ActivityCollector {
    readers: Vec<JournalReader>,
    cursors: BTreeMap<String, JournalCursor>,
    pending_renames: HashMap<(String, u64), PendingRename>,
    resolver: EntityResolver,
    config: CollectorConfig,
    counters: CollectorCounters,
}

impl std::fmt::Debug for ActivityCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityCollector")
            .field("readers", &self.readers.len())
            .field("cursors", &self.cursors.len())
            .field("pending_renames", &self.pending_renames.len())
            .field("entities", &self.resolver.len())
            .field("counters", &self.counters)
            .finish()
    }
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.rsplit(['\\', '/']).next().unwrap_or(path).to_string())
}

/// Fixed mapping from change-reason bits to an activity type. `CLOSE` maps
/// to `close` only when nothing else is set on the record.
pub fn classify_reasons(reasons: ReasonFlags) -> ActivityType {
    if reasons.contains(ReasonFlags::FILE_CREATE) {
        ActivityType::Create
    } else if reasons.contains(ReasonFlags::FILE_DELETE) {
        ActivityType::Delete
    } else if reasons.intersects(
        ReasonFlags::DATA_OVERWRITE | ReasonFlags::DATA_EXTEND | ReasonFlags::DATA_TRUNCATION,
    ) {
        ActivityType::Modify
    } else if reasons.contains(ReasonFlags::SECURITY_CHANGE) {
        ActivityType::SecurityChange
    } else if reasons.contains(ReasonFlags::BASIC_INFO_CHANGE) {
        ActivityType::InfoChange
    } else if reasons.contains(ReasonFlags::CLOSE) {
        ActivityType::Close
    } else {
        ActivityType::Unknown
    }
}

fn base_attributes(record: &RawJournalRecord) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert(attr::REASONS.into(), json!(record.reasons.names()));
    attributes.insert(attr::USN.into(), json!(record.usn));
    if record.reasons.contains(ReasonFlags::SECURITY_CHANGE) {
        attributes.insert(attr::REASON_CLASS.into(), json!("security_change"));
    }
    attributes
}

impl ActivityCollector {
    /// Build a collector over the given readers. Stored cursors are loaded
    /// when state-file persistence is on.
    pub fn new(readers: Vec<JournalReader>, config: CollectorConfig) -> Result<Self> {
        let mut cursors = BTreeMap::new();
        if config.use_state_file
            && let Some(path) = config.state_file.as_deref()
        {
            cursors = state::load_cursors(path)?;
            if !cursors.is_empty() {
                tracing::info!(
                    target: "collector",
                    volumes = cursors.len(),
                    path = %path.display(),
                    "resumed journal cursors from state file"
                );
            }
        }
        Ok(ActivityCollector {
            readers,
            cursors,
            pending_renames: HashMap::new(),
            resolver: EntityResolver::new(),
            config,
            counters: CollectorCounters::default(),
        })
    }

    pub fn counters(&self) -> CollectorCounters {
        self.counters
    }

    pub fn reader_counters(&self) -> Vec<(String, ReaderCounterSnapshot)> {
        self.readers
            .iter()
            .map(|reader| (reader.volume().to_string(), reader.counters()))
            .collect()
    }

    pub fn resolver(&self) -> &EntityResolver {
        &self.resolver
    }

    /// Run one collection pass across every reader, bounded by `deadline`.
    pub async fn collect(&mut self, deadline: DateTime<Utc>) -> Result<CollectedBatch> {
        self.counters.cycles += 1;
        let mut batch = CollectedBatch::default();

        for idx in 0..self.readers.len() {
            let volume = self.readers[idx].volume().to_string();
            if !self.cursors.contains_key(&volume) {
                let cursor = match self.config.start_position {
                    StartPosition::Head => self.readers[idx].head_cursor().await?,
                    StartPosition::First => self.readers[idx].first_cursor().await?,
                };
                self.cursors.insert(volume.clone(), cursor);
            }

            let mut pulled = 0usize;
            loop {
                if Utc::now() >= deadline || pulled >= self.config.max_records_per_cycle {
                    break;
                }
                let remaining = self.config.max_records_per_cycle - pulled;
                let journal_batch = {
                    let reader = &self.readers[idx];
                    let cursor = self
                        .cursors
                        .get_mut(&volume)
                        .expect("cursor inserted above");
                    reader.read(cursor, remaining.min(DEFAULT_BATCH_SIZE)).await?
                };
                if journal_batch.is_empty() {
                    break;
                }
                pulled += journal_batch.records.len();
                batch.records_seen += journal_batch.records.len();
                for record in journal_batch.records {
                    if let Some(activity) = self.convert(&volume, record) {
                        batch.activities.push(activity);
                    }
                }
            }
        }

        self.expire_pending_renames(Utc::now(), &mut batch);

        self.counters.records_seen += batch.records_seen as u64;
        self.counters.activities_emitted += batch.activities.len() as u64;

        if self.config.use_state_file
            && let Some(path) = self.config.state_file.clone()
        {
            state::save_cursors(&path, self.cursors.values())?;
        }

        Ok(batch)
    }

    /// Discard in-memory cursors and pairing state. The next cycle
    /// re-queries journal metadata from scratch.
    pub fn reset_state(&mut self) {
        tracing::warn!(target: "collector", "resetting collector state");
        self.counters.state_resets += 1;
        self.cursors.clear();
        self.pending_renames.clear();
        self.resolver.reset();
        if self.config.use_state_file
            && let Some(path) = self.config.state_file.as_deref()
            && let Err(err) = state::clear(path)
        {
            tracing::warn!(target: "collector", error = %err, "failed to clear state file");
        }
    }

    fn convert(&mut self, volume: &str, record: RawJournalRecord) -> Option<Activity> {
        let reasons = record.reasons;

        if reasons.contains(ReasonFlags::RENAME_OLD_NAME) {
            self.resolver
                .observe_old_name(volume, record.file_reference_number, &record.name, record.timestamp);
            self.pending_renames.insert(
                (volume.to_string(), record.file_reference_number),
                PendingRename {
                    volume: volume.to_string(),
                    old_path: record.name,
                    usn: record.usn,
                    seen_at: record.timestamp,
                },
            );
            // The rename activity is emitted once the new-name half shows up.
            return None;
        }

        if reasons.contains(ReasonFlags::RENAME_NEW_NAME) {
            return Some(self.convert_rename(volume, record));
        }

        let entity_id = self.resolver.resolve(
            volume,
            record.file_reference_number,
            &record.name,
            record.timestamp,
        );
        Some(self.build_activity(
            volume,
            entity_id,
            classify_reasons(reasons),
            &record,
            base_attributes(&record),
        ))
    }

    fn convert_rename(&mut self, volume: &str, record: RawJournalRecord) -> Activity {
        let key = (volume.to_string(), record.file_reference_number);
        let mut attributes = base_attributes(&record);
        attributes.insert(attr::RENAME_TYPE.into(), json!("new_name"));
        attributes.insert(attr::NEW_NAME.into(), json!(basename(&record.name)));

        let entity_id = match self.pending_renames.remove(&key) {
            Some(pending) => {
                self.counters.renames_paired += 1;
                attributes.insert(attr::OLD_NAME.into(), json!(basename(&pending.old_path)));
                self.resolver.apply_rename(
                    volume,
                    record.file_reference_number,
                    &pending.old_path,
                    &record.name,
                    record.timestamp,
                )
            }
            None => {
                // The old-name half was lost; link by basename if a recent
                // sighting matches.
                self.counters.renames_orphaned += 1;
                self.resolver.orphan_new_name(
                    volume,
                    record.file_reference_number,
                    &record.name,
                    record.timestamp,
                )
            }
        };

        self.build_activity(volume, entity_id, ActivityType::Rename, &record, attributes)
    }

    fn build_activity(
        &self,
        volume: &str,
        entity_id: EntityId,
        kind: ActivityType,
        record: &RawJournalRecord,
        attributes: Attributes,
    ) -> Activity {
        Activity {
            activity_id: engram_model::ActivityId::new(),
            entity_id,
            timestamp: record.timestamp,
            activity_type: kind,
            file_path: record.name.clone(),
            file_name: basename(&record.name),
            is_directory: record.is_directory,
            file_size: record.file_size,
            volume: volume.to_string(),
            attributes,
            importance_score: 0.0,
            tier: Tier::Hot,
            access_count: 0,
            search_hits: 0,
        }
    }

    /// Old-name halves that never met their new-name degrade to deletes:
    /// the old path disappeared and nothing replaced it.
    fn expire_pending_renames(&mut self, now: DateTime<Utc>, batch: &mut CollectedBatch) {
        let window = self.config.rename_pairing_window;
        let expired: Vec<(String, u64)> = self
            .pending_renames
            .iter()
            .filter(|(_, pending)| now - pending.seen_at >= window)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            if let Some(pending) = self.pending_renames.remove(&key) {
                self.counters.renames_expired += 1;
                let entity_id =
                    self.resolver
                        .resolve(&pending.volume, key.1, &pending.old_path, pending.seen_at);
                let record = RawJournalRecord {
                    usn: pending.usn,
                    file_reference_number: key.1,
                    parent_reference_number: 0,
                    reasons: ReasonFlags::RENAME_OLD_NAME,
                    name: pending.old_path.clone(),
                    timestamp: pending.seen_at,
                    is_directory: false,
                    file_size: None,
                };
                let mut attributes = base_attributes(&record);
                attributes.insert(attr::RENAME_TYPE.into(), json!("old_name"));
                batch.activities.push(self.build_activity(
                    &pending.volume,
                    entity_id,
                    ActivityType::Delete,
                    &record,
                    attributes,
                ));
            }
        }
    }
}
