use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::Activity;
use crate::ids::ActivityId;

/// Storage tier an activity currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Warm => "warm",
            Tier::Cold => "cold",
        }
    }

    /// The tier records are promoted into, if any.
    pub fn next(&self) -> Option<Tier> {
        match self {
            Tier::Hot => Some(Tier::Warm),
            Tier::Warm => Some(Tier::Cold),
            Tier::Cold => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retention stage used by scoring and consolidation thresholds.
///
/// Stages outnumber storage tiers: hot→warm promotion is gated by the
/// sensory→short-term transition, warm→cold by short-term→long-term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStage {
    Sensory,
    ShortTerm,
    LongTerm,
    Archival,
}

impl MemoryStage {
    /// Base retention in days before importance scaling.
    pub fn base_retention_days(&self) -> u32 {
        match self {
            MemoryStage::Sensory => 7,
            MemoryStage::ShortTerm => 90,
            MemoryStage::LongTerm => 365,
            MemoryStage::Archival => 3650,
        }
    }
}

/// Aggregate payload carried by warm and cold summary records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarmSummary {
    /// Every distinct path observed across the summarized activities.
    pub paths: Vec<String>,
    /// Sum of the source records' access counts.
    pub access_count: u64,
    /// Number of source activities folded into this record.
    pub source_count: u32,
}

/// What the database actually stores: an activity plus tier bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRecord {
    pub activity: Activity,
    /// Monotonic per-record version, bumped on every rewrite.
    pub version: u32,
    pub inserted_at: DateTime<Utc>,
    /// Absent only for cold records, which never expire.
    pub expires_at: Option<DateTime<Utc>>,
    /// Source activity ids consolidated into this record. Empty for hot
    /// records; non-empty for warm/cold summaries.
    #[serde(default)]
    pub back_references: Vec<ActivityId>,
    #[serde(default)]
    pub summary: Option<WarmSummary>,
}

impl TierRecord {
    /// Wrap a freshly scored activity for hot-tier insertion.
    pub fn hot(activity: Activity, hot_ttl: chrono::Duration, now: DateTime<Utc>) -> Self {
        let expires_at = activity.timestamp + hot_ttl;
        TierRecord {
            activity,
            version: 1,
            inserted_at: now,
            expires_at: Some(expires_at),
            back_references: Vec::new(),
            summary: None,
        }
    }

    /// Whether the record is still visible to expiry-filtered reads.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => expiry > now,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{ActivityType, Attributes};
    use crate::ids::{ActivityId, EntityId};
    use chrono::TimeZone;

    #[test]
    fn hot_record_expiry_is_timestamp_plus_ttl() {
        let timestamp = Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap();
        let activity = Activity {
            activity_id: ActivityId::new(),
            entity_id: EntityId::derive("C:", 9),
            timestamp,
            activity_type: ActivityType::Modify,
            file_path: "C:\\x.txt".into(),
            file_name: "x.txt".into(),
            is_directory: false,
            file_size: None,
            volume: "C:".into(),
            attributes: Attributes::new(),
            importance_score: 0.5,
            tier: Tier::Hot,
            access_count: 0,
            search_hits: 0,
        };
        let record = TierRecord::hot(activity, chrono::Duration::days(4), Utc::now());
        assert_eq!(record.expires_at.unwrap() - timestamp, chrono::Duration::days(4));
    }

    #[test]
    fn tier_promotion_chain_terminates() {
        assert_eq!(Tier::Hot.next(), Some(Tier::Warm));
        assert_eq!(Tier::Warm.next(), Some(Tier::Cold));
        assert_eq!(Tier::Cold.next(), None);
    }
}
