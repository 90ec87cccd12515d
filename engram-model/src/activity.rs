use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::ids::{ActivityId, EntityId};
use crate::tier::Tier;

/// Well-known keys inside [`Activity::attributes`].
pub mod attr {
    /// Decoded change-reason names, as a JSON array of strings.
    pub const REASONS: &str = "reasons";
    /// Journal sequence number of the source record.
    pub const USN: &str = "usn";
    /// Previous name of a renamed file.
    pub const OLD_NAME: &str = "old_name";
    /// New name of a renamed file.
    pub const NEW_NAME: &str = "new_name";
    /// Which half of a rename this record represents (`old_name`/`new_name`).
    pub const RENAME_TYPE: &str = "rename_type";
    /// Simplified reason class used by the metadata sub-score.
    pub const REASON_CLASS: &str = "reason_class";
    /// External importance boost folded into the combined score.
    pub const IMPORTANCE_BOOST: &str = "importance_boost";
}

/// Source-specific flags attached to an activity.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Kind of change one activity describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Create,
    Delete,
    Rename,
    Modify,
    SecurityChange,
    Read,
    Close,
    InfoChange,
    Unknown,
}

impl ActivityType {
    pub const ALL: [ActivityType; 9] = [
        ActivityType::Create,
        ActivityType::Delete,
        ActivityType::Rename,
        ActivityType::Modify,
        ActivityType::SecurityChange,
        ActivityType::Read,
        ActivityType::Close,
        ActivityType::InfoChange,
        ActivityType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Create => "create",
            ActivityType::Delete => "delete",
            ActivityType::Rename => "rename",
            ActivityType::Modify => "modify",
            ActivityType::SecurityChange => "security_change",
            ActivityType::Read => "read",
            ActivityType::Close => "close",
            ActivityType::InfoChange => "info_change",
            ActivityType::Unknown => "unknown",
        }
    }
}

impl FromStr for ActivityType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActivityType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ModelError::InvalidActivity(format!("unknown activity type: {s}")))
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized change event for one file at one instant.
///
/// Timestamps are always timezone-aware: the field type makes a naive value
/// unrepresentable, and deserialization of an offset-free string fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub activity_id: ActivityId,
    pub entity_id: EntityId,
    pub timestamp: DateTime<Utc>,
    pub activity_type: ActivityType,
    pub file_path: String,
    pub file_name: String,
    pub is_directory: bool,
    pub file_size: Option<u64>,
    pub volume: String,
    #[serde(default)]
    pub attributes: Attributes,
    pub importance_score: f64,
    pub tier: Tier,
    pub access_count: u64,
    pub search_hits: u64,
}

impl Activity {
    /// Validate the score range after external mutation (e.g. JSONL ingest).
    pub fn validate(&self) -> Result<(), ModelError> {
        if !(0.0..=1.0).contains(&self.importance_score) {
            return Err(ModelError::InvalidScore(self.importance_score));
        }
        Ok(())
    }

    /// Age of the activity relative to `now`, in fractional days.
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        (now - self.timestamp).num_milliseconds() as f64 / 86_400_000.0
    }

    /// Lowercased extension of `file_path`, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_path.rsplit(['\\', '/']).next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    /// Whether the attributes mark this as the new-name half of a rename.
    pub fn is_rename_new_name(&self) -> bool {
        self.attributes
            .get(attr::RENAME_TYPE)
            .and_then(|v| v.as_str())
            == Some("new_name")
    }

    /// String attribute lookup helper.
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Activity {
        Activity {
            activity_id: ActivityId::new(),
            entity_id: EntityId::derive("C:", 77),
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 45).unwrap(),
            activity_type: ActivityType::Create,
            file_path: "C:\\Users\\Alice\\Documents\\report.docx".into(),
            file_name: "report.docx".into(),
            is_directory: false,
            file_size: Some(12_288),
            volume: "C:".into(),
            attributes: Attributes::new(),
            importance_score: 0.82,
            tier: Tier::Hot,
            access_count: 0,
            search_hits: 0,
        }
    }

    #[test]
    fn serde_round_trip_is_lossless() {
        let activity = sample();
        let line = serde_json::to_string(&activity).unwrap();
        let back: Activity = serde_json::from_str(&line).unwrap();
        assert_eq!(activity, back);
    }

    #[test]
    fn timestamps_serialize_with_trailing_z() {
        let line = serde_json::to_string(&sample()).unwrap();
        assert!(line.contains("\"2025-06-01T12:30:45Z\""), "{line}");
    }

    #[test]
    fn naive_timestamp_is_rejected() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value["timestamp"] = serde_json::json!("2025-06-01T12:30:45");
        assert!(serde_json::from_value::<Activity>(value).is_err());
    }

    #[test]
    fn extension_is_lowercased() {
        let mut activity = sample();
        activity.file_path = "C:\\Users\\Alice\\NOTES.TXT".into();
        assert_eq!(activity.extension().as_deref(), Some("txt"));
        activity.file_path = "C:\\Users\\Alice\\Makefile".into();
        assert_eq!(activity.extension(), None);
    }

    #[test]
    fn activity_type_strings_round_trip() {
        for kind in ActivityType::ALL {
            assert_eq!(kind.as_str().parse::<ActivityType>().unwrap(), kind);
        }
    }
}
