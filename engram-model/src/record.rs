use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reason::ReasonFlags;

/// Journal metadata as reported by the backend for one volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalMetadata {
    pub journal_id: u64,
    pub first_usn: i64,
    pub next_usn: i64,
}

/// One raw change record as read from a journal backend, before
/// normalization into an [`crate::Activity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawJournalRecord {
    pub usn: i64,
    pub file_reference_number: u64,
    pub parent_reference_number: u64,
    pub reasons: ReasonFlags,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub is_directory: bool,
    pub file_size: Option<u64>,
}

/// Result of one `read_batch` call: records in ascending journal order plus
/// the cursor position to resume from.
#[derive(Debug, Clone, Default)]
pub struct JournalBatch {
    pub records: Vec<RawJournalRecord>,
    pub next_usn: i64,
}

impl JournalBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
