//! Replay backend: serves raw records from a JSONL fixture in USN order.
//!
//! Used by tests and offline reprocessing of captured journals. The file is
//! loaded once; `read_batch` then behaves like a real journal whose head
//! never moves.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use async_trait::async_trait;

use engram_model::{JournalBatch, JournalMetadata, RawJournalRecord};

use crate::error::{EngramError, Result};
use crate::journal::JournalSource;

pub struct ReplayJournalSource {
    volume: String,
    journal_id: u64,
    records: Vec<RawJournalRecord>,
}

impl std::fmt::Debug for ReplayJournalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayJournalSource")
            .field("volume", &self.volume)
            .field("journal_id", &self.journal_id)
            .field("record_count", &self.records.len())
            .finish()
    }
}

impl ReplayJournalSource {
    /// Load a capture for `volume` from a JSONL file, one raw record per
    /// line. Records are sorted by USN so replay order matches journal
    /// order even when the capture was concatenated out of order.
    pub fn from_file(volume: impl Into<String>, path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut records = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: RawJournalRecord = serde_json::from_str(&line).map_err(|err| {
                EngramError::Internal(format!(
                    "replay fixture {} line {}: {err}",
                    path.display(),
                    line_no + 1
                ))
            })?;
            records.push(record);
        }
        records.sort_by_key(|r| r.usn);
        Ok(Self::from_records(volume, records))
    }

    pub fn from_records(volume: impl Into<String>, records: Vec<RawJournalRecord>) -> Self {
        ReplayJournalSource {
            volume: volume.into(),
            journal_id: 1,
            records,
        }
    }
}

#[async_trait]
impl JournalSource for ReplayJournalSource {
    fn volume(&self) -> &str {
        &self.volume
    }

    async fn metadata(&self) -> Result<JournalMetadata> {
        let first_usn = self.records.first().map(|r| r.usn).unwrap_or(0);
        let next_usn = self.records.last().map(|r| r.usn + 1).unwrap_or(0);
        Ok(JournalMetadata {
            journal_id: self.journal_id,
            first_usn,
            next_usn,
        })
    }

    async fn read_batch(&self, next_usn: i64, max_records: usize) -> Result<JournalBatch> {
        let start = self.records.partition_point(|r| r.usn < next_usn);
        let slice = &self.records[start..(start + max_records).min(self.records.len())];
        let batch_next = slice.last().map(|r| r.usn + 1).unwrap_or(next_usn);
        Ok(JournalBatch {
            records: slice.to_vec(),
            next_usn: batch_next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engram_model::ReasonFlags;

    fn record(usn: i64, name: &str) -> RawJournalRecord {
        RawJournalRecord {
            usn,
            file_reference_number: usn as u64,
            parent_reference_number: 0,
            reasons: ReasonFlags::FILE_CREATE,
            name: name.into(),
            timestamp: Utc::now(),
            is_directory: false,
            file_size: None,
        }
    }

    #[tokio::test]
    async fn batches_resume_from_cursor() {
        let source = ReplayJournalSource::from_records(
            "C:",
            vec![record(1, "a"), record(2, "b"), record(3, "c")],
        );
        let first = source.read_batch(0, 2).await.unwrap();
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.next_usn, 3);

        let rest = source.read_batch(first.next_usn, 10).await.unwrap();
        assert_eq!(rest.records.len(), 1);
        assert_eq!(rest.records[0].name, "c");

        let done = source.read_batch(rest.next_usn, 10).await.unwrap();
        assert!(done.is_empty());
        assert_eq!(done.next_usn, 4);
    }

    #[tokio::test]
    async fn metadata_reflects_record_range() {
        let source = ReplayJournalSource::from_records("C:", vec![record(5, "x"), record(9, "y")]);
        let meta = source.metadata().await.unwrap();
        assert_eq!(meta.first_usn, 5);
        assert_eq!(meta.next_usn, 10);
    }
}
