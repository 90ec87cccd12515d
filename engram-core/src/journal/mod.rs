//! Journal readers: lazy, restartable streams of raw change records.
//!
//! Each supported backend implements [`JournalSource`] for one volume. The
//! [`JournalReader`] wrapper adds error counters and cursor recovery on top,
//! so the collector never talks to a backend directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;

use engram_model::{JournalBatch, JournalCursor, JournalMetadata};

use crate::error::{EngramError, Result};

#[cfg(not(target_os = "windows"))]
pub mod emulated;
pub mod replay;
#[cfg(target_os = "windows")]
pub mod usn;

/// Upper bound on records pulled per `read_batch` call.
pub const DEFAULT_BATCH_SIZE: usize = 4_096;

/// One volume's change journal, abstracted over backends.
///
/// Contract: records within one batch come back in ascending journal order,
/// a returned `next_usn` is never less than the one passed in, and a read
/// that cannot be satisfied returns an error rather than blocking past the
/// cycle budget.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JournalSource: Send + Sync {
    /// Volume identifier this source was opened for.
    fn volume(&self) -> &str;

    /// Query journal metadata: identity plus the valid USN range.
    async fn metadata(&self) -> Result<JournalMetadata>;

    /// Read the next batch of records at or after `next_usn`.
    async fn read_batch(&self, next_usn: i64, max_records: usize) -> Result<JournalBatch>;

    /// Release the underlying handle. Idempotent.
    async fn close(&self) {}
}

/// Recovered-error counters a reader exposes through statistics.
#[derive(Debug, Default)]
pub struct ReaderCounters {
    access_errors: AtomicU64,
    errors: AtomicU64,
    not_found: AtomicU64,
}

/// Point-in-time snapshot of [`ReaderCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReaderCounterSnapshot {
    pub access_error_count: u64,
    pub error_count: u64,
    pub not_found_count: u64,
}

impl ReaderCounters {
    pub fn snapshot(&self) -> ReaderCounterSnapshot {
        ReaderCounterSnapshot {
            access_error_count: self.access_errors.load(Ordering::Relaxed),
            error_count: self.errors.load(Ordering::Relaxed),
            not_found_count: self.not_found.load(Ordering::Relaxed),
        }
    }

    fn record(&self, err: &EngramError) {
        match err {
            EngramError::AccessDenied(_) => {
                self.access_errors.fetch_add(1, Ordering::Relaxed);
            }
            EngramError::NotFound(_) | EngramError::JournalUnavailable { .. } => {
                self.not_found.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// A [`JournalSource`] plus the recovery policy the collector relies on.
pub struct JournalReader {
    source: Arc<dyn JournalSource>,
    counters: ReaderCounters,
    /// Resume from `first_usn` when the stored cursor no longer matches the
    /// live journal; disabled readers surface the error instead.
    resume_from_first: bool,
}

impl std::fmt::Debug for JournalReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalReader")
            .field("volume", &self.source.volume())
            .field("resume_from_first", &self.resume_from_first)
            .field("counters", &self.counters.snapshot())
            .finish()
    }
}

impl JournalReader {
    pub fn new(source: Arc<dyn JournalSource>) -> Self {
        JournalReader {
            source,
            counters: ReaderCounters::default(),
            resume_from_first: true,
        }
    }

    pub fn with_resume_from_first(mut self, enabled: bool) -> Self {
        self.resume_from_first = enabled;
        self
    }

    pub fn volume(&self) -> &str {
        self.source.volume()
    }

    pub fn counters(&self) -> ReaderCounterSnapshot {
        self.counters.snapshot()
    }

    /// Fresh cursor at the journal's current head.
    pub async fn head_cursor(&self) -> Result<JournalCursor> {
        let meta = self.source.metadata().await.inspect_err(|err| {
            self.counters.record(err);
        })?;
        Ok(JournalCursor::new(
            self.source.volume(),
            meta.journal_id,
            meta.next_usn,
        ))
    }

    /// Cursor at the oldest record the journal still retains.
    pub async fn first_cursor(&self) -> Result<JournalCursor> {
        let meta = self.source.metadata().await.inspect_err(|err| {
            self.counters.record(err);
        })?;
        Ok(JournalCursor::new(
            self.source.volume(),
            meta.journal_id,
            meta.first_usn,
        ))
    }

    /// Read one batch and advance the cursor.
    ///
    /// An invalid cursor (journal reset or wrapped range) re-queries
    /// metadata and, when enabled, resumes from `first_usn`; the cycle that
    /// hit the stale cursor still reports an empty batch. Transient read
    /// errors surface an empty batch plus a counter bump so the reader
    /// never stalls a cycle.
    pub async fn read(&self, cursor: &mut JournalCursor, max_records: usize) -> Result<JournalBatch> {
        match self.source.read_batch(cursor.next_usn, max_records).await {
            Ok(batch) => {
                debug_assert!(batch.next_usn >= cursor.next_usn);
                cursor.advance(batch.next_usn.max(cursor.next_usn));
                Ok(batch)
            }
            Err(err @ EngramError::InvalidCursor { .. }) => {
                self.counters.record(&err);
                let meta = self.source.metadata().await.inspect_err(|err| {
                    self.counters.record(err);
                })?;
                let resume_at = if self.resume_from_first {
                    meta.first_usn
                } else {
                    meta.next_usn
                };
                tracing::warn!(
                    target: "journal",
                    volume = self.source.volume(),
                    stale_usn = cursor.next_usn,
                    resume_at,
                    "cursor invalid, re-queried journal metadata"
                );
                *cursor = JournalCursor::new(self.source.volume(), meta.journal_id, resume_at);
                Ok(JournalBatch::default())
            }
            Err(err) if err.is_recoverable() => {
                self.counters.record(&err);
                tracing::warn!(
                    target: "journal",
                    volume = self.source.volume(),
                    error = %err,
                    "transient journal read failure, returning empty batch"
                );
                Ok(JournalBatch {
                    records: Vec::new(),
                    next_usn: cursor.next_usn,
                })
            }
            Err(err) => {
                self.counters.record(&err);
                Err(err)
            }
        }
    }

    pub async fn close(&self) {
        self.source.close().await;
    }
}

/// Open the native journal backend for a volume.
///
/// On Windows this is the USN journal; elsewhere the emulated backend
/// watches the directory named by `volume` and synthesizes journal records.
pub async fn open_source(volume: &str) -> Result<Arc<dyn JournalSource>> {
    #[cfg(target_os = "windows")]
    {
        Ok(Arc::new(usn::UsnJournalSource::open(volume)?))
    }
    #[cfg(not(target_os = "windows"))]
    {
        Ok(Arc::new(emulated::EmulatedJournalSource::open(volume)?))
    }
}
