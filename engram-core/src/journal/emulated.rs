//! Emulated journal backend for platforms without a native change journal.
//!
//! A `notify` watcher feeds an in-memory ring of synthesized records with
//! monotonically increasing pseudo-USNs. File identity is emulated with a
//! per-path reference-number map that survives renames, so the entity
//! resolver behaves the same as on a native journal. Event kinds with no
//! direct reason mapping surface as empty flags and classify as `unknown`
//! downstream.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};

use engram_model::{JournalBatch, JournalMetadata, RawJournalRecord, ReasonFlags};

use crate::error::{EngramError, Result};
use crate::journal::JournalSource;

/// Buffered records beyond this are dropped oldest-first and the loss is
/// surfaced as a transient read error on the next batch.
const BUFFER_CAP: usize = 65_536;

#[derive(Default)]
struct EmulatedState {
    buffer: VecDeque<RawJournalRecord>,
    next_usn: i64,
    first_usn: i64,
    frn_by_path: HashMap<PathBuf, u64>,
    next_frn: u64,
    overflowed: bool,
    last_error: Option<String>,
}

impl EmulatedState {
    fn frn_for(&mut self, path: &Path) -> u64 {
        if let Some(frn) = self.frn_by_path.get(path) {
            return *frn;
        }
        self.next_frn += 1;
        let frn = self.next_frn;
        self.frn_by_path.insert(path.to_path_buf(), frn);
        frn
    }

    fn move_frn(&mut self, old: &Path, new: &Path) -> u64 {
        match self.frn_by_path.remove(old) {
            Some(frn) => {
                self.frn_by_path.insert(new.to_path_buf(), frn);
                frn
            }
            None => self.frn_for(new),
        }
    }

    fn push(&mut self, mut record: RawJournalRecord) {
        record.usn = self.next_usn;
        self.next_usn += 1;
        if self.buffer.len() >= BUFFER_CAP {
            self.buffer.pop_front();
            self.overflowed = true;
        }
        self.buffer.push_back(record);
    }
}

pub struct EmulatedJournalSource {
    volume: String,
    root: PathBuf,
    journal_id: u64,
    state: Arc<Mutex<EmulatedState>>,
    // Dropping the watcher stops the notify stream.
    _watcher: Mutex<Option<RecommendedWatcher>>,
}

impl std::fmt::Debug for EmulatedJournalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let buffered = self.state.lock().map(|s| s.buffer.len()).unwrap_or(0);
        f.debug_struct("EmulatedJournalSource")
            .field("volume", &self.volume)
            .field("root", &self.root)
            .field("journal_id", &self.journal_id)
            .field("buffered", &buffered)
            .finish()
    }
}

impl EmulatedJournalSource {
    /// Watch the directory named by `volume` recursively.
    pub fn open(volume: &str) -> Result<Self> {
        let root = PathBuf::from(volume);
        if !root.is_dir() {
            return Err(EngramError::JournalUnavailable {
                volume: volume.to_string(),
                message: "not a watchable directory".into(),
            });
        }

        let state = Arc::new(Mutex::new(EmulatedState::default()));
        let callback_state = Arc::clone(&state);
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| {
                let Ok(mut state) = callback_state.lock() else {
                    return;
                };
                match res {
                    Ok(event) => ingest_event(&mut state, event),
                    Err(err) => state.last_error = Some(err.to_string()),
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|err| EngramError::JournalUnavailable {
            volume: volume.to_string(),
            message: format!("failed to create watcher: {err}"),
        })?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|err| EngramError::JournalUnavailable {
                volume: volume.to_string(),
                message: format!("failed to watch {}: {err}", root.display()),
            })?;

        // Journal identity changes every open, like a freshly created
        // native journal: cursors from a previous process are invalid.
        let journal_id = uuid::Uuid::new_v4().as_u64_pair().0;

        Ok(EmulatedJournalSource {
            volume: volume.to_string(),
            root,
            journal_id,
            state,
            _watcher: Mutex::new(Some(watcher)),
        })
    }
}

fn stat(path: &Path) -> (bool, Option<u64>) {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => (true, None),
        Ok(meta) => (false, Some(meta.len())),
        Err(_) => (false, None),
    }
}

fn synthesize(state: &mut EmulatedState, path: &Path, reasons: ReasonFlags) {
    let frn = state.frn_for(path);
    let (is_directory, file_size) = stat(path);
    let name = path.to_string_lossy().into_owned();
    state.push(RawJournalRecord {
        usn: 0,
        file_reference_number: frn,
        parent_reference_number: 0,
        reasons,
        name,
        timestamp: Utc::now(),
        is_directory,
        file_size,
    });
}

fn ingest_event(state: &mut EmulatedState, event: Event) {
    match event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                synthesize(state, path, ReasonFlags::FILE_CREATE);
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                synthesize(state, path, ReasonFlags::FILE_DELETE);
                state.frn_by_path.remove(path.as_path());
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // Two paths, one identity: emit the OLD/NEW pair under the same
            // reference number so downstream pairing works natively.
            if let [old, new] = event.paths.as_slice() {
                let frn = state.move_frn(old, new);
                let old_name = old.to_string_lossy().into_owned();
                state.push(RawJournalRecord {
                    usn: 0,
                    file_reference_number: frn,
                    parent_reference_number: 0,
                    reasons: ReasonFlags::RENAME_OLD_NAME,
                    name: old_name,
                    timestamp: Utc::now(),
                    is_directory: false,
                    file_size: None,
                });
                synthesize(state, new, ReasonFlags::RENAME_NEW_NAME);
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            for path in &event.paths {
                synthesize(state, path, ReasonFlags::RENAME_OLD_NAME);
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            for path in &event.paths {
                synthesize(state, path, ReasonFlags::RENAME_NEW_NAME);
            }
        }
        EventKind::Modify(ModifyKind::Data(_)) => {
            for path in &event.paths {
                synthesize(state, path, ReasonFlags::DATA_OVERWRITE);
            }
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => {
            for path in &event.paths {
                synthesize(state, path, ReasonFlags::BASIC_INFO_CHANGE);
            }
        }
        // No faithful reason mapping; mark unknown rather than invent one.
        _ => {
            for path in &event.paths {
                synthesize(state, path, ReasonFlags::empty());
            }
        }
    }
}

#[async_trait]
impl JournalSource for EmulatedJournalSource {
    fn volume(&self) -> &str {
        &self.volume
    }

    async fn metadata(&self) -> Result<JournalMetadata> {
        let state = self
            .state
            .lock()
            .map_err(|_| EngramError::Internal("emulated journal state poisoned".into()))?;
        Ok(JournalMetadata {
            journal_id: self.journal_id,
            first_usn: state.first_usn,
            next_usn: state.next_usn,
        })
    }

    async fn read_batch(&self, next_usn: i64, max_records: usize) -> Result<JournalBatch> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| EngramError::Internal("emulated journal state poisoned".into()))?;

        if let Some(message) = state.last_error.take() {
            return Err(EngramError::JournalRead {
                volume: self.volume.clone(),
                message,
            });
        }
        if std::mem::take(&mut state.overflowed) {
            return Err(EngramError::JournalRead {
                volume: self.volume.clone(),
                message: "event buffer overflowed, records dropped".into(),
            });
        }

        // Anything below the cursor was consumed by an earlier batch.
        while state.buffer.front().is_some_and(|r| r.usn < next_usn) {
            state.buffer.pop_front();
        }
        let take = state.buffer.len().min(max_records);
        let records: Vec<RawJournalRecord> = state.buffer.drain(..take).collect();
        let batch_next = records.last().map(|r| r.usn + 1).unwrap_or(next_usn);
        state.first_usn = batch_next;
        Ok(JournalBatch {
            records,
            next_usn: batch_next.max(next_usn),
        })
    }

    async fn close(&self) {
        if let Ok(mut guard) = self._watcher.lock() {
            guard.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_pair_shares_a_reference_number() {
        let mut state = EmulatedState::default();
        let old = PathBuf::from("/tmp/watch/a.txt");
        let new = PathBuf::from("/tmp/watch/b.txt");
        let frn = state.frn_for(&old);

        ingest_event(
            &mut state,
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
                .add_path(old.clone())
                .add_path(new.clone()),
        );

        let records: Vec<_> = state.buffer.iter().collect();
        assert_eq!(records.len(), 2);
        assert!(records[0].reasons.contains(ReasonFlags::RENAME_OLD_NAME));
        assert!(records[1].reasons.contains(ReasonFlags::RENAME_NEW_NAME));
        assert_eq!(records[0].file_reference_number, frn);
        assert_eq!(records[1].file_reference_number, frn);
        assert_eq!(state.frn_by_path.get(&new), Some(&frn));
        assert!(!state.frn_by_path.contains_key(&old));
    }

    #[test]
    fn unmapped_event_kind_synthesizes_empty_reasons() {
        let mut state = EmulatedState::default();
        ingest_event(
            &mut state,
            Event::new(EventKind::Other).add_path(PathBuf::from("/tmp/watch/x")),
        );
        assert_eq!(state.buffer.len(), 1);
        assert!(state.buffer[0].reasons.is_empty());
    }

    #[test]
    fn usns_are_monotonic_and_buffer_caps() {
        let mut state = EmulatedState::default();
        for i in 0..10 {
            synthesize(
                &mut state,
                Path::new(&format!("/tmp/watch/{i}")),
                ReasonFlags::FILE_CREATE,
            );
        }
        let usns: Vec<i64> = state.buffer.iter().map(|r| r.usn).collect();
        assert!(usns.windows(2).all(|w| w[0] < w[1]));
    }
}
