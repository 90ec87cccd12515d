//! Cursor state file: optional durability for journal positions.
//!
//! Shape on disk is `{ "<volume>": { "journal_id": …, "next_usn": … } }`.
//! Writes go through a temp file in the same directory so a crash can never
//! leave a half-written state file behind.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use engram_model::JournalCursor;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateEntry {
    journal_id: u64,
    next_usn: i64,
}

/// Load cursors from a state file. A missing file is an empty state, not an
/// error; a corrupt file is surfaced so the caller can decide to reset.
pub fn load_cursors(path: &Path) -> Result<BTreeMap<String, JournalCursor>> {
    if !path.is_file() {
        return Ok(BTreeMap::new());
    }
    let contents = fs::read_to_string(path)?;
    let entries: BTreeMap<String, StateEntry> = serde_json::from_str(&contents)?;
    Ok(entries
        .into_iter()
        .map(|(volume, entry)| {
            let cursor = JournalCursor::new(volume.clone(), entry.journal_id, entry.next_usn);
            (volume, cursor)
        })
        .collect())
}

/// Persist cursors atomically (temp file + rename).
pub fn save_cursors<'a>(
    path: &Path,
    cursors: impl IntoIterator<Item = &'a JournalCursor>,
) -> Result<()> {
    let entries: BTreeMap<&str, StateEntry> = cursors
        .into_iter()
        .map(|cursor| {
            (
                cursor.volume.as_str(),
                StateEntry {
                    journal_id: cursor.journal_id,
                    next_usn: cursor.next_usn,
                },
            )
        })
        .collect();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp = tempfile::NamedTempFile::new_in(path.parent().unwrap_or(Path::new(".")))?;
    serde_json::to_writer_pretty(&mut tmp, &entries)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// Remove the state file; resuming afterwards re-queries the journal.
pub fn clear(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_cursor_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal_state.json");

        let cursors = vec![
            JournalCursor::new("C:", 10, 200),
            JournalCursor::new("D:", 11, 42),
        ];
        save_cursors(&path, cursors.iter()).unwrap();

        let loaded = load_cursors(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["C:"], cursors[0]);
        assert_eq!(loaded["D:"], cursors[1]);
    }

    #[test]
    fn missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_cursors(&dir.path().join("nope.json")).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        save_cursors(&path, [JournalCursor::new("C:", 1, 1)].iter()).unwrap();
        clear(&path).unwrap();
        clear(&path).unwrap();
        assert!(!path.exists());
    }
}
