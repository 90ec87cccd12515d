use serde::{Deserialize, Serialize};

/// Persisted position within one volume's change journal.
///
/// Resuming from a cursor yields every record after it in journal order. A
/// cursor is only valid against the journal instance that produced it: a
/// changed `journal_id` means the journal was reset and the position must
/// be re-queried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalCursor {
    pub volume: String,
    pub journal_id: u64,
    pub next_usn: i64,
}

impl JournalCursor {
    pub fn new(volume: impl Into<String>, journal_id: u64, next_usn: i64) -> Self {
        JournalCursor {
            volume: volume.into(),
            journal_id,
            next_usn,
        }
    }

    /// Advance the cursor; the journal contract guarantees the returned
    /// position never moves backwards.
    pub fn advance(&mut self, next_usn: i64) {
        debug_assert!(next_usn >= self.next_usn);
        self.next_usn = next_usn;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_file_shape_round_trips() {
        let cursor = JournalCursor::new("C:", 0xdead_beef, 1_024);
        let json = serde_json::to_string(&cursor).unwrap();
        let back: JournalCursor = serde_json::from_str(&json).unwrap();
        assert_eq!(cursor, back);
    }
}
