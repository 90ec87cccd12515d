use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::EntityId;

/// One historical path of an entity with its validity window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathEpoch {
    pub path: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

/// Resolver-owned state for one logical file.
///
/// Entities are created on first sighting and mutated by renames; they are
/// never destroyed (tombstoning is out of scope).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: EntityId,
    pub volume: String,
    pub file_reference_number: Option<u64>,
    pub path: String,
    #[serde(default)]
    pub prior_paths: Vec<PathEpoch>,
    /// Set when an orphan rename-new-name was linked to a nearby old-name
    /// sighting by basename rather than by reference number.
    pub probable_rename_of: Option<EntityId>,
    pub first_seen: DateTime<Utc>,
}

impl Entity {
    pub fn new(
        entity_id: EntityId,
        volume: impl Into<String>,
        file_reference_number: Option<u64>,
        path: impl Into<String>,
        first_seen: DateTime<Utc>,
    ) -> Self {
        Entity {
            entity_id,
            volume: volume.into(),
            file_reference_number,
            path: path.into(),
            prior_paths: Vec::new(),
            probable_rename_of: None,
            first_seen,
        }
    }

    /// Apply a rename: the current path moves into history with its
    /// validity window and `path` becomes `new_path`. The id is untouched.
    pub fn renamed(&mut self, new_path: impl Into<String>, at: DateTime<Utc>) {
        let valid_from = self
            .prior_paths
            .last()
            .map(|epoch| epoch.valid_until)
            .unwrap_or(self.first_seen);
        let old = std::mem::replace(&mut self.path, new_path.into());
        self.prior_paths.push(PathEpoch {
            path: old,
            valid_from,
            valid_until: at,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_preserves_id_and_records_history() {
        let first_seen = Utc::now();
        let id = EntityId::derive("C:", 11);
        let mut entity = Entity::new(id, "C:", Some(11), "C:\\docs\\old.txt", first_seen);

        let renamed_at = first_seen + chrono::Duration::seconds(30);
        entity.renamed("C:\\docs\\new.txt", renamed_at);

        assert_eq!(entity.entity_id, id);
        assert_eq!(entity.path, "C:\\docs\\new.txt");
        assert_eq!(entity.prior_paths.len(), 1);
        assert_eq!(entity.prior_paths[0].path, "C:\\docs\\old.txt");
        assert_eq!(entity.prior_paths[0].valid_from, first_seen);
        assert_eq!(entity.prior_paths[0].valid_until, renamed_at);
    }

    #[test]
    fn second_rename_chains_validity_windows() {
        let t0 = Utc::now();
        let mut entity = Entity::new(EntityId::derive("C:", 4), "C:", Some(4), "a", t0);
        let t1 = t0 + chrono::Duration::seconds(10);
        let t2 = t0 + chrono::Duration::seconds(20);
        entity.renamed("b", t1);
        entity.renamed("c", t2);

        assert_eq!(entity.prior_paths[1].valid_from, t1);
        assert_eq!(entity.prior_paths[1].valid_until, t2);
    }
}
