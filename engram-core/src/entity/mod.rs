//! Entity resolution: stable file identity across renames and moves.
//!
//! The resolver maps `(volume, file_reference_number)` pairs to entity ids
//! derived with UUIDv5, so the same file resolves to the same id across
//! process restarts without persisting the map. Rename pairs keep their
//! entity; orphaned new-name sightings get a fresh entity with a
//! probable-rename pointer when a matching old name was seen recently.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use chrono::{DateTime, Duration, Utc};

use engram_model::{Entity, EntityId};

/// How far back an orphaned new-name looks for a matching old-name.
pub const DEFAULT_RENAME_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct OldNameSighting {
    entity_id: EntityId,
    basename: String,
    seen_at: DateTime<Utc>,
}

/// In-memory resolver state. Exclusively owned by the collector's task;
/// no interior locking.
#[derive(Debug)]
pub struct EntityResolver {
    entities: HashMap<EntityId, Entity>,
    by_reference: HashMap<(String, u64), EntityId>,
    recent_old_names: VecDeque<OldNameSighting>,
    rename_window: Duration,
}

impl Default for EntityResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.rsplit(['\\', '/']).next().unwrap_or(path).to_string())
}

impl EntityResolver {
    pub fn new() -> Self {
        Self::with_rename_window(Duration::seconds(DEFAULT_RENAME_WINDOW_SECS))
    }

    pub fn with_rename_window(rename_window: Duration) -> Self {
        EntityResolver {
            entities: HashMap::new(),
            by_reference: HashMap::new(),
            recent_old_names: VecDeque::new(),
            rename_window,
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Resolve a sighting to its entity id, creating the entity on first
    /// sight. A known reference number always yields the same id.
    pub fn resolve(
        &mut self,
        volume: &str,
        file_reference_number: u64,
        path: &str,
        at: DateTime<Utc>,
    ) -> EntityId {
        let key = (volume.to_string(), file_reference_number);
        if let Some(id) = self.by_reference.get(&key) {
            return *id;
        }

        let id = EntityId::derive(volume, file_reference_number);
        self.entities.insert(
            id,
            Entity::new(id, volume, Some(file_reference_number), path, at),
        );
        self.by_reference.insert(key, id);
        id
    }

    /// Apply a paired rename: the entity keeps its id, the old path moves
    /// into history with its validity window.
    pub fn apply_rename(
        &mut self,
        volume: &str,
        file_reference_number: u64,
        old_path: &str,
        new_path: &str,
        at: DateTime<Utc>,
    ) -> EntityId {
        let id = self.resolve(volume, file_reference_number, old_path, at);
        if let Some(entity) = self.entities.get_mut(&id) {
            // First sighting may have been the rename itself; make sure the
            // pre-rename path is what lands in history.
            if entity.path != old_path {
                entity.path = old_path.to_string();
            }
            entity.renamed(new_path, at);
        }
        id
    }

    /// Record the old-name half of a rename so a later orphaned new-name
    /// can link back to it.
    pub fn observe_old_name(
        &mut self,
        volume: &str,
        file_reference_number: u64,
        path: &str,
        at: DateTime<Utc>,
    ) {
        let entity_id = self.resolve(volume, file_reference_number, path, at);
        self.expire_old_names(at);
        self.recent_old_names.push_back(OldNameSighting {
            entity_id,
            basename: basename(path),
            seen_at: at,
        });
    }

    /// Handle a new-name sighting whose old-name half was lost: create a
    /// fresh entity and attach a probable-rename pointer when a nearby old
    /// name shares the basename.
    pub fn orphan_new_name(
        &mut self,
        volume: &str,
        file_reference_number: u64,
        path: &str,
        at: DateTime<Utc>,
    ) -> EntityId {
        let id = self.resolve(volume, file_reference_number, path, at);
        self.expire_old_names(at);

        let name = basename(path);
        let probable = self
            .recent_old_names
            .iter()
            .rev()
            .find(|sighting| sighting.basename == name && sighting.entity_id != id)
            .map(|sighting| sighting.entity_id);

        if let Some(previous) = probable
            && let Some(entity) = self.entities.get_mut(&id)
        {
            entity.probable_rename_of = Some(previous);
        }
        id
    }

    /// Drop cached state; derived ids keep entities stable regardless.
    pub fn reset(&mut self) {
        self.entities.clear();
        self.by_reference.clear();
        self.recent_old_names.clear();
    }

    fn expire_old_names(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.rename_window;
        while self
            .recent_old_names
            .front()
            .is_some_and(|s| s.seen_at < cutoff)
        {
            self.recent_old_names.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_pair_keeps_entity_id() {
        let mut resolver = EntityResolver::new();
        let t0 = Utc::now();

        let before = resolver.resolve("C:", 42, "C:\\docs\\old.txt", t0);
        let after = resolver.apply_rename(
            "C:",
            42,
            "C:\\docs\\old.txt",
            "C:\\docs\\new.txt",
            t0 + Duration::seconds(5),
        );

        assert_eq!(before, after);
        let entity = resolver.entity(&after).unwrap();
        assert_eq!(entity.path, "C:\\docs\\new.txt");
        assert_eq!(entity.prior_paths.len(), 1);
        assert_eq!(entity.prior_paths[0].path, "C:\\docs\\old.txt");
    }

    #[test]
    fn orphan_new_name_links_probable_rename_by_basename() {
        let mut resolver = EntityResolver::new();
        let t0 = Utc::now();

        resolver.observe_old_name("C:", 7, "C:\\work\\draft.md", t0);
        let id = resolver.orphan_new_name("C:", 8, "C:\\archive\\draft.md", t0 + Duration::seconds(10));

        let entity = resolver.entity(&id).unwrap();
        let previous = entity.probable_rename_of.expect("probable rename link");
        assert_eq!(previous, EntityId::derive("C:", 7));
    }

    #[test]
    fn stale_old_names_fall_out_of_the_window() {
        let mut resolver = EntityResolver::new();
        let t0 = Utc::now();

        resolver.observe_old_name("C:", 7, "C:\\work\\draft.md", t0);
        let id = resolver.orphan_new_name(
            "C:",
            8,
            "C:\\archive\\draft.md",
            t0 + Duration::seconds(DEFAULT_RENAME_WINDOW_SECS + 5),
        );

        assert!(resolver.entity(&id).unwrap().probable_rename_of.is_none());
    }

    #[test]
    fn reset_does_not_change_derived_ids() {
        let mut resolver = EntityResolver::new();
        let t0 = Utc::now();
        let before = resolver.resolve("C:", 11, "C:\\a.txt", t0);
        resolver.reset();
        let after = resolver.resolve("C:", 11, "C:\\a.txt", t0);
        assert_eq!(before, after);
    }
}
