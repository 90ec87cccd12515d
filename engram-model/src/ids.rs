use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace under which stable entity identifiers are derived.
///
/// Derivation input is `"<volume>:<file_reference_number>"`, so the same
/// file on the same volume resolves to the same id across restarts without
/// any persisted mapping.
pub const ENTITY_NAMESPACE: Uuid = Uuid::from_u128(0x8f2e_6b1a_4c5d_4e7f_9a0b_1c2d_3e4f_5a6b);

/// Fresh identifier stamped on every recorded activity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Serialize, Deserialize)]
pub struct ActivityId(pub Uuid);

impl Default for ActivityId {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityId {
    pub fn new() -> Self {
        ActivityId(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn to_uuid(&self) -> Uuid {
        self.0
    }
}

impl AsRef<Uuid> for ActivityId {
    fn as_ref(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for ActivityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a file across renames and moves.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Derive the stable id for a (volume, file reference number) pair.
    pub fn derive(volume: &str, file_reference_number: u64) -> Self {
        let name = format!("{volume}:{file_reference_number}");
        EntityId(Uuid::new_v5(&ENTITY_NAMESPACE, name.as_bytes()))
    }

    /// Fresh id for entities whose reference number is unknown.
    pub fn random() -> Self {
        EntityId(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn to_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier a recorder presents to the registration service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Copy, Serialize, Deserialize)]
pub struct ServiceId(pub Uuid);

impl ServiceId {
    pub fn new(uuid: Uuid) -> Self {
        ServiceId(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_is_stable_for_same_reference() {
        let a = EntityId::derive("C:", 0x0001_2345);
        let b = EntityId::derive("C:", 0x0001_2345);
        assert_eq!(a, b);
    }

    #[test]
    fn entity_id_differs_across_volumes() {
        let a = EntityId::derive("C:", 42);
        let b = EntityId::derive("D:", 42);
        assert_ne!(a, b);
    }
}
