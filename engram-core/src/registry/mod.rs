//! Service registration: collection names are assigned, never hard-coded.
//!
//! A recorder announces itself to the registration service on startup and
//! writes only to the collection name it gets back, so multiple recorders
//! can coexist against one database. Re-registration with the same service
//! uuid is idempotent and returns the previously assigned name.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use engram_model::ServiceId;

use crate::error::Result;

/// Identity a service presents when registering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub service_id: ServiceId,
    pub name: String,
    pub version: String,
    pub description: String,
    pub service_type: String,
}

/// Fixed identity of the hot tier recorder service.
pub const HOT_TIER_RECORDER_ID: Uuid = Uuid::from_u128(0x3a7c_9d42_f1b8_4e06_a5c3_7e91_2b4d_8f60);

impl ServiceRegistration {
    pub fn hot_tier_recorder() -> Self {
        ServiceRegistration {
            service_id: ServiceId::new(HOT_TIER_RECORDER_ID),
            name: "activity_hot_tier_recorder".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            description: "Hot tier recorder for filesystem activity".into(),
            service_type: "storage_recorder".into(),
        }
    }
}

/// What the registry hands back: where to write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredService {
    pub collection_name: String,
}

/// Derive the collection name assigned to a service. The name embeds a
/// uuid prefix so two services can never collide.
pub fn collection_name_for(service_id: &ServiceId) -> String {
    let simple = service_id.as_uuid().simple().to_string();
    format!("activity_hot_{}", &simple[..8])
}

/// Warm and cold collections hang off the hot collection's name.
pub fn warm_collection(hot: &str) -> String {
    format!("{hot}_warm")
}

pub fn cold_collection(hot: &str) -> String {
    format!("{hot}_cold")
}

/// The registration collaborator.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn register(&self, registration: &ServiceRegistration) -> Result<RegisteredService>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_are_stable_and_prefixed() {
        let registration = ServiceRegistration::hot_tier_recorder();
        let name = collection_name_for(&registration.service_id);
        assert!(name.starts_with("activity_hot_"));
        assert_eq!(name, collection_name_for(&registration.service_id));
        assert_eq!(warm_collection(&name), format!("{name}_warm"));
        assert_eq!(cold_collection(&name), format!("{name}_cold"));
    }
}
