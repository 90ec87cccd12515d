//! Core data model definitions shared across Engram crates.
#![allow(missing_docs)]

pub mod activity;
pub mod cursor;
pub mod entity;
pub mod error;
pub mod ids;
pub mod reason;
pub mod record;
pub mod tier;

// Intentionally curated re-exports for downstream consumers.
pub use activity::{Activity, ActivityType, Attributes};
pub use cursor::JournalCursor;
pub use entity::{Entity, PathEpoch};
pub use error::{ModelError, Result as ModelResult};
pub use ids::{ActivityId, EntityId, ServiceId};
pub use reason::ReasonFlags;
pub use record::{JournalBatch, JournalMetadata, RawJournalRecord};
pub use tier::{MemoryStage, Tier, TierRecord, WarmSummary};
