//! Tiered storage: the hot tier recorder and the consolidation job.

pub mod consolidate;
pub mod hot;

pub use consolidate::{ConsolidationReport, ConsolidatorConfig, TierConsolidator};
pub use hot::{HotTierRecorder, HotTierStatistics};
