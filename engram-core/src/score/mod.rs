//! Importance scoring for file-system activities.
//!
//! Scores drive retention and consolidation: how long a record lives in each
//! tier and when it is promoted to the next one. The scorer is pure and
//! deterministic; identical inputs always produce identical scores, so it
//! can run inside the ingestion path without blocking.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use engram_model::activity::attr;
use engram_model::{Activity, ActivityType, MemoryStage};

use crate::error::{EngramError, Result};

/// Relative weight of each scoring factor. Weights must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScorerWeights {
    pub extension: f64,
    pub activity_type: f64,
    pub path: f64,
    pub recency: f64,
    pub metadata: f64,
}

impl Default for ScorerWeights {
    fn default() -> Self {
        Self {
            extension: 0.25,
            activity_type: 0.30,
            path: 0.20,
            recency: 0.15,
            metadata: 0.10,
        }
    }
}

impl ScorerWeights {
    fn sum(&self) -> f64 {
        self.extension + self.activity_type + self.path + self.recency + self.metadata
    }
}

/// Extension importance table, keyed by lowercased extension.
static EXTENSION_WEIGHTS: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    let mut weights = HashMap::new();
    // Documents
    for ext in ["doc", "docx", "pdf", "ppt", "pptx", "xls", "xlsx"] {
        weights.insert(ext, 0.8);
    }
    for ext in ["odt", "ods", "odp", "rtf", "tex", "md"] {
        weights.insert(ext, 0.7);
    }
    // Source code
    for ext in [
        "py", "js", "java", "c", "cpp", "h", "hpp", "cs", "php", "rb", "go", "rs", "ts", "sql",
    ] {
        weights.insert(ext, 0.8);
    }
    // Data files
    for ext in ["json", "xml", "csv", "yml", "yaml", "ini", "conf"] {
        weights.insert(ext, 0.7);
    }
    // Media files
    for ext in [
        "jpg", "jpeg", "png", "gif", "mp3", "mp4", "avi", "mov", "wav", "svg",
    ] {
        weights.insert(ext, 0.6);
    }
    for ext in ["bmp", "tiff", "flac"] {
        weights.insert(ext, 0.5);
    }
    // Executables
    for ext in ["exe", "dll", "so", "dylib", "bat", "sh", "cmd"] {
        weights.insert(ext, 0.6);
    }
    // Archives
    for ext in ["zip", "tar", "gz", "rar", "7z", "bz2"] {
        weights.insert(ext, 0.5);
    }
    // System and scratch files
    for ext in ["sys", "msi", "inf", "log"] {
        weights.insert(ext, 0.4);
    }
    for ext in ["tmp", "bak"] {
        weights.insert(ext, 0.3);
    }
    weights.insert("cache", 0.2);
    weights
});

/// Ordered path significance patterns; the first match wins. Separators
/// accept both slash styles so the table applies to every backend.
static PATH_PATTERNS: Lazy<Vec<(Regex, f64)>> = Lazy::new(|| {
    const TABLE: &[(&str, f64)] = &[
        // User-created content
        (r"(?i)[\\/]Documents[\\/]", 0.9),
        (r"(?i)[\\/]Desktop[\\/]", 0.9),
        (r"(?i)[\\/]Projects[\\/]", 0.9),
        (r"(?i)[\\/]Work[\\/]", 0.9),
        (r"(?i)[\\/]Source[\\/]", 0.8),
        (r"(?i)[\\/]src[\\/]", 0.8),
        (r"(?i)[\\/]dev[\\/]", 0.8),
        // User application data
        (r"(?i)[\\/]AppData[\\/]Local[\\/]", 0.5),
        (r"(?i)[\\/]AppData[\\/]Roaming[\\/]", 0.5),
        (r"(?i)[\\/]Application Data[\\/]", 0.5),
        (r"(?i)[\\/]Library[\\/]Application Support[\\/]", 0.5),
        // Temporary or cache data
        (r"(?i)[\\/]Temp[\\/]", 0.2),
        (r"(?i)[\\/]Temporary[\\/]", 0.2),
        (r"(?i)[\\/]Cache[\\/]", 0.2),
        (r"(?i)[\\/]Windows[\\/]", 0.3),
        (r"(?i)[\\/]Program Files[\\/]", 0.3),
        (r"(?i)[\\/]ProgramData[\\/]", 0.3),
        (r"(?i)[\\/]System32[\\/]", 0.3),
        // Downloads
        (r"(?i)[\\/]Downloads[\\/]", 0.4),
    ];
    TABLE
        .iter()
        .map(|(pattern, weight)| (Regex::new(pattern).expect("static pattern"), *weight))
        .collect()
});

const DEFAULT_EXTENSION_SCORE: f64 = 0.4;
const DIRECTORY_EXTENSION_SCORE: f64 = 0.7;
const DEFAULT_PATH_SCORE: f64 = 0.5;
const SHALLOW_DIRECTORY_FLOOR: f64 = 0.8;
const SHALLOW_DIRECTORY_DEPTH: usize = 2;

fn activity_type_weight(kind: ActivityType) -> f64 {
    match kind {
        ActivityType::Create => 0.8,
        ActivityType::Delete => 0.7,
        ActivityType::Rename => 0.7,
        ActivityType::Modify => 0.6,
        ActivityType::SecurityChange => 0.6,
        ActivityType::Read => 0.4,
        ActivityType::Close => 0.3,
        ActivityType::InfoChange => 0.3,
        ActivityType::Unknown => 0.2,
    }
}

/// One tier-transition gate: minimum importance plus an age threshold that
/// relaxes for important records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsolidationGate {
    pub min_importance: f64,
    pub min_age_hours: f64,
}

impl ConsolidationGate {
    /// Default gate for a stage transition. Unlisted transitions fall back
    /// to a conservative (0.5, 24 h).
    pub fn for_stages(from: MemoryStage, to: MemoryStage) -> Self {
        match (from, to) {
            (MemoryStage::Sensory, MemoryStage::ShortTerm) => ConsolidationGate {
                min_importance: 0.3,
                min_age_hours: 12.0,
            },
            (MemoryStage::ShortTerm, MemoryStage::LongTerm) => ConsolidationGate {
                min_importance: 0.6,
                min_age_hours: 168.0,
            },
            (MemoryStage::LongTerm, MemoryStage::Archival) => ConsolidationGate {
                min_importance: 0.8,
                min_age_hours: 8_760.0,
            },
            _ => ConsolidationGate {
                min_importance: 0.5,
                min_age_hours: 24.0,
            },
        }
    }

    /// Higher importance consolidates earlier: the effective age threshold
    /// shrinks to as little as half of `min_age_hours`.
    pub fn admits(&self, importance: f64, age_hours: f64) -> bool {
        let adjusted_age_threshold = self.min_age_hours * (1.0 - importance * 0.5);
        importance >= self.min_importance && age_hours >= adjusted_age_threshold
    }
}

/// Multi-factor importance scorer.
#[derive(Debug, Clone)]
pub struct ImportanceScorer {
    weights: ScorerWeights,
    time_decay_rate: f64,
}

impl Default for ImportanceScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportanceScorer {
    pub fn new() -> Self {
        ImportanceScorer {
            weights: ScorerWeights::default(),
            time_decay_rate: 0.05,
        }
    }

    /// Custom weights must still sum to 1.0; anything else silently skews
    /// every score, so it is rejected here.
    pub fn with_weights(weights: ScorerWeights, time_decay_rate: f64) -> Result<Self> {
        if (weights.sum() - 1.0).abs() > 1e-9 {
            return Err(EngramError::Internal(format!(
                "scorer weights sum to {}, expected 1.0",
                weights.sum()
            )));
        }
        if time_decay_rate <= 0.0 {
            return Err(EngramError::Internal(format!(
                "time decay rate {time_decay_rate} must be positive"
            )));
        }
        Ok(ImportanceScorer {
            weights,
            time_decay_rate,
        })
    }

    /// Combined importance in [0.1, 1.0].
    pub fn score(&self, activity: &Activity, now: DateTime<Utc>) -> f64 {
        let combined = self.extension_score(activity) * self.weights.extension
            + self.activity_type_score(activity) * self.weights.activity_type
            + self.path_score(activity) * self.weights.path
            + self.recency_score(activity, now) * self.weights.recency
            + self.metadata_score(activity) * self.weights.metadata;

        let mut importance = combined.clamp(0.1, 1.0);

        // External boost folds in monotonically and can never exceed 1.0.
        if let Some(boost) = activity
            .attributes
            .get(attr::IMPORTANCE_BOOST)
            .and_then(|v| v.as_f64())
            && boost > 0.0
        {
            importance = (importance + boost.min(1.0) * (1.0 - importance)).min(1.0);
        }

        importance
    }

    pub fn extension_score(&self, activity: &Activity) -> f64 {
        if activity.is_directory {
            return DIRECTORY_EXTENSION_SCORE;
        }
        activity
            .extension()
            .and_then(|ext| EXTENSION_WEIGHTS.get(ext.as_str()).copied())
            .unwrap_or(DEFAULT_EXTENSION_SCORE)
    }

    pub fn activity_type_score(&self, activity: &Activity) -> f64 {
        // Raw reason combinations outrank the generic type table.
        if let Some(reasons) = activity.attributes.get(attr::REASONS).and_then(|v| v.as_array()) {
            let has = |name: &str| reasons.iter().any(|r| r.as_str() == Some(name));
            if has("DATA_EXTEND") && has("DATA_OVERWRITE") {
                return 0.9;
            }
            if has("FILE_CREATE") {
                return 0.85;
            }
        }
        activity_type_weight(activity.activity_type)
    }

    pub fn path_score(&self, activity: &Activity) -> f64 {
        let path = activity.file_path.as_str();
        let pattern_score = PATH_PATTERNS
            .iter()
            .find(|(pattern, _)| pattern.is_match(path))
            .map(|(_, weight)| *weight)
            .unwrap_or(DEFAULT_PATH_SCORE);

        if activity.is_directory {
            let depth = path.matches(['\\', '/']).count();
            if depth <= SHALLOW_DIRECTORY_DEPTH {
                return pattern_score.max(SHALLOW_DIRECTORY_FLOOR);
            }
        }

        pattern_score
    }

    pub fn recency_score(&self, activity: &Activity, now: DateTime<Utc>) -> f64 {
        let age_days = activity.age_days(now).max(0.0);
        (-self.time_decay_rate * age_days).exp().clamp(0.1, 1.0)
    }

    pub fn metadata_score(&self, activity: &Activity) -> f64 {
        let mut score = 0.5;

        // Search hits indicate user interest.
        if activity.search_hits > 0 {
            score += (activity.search_hits as f64 * 0.03).min(0.3);
        }

        // Larger files matter more, with diminishing returns; sub-KiB
        // files contribute nothing.
        if let Some(size) = activity.file_size
            && size > 0
        {
            let size_factor = ((size as f64 / 1024.0).max(1.0).log10() * 0.05).min(0.2);
            score += size_factor;
        }

        if activity.is_rename_new_name() {
            score += 0.1;
        }

        if matches!(
            activity.attribute_str(attr::REASON_CLASS),
            Some("security_change") | Some("named_data_extend")
        ) {
            score += 0.05;
        }

        score.min(1.0)
    }

    /// Effective importance after `age_days` of decay. Important items
    /// decay more slowly, and access history partially counteracts decay.
    pub fn decay(&self, original: f64, age_days: f64, access_count: u64) -> f64 {
        let decay_rate = self.time_decay_rate * (1.0 - original * 0.5);
        let time_factor = (-decay_rate * age_days.max(0.0)).exp();
        let access_factor = 1.0 + access_count.min(10) as f64 * 0.05;
        (original * time_factor * access_factor).clamp(0.1, 1.0)
    }

    /// Recommended retention period for a score at a given stage.
    pub fn retention_days(&self, importance: f64, stage: MemoryStage) -> u32 {
        let importance_factor = 0.5 + importance * 1.5;
        ((stage.base_retention_days() as f64 * importance_factor) as u32).max(1)
    }

    /// Merge several scores into one: mean biased toward the maximum.
    pub fn combine_scores(scores: &[f64]) -> f64 {
        if scores.is_empty() {
            return 0.0;
        }
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        let max = scores.iter().copied().fold(f64::MIN, f64::max);
        (mean * 0.7 + max * 0.3).min(1.0)
    }

    /// Whether an item should move between stages given its score and age.
    pub fn should_consolidate(
        &self,
        importance: f64,
        age_hours: f64,
        from: MemoryStage,
        to: MemoryStage,
    ) -> bool {
        ConsolidationGate::for_stages(from, to).admits(importance, age_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_model::activity::Attributes;
    use engram_model::{ActivityId, EntityId, Tier};
    use serde_json::json;

    fn activity(path: &str, kind: ActivityType, reasons: &[&str]) -> Activity {
        let mut attributes = Attributes::new();
        if !reasons.is_empty() {
            attributes.insert(attr::REASONS.into(), json!(reasons));
        }
        Activity {
            activity_id: ActivityId::new(),
            entity_id: EntityId::derive("C:", 1),
            timestamp: Utc::now(),
            activity_type: kind,
            file_path: path.into(),
            file_name: path.rsplit(['\\', '/']).next().unwrap_or(path).into(),
            is_directory: false,
            file_size: None,
            volume: "C:".into(),
            attributes,
            importance_score: 0.0,
            tier: Tier::Hot,
            access_count: 0,
            search_hits: 0,
        }
    }

    #[test]
    fn document_lifecycle_scores_track_activity_weight() {
        let scorer = ImportanceScorer::new();
        let now = Utc::now();
        let path = "C:\\Users\\Alice\\Documents\\report.docx";

        let mut create = activity(path, ActivityType::Create, &["FILE_CREATE"]);
        create.file_size = Some(12_288);
        let mut modify = activity(
            path,
            ActivityType::Modify,
            &["DATA_EXTEND", "DATA_OVERWRITE"],
        );
        modify.file_size = Some(12_288);
        let mut close = activity(path, ActivityType::Close, &["CLOSE"]);
        close.file_size = Some(12_288);

        let create_score = scorer.score(&create, now);
        let modify_score = scorer.score(&modify, now);
        let close_score = scorer.score(&close, now);

        assert!(create_score >= 0.75, "create scored {create_score}");
        assert!(modify_score >= 0.80, "modify scored {modify_score}");
        assert!(close_score >= 0.30, "close scored {close_score}");
        assert!(close_score < create_score);
        for score in [create_score, modify_score, close_score] {
            assert!((0.1..=1.0).contains(&score));
        }
    }

    #[test]
    fn temp_file_noise_stays_below_document_scores() {
        let scorer = ImportanceScorer::new();
        let now = Utc::now();

        let temp = activity(
            "C:\\Windows\\Temp\\tmp12345.dat",
            ActivityType::Create,
            &["FILE_CREATE"],
        );
        assert_eq!(scorer.extension_score(&temp), 0.4);
        assert_eq!(scorer.path_score(&temp), 0.2);

        let temp_score = scorer.score(&temp, now);
        let mut document = activity(
            "C:\\Users\\Alice\\Documents\\report.docx",
            ActivityType::Create,
            &["FILE_CREATE"],
        );
        document.file_size = Some(12_288);
        assert!(temp_score < 0.65, "temp noise scored {temp_score}");
        assert!(temp_score < scorer.score(&document, now));
    }

    #[test]
    fn scoring_is_deterministic() {
        let scorer = ImportanceScorer::new();
        let now = Utc::now();
        let subject = activity(
            "C:\\Users\\Alice\\Projects\\main.rs",
            ActivityType::Modify,
            &["DATA_EXTEND"],
        );
        assert_eq!(scorer.score(&subject, now), scorer.score(&subject, now));
    }

    #[test]
    fn weights_must_sum_to_one() {
        let mut weights = ScorerWeights::default();
        weights.extension = 0.5;
        assert!(ImportanceScorer::with_weights(weights, 0.05).is_err());
        assert!(ImportanceScorer::with_weights(ScorerWeights::default(), 0.05).is_ok());
    }

    #[test]
    fn boost_is_monotonic_and_bounded() {
        let scorer = ImportanceScorer::new();
        let now = Utc::now();
        let plain = activity("C:\\Users\\Bob\\notes.txt", ActivityType::Modify, &[]);

        let mut boosted = plain.clone();
        boosted
            .attributes
            .insert(attr::IMPORTANCE_BOOST.into(), json!(0.5));
        let mut maxed = plain.clone();
        maxed
            .attributes
            .insert(attr::IMPORTANCE_BOOST.into(), json!(1.0));

        let base = scorer.score(&plain, now);
        let mid = scorer.score(&boosted, now);
        let top = scorer.score(&maxed, now);
        assert!(base < mid && mid < top);
        assert!(top <= 1.0);
    }

    #[test]
    fn shallow_directories_score_at_least_point_eight() {
        let scorer = ImportanceScorer::new();
        let mut dir = activity("C:\\Users", ActivityType::Create, &[]);
        dir.is_directory = true;
        assert!(scorer.path_score(&dir) >= 0.8);

        // Deep directories fall back to the pattern table.
        let mut deep = activity("C:\\Windows\\Temp\\nested\\dir", ActivityType::Create, &[]);
        deep.is_directory = true;
        assert_eq!(scorer.path_score(&deep), 0.2);
    }

    #[test]
    fn recency_decays_with_age_and_clamps() {
        let scorer = ImportanceScorer::new();
        let now = Utc::now();
        let fresh = activity("C:\\a.txt", ActivityType::Modify, &[]);
        let mut old = fresh.clone();
        old.timestamp = now - chrono::Duration::days(30);
        let mut ancient = fresh.clone();
        ancient.timestamp = now - chrono::Duration::days(3650);

        let fresh_score = scorer.recency_score(&fresh, now);
        let old_score = scorer.recency_score(&old, now);
        let ancient_score = scorer.recency_score(&ancient, now);
        assert!(fresh_score > old_score);
        assert!(old_score > ancient_score || ancient_score == 0.1);
        assert_eq!(ancient_score, 0.1);
    }

    #[test]
    fn metadata_rewards_search_hits_and_rename_targets() {
        let scorer = ImportanceScorer::new();
        let plain = activity("C:\\x.txt", ActivityType::Modify, &[]);
        assert_eq!(scorer.metadata_score(&plain), 0.5);

        let mut searched = plain.clone();
        searched.search_hits = 5;
        assert!((scorer.metadata_score(&searched) - 0.65).abs() < 1e-9);

        let mut renamed = plain.clone();
        renamed
            .attributes
            .insert(attr::RENAME_TYPE.into(), json!("new_name"));
        assert!((scorer.metadata_score(&renamed) - 0.6).abs() < 1e-9);

        // The cap holds even when every bonus stacks.
        let mut stacked = plain.clone();
        stacked.search_hits = 100;
        stacked.file_size = Some(u64::MAX);
        stacked
            .attributes
            .insert(attr::RENAME_TYPE.into(), json!("new_name"));
        stacked
            .attributes
            .insert(attr::REASON_CLASS.into(), json!("security_change"));
        assert!(scorer.metadata_score(&stacked) <= 1.0);
    }

    #[test]
    fn decay_slows_for_important_and_accessed_items() {
        let scorer = ImportanceScorer::new();
        assert!((scorer.decay(0.8, 0.0, 0) - 0.8).abs() < 1e-9);
        assert!(scorer.decay(0.8, 30.0, 0) < 0.8);
        // Higher original importance decays proportionally less.
        let low_kept = scorer.decay(0.4, 30.0, 0) / 0.4;
        let high_kept = scorer.decay(0.9, 30.0, 0) / 0.9;
        assert!(high_kept > low_kept);
        // Access history counteracts decay, capped at ten accesses.
        assert!(scorer.decay(0.5, 10.0, 5) > scorer.decay(0.5, 10.0, 0));
        assert_eq!(scorer.decay(0.5, 10.0, 10), scorer.decay(0.5, 10.0, 200));
        // Floor holds for long ages.
        assert_eq!(scorer.decay(0.3, 10_000.0, 0), 0.1);
    }

    #[test]
    fn retention_scales_with_importance() {
        let scorer = ImportanceScorer::new();
        assert_eq!(scorer.retention_days(1.0, MemoryStage::Sensory), 14);
        assert_eq!(scorer.retention_days(0.0, MemoryStage::Sensory), 3);
        assert_eq!(scorer.retention_days(1.0, MemoryStage::ShortTerm), 180);
        assert_eq!(scorer.retention_days(0.5, MemoryStage::LongTerm), 456);
        assert!(scorer.retention_days(0.0, MemoryStage::Archival) >= 1);
    }

    #[test]
    fn combine_biases_toward_the_maximum() {
        assert_eq!(ImportanceScorer::combine_scores(&[]), 0.0);
        let uniform = ImportanceScorer::combine_scores(&[0.7; 10]);
        assert!((uniform - 0.7).abs() < 1e-9);
        let skewed = ImportanceScorer::combine_scores(&[0.5, 1.0]);
        assert!((skewed - 0.825).abs() < 1e-9);
    }

    #[test]
    fn consolidation_gates_respect_importance_and_age() {
        let scorer = ImportanceScorer::new();
        // S6 shape: uniform 0.7 importance, a week old, short-term gate.
        assert!(scorer.should_consolidate(
            0.7,
            168.0,
            MemoryStage::ShortTerm,
            MemoryStage::LongTerm
        ));
        // Below the importance floor, age does not help.
        assert!(!scorer.should_consolidate(
            0.2,
            10_000.0,
            MemoryStage::Sensory,
            MemoryStage::ShortTerm
        ));
        // Important but too young.
        assert!(!scorer.should_consolidate(
            0.9,
            5.0,
            MemoryStage::Sensory,
            MemoryStage::ShortTerm
        ));
        // High importance shrinks the age threshold.
        let gate = ConsolidationGate::for_stages(MemoryStage::Sensory, MemoryStage::ShortTerm);
        assert!(gate.admits(0.9, 7.0));
        assert!(!gate.admits(0.3, 7.0));
    }
}
