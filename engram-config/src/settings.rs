use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths::EngramPaths;

/// Errors produced while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },
    #[error("invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Collection-cycle and supervision knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Volumes the journal readers open. Required; there is no sensible
    /// default volume on every platform.
    pub volumes: Vec<String>,
    /// Seconds between collection cycles. Each cycle's work is also bounded
    /// by this interval.
    pub interval_secs: u64,
    /// Total run time in hours; 0 runs until stopped.
    pub duration_hours: f64,
    /// Hot tier time-to-live in days.
    pub ttl_days: i64,
    /// Persist journal cursors to disk between runs.
    pub use_state_file: bool,
    /// Reset collector state after persistent failures.
    pub auto_reset: bool,
    /// Consecutive failed cycles that trigger a reset.
    pub error_threshold: u32,
    /// Consecutive empty cycles that trigger a reset.
    pub empty_results_threshold: u32,
    /// Seconds granted to the in-flight batch on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            volumes: Vec::new(),
            interval_secs: 30,
            duration_hours: 24.0,
            ttl_days: 4,
            use_state_file: false,
            auto_reset: true,
            error_threshold: 3,
            empty_results_threshold: 3,
            shutdown_grace_secs: 30,
        }
    }
}

/// Database connection and timeout policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Postgres connection URL. `ENGRAM_DATABASE_URL` (or `DATABASE_URL`)
    /// overrides whatever the file says; the credential is passed forward,
    /// never interpreted.
    pub url: Option<String>,
    pub max_connections: u32,
    /// Timeout for short operations (inserts, point reads), seconds.
    pub short_op_timeout_secs: u64,
    /// Timeout for analytical queries (statistics, scans), seconds.
    pub analytical_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
            short_op_timeout_secs: 10,
            analytical_timeout_secs: 300,
        }
    }
}

/// JSONL backup policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Also write each batch as JSONL for durability.
    pub enabled: bool,
    /// Override for the backup directory; defaults to the activity dir
    /// under the project root.
    pub output_dir: Option<PathBuf>,
    /// Rotate backup files once they exceed this size.
    pub max_file_size_mb: u64,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: None,
            max_file_size_mb: 100,
        }
    }
}

/// One tier-transition gate: minimum original importance and minimum age.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct TransitionSettings {
    pub min_importance: f64,
    pub min_age_hours: f64,
}

/// Consolidation cadence and per-transition thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsolidatorSettings {
    /// Seconds between consolidation passes.
    pub cadence_secs: u64,
    pub hot_to_warm: TransitionSettings,
    pub warm_to_cold: TransitionSettings,
}

impl Default for ConsolidatorSettings {
    fn default() -> Self {
        Self {
            cadence_secs: 3_600,
            hot_to_warm: TransitionSettings {
                min_importance: 0.3,
                min_age_hours: 12.0,
            },
            warm_to_cold: TransitionSettings {
                min_importance: 0.6,
                min_age_hours: 168.0,
            },
        }
    }
}

/// Top-level settings tree.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub runner: RunnerSettings,
    pub database: DatabaseSettings,
    pub backup: BackupSettings,
    pub consolidator: ConsolidatorSettings,
}

impl Settings {
    /// Load settings for the given root. Evaluation order:
    /// 1) `<root>/config/engram.toml` when present, else defaults,
    /// 2) `ENGRAM_DATABASE_URL` / `DATABASE_URL` environment overrides.
    ///
    /// CLI overrides are applied by the caller on top of the result.
    pub fn load(paths: &EngramPaths) -> Result<Self, SettingsError> {
        // A .env next to the root participates like the real environment.
        let _ = dotenvy::from_path(paths.root().join(".env"));

        let file = paths.settings_file();
        let mut settings = if file.is_file() {
            Self::from_file(&file)?
        } else {
            tracing::debug!(target: "config", path = %file.display(), "no settings file, using defaults");
            Settings::default()
        };

        if let Ok(url) = std::env::var("ENGRAM_DATABASE_URL") {
            settings.database.url = Some(url);
        } else if let Ok(url) = std::env::var("DATABASE_URL") {
            settings.database.url = Some(url);
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings =
            toml::from_str(&contents).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source: Box::new(source),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.runner.interval_secs == 0 {
            return Err(SettingsError::Invalid {
                field: "runner.interval_secs",
                message: "must be at least 1".into(),
            });
        }
        if self.runner.ttl_days <= 0 {
            return Err(SettingsError::Invalid {
                field: "runner.ttl_days",
                message: "must be positive".into(),
            });
        }
        if self.runner.duration_hours < 0.0 {
            return Err(SettingsError::Invalid {
                field: "runner.duration_hours",
                message: "must be zero or positive".into(),
            });
        }
        for (field, t) in [
            ("consolidator.hot_to_warm", self.consolidator.hot_to_warm),
            ("consolidator.warm_to_cold", self.consolidator.warm_to_cold),
        ] {
            if !(0.0..=1.0).contains(&t.min_importance) {
                return Err(SettingsError::Invalid {
                    field,
                    message: format!("min_importance {} outside [0, 1]", t.min_importance),
                });
            }
        }
        // One reader owns each journal handle; the same volume twice would
        // mean two readers on one journal.
        let mut seen = std::collections::BTreeSet::new();
        for volume in &self.runner.volumes {
            if !seen.insert(volume.as_str()) {
                return Err(SettingsError::Invalid {
                    field: "runner.volumes",
                    message: format!("volume {volume} listed more than once"),
                });
            }
        }
        Ok(())
    }
}
