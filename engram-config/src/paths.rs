use std::env;
use std::path::{Path, PathBuf};

/// Environment variable naming the project root. Every other path the core
/// touches is derived from it; no other environment-specific state is
/// consulted.
pub const ROOT_ENV: &str = "ENGRAM_ROOT";

/// Filesystem layout rooted at `ENGRAM_ROOT`.
#[derive(Debug, Clone)]
pub struct EngramPaths {
    root: PathBuf,
}

impl EngramPaths {
    /// Resolve the root from the environment, falling back to the current
    /// working directory when unset.
    pub fn from_env() -> Self {
        let root = env::var_os(ROOT_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        EngramPaths { root }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        EngramPaths { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/config/engram.toml`
    pub fn settings_file(&self) -> PathBuf {
        self.root.join("config").join("engram.toml")
    }

    /// `<root>/data/activity` — JSONL backups and the cursor state file.
    pub fn activity_dir(&self) -> PathBuf {
        self.root.join("data").join("activity")
    }

    /// `<root>/data/activity/journal_state.json`
    pub fn state_file(&self) -> PathBuf {
        self.activity_dir().join("journal_state.json")
    }
}
