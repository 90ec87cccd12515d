use thiserror::Error;

/// Errors surfaced by the pipeline.
#[derive(Error, Debug)]
pub enum EngramError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("model error: {0}")]
    Model(#[from] engram_model::ModelError),

    /// Transient journal failure; the cycle retries from the same cursor.
    #[error("journal read failed on {volume}: {message}")]
    JournalRead { volume: String, message: String },

    /// The stored cursor no longer matches the live journal.
    #[error("cursor invalid for {volume}: {message}")]
    InvalidCursor { volume: String, message: String },

    /// Journal missing or volume unsupported; fatal to the cycle.
    #[error("journal unavailable on {volume}: {message}")]
    JournalUnavailable { volume: String, message: String },

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Structural crash inside a reader; the runner resets state
    /// unconditionally instead of counting toward the error threshold.
    #[error("structural failure: {0}")]
    Structural(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngramError {
    /// Whether the next cycle may retry after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngramError::Io(_)
                | EngramError::Database(_)
                | EngramError::JournalRead { .. }
                | EngramError::InvalidCursor { .. }
                | EngramError::Timeout(_)
        )
    }

    /// Whether the runner must reset collector state unconditionally.
    pub fn is_structural(&self) -> bool {
        matches!(self, EngramError::Structural(_))
    }
}

pub type Result<T> = std::result::Result<T, EngramError>;
