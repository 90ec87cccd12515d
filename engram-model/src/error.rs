use std::fmt::{self, Display};

/// Errors produced by model constructors and validation routines.
#[derive(Debug)]
pub enum ModelError {
    Io(std::io::Error),
    InvalidActivity(String),
    InvalidScore(f64),
    NaiveTimestamp(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Io(err) => write!(f, "io error: {err}"),
            ModelError::InvalidActivity(msg) => write!(f, "invalid activity: {msg}"),
            ModelError::InvalidScore(score) => {
                write!(f, "importance score {score} outside [0.0, 1.0]")
            }
            ModelError::NaiveTimestamp(raw) => {
                write!(f, "timestamp without timezone rejected: {raw}")
            }
        }
    }
}

impl std::error::Error for ModelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ModelError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ModelError {
    fn from(err: std::io::Error) -> Self {
        ModelError::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
