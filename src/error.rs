//! Crate error type.
//!
//! Scoring, ranking and assignment never fail; only configuration loading and
//! calls into the external store surface errors.

use std::path::PathBuf;
use thiserror::Error;

use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {}", format_validation(.0))]
    Config(Vec<ValidationError>),

    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("store error during {operation}: {message}")]
    Store {
        operation: &'static str,
        message: String,
        retryable: bool,
    },

    #[error("job not found: {0}")]
    UnknownJob(String),
}

impl Error {
    /// A store failure that may succeed on a later cycle.
    pub fn store(operation: &'static str, message: impl Into<String>) -> Self {
        Error::Store {
            operation,
            message: message.into(),
            retryable: true,
        }
    }

    /// A store failure that will not succeed by retrying.
    pub fn store_fatal(operation: &'static str, message: impl Into<String>) -> Self {
        Error::Store {
            operation,
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether the next cycle may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Store { retryable, .. } => *retryable,
            Error::Config(_) | Error::ConfigIo { .. } | Error::ConfigParse(_) => false,
            Error::UnknownJob(_) => false,
        }
    }
}

fn format_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;
