//! Error types for the doseplan_core library.

use crate::DoseStatusKind;
use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for doseplan_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A dose time that is not a valid `HH:mm` pair
    #[error("Invalid dose time: {0}")]
    InvalidDoseTime(String),

    /// Schedule validation error
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Dose record status change other than `scheduled -> final`
    #[error("Invalid dose transition: {from} -> {to}")]
    InvalidTransition {
        from: DoseStatusKind,
        to: DoseStatusKind,
    },

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
