//! Error types for risk engine

use thiserror::Error;

/// Risk engine error
#[derive(Debug, Error)]
pub enum Error {
    /// Transaction or login history could not be read
    #[error("History unavailable: {0}")]
    HistoryUnavailable(String),

    /// Alert could not be persisted or loaded
    #[error("Alert store error: {0}")]
    AlertStore(String),

    /// Alert does not exist
    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    /// Alert status change not allowed from the current status
    #[error("Invalid alert transition: {0}")]
    InvalidTransition(String),

    /// History amounts the heuristics cannot combine
    #[error("Scoring failed: {0}")]
    Scoring(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
