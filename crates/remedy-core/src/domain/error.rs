//! Domain-level error taxonomy for the remediation pipeline.

use crate::run::RunState;

/// Pipeline domain errors.
///
/// Stage-level failures (classification, generation, rejection) are not
/// errors: they are terminal [`RunState`]s carried on the run record. This
/// type covers configuration, persistence and invariant violations.
#[derive(Debug, thiserror::Error)]
pub enum RemedyError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid template catalog: {0}")]
    InvalidCatalog(String),

    #[error("invalid operation policy: {0}")]
    InvalidPolicy(String),

    #[error("unknown severity: {0}")]
    UnknownSeverity(String),

    #[error("unknown category: {0}")]
    UnknownCategory(String),

    #[error("illegal state transition: {from} -> {to}")]
    IllegalTransition { from: RunState, to: RunState },

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline domain operations.
pub type Result<T> = std::result::Result<T, RemedyError>;
