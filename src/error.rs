//error.rs
//! Error types for the scoring network

use thiserror::Error;

/// Result type alias for network operations
pub type Result<T> = std::result::Result<T, ScorenetError>;

/// Main error type for network operations.
///
/// Everything except `Config`, `Toml` and `Io` signals a broken contract inside
/// the network or in the way it was driven; callers are expected to abandon the
/// current solver step when they see one.
#[derive(Debug, Error)]
pub enum ScorenetError {
    #[error("Fact {fact_id} of type {type_name} already exists")]
    DuplicateFact { type_name: &'static str, fact_id: i64 },

    #[error("Fact {fact_id} of type {type_name} not found")]
    FactNotFound { type_name: &'static str, fact_id: i64 },

    #[error("Invalid tuple: {reason}")]
    InvalidTuple { reason: String },

    #[error("Impossible state: {details}")]
    IllegalState { details: String },

    #[error("Index error: {details}")]
    Index { details: String },

    #[error("Invalid tuple arity: expected {expected}, got {actual}")]
    InvalidArity { expected: usize, actual: usize },

    #[error("Network building error: {details}")]
    NetworkBuilder { details: String },

    #[error("Resource limit exceeded: {limit_type} - {details}")]
    ResourceLimit {
        limit_type: String,
        details: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ScorenetError {
    pub fn duplicate_fact(type_name: &'static str, fact_id: i64) -> Self {
        Self::DuplicateFact { type_name, fact_id }
    }

    pub fn fact_not_found(type_name: &'static str, fact_id: i64) -> Self {
        Self::FactNotFound { type_name, fact_id }
    }

    pub fn invalid_tuple(reason: impl Into<String>) -> Self {
        Self::InvalidTuple { reason: reason.into() }
    }

    pub fn illegal_state(details: impl Into<String>) -> Self {
        Self::IllegalState { details: details.into() }
    }

    pub fn index_error(details: impl Into<String>) -> Self {
        Self::Index { details: details.into() }
    }

    pub fn invalid_arity(expected: usize, actual: usize) -> Self {
        Self::InvalidArity { expected, actual }
    }

    pub fn network_builder(details: impl Into<String>) -> Self {
        Self::NetworkBuilder { details: details.into() }
    }

    pub fn resource_limit(limit_type: impl Into<String>, details: impl Into<String>) -> Self {
        Self::ResourceLimit {
            limit_type: limit_type.into(),
            details: details.into(),
        }
    }

    pub fn config(details: impl Into<String>) -> Self {
        Self::Config(details.into())
    }

    /// True for violations of the network's internal bookkeeping.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidTuple { .. } | Self::IllegalState { .. } | Self::Index { .. }
        )
    }
}
