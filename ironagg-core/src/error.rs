// src/error.rs
//! Error types for IronAgg
//!
//! Configuration errors (bad stage, accumulator, query or template) are raised
//! when a descriptor is compiled. Type errors are raised while evaluating an
//! operator against a value of the wrong kind. Neither is recovered from.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid stage: {0}")]
    InvalidStage(String),

    #[error("Unknown pipeline stage: {0}")]
    UnknownStage(String),

    #[error("Unknown accumulator: {0}")]
    UnknownAccumulator(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Aggregation error: {0}")]
    AggregationError(String),

    #[error("Stage {0} cannot follow $objectify")]
    StageAfterObjectify(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// True for errors caused by a malformed descriptor rather than by the data
    pub fn is_configuration(&self) -> bool {
        !matches!(
            self,
            EngineError::TypeError(_) | EngineError::Serialization(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
