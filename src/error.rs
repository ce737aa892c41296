//! Central error taxonomy for the coordination core.
//!
//! Mirrors the error families the rest of the engine matches on: validation
//! failures reject input outright, contention (`LockHeld`) is benign and
//! becomes a SKIPPED execution, external failures wrap broker/subprocess
//! trouble, and cache/store failures abort the whole execution run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    // --- Validation -------------------------------------------------------
    #[error("unsupported resolution: {0}")]
    UnsupportedResolution(String),

    #[error("strategy {strategy_id} is missing required execution config: {field}")]
    MissingStrategyConfig { strategy_id: String, field: String },

    #[error("subscription already exists for user {user_id} on strategy {strategy_id}")]
    AlreadySubscribed {
        user_id: String,
        strategy_id: String,
    },

    #[error("leverage {requested} exceeds instrument maximum {max}")]
    LeverageExceedsLimit { requested: f64, max: f64 },

    #[error("computed quantity is too small after precision flooring")]
    QuantityTooSmall,

    #[error("identifier must not be empty")]
    EmptyIdentifier,

    // --- Contention ---------------------------------------------------------
    #[error("execution lock already held for strategy {strategy_id} interval {interval_key}")]
    LockHeld {
        strategy_id: String,
        interval_key: String,
    },

    // --- External -----------------------------------------------------------
    #[error("broker call failed: {0}")]
    BrokerCallFailed(String),

    #[error("strategy runtime subprocess failed: {0}")]
    RuntimeSubprocessFailed(String),

    #[error("strategy runtime timed out after {0:?}")]
    RuntimeTimeout(std::time::Duration),

    #[error("could not parse strategy runtime output as JSON")]
    RuntimeOutputUnparseable,

    // --- Cache / Store --------------------------------------------------------
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("durable store unavailable: {0}")]
    StoreUnavailable(String),

    // --- Invariant ------------------------------------------------------------
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<redis::RedisError> for EngineError {
    fn from(e: redis::RedisError) -> Self {
        EngineError::CacheUnavailable(e.to_string())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => EngineError::NotFound(e.to_string()),
            other => EngineError::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::RuntimeSubprocessFailed(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(_: serde_json::Error) -> Self {
        EngineError::RuntimeOutputUnparseable
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        EngineError::Invariant(format!("task join failed: {e}"))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
