//! Typed error surfaces for the trading core.
//!
//! Follows the two-tier convention used across the engine: `thiserror`
//! enums at every internal seam, `anyhow::Result` only at the worker's
//! startup boundary (see [`crate::worker`] and `main.rs`).

use thiserror::Error;

/// Errors a venue call can fail with (§7 error taxonomy, `code` values).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VenueError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimit { retry_after_ms: u64 },
    #[error("venue rejected request: {0}")]
    Rejected(String),
    #[error("venue returned malformed response: {0}")]
    Malformed(String),
}

/// Errors raised by the request policy wrapper around venue calls.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestPolicyError {
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("circuit breaker open, retry after {retry_after_ms}ms")]
    CircuitOpen { retry_after_ms: u64 },
    #[error("rate limit budget exhausted")]
    RateLimitExceeded,
    #[error("exceeded max retries ({0})")]
    MaxRetriesExceeded(u32),
    #[error(transparent)]
    Venue(#[from] VenueError),
}

/// Raised when a state machine is asked to apply an event that is not
/// valid from its current state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid transition: entity {entity_id} in state {from_state:?} cannot apply event {event:?} (terminal state: {is_terminal})")]
pub struct InvalidTransition {
    pub entity_id: String,
    pub from_state: String,
    pub event: String,
    pub is_terminal: bool,
}

impl InvalidTransition {
    pub fn new(entity_id: impl Into<String>, from_state: impl std::fmt::Debug, event: impl std::fmt::Debug, is_terminal: bool) -> Self {
        Self {
            entity_id: entity_id.into(),
            from_state: format!("{:?}", from_state),
            event: format!("{:?}", event),
            is_terminal,
        }
    }
}

/// Errors raised by the execution engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("estimated slippage {estimated} bps exceeds guard {guard} bps")]
    SlippageExceeded { estimated: i64, guard: i64 },
    #[error("business rule violated: {0}")]
    BusinessRuleViolation(String),
    #[error("left at partial execution phase: {0}")]
    PartialExecution(String),
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
    #[error(transparent)]
    RequestPolicy(#[from] RequestPolicyError),
}

/// Fatal configuration error — the only error category allowed to abort
/// process startup (§7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: String, reason: String },
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}
