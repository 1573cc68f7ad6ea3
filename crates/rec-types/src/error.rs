//! Error types for the recommendation engine.

use thiserror::Error;

/// Errors surfaced by the engine and its components.
#[derive(Error, Debug)]
pub enum RecError {
    /// Request failed validation before any scoring happened.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// A proposed configuration was rejected; the active config is unchanged.
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },

    /// Every scorer selected for the request failed or was ineligible.
    #[error("no scorer available for this request")]
    NoScorersAvailable,

    /// A training run was requested while one is already in flight.
    #[error("training already in progress")]
    TrainingInProgress,

    /// A scorer was handed trained state belonging to a different algorithm.
    #[error("state mismatch: {algorithm} received foreign state")]
    StateMismatch { algorithm: &'static str },

    /// Not enough data to train on.
    #[error("insufficient data: need at least {needed} interactions, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// A single scorer call exceeded its deadline.
    #[error("scorer {algorithm} timed out")]
    ScorerTimeout { algorithm: &'static str },

    /// The whole training run exceeded its deadline.
    #[error("training deadline exceeded")]
    TrainingTimeout,

    /// The data provider failed.
    #[error("data provider error: {0}")]
    Provider(String),

    /// Internal failure (joined task panicked, etc.).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, RecError>;
