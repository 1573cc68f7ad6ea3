//! Shared data model for the recommendation engine.
//!
//! This crate holds the types that cross component boundaries: interaction
//! records, item metadata, requests/responses, training status, engine
//! configuration and the error type. It deliberately has no dependency on
//! the algorithm or engine crates so that every other crate can depend on
//! it without cycles.

pub mod config;
pub mod error;
pub mod types;

pub use config::{AlgoToggle, EngineConfig, ServingConfig, TrainingConfig};
pub use error::{RecError, Result};
pub use types::{
    ALGORITHM_NAMES, Interaction, InteractionKind, Item, ItemId, Mode, Request, Response,
    ResponseMetadata, ScoredItem, Timestamp, TrainingStatus, UserId,
};
