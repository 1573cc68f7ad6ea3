//! Core domain types: interactions, items, requests and responses.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Internal user identifier.
pub type UserId = u64;

/// Item identifier (the media server's rating key).
pub type ItemId = u64;

/// Unix timestamp in seconds.
pub type Timestamp = i64;

/// Classification of an interaction by playback completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// Less than 10% watched.
    Abandoned,
    /// 10-50% watched.
    Sampled,
    /// 50-90% watched.
    Engaged,
    /// 90% or more watched.
    Completed,
}

impl InteractionKind {
    /// Classify by completion percentage.
    pub fn classify(percent_complete: u8) -> Self {
        match percent_complete {
            90..=u8::MAX => Self::Completed,
            50..=89 => Self::Engaged,
            10..=49 => Self::Sampled,
            _ => Self::Abandoned,
        }
    }

    /// Confidence weight for implicit feedback. Non-zero even for
    /// abandoned plays to avoid singular matrices in the factor models.
    pub fn confidence(self) -> f64 {
        match self {
            Self::Completed => 1.0,
            Self::Engaged => 0.7,
            Self::Sampled => 0.3,
            Self::Abandoned => 0.1,
        }
    }
}

/// A single user-item interaction event. Immutable, supplied by the data
/// provider; the upstream dedup layer guarantees at most one record per
/// real playback session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: UserId,
    pub item_id: ItemId,
    /// When the interaction occurred (unix seconds).
    pub timestamp: Timestamp,
    /// Implicit-feedback confidence weight, typically in (0, 1.5].
    pub weight: f64,
    /// Groups interactions within a viewing session, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Content item metadata, read-only to the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub title: String,
    /// movie, episode, track.
    pub media_type: String,
    #[serde(default)]
    pub genres: Vec<String>,
    /// Directors and cast, merged.
    #[serde(default)]
    pub people: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    /// Pre-computed time-decayed popularity metric.
    #[serde(default)]
    pub popularity_decay_score: f64,
    /// Season rating key for episodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ItemId>,
    /// Series rating key for episodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grandparent_id: Option<ItemId>,
}

/// Recommendation request shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// "What should this user watch."
    Personalized,
    /// "More like this" for a given item.
    Similar,
    /// Discovery, favoring high-uncertainty items.
    Explore,
    /// Sequential "what's next" after the current item.
    Next,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Personalized => "personalized",
            Self::Similar => "similar",
            Self::Explore => "explore",
            Self::Next => "next",
        }
    }

    /// True when the mode requires `current_item_id`.
    pub fn requires_current_item(self) -> bool {
        matches!(self, Self::Similar | Self::Next)
    }

    /// Algorithm names eligible for this mode. The orchestrator
    /// intersects this with the enabled set and the trained snapshot.
    pub fn eligible_algorithms(self) -> &'static [&'static str] {
        match self {
            Self::Personalized => &[
                "covisit", "content", "popularity", "ease", "als", "user_cf", "item_cf",
                "time_cf", "multihop", "fpmc", "markov", "bpr",
            ],
            Self::Similar => &[
                "covisit", "content", "ease", "als", "item_cf", "time_cf", "multihop",
                "markov", "bpr",
            ],
            Self::Explore => &["linucb", "popularity"],
            Self::Next => &["markov", "fpmc", "popularity"],
        }
    }
}

/// All thirteen algorithm names, in canonical order.
pub const ALGORITHM_NAMES: [&str; 13] = [
    "covisit", "content", "popularity", "ease", "als", "user_cf", "item_cf", "time_cf",
    "multihop", "fpmc", "markov", "bpr", "linucb",
];

/// A recommendation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub user_id: UserId,
    /// Number of items to return. Zero takes the mode default; values
    /// above the mode cap are clamped, not rejected.
    #[serde(default)]
    pub k: usize,
    pub mode: Mode,
    /// Required for Similar and Next.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item_id: Option<ItemId>,
    /// Caller-supplied items to exclude from the result.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<ItemId>,
    /// Caller deadline for the whole request. Scorers still running when
    /// it expires are dropped and the response blends what finished,
    /// flagged partial. `None` leaves only the per-scorer timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// An item with its blended recommendation score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item_id: ItemId,
    /// Blended score after normalization and weighting (serving), or the
    /// algorithm-native score (inside a single scorer's output).
    pub score: f64,
    /// The algorithm that contributed most to this item's blended score.
    pub source: String,
    /// Raw per-algorithm scores before blending.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub breakdown: HashMap<String, f64>,
}

impl ScoredItem {
    pub fn new(item_id: ItemId, score: f64, source: &str) -> Self {
        Self {
            item_id,
            score,
            source: source.to_string(),
            breakdown: HashMap::new(),
        }
    }
}

/// Recommendation response: ranked items plus serving metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub items: Vec<ScoredItem>,
    pub metadata: ResponseMetadata,
}

/// Serving metadata attached to every response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub request_id: String,
    pub mode: String,
    /// Version of the snapshot the request was served against.
    pub model_version: u64,
    pub latency_ms: u64,
    /// Algorithms that contributed scores.
    pub algorithms_invoked: Vec<String>,
    /// Algorithms that were selected but failed or timed out.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub algorithms_failed: Vec<String>,
    /// True when at least one selected algorithm did not contribute.
    pub partial: bool,
    /// Unix seconds when the response was generated.
    pub generated_at: Timestamp,
}

/// Pollable training state, mutated only by the training coordinator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingStatus {
    pub is_training: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_started_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_completed_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Version of the most recently published snapshot.
    pub model_version: u64,
    pub last_duration_ms: u64,
    pub interaction_count: usize,
    pub item_count: usize,
    pub user_count: usize,
}
