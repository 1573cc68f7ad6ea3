//! # Scorers
//!
//! The thirteen recommendation algorithms, each behind the common
//! [`Scorer`] capability: `train` produces an opaque [`AlgorithmState`],
//! `score` ranks candidates against that state for a request context.
//!
//! Scorer structs hold only hyperparameters and are cheap to build; all
//! trained data lives in the `AlgorithmState` variant owned by the
//! snapshot, so serving and training never share mutable state.

pub mod als;
pub mod bpr;
pub mod content;
pub mod covisit;
pub mod ease;
pub mod fpmc;
pub mod knn;
pub mod linucb;
pub mod markov;
pub mod multihop;
pub mod popularity;
pub mod time_cf;

mod dataset;
mod linalg;

use std::collections::HashMap;

use rec_types::{EngineConfig, Interaction, Item, ItemId, Mode, Result, ScoredItem, UserId};

pub use als::AlsModel;
pub use bpr::BprModel;
pub use content::ContentModel;
pub use covisit::CoVisitModel;
pub use ease::EaseModel;
pub use fpmc::FpmcModel;
pub use knn::{ItemCfModel, UserCfModel};
pub use linucb::LinUcbModel;
pub use markov::MarkovModel;
pub use multihop::MultiHopModel;
pub use popularity::PopularityModel;
pub use time_cf::TimeCfModel;

/// Trained parameters for one algorithm. Tagged so a snapshot can carry
/// all thirteen side by side; each variant is owned exclusively by its
/// module.
#[derive(Debug, Clone)]
pub enum AlgorithmState {
    CoVisit(CoVisitModel),
    Content(ContentModel),
    Popularity(PopularityModel),
    Ease(EaseModel),
    Als(AlsModel),
    UserCf(UserCfModel),
    ItemCf(ItemCfModel),
    TimeCf(TimeCfModel),
    MultiHop(MultiHopModel),
    Markov(MarkovModel),
    Fpmc(FpmcModel),
    Bpr(BprModel),
    LinUcb(LinUcbModel),
}

/// Context handed to `Scorer::score` for one request.
#[derive(Debug, Clone)]
pub struct ScoreContext {
    pub mode: Mode,
    pub user_id: UserId,
    /// The item being viewed, for Similar and Next.
    pub current_item_id: Option<ItemId>,
    /// Upper bound on candidates to return.
    pub limit: usize,
}

/// The common algorithm capability: rank candidate items for a request.
///
/// `train` must be deterministic given identical inputs; randomized
/// trainers take an explicit seed through their hyperparameters. `score`
/// returns algorithm-native scores; normalization happens in the
/// orchestrator.
pub trait Scorer: Send + Sync {
    /// Stable identifier, also the key into config weights and the
    /// snapshot state map.
    fn name(&self) -> &'static str;

    /// Whether this scorer participates in the given mode.
    fn supports(&self, mode: Mode) -> bool {
        mode.eligible_algorithms().contains(&self.name())
    }

    /// Fit a fresh state from the interaction log and item catalog.
    fn train(&self, interactions: &[Interaction], items: &[Item]) -> Result<AlgorithmState>;

    /// Rank up to `ctx.limit` candidates against trained state.
    fn score(&self, state: &AlgorithmState, ctx: &ScoreContext) -> Result<Vec<ScoredItem>>;
}

/// Build all thirteen scorers from the active configuration. Adding a
/// fourteenth algorithm means adding one entry here and one module; the
/// orchestrator never changes.
pub fn build_scorers(cfg: &EngineConfig) -> Vec<Box<dyn Scorer>> {
    vec![
        Box::new(covisit::CoVisitScorer::new(cfg.covisit)),
        Box::new(content::ContentScorer::new(cfg.content)),
        Box::new(popularity::PopularityScorer::new(cfg.popularity)),
        Box::new(ease::EaseScorer::new(cfg.ease)),
        Box::new(als::AlsScorer::new(cfg.als, cfg.seed)),
        Box::new(knn::UserCfScorer::new(cfg.knn)),
        Box::new(knn::ItemCfScorer::new(cfg.knn)),
        Box::new(time_cf::TimeCfScorer::new(cfg.time_cf)),
        Box::new(multihop::MultiHopScorer::new(cfg.multihop)),
        Box::new(fpmc::FpmcScorer::new(cfg.fpmc, cfg.seed)),
        Box::new(markov::MarkovScorer::new(cfg.markov)),
        Box::new(bpr::BprScorer::new(cfg.bpr, cfg.seed)),
        Box::new(linucb::LinUcbScorer::new(cfg.linucb)),
    ]
}

/// Collapse a score map into a ranked, truncated candidate list.
/// Ordering is score descending, then item id ascending so repeated
/// calls against the same state rank identically.
pub(crate) fn top_n(
    scores: HashMap<ItemId, f64>,
    limit: usize,
    source: &'static str,
) -> Vec<ScoredItem> {
    let mut ranked: Vec<(ItemId, f64)> = scores
        .into_iter()
        .filter(|(_, s)| s.is_finite())
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked.truncate(limit);
    ranked
        .into_iter()
        .map(|(item_id, score)| ScoredItem::new(item_id, score, source))
        .collect()
}

#[cfg(test)]
pub(crate) mod testutil {
    use rec_types::{Interaction, Item};

    /// Interaction shorthand for fixtures.
    pub fn play(user_id: u64, item_id: u64, timestamp: i64) -> Interaction {
        Interaction {
            user_id,
            item_id,
            timestamp,
            weight: 1.0,
            session_id: None,
        }
    }

    pub fn play_weighted(user_id: u64, item_id: u64, timestamp: i64, weight: f64) -> Interaction {
        Interaction {
            user_id,
            item_id,
            timestamp,
            weight,
            session_id: None,
        }
    }

    pub fn movie(id: u64, genres: &[&str], people: &[&str], year: i32) -> Item {
        Item {
            id,
            title: format!("Item {id}"),
            media_type: "movie".into(),
            genres: genres.iter().map(|s| s.to_string()).collect(),
            people: people.iter().map(|s| s.to_string()).collect(),
            year: Some(year),
            ..Item::default()
        }
    }
}
