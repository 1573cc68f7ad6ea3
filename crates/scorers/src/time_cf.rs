//! Time-aware item CF: like item-based CF, but every interaction weight
//! decays exponentially with its age before the similarity matrix is
//! built, so the neighborhoods track what audiences watch together
//! *now* rather than what they watched together years ago. A floor
//! keeps ancient interactions from vanishing entirely.

use std::collections::HashMap;

use rayon::prelude::*;

use rec_types::config::TimeCfParams;
use rec_types::{Interaction, Item, ItemId, Mode, RecError, Result, ScoredItem, UserId};

use crate::dataset;
use crate::{AlgorithmState, ScoreContext, Scorer};

/// Overlap gate for the decayed cosine; one shared user is enough since
/// the decay already suppresses stale evidence.
const MIN_OVERLAP: usize = 1;

/// Trained time-CF state.
#[derive(Debug, Clone, Default)]
pub struct TimeCfModel {
    /// item -> (similar item, decayed cosine), sorted descending.
    pub neighbors: HashMap<ItemId, Vec<(ItemId, f64)>>,
    /// Per-user decayed item weights, for personalized aggregation.
    pub user_items: HashMap<UserId, HashMap<ItemId, f64>>,
}

pub struct TimeCfScorer {
    params: TimeCfParams,
}

impl TimeCfScorer {
    pub fn new(params: TimeCfParams) -> Self {
        Self { params }
    }

    fn decay(&self, age_secs: i64) -> f64 {
        let units = age_secs.max(0) as f64 / self.params.decay_unit_secs as f64;
        (-self.params.decay_rate * units).exp().max(self.params.min_weight)
    }
}

impl Scorer for TimeCfScorer {
    fn name(&self) -> &'static str {
        "time_cf"
    }

    fn train(&self, interactions: &[Interaction], _items: &[Item]) -> Result<AlgorithmState> {
        // Age is measured from the newest interaction in the log, not
        // wall clock, so retraining on identical data is stable.
        let now = interactions
            .iter()
            .map(|i| i.timestamp)
            .max()
            .unwrap_or_default();

        let mut item_users: HashMap<ItemId, HashMap<UserId, f64>> = HashMap::new();
        let mut user_items: HashMap<UserId, HashMap<ItemId, f64>> = HashMap::new();
        for inter in interactions {
            let decayed = inter.weight * self.decay(now - inter.timestamp);
            *item_users
                .entry(inter.item_id)
                .or_default()
                .entry(inter.user_id)
                .or_insert(0.0) += decayed;
            *user_items
                .entry(inter.user_id)
                .or_default()
                .entry(inter.item_id)
                .or_insert(0.0) += decayed;
        }

        let mut items: Vec<ItemId> = item_users.keys().copied().collect();
        items.sort_unstable();
        let neighbors: HashMap<ItemId, Vec<(ItemId, f64)>> = items
            .par_iter()
            .map(|&item| {
                let row = &item_users[&item];
                let mut sims: Vec<(ItemId, f64)> = items
                    .iter()
                    .filter(|&&other| other != item)
                    .filter_map(|&other| {
                        let sim = dataset::cosine(row, &item_users[&other], MIN_OVERLAP);
                        (sim > 0.0).then_some((other, sim))
                    })
                    .collect();
                sims.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(&b.0))
                });
                sims.truncate(self.params.neighbors);
                (item, sims)
            })
            .collect();

        Ok(AlgorithmState::TimeCf(TimeCfModel {
            neighbors,
            user_items,
        }))
    }

    fn score(&self, state: &AlgorithmState, ctx: &ScoreContext) -> Result<Vec<ScoredItem>> {
        let AlgorithmState::TimeCf(model) = state else {
            return Err(RecError::StateMismatch {
                algorithm: self.name(),
            });
        };

        let mut scores: HashMap<ItemId, f64> = HashMap::new();
        match ctx.mode {
            Mode::Similar => {
                let Some(list) = ctx
                    .current_item_id
                    .as_ref()
                    .and_then(|id| model.neighbors.get(id))
                else {
                    return Ok(Vec::new());
                };
                for &(item, sim) in list {
                    scores.insert(item, sim);
                }
            }
            _ => {
                let Some(row) = model.user_items.get(&ctx.user_id) else {
                    return Ok(Vec::new());
                };
                // Recent history carries more weight into the aggregate
                // because the per-interaction decay already applied.
                for (&owned, &weight) in row {
                    let Some(list) = model.neighbors.get(&owned) else {
                        continue;
                    };
                    for &(item, sim) in list {
                        if row.contains_key(&item) {
                            continue;
                        }
                        *scores.entry(item).or_insert(0.0) += sim * weight;
                    }
                }
            }
        }

        Ok(crate::top_n(scores, ctx.limit, self.name()))
    }
}
