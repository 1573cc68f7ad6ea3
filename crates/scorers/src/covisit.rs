//! Co-visitation: items that appear together in the same viewing
//! session. Pair counts are normalized by the source item's total so a
//! blockbuster co-occurring with everything does not dominate.

use std::collections::HashMap;

use rec_types::config::CoVisitParams;
use rec_types::{Interaction, Item, ItemId, Mode, RecError, Result, ScoredItem, UserId};

use crate::dataset;
use crate::{AlgorithmState, ScoreContext, Scorer};

/// How many recent items seed a personalized co-visitation lookup.
const SEED_ITEMS: usize = 10;

/// Trained co-visitation state: per-item neighbor lists plus each
/// user's recent items for personalized seeding.
#[derive(Debug, Clone, Default)]
pub struct CoVisitModel {
    /// item -> (neighbor, normalized co-occurrence), sorted descending.
    pub neighbors: HashMap<ItemId, Vec<(ItemId, f64)>>,
    pub user_recent: HashMap<UserId, Vec<ItemId>>,
}

pub struct CoVisitScorer {
    params: CoVisitParams,
}

impl CoVisitScorer {
    pub fn new(params: CoVisitParams) -> Self {
        Self { params }
    }
}

impl Scorer for CoVisitScorer {
    fn name(&self) -> &'static str {
        "covisit"
    }

    fn train(&self, interactions: &[Interaction], _items: &[Item]) -> Result<AlgorithmState> {
        let mut pair_counts: HashMap<(ItemId, ItemId), u32> = HashMap::new();
        let mut item_totals: HashMap<ItemId, u32> = HashMap::new();
        let mut user_recent = HashMap::new();

        for (user_id, events) in dataset::by_user(interactions) {
            user_recent.insert(user_id, dataset::recent_items(&events, SEED_ITEMS));
            for session in dataset::sessions(&events, self.params.session_window_secs) {
                for (i, &a) in session.iter().enumerate() {
                    for &b in &session[i + 1..] {
                        if a == b {
                            continue;
                        }
                        *pair_counts.entry((a, b)).or_insert(0) += 1;
                        *pair_counts.entry((b, a)).or_insert(0) += 1;
                        *item_totals.entry(a).or_insert(0) += 1;
                        *item_totals.entry(b).or_insert(0) += 1;
                    }
                }
            }
        }

        let mut neighbors: HashMap<ItemId, Vec<(ItemId, f64)>> = HashMap::new();
        for ((from, to), count) in pair_counts {
            if count < self.params.min_co_occurrence {
                continue;
            }
            let total = item_totals.get(&from).copied().unwrap_or(1).max(1);
            neighbors
                .entry(from)
                .or_default()
                .push((to, f64::from(count) / f64::from(total)));
        }
        for list in neighbors.values_mut() {
            list.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            list.truncate(self.params.max_neighbors);
        }

        Ok(AlgorithmState::CoVisit(CoVisitModel {
            neighbors,
            user_recent,
        }))
    }

    fn score(&self, state: &AlgorithmState, ctx: &ScoreContext) -> Result<Vec<ScoredItem>> {
        let AlgorithmState::CoVisit(model) = state else {
            return Err(RecError::StateMismatch {
                algorithm: self.name(),
            });
        };

        let mut scores: HashMap<ItemId, f64> = HashMap::new();
        match ctx.mode {
            Mode::Similar => {
                if let Some(current) = ctx.current_item_id {
                    if let Some(list) = model.neighbors.get(&current) {
                        for &(item, score) in list {
                            scores.insert(item, score);
                        }
                    }
                }
            }
            _ => {
                // Personalized: aggregate neighbors of the user's recent items.
                let seeds = model
                    .user_recent
                    .get(&ctx.user_id)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                for seed in seeds {
                    if let Some(list) = model.neighbors.get(seed) {
                        for &(item, score) in list {
                            *scores.entry(item).or_insert(0.0) += score;
                        }
                    }
                }
            }
        }

        Ok(crate::top_n(scores, ctx.limit, self.name()))
    }
}
