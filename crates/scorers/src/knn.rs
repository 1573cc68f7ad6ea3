//! Neighborhood collaborative filtering, both orientations. User-based
//! CF finds users with similar consumption vectors and recommends what
//! they watched; item-based CF finds items consumed by overlapping
//! audiences. Similarities are cosine over summed interaction weights,
//! gated by a minimum co-rated overlap, with neighbor lists precomputed
//! at training time.

use std::collections::HashMap;

use rayon::prelude::*;

use rec_types::config::KnnParams;
use rec_types::{Interaction, Item, ItemId, Mode, RecError, Result, ScoredItem, UserId};

use crate::dataset;
use crate::{AlgorithmState, ScoreContext, Scorer};

/// Trained user-CF state.
#[derive(Debug, Clone, Default)]
pub struct UserCfModel {
    /// user -> (similar user, cosine), sorted descending.
    pub neighbors: HashMap<UserId, Vec<(UserId, f64)>>,
    pub user_items: HashMap<UserId, HashMap<ItemId, f64>>,
}

/// Trained item-CF state.
#[derive(Debug, Clone, Default)]
pub struct ItemCfModel {
    /// item -> (similar item, cosine), sorted descending.
    pub neighbors: HashMap<ItemId, Vec<(ItemId, f64)>>,
    pub user_items: HashMap<UserId, HashMap<ItemId, f64>>,
}

/// Top-`n` cosine neighbors for every row of a sparse matrix. Rows are
/// processed in sorted key order so ties rank identically across runs.
fn neighbor_lists<K>(
    rows: &HashMap<K, HashMap<u64, f64>>,
    n: usize,
    min_overlap: usize,
) -> HashMap<K, Vec<(K, f64)>>
where
    K: Copy + Ord + std::hash::Hash + Send + Sync,
{
    let mut keys: Vec<K> = rows.keys().copied().collect();
    keys.sort_unstable();

    keys.par_iter()
        .map(|&key| {
            let row = &rows[&key];
            let mut sims: Vec<(K, f64)> = keys
                .iter()
                .filter(|&&other| other != key)
                .filter_map(|&other| {
                    let sim = dataset::cosine(row, &rows[&other], min_overlap);
                    (sim > 0.0).then_some((other, sim))
                })
                .collect();
            sims.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            sims.truncate(n);
            (key, sims)
        })
        .collect()
}

pub struct UserCfScorer {
    params: KnnParams,
}

impl UserCfScorer {
    pub fn new(params: KnnParams) -> Self {
        Self { params }
    }
}

impl Scorer for UserCfScorer {
    fn name(&self) -> &'static str {
        "user_cf"
    }

    fn train(&self, interactions: &[Interaction], _items: &[Item]) -> Result<AlgorithmState> {
        let user_items = dataset::user_item_weights(interactions);
        let neighbors = neighbor_lists(&user_items, self.params.neighbors, self.params.min_overlap);
        Ok(AlgorithmState::UserCf(UserCfModel {
            neighbors,
            user_items,
        }))
    }

    fn score(&self, state: &AlgorithmState, ctx: &ScoreContext) -> Result<Vec<ScoredItem>> {
        let AlgorithmState::UserCf(model) = state else {
            return Err(RecError::StateMismatch {
                algorithm: self.name(),
            });
        };

        let Some(neighbors) = model.neighbors.get(&ctx.user_id) else {
            return Ok(Vec::new());
        };
        let own = model.user_items.get(&ctx.user_id);

        // Score = sum over neighbors of similarity times the neighbor's
        // weight on the item, skipping items the user already has.
        let mut scores: HashMap<ItemId, f64> = HashMap::new();
        for &(neighbor, sim) in neighbors {
            let Some(row) = model.user_items.get(&neighbor) else {
                continue;
            };
            for (&item, &weight) in row {
                if own.is_some_and(|r| r.contains_key(&item)) {
                    continue;
                }
                *scores.entry(item).or_insert(0.0) += sim * weight;
            }
        }

        Ok(crate::top_n(scores, ctx.limit, self.name()))
    }
}

pub struct ItemCfScorer {
    params: KnnParams,
}

impl ItemCfScorer {
    pub fn new(params: KnnParams) -> Self {
        Self { params }
    }
}

impl Scorer for ItemCfScorer {
    fn name(&self) -> &'static str {
        "item_cf"
    }

    fn train(&self, interactions: &[Interaction], _items: &[Item]) -> Result<AlgorithmState> {
        let item_users = dataset::item_user_weights(interactions);
        let neighbors = neighbor_lists(&item_users, self.params.neighbors, self.params.min_overlap);
        Ok(AlgorithmState::ItemCf(ItemCfModel {
            neighbors,
            user_items: dataset::user_item_weights(interactions),
        }))
    }

    fn score(&self, state: &AlgorithmState, ctx: &ScoreContext) -> Result<Vec<ScoredItem>> {
        let AlgorithmState::ItemCf(model) = state else {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::play;

    fn params() -> KnnParams {
        KnnParams {
            neighbors: 10,
            min_overlap: 2,
        }
    }

    /// Users 1 and 2 overlap on items 10/11; user 2 also watched 12.
    /// User 3 is off in a separate corner.
    fn interactions() -> Vec<Interaction> {
        vec![
            play(1, 10, 0),
            play(1, 11, 10),
            play(2, 10, 0),
            play(2, 11, 10),
            play(2, 12, 20),
            play(3, 99, 0),
        ]
    }

    #[test]
    fn user_cf_recommends_what_the_neighbor_watched() {
        let scorer = UserCfScorer::new(params());
        let state = scorer.train(&interactions(), &[]).unwrap();
        let ctx = ScoreContext {
            mode: Mode::Personalized,
            user_id: 1,
            current_item_id: None,
            limit: 10,
        };
        let ranked = scorer.score(&state, &ctx).unwrap();
        assert_eq!(ranked[0].item_id, 12);
        assert!(
            !ranked.iter().any(|s| s.item_id == 10 || s.item_id == 11),
            "already-consumed items are skipped"
        );
    }

    #[test]
    fn user_cf_isolated_user_gets_nothing() {
        let scorer = UserCfScorer::new(params());
        let state = scorer.train(&interactions(), &[]).unwrap();
        let ctx = ScoreContext {
            mode: Mode::Personalized,
            user_id: 3,
            current_item_id: None,
            limit: 10,
        };
        assert!(scorer.score(&state, &ctx).unwrap().is_empty());
    }

    #[test]
    fn item_cf_similar_reads_the_neighbor_list() {
        let scorer = ItemCfScorer::new(params());
        let state = scorer.train(&interactions(), &[]).unwrap();
        let ctx = ScoreContext {
            mode: Mode::Similar,
            user_id: 99,
            current_item_id: Some(10),
            limit: 10,
        };
        let ranked = scorer.score(&state, &ctx).unwrap();
        assert_eq!(ranked[0].item_id, 11, "shared audience makes 10 and 11 neighbors");
        assert!(!ranked.iter().any(|s| s.item_id == 99));
    }

    #[test]
    fn item_cf_personalized_aggregates_over_history() {
        let scorer = ItemCfScorer::new(params());
        let state = scorer.train(&interactions(), &[]).unwrap();
        let ctx = ScoreContext {
            mode: Mode::Personalized,
            user_id: 1,
            current_item_id: None,
            limit: 10,
        };
        let ranked = scorer.score(&state, &ctx).unwrap();
        // User 1's items 10/11 are each other's neighbors and both are
        // owned, so nothing below min_overlap surfaces item 12 here.
        assert!(ranked.iter().all(|s| s.item_id != 10 && s.item_id != 11));
    }

    #[test]
    fn min_overlap_gates_noise_pairs() {
        let scorer = ItemCfScorer::new(KnnParams {
            neighbors: 10,
            min_overlap: 2,
        });
        // Items 10 and 12 share only user 2.
        let state = scorer.train(&interactions(), &[]).unwrap();
        let AlgorithmState::ItemCf(model) = &state else {
            panic!("wrong variant");
        };
        let neighbors = model.neighbors.get(&10).cloned().unwrap_or_default();
        assert!(!neighbors.iter().any(|&(item, _)| item == 12));
    }
}
