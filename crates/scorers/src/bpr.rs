//! BPR (Bayesian Personalized Ranking) matrix factorization. Optimizes
//! pairwise ranking directly: for each observed (user, item) pair the
//! model is pushed to score it above sampled unobserved items. Good at
//! ordering a user's plausible candidates even when absolute scores
//! mean little.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rec_types::config::BprParams;
use rec_types::{Interaction, Item, ItemId, Mode, RecError, Result, ScoredItem, UserId};

use crate::linalg;
use crate::{AlgorithmState, ScoreContext, Scorer};

/// Trained BPR state.
#[derive(Debug, Clone, Default)]
pub struct BprModel {
    pub items: Vec<ItemId>,
    pub user_index: HashMap<UserId, usize>,
    pub item_index: HashMap<ItemId, usize>,
    pub user_factors: Vec<Vec<f64>>,
    pub item_factors: Vec<Vec<f64>>,
    /// Items each user has interacted with; BPR never re-recommends them.
    pub user_positive: HashMap<UserId, HashSet<ItemId>>,
}

pub struct BprScorer {
    params: BprParams,
    seed: u64,
}

impl BprScorer {
    pub fn new(params: BprParams, seed: u64) -> Self {
        Self { params, seed }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl Scorer for BprScorer {
    fn name(&self) -> &'static str {
        "bpr"
    }

    fn train(&self, interactions: &[Interaction], _items: &[Item]) -> Result<AlgorithmState> {
        if interactions.is_empty() {
            return Err(RecError::InsufficientData { needed: 1, got: 0 });
        }

        let mut users: Vec<UserId> = interactions.iter().map(|i| i.user_id).collect();
        users.sort_unstable();
        users.dedup();
        let mut items: Vec<ItemId> = interactions.iter().map(|i| i.item_id).collect();
        items.sort_unstable();
        items.dedup();
        let user_index: HashMap<UserId, usize> =
            users.iter().enumerate().map(|(i, &u)| (u, i)).collect();
        let item_index: HashMap<ItemId, usize> =
            items.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let n_items = items.len();

        let mut user_positive: HashMap<UserId, HashSet<ItemId>> = HashMap::new();
        let mut pairs: Vec<(usize, usize)> = Vec::new();
        for inter in interactions {
            if user_positive
                .entry(inter.user_id)
                .or_default()
                .insert(inter.item_id)
            {
                pairs.push((user_index[&inter.user_id], item_index[&inter.item_id]));
            }
        }
        let positive_idx: Vec<HashSet<usize>> = users
            .iter()
            .map(|u| {
                user_positive[u]
                    .iter()
                    .map(|id| item_index[id])
                    .collect()
            })
            .collect();

        let factors = self.params.factors;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut init = |rows: usize| -> Vec<Vec<f64>> {
            (0..rows)
                .map(|_| (0..factors).map(|_| (rng.random::<f64>() - 0.5) * 0.1).collect())
                .collect()
        };
        let mut user_factors = init(users.len());
        let mut item_factors = init(n_items);

        let lr = self.params.learning_rate;
        let reg = self.params.regularization;
        for _ in 0..self.params.epochs {
            for &(u, i) in &pairs {
                for _ in 0..self.params.negative_samples {
                    // Uniform negative, skipped when every item is positive.
                    let mut j = rng.random_range(0..n_items);
                    let mut tries = 0;
                    while positive_idx[u].contains(&j) {
                        j = rng.random_range(0..n_items);
                        tries += 1;
                        if tries > 10 {
                            break;
                        }
                    }
                    if positive_idx[u].contains(&j) {
                        continue;
                    }

                    let x = linalg::dot(&user_factors[u], &item_factors[i])
                        - linalg::dot(&user_factors[u], &item_factors[j]);
                    let g = sigmoid(-x);
                    for f in 0..factors {
                        let wu = user_factors[u][f];
                        let hi = item_factors[i][f];
                        let hj = item_factors[j][f];
                        user_factors[u][f] += lr * (g * (hi - hj) - reg * wu);
                        item_factors[i][f] += lr * (g * wu - reg * hi);
                        item_factors[j][f] += lr * (-g * wu - reg * hj);
                    }
                }
            }
        }

        Ok(AlgorithmState::Bpr(BprModel {
            items,
            user_index,
            item_index,
            user_factors,
            item_factors,
            user_positive,
        }))
    }

    fn score(&self, state: &AlgorithmState, ctx: &ScoreContext) -> Result<Vec<ScoredItem>> {
        let AlgorithmState::Bpr(model) = state else {
            return Err(RecError::StateMismatch {
                algorithm: self.name(),
            });
        };

        let mut scores: HashMap<ItemId, f64> = HashMap::new();
        match ctx.mode {
            Mode::Similar => {
                let Some(&idx) = ctx
                    .current_item_id
                    .as_ref()
                    .and_then(|id| model.item_index.get(id))
                else {
                    return Ok(Vec::new());
                };
                let current = &model.item_factors[idx];
                for (j, factors) in model.item_factors.iter().enumerate() {
                    if j == idx {
                        continue;
                    }
                    let sim = linalg::cosine_dense(current, factors);
                    if sim > 0.0 {
                        scores.insert(model.items[j], sim);
                    }
                }
            }
            _ => {
                let Some(&uidx) = model.user_index.get(&ctx.user_id) else {
                    return Ok(Vec::new());
                };
                let positives = model.user_positive.get(&ctx.user_id);
                let user = &model.user_factors[uidx];
                for (j, factors) in model.item_factors.iter().enumerate() {
                    let item = model.items[j];
                    if positives.is_some_and(|p| p.contains(&item)) {
                        continue;
                    }
                    let s = linalg::dot(user, factors);
                    if s > 0.0 {
                        scores.insert(item, s);
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

    fn scorer() -> BprScorer {
        BprScorer::new(
            BprParams {
                factors: 8,
                learning_rate: 0.05,
                regularization: 0.01,
                epochs: 40,
                negative_samples: 5,
            },
            42,
        )
    }

    /// Cluster A (users 0-4) watches items 1-3; cluster B (users 10-14)
    /// watches items 5-7. User 0 has not seen item 3.
    fn interactions() -> Vec<Interaction> {
        let mut out = Vec::new();
        for user in 0..5 {
            out.push(play(user, 1, 0));
            out.push(play(user, 2, 60));
            if user != 0 {
                out.push(play(user, 3, 120));
            }
        }
        for user in 10..15 {
            out.push(play(user, 5, 0));
            out.push(play(user, 6, 60));
            out.push(play(user, 7, 120));
        }
        out
    }

    #[test]
    fn ranks_in_cluster_items_above_out_of_cluster() {
        let scorer = scorer();
        let state = scorer.train(&interactions(), &[]).unwrap();
        let ctx = ScoreContext {
            mode: Mode::Personalized,
            user_id: 0,
            current_item_id: None,
            limit: 1,
        };
        let ranked = scorer.score(&state, &ctx).unwrap();
        assert!(!ranked.is_empty());
        assert_eq!(ranked[0].item_id, 3, "held-out cluster item wins: {ranked:?}");
    }

    #[test]
    fn consumed_items_never_come_back() {
        let scorer = scorer();
        let state = scorer.train(&interactions(), &[]).unwrap();
        let ctx = ScoreContext {
            mode: Mode::Personalized,
            user_id: 1,
            current_item_id: None,
            limit: 10,
        };
        let ranked = scorer.score(&state, &ctx).unwrap();
        assert!(ranked.iter().all(|s| ![1, 2, 3].contains(&s.item_id)));
    }

    #[test]
    fn same_seed_reproduces_factors() {
        let a = scorer().train(&interactions(), &[]).unwrap();
        let b = scorer().train(&interactions(), &[]).unwrap();
        let (AlgorithmState::Bpr(ma), AlgorithmState::Bpr(mb)) = (&a, &b) else {
            panic!("wrong variant");
        };
        assert_eq!(ma.user_factors, mb.user_factors);
        assert_eq!(ma.item_factors, mb.item_factors);
    }
}
