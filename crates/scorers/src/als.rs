//! Implicit-feedback ALS (alternating least squares). Interaction
//! weights become confidences c = 1 + alpha·w; user and item factor
//! matrices are alternately refit in closed form. Factor init is seeded
//! so training is reproducible.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use rec_types::config::AlsParams;
use rec_types::{Interaction, Item, ItemId, Mode, RecError, Result, ScoredItem, UserId};

use crate::linalg;
use crate::{AlgorithmState, ScoreContext, Scorer};

/// Trained ALS state: dense factor matrices plus id/index maps.
#[derive(Debug, Clone, Default)]
pub struct AlsModel {
    pub users: Vec<UserId>,
    pub items: Vec<ItemId>,
    pub user_index: HashMap<UserId, usize>,
    pub item_index: HashMap<ItemId, usize>,
    pub user_factors: Vec<Vec<f64>>,
    pub item_factors: Vec<Vec<f64>>,
}

pub struct AlsScorer {
    params: AlsParams,
    seed: u64,
}

impl AlsScorer {
    pub fn new(params: AlsParams, seed: u64) -> Self {
        Self { params, seed }
    }

    /// One half-iteration: refit `targets` given fixed `fixed` factors.
    /// Each row solves (FᵀF + λI + Σ(c−1)f fᵀ) x = Σ c·f over its
    /// observed entries.
    fn solve_side(
        &self,
        observed: &[Vec<(usize, f64)>],
        fixed: &[Vec<f64>],
        factors: usize,
    ) -> Vec<Vec<f64>> {
        let lambda = self.params.lambda;
        let alpha = self.params.alpha;

        // FᵀF accumulated in fixed row order.
        let mut ftf = vec![vec![0.0; factors]; factors];
        for row in fixed {
            for a in 0..factors {
                for b in 0..factors {
                    ftf[a][b] += row[a] * row[b];
                }
            }
        }

        observed
            .par_iter()
            .map(|entries| {
                if entries.is_empty() {
                    return vec![0.0; factors];
                }
                let mut a = ftf.clone();
                let mut b = vec![0.0; factors];
                for &(idx, weight) in entries {
                    let confidence = 1.0 + alpha * weight;
                    let row = &fixed[idx];
                    for i in 0..factors {
                        b[i] += confidence * row[i];
                        for j in 0..factors {
                            a[i][j] += (confidence - 1.0) * row[i] * row[j];
                        }
                    }
                }
                for (i, row) in a.iter_mut().enumerate() {
                    row[i] += lambda;
                }
                linalg::solve(a, b)
            })
            .collect()
    }
}

impl Scorer for AlsScorer {
    fn name(&self) -> &'static str {
        "als"
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

        let mut user_obs: Vec<Vec<(usize, f64)>> = vec![Vec::new(); users.len()];
        let mut item_obs: Vec<Vec<(usize, f64)>> = vec![Vec::new(); items.len()];
        for inter in interactions {
            let u = user_index[&inter.user_id];
            let i = item_index[&inter.item_id];
            user_obs[u].push((i, inter.weight));
            item_obs[i].push((u, inter.weight));
        }
        for obs in user_obs.iter_mut().chain(item_obs.iter_mut()) {
            obs.sort_by(|a, b| a.0.cmp(&b.0));
        }

        let factors = self.params.factors;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut init = |rows: usize| -> Vec<Vec<f64>> {
            (0..rows)
                .map(|_| (0..factors).map(|_| rng.random::<f64>() * 0.1).collect())
                .collect()
        };
        let mut user_factors = init(users.len());
        let mut item_factors = init(items.len());

        for _ in 0..self.params.iterations {
            user_factors = self.solve_side(&user_obs, &item_factors, factors);
            item_factors = self.solve_side(&item_obs, &user_factors, factors);
        }

        Ok(AlgorithmState::Als(AlsModel {
            users,
            items,
            user_index,
            item_index,
            user_factors,
            item_factors,
        }))
    }

    fn score(&self, state: &AlgorithmState, ctx: &ScoreContext) -> Result<Vec<ScoredItem>> {
        let AlgorithmState::Als(model) = state else {
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
                let user = &model.user_factors[uidx];
                for (j, factors) in model.item_factors.iter().enumerate() {
                    let s = linalg::dot(user, factors);
                    if s > 0.0 {
                        scores.insert(model.items[j], s);
                    }
                }
            }
        }

        Ok(crate::top_n(scores, ctx.limit, self.name()))
    }
}
