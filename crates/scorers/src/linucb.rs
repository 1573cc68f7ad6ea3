//! LinUCB contextual bandit, the exploration arm of Explore mode. Each
//! item is an arm with a ridge-regression estimate of expected reward
//! over its feature vector plus an upper-confidence bonus that shrinks
//! as the arm accumulates observations. Barely-played items keep a wide
//! bonus and keep getting proposed.

use std::collections::HashMap;

use rec_types::config::LinUcbParams;
use rec_types::{Interaction, Item, ItemId, RecError, Result, ScoredItem};

use crate::linalg;
use crate::{AlgorithmState, ScoreContext, Scorer};

/// Trained bandit state: per-arm ridge estimates, precomputed at
/// training time so scoring is a dot product and one quadratic form.
#[derive(Debug, Clone, Default)]
pub struct LinUcbModel {
    /// Arms in ascending item id order.
    pub items: Vec<ItemId>,
    pub features: HashMap<ItemId, Vec<f64>>,
    /// Per-arm ridge solution A⁻¹b.
    pub theta: HashMap<ItemId, Vec<f64>>,
    /// Per-arm inverse design matrix, for the confidence bonus.
    pub a_inv: HashMap<ItemId, Vec<Vec<f64>>>,
}

pub struct LinUcbScorer {
    params: LinUcbParams,
}

impl LinUcbScorer {
    pub fn new(params: LinUcbParams) -> Self {
        Self { params }
    }

    /// Static item context: bias, normalized year, decayed popularity,
    /// then hashed genre slots.
    fn featurize(&self, item: &Item) -> Vec<f64> {
        let dim = self.params.feature_dim;
        let mut x = vec![0.0; dim];
        x[0] = 1.0;
        x[1] = item
            .year
            .map(|y| ((f64::from(y) - 1950.0) / 100.0).clamp(0.0, 1.0))
            .unwrap_or(0.0);
        x[2] = item.popularity_decay_score.clamp(0.0, 1.0);
        let slots = dim - 3;
        if slots > 0 {
            for genre in &item.genres {
                x[3 + fnv1a(genre) as usize % slots] = 1.0;
            }
        }
        x
    }
}

/// Stable string hash for genre slot assignment; std's hasher is
/// randomized per process.
fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in s.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

impl Scorer for LinUcbScorer {
    fn name(&self) -> &'static str {
        "linucb"
    }

    fn train(&self, interactions: &[Interaction], items: &[Item]) -> Result<AlgorithmState> {
        let dim = self.params.feature_dim;
        let features: HashMap<ItemId, Vec<f64>> = items
            .iter()
            .map(|item| (item.id, self.featurize(item)))
            .collect();

        // Reward observations per arm; weight clamps to [0, 1] so a
        // binge does not read as a 10x reward.
        let mut counts: HashMap<ItemId, (u64, f64)> = HashMap::new();
        for inter in interactions {
            let entry = counts.entry(inter.item_id).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += inter.weight.clamp(0.0, 1.0);
        }

        let mut model = LinUcbModel {
            items: items.iter().map(|i| i.id).collect(),
            features,
            theta: HashMap::new(),
            a_inv: HashMap::new(),
        };
        model.items.sort_unstable();

        for &item_id in &model.items {
            let Some(x) = model.features.get(&item_id) else {
                continue;
            };
            let (n, reward_sum) = counts.get(&item_id).copied().unwrap_or((0, 0.0));

            // A = I + n·xxᵀ, b = (Σ reward)·x.
            let mut a = vec![vec![0.0; dim]; dim];
            for (i, row) in a.iter_mut().enumerate() {
                row[i] = 1.0;
                for j in 0..dim {
                    row[j] += n as f64 * x[i] * x[j];
                }
            }
            let a_inv = linalg::invert(&a).ok_or_else(|| {
                RecError::Internal(format!("linucb: singular design matrix for item {item_id}"))
            })?;
            let theta: Vec<f64> = a_inv
                .iter()
                .map(|row| row.iter().zip(x).map(|(aij, xj)| aij * xj * reward_sum).sum())
                .collect();

            model.theta.insert(item_id, theta);
            model.a_inv.insert(item_id, a_inv);
        }

        Ok(AlgorithmState::LinUcb(model))
    }

    fn score(&self, state: &AlgorithmState, ctx: &ScoreContext) -> Result<Vec<ScoredItem>> {
        let AlgorithmState::LinUcb(model) = state else {
            return Err(RecError::StateMismatch {
                algorithm: self.name(),
            });
        };

        let mut scores: HashMap<ItemId, f64> = HashMap::new();
        for &item_id in &model.items {
            if Some(item_id) == ctx.current_item_id {
                continue;
            }
            let (Some(x), Some(theta), Some(a_inv)) = (
                model.features.get(&item_id),
                model.theta.get(&item_id),
                model.a_inv.get(&item_id),
            ) else {
                continue;
            };
            let estimate = linalg::dot(theta, x);
            // Bonus: α·sqrt(xᵀ A⁻¹ x).
            let quad: f64 = a_inv
                .iter()
                .zip(x)
                .map(|(row, &xi)| xi * linalg::dot(row, x))
                .sum();
            let ucb = estimate + self.params.alpha * quad.max(0.0).sqrt();
            if ucb > 0.0 {
                scores.insert(item_id, ucb);
            }
        }

        Ok(crate::top_n(scores, ctx.limit, self.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{movie, play_weighted};
    use rec_types::Mode;

    fn scorer() -> LinUcbScorer {
        LinUcbScorer::new(LinUcbParams {
            alpha: 1.0,
            feature_dim: 16,
        })
    }

    fn catalog() -> Vec<Item> {
        vec![
            movie(1, &["scifi"], &[], 2020),
            movie(2, &["drama"], &[], 2021),
            movie(3, &["comedy"], &[], 2022),
        ]
    }

    #[test]
    fn unplayed_items_keep_the_widest_bonus() {
        // Item 1 heavily observed with low reward; items 2 and 3 unseen.
        let interactions: Vec<Interaction> = (0..50)
            .map(|u| play_weighted(u, 1, i64::from(u as u32), 0.1))
            .collect();
        let scorer = scorer();
        let state = scorer.train(&interactions, &catalog()).unwrap();
        let ctx = ScoreContext {
            mode: Mode::Explore,
            user_id: 7,
            current_item_id: None,
            limit: 3,
        };
        let ranked = scorer.score(&state, &ctx).unwrap();
        let pos = |id: u64| ranked.iter().position(|s| s.item_id == id).unwrap();
        assert!(
            pos(2) < pos(1) && pos(3) < pos(1),
            "unexplored arms outrank a well-observed weak arm: {ranked:?}"
        );
    }

    #[test]
    fn high_reward_arm_survives_heavy_observation() {
        // Item 1 observed many times at full reward, item 2 a few times
        // at near-zero reward.
        let mut interactions: Vec<Interaction> = (0..100)
            .map(|u| play_weighted(u, 1, i64::from(u as u32), 1.0))
            .collect();
        for u in 0..100 {
            interactions.push(play_weighted(u, 2, i64::from(u as u32), 0.01));
        }
        let scorer = scorer();
        let state = scorer.train(&interactions, &catalog()).unwrap();
        let ctx = ScoreContext {
            mode: Mode::Explore,
            user_id: 7,
            current_item_id: None,
            limit: 3,
        };
        let ranked = scorer.score(&state, &ctx).unwrap();
        let pos = |id: u64| ranked.iter().position(|s| s.item_id == id).unwrap();
        assert!(pos(1) < pos(2), "earned reward beats an exhausted bonus: {ranked:?}");
    }

    #[test]
    fn genre_slots_are_stable_across_calls() {
        let scorer = scorer();
        let item = movie(1, &["scifi", "drama"], &[], 2020);
        assert_eq!(scorer.featurize(&item), scorer.featurize(&item));
    }

    #[test]
    fn current_item_is_excluded() {
        let scorer = scorer();
        let state = scorer.train(&[], &catalog()).unwrap();
        let ctx = ScoreContext {
            mode: Mode::Explore,
            user_id: 7,
            current_item_id: Some(2),
            limit: 10,
        };
        let ranked = scorer.score(&state, &ctx).unwrap();
        assert!(!ranked.iter().any(|s| s.item_id == 2));
    }
}
