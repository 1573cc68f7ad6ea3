//! FPMC (Factorized Personalized Markov Chains): a pairwise-ranking
//! model over (user, previous item, next item) triples mined from
//! sessions. The score sums a user-taste term <U_u, I_i> and a
//! sequential term <T_i, L_prev>, so it blends long-term preference
//! with what tends to follow the item just played. Trained with S-BPR
//! SGD and a seeded sampler.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rec_types::config::FpmcParams;
use rec_types::{Interaction, Item, ItemId, Mode, RecError, Result, ScoredItem, UserId};

use crate::dataset;
use crate::linalg;
use crate::{AlgorithmState, ScoreContext, Scorer};

/// Session window for mining transition triples.
const SESSION_WINDOW_SECS: i64 = 6 * 3600;

/// Trained FPMC state.
#[derive(Debug, Clone, Default)]
pub struct FpmcModel {
    pub items: Vec<ItemId>,
    pub user_index: HashMap<UserId, usize>,
    pub item_index: HashMap<ItemId, usize>,
    /// User taste factors.
    pub user_factors: Vec<Vec<f64>>,
    /// Item factors paired with the user side.
    pub item_user_factors: Vec<Vec<f64>>,
    /// Next-item factors paired with the previous-item side.
    pub item_next_factors: Vec<Vec<f64>>,
    /// Previous-item factors.
    pub item_prev_factors: Vec<Vec<f64>>,
    pub user_last: HashMap<UserId, ItemId>,
}

impl FpmcModel {
    /// Score for user `u` moving from item `prev` to candidate `i`.
    /// Either component degrades gracefully to zero when its index is
    /// missing.
    fn predict(&self, u: Option<usize>, prev: Option<usize>, i: usize) -> f64 {
        let mut score = 0.0;
        if let Some(u) = u {
            score += linalg::dot(&self.user_factors[u], &self.item_user_factors[i]);
        }
        if let Some(prev) = prev {
            score += linalg::dot(&self.item_next_factors[i], &self.item_prev_factors[prev]);
        }
        score
    }
}

pub struct FpmcScorer {
    params: FpmcParams,
    seed: u64,
}

impl FpmcScorer {
    pub fn new(params: FpmcParams, seed: u64) -> Self {
        Self { params, seed }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl Scorer for FpmcScorer {
    fn name(&self) -> &'static str {
        "fpmc"
    }

    fn train(&self, interactions: &[Interaction], _items: &[Item]) -> Result<AlgorithmState> {
        // Mine (user, prev, next) triples from session-ordered plays.
        let mut user_last: HashMap<UserId, ItemId> = HashMap::new();
        let mut triples: Vec<(UserId, ItemId, ItemId)> = Vec::new();
        let by_user = dataset::by_user(interactions);
        let mut users: Vec<UserId> = by_user.keys().copied().collect();
        users.sort_unstable();
        for &user in &users {
            let events = &by_user[&user];
            if let Some(last) = events.last() {
                user_last.insert(user, last.item_id);
            }
            for session in dataset::sessions(events, SESSION_WINDOW_SECS) {
                for pair in session.windows(2) {
                    triples.push((user, pair[0], pair[1]));
                }
            }
        }
        if triples.is_empty() {
            return Err(RecError::InsufficientData {
                needed: 1,
                got: 0,
            });
        }

        let mut items: Vec<ItemId> = interactions.iter().map(|i| i.item_id).collect();
        items.sort_unstable();
        items.dedup();
        let item_index: HashMap<ItemId, usize> =
            items.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let user_index: HashMap<UserId, usize> =
            users.iter().enumerate().map(|(i, &u)| (u, i)).collect();
        let n_items = items.len();
        let factors = self.params.factors;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut init = |rows: usize| -> Vec<Vec<f64>> {
            (0..rows)
                .map(|_| (0..factors).map(|_| (rng.random::<f64>() - 0.5) * 0.1).collect())
                .collect()
        };
        let mut model = FpmcModel {
            user_factors: init(users.len()),
            item_user_factors: init(n_items),
            item_next_factors: init(n_items),
            item_prev_factors: init(n_items),
            items,
            user_index,
            item_index,
            user_last,
        };

        let lr = self.params.learning_rate;
        let reg = self.params.regularization;
        for _ in 0..self.params.epochs {
            for &(user, prev, pos) in &triples {
                let u = model.user_index[&user];
                let p = model.item_index[&prev];
                let i = model.item_index[&pos];
                // Uniform negative; resample if it collides with the positive.
                let mut j = rng.random_range(0..n_items);
                if j == i {
                    j = (j + 1) % n_items;
                }

                let x = model.predict(Some(u), Some(p), i)
                    - model.predict(Some(u), Some(p), j);
                let g = sigmoid(-x);

                for f in 0..factors {
                    let wu = model.user_factors[u][f];
                    let hi = model.item_user_factors[i][f];
                    let hj = model.item_user_factors[j][f];
                    model.user_factors[u][f] += lr * (g * (hi - hj) - reg * wu);
                    model.item_user_factors[i][f] += lr * (g * wu - reg * hi);
                    model.item_user_factors[j][f] += lr * (-g * wu - reg * hj);

                    let lp = model.item_prev_factors[p][f];
                    let ti = model.item_next_factors[i][f];
                    let tj = model.item_next_factors[j][f];
                    model.item_prev_factors[p][f] += lr * (g * (ti - tj) - reg * lp);
                    model.item_next_factors[i][f] += lr * (g * lp - reg * ti);
                    model.item_next_factors[j][f] += lr * (-g * lp - reg * tj);
                }
            }
        }

        Ok(AlgorithmState::Fpmc(model))
    }

    fn score(&self, state: &AlgorithmState, ctx: &ScoreContext) -> Result<Vec<ScoredItem>> {
        let AlgorithmState::Fpmc(model) = state else {
            return Err(RecError::StateMismatch {
                algorithm: self.name(),
            });
        };

        let u = model.user_index.get(&ctx.user_id).copied();
        // The sequential basket: the current item for Next, the user's
        // last play otherwise.
        let prev_id = match ctx.mode {
            Mode::Next => ctx.current_item_id,
            _ => model.user_last.get(&ctx.user_id).copied(),
        };
        let prev = prev_id.and_then(|id| model.item_index.get(&id).copied());
        if u.is_none() && prev.is_none() {
            return Ok(Vec::new());
        }

        let mut scores: HashMap<ItemId, f64> = HashMap::new();
        for (i, &item) in model.items.iter().enumerate() {
            if Some(item) == prev_id {
                continue;
            }
            let s = model.predict(u, prev, i);
            if s > 0.0 {
                scores.insert(item, s);
            }
        }

        Ok(crate::top_n(scores, ctx.limit, self.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::play;

    fn scorer() -> FpmcScorer {
        FpmcScorer::new(
            FpmcParams {
                factors: 8,
                learning_rate: 0.05,
                regularization: 0.01,
                epochs: 60,
            },
            42,
        )
    }

    /// A strong sequential pattern: 1 is always followed by 2, never by
    /// 3; item 3 follows item 2.
    fn interactions() -> Vec<Interaction> {
        let mut out = Vec::new();
        for user in 0..8 {
            out.push(play(user, 1, 0));
            out.push(play(user, 2, 60));
            out.push(play(user, 3, 120));
        }
        out
    }

    #[test]
    fn next_learns_the_dominant_successor() {
        let scorer = scorer();
        let state = scorer.train(&interactions(), &[]).unwrap();
        let ctx = ScoreContext {
            mode: Mode::Next,
            user_id: 0,
            current_item_id: Some(1),
            limit: 2,
        };
        let ranked = scorer.score(&state, &ctx).unwrap();
        assert!(!ranked.is_empty());
        assert_eq!(ranked[0].item_id, 2, "1 is always followed by 2: {ranked:?}");
    }

    #[test]
    fn current_item_never_recommends_itself() {
        let scorer = scorer();
        let state = scorer.train(&interactions(), &[]).unwrap();
        let ctx = ScoreContext {
            mode: Mode::Next,
            user_id: 0,
            current_item_id: Some(2),
            limit: 10,
        };
        let ranked = scorer.score(&state, &ctx).unwrap();
        assert!(ranked.iter().all(|s| s.item_id != 2));
    }

    #[test]
    fn same_seed_reproduces_the_model() {
        let a = scorer().train(&interactions(), &[]).unwrap();
        let b = scorer().train(&interactions(), &[]).unwrap();
        let (AlgorithmState::Fpmc(ma), AlgorithmState::Fpmc(mb)) = (&a, &b) else {
            panic!("wrong variant");
        };
        assert_eq!(ma.user_factors, mb.user_factors);
        assert_eq!(ma.item_next_factors, mb.item_next_factors);
    }

    #[test]
    fn no_transitions_is_insufficient_data() {
        // Single plays only, no sequences.
        let log = vec![play(1, 1, 0), play(2, 2, 0)];
        assert!(matches!(
            scorer().train(&log, &[]),
            Err(RecError::InsufficientData { .. })
        ));
    }
}
