//! EASE (Embarrassingly Shallow Autoencoder): a closed-form item-item
//! weight matrix. With the implicit-feedback matrix X and Gram matrix
//! G = XᵀX + λI, the model is B = I − P·diagMat(1/diag(P)) where
//! P = G⁻¹, constrained to a zero diagonal. No iterations, no learning
//! rate; the only knob is the ridge lambda.
//!
//! Memory scales quadratically with the item vocabulary, so training
//! caps the vocabulary at the most-interacted `max_items`.

use std::collections::HashMap;

use rayon::prelude::*;
use tracing::debug;

use rec_types::config::EaseParams;
use rec_types::{Interaction, Item, ItemId, Mode, RecError, Result, ScoredItem, UserId};

use crate::dataset;
use crate::linalg;
use crate::{AlgorithmState, ScoreContext, Scorer};

/// Trained EASE state.
#[derive(Debug, Clone, Default)]
pub struct EaseModel {
    /// Vocabulary, position = matrix index.
    pub items: Vec<ItemId>,
    pub index: HashMap<ItemId, usize>,
    /// The B matrix, zero diagonal.
    pub weights: Vec<Vec<f64>>,
    /// Per-user (item index, weight) rows for personalized scoring.
    pub user_rows: HashMap<UserId, Vec<(usize, f64)>>,
}

pub struct EaseScorer {
    params: EaseParams,
}

impl EaseScorer {
    pub fn new(params: EaseParams) -> Self {
        Self { params }
    }
}

impl Scorer for EaseScorer {
    fn name(&self) -> &'static str {
        "ease"
    }

    fn train(&self, interactions: &[Interaction], _items: &[Item]) -> Result<AlgorithmState> {
        if interactions.is_empty() {
            return Err(RecError::InsufficientData { needed: 1, got: 0 });
        }

        // Vocabulary: most-interacted items first, capped.
        let mut counts: HashMap<ItemId, u64> = HashMap::new();
        for inter in interactions {
            *counts.entry(inter.item_id).or_insert(0) += 1;
        }
        let mut ordered: Vec<(ItemId, u64)> = counts.into_iter().collect();
        ordered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ordered.truncate(self.params.max_items);
        let items: Vec<ItemId> = ordered.into_iter().map(|(id, _)| id).collect();
        let index: HashMap<ItemId, usize> =
            items.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let n = items.len();
        debug!(vocabulary = n, "fitting ease weight matrix");

        // Sparse user rows over the capped vocabulary.
        let user_rows: HashMap<UserId, Vec<(usize, f64)>> = dataset::user_item_weights(interactions)
            .into_iter()
            .map(|(user, row)| {
                let mut indexed: Vec<(usize, f64)> = row
                    .into_iter()
                    .filter_map(|(item, w)| index.get(&item).map(|&i| (i, w)))
                    .collect();
                indexed.sort_by_key(|&(i, _)| i);
                (user, indexed)
            })
            .collect();

        // Gram matrix G = XᵀX. Rows are computed independently in
        // parallel; within a row the accumulation order is fixed (user
        // rows sorted by id) so retraining on identical input is
        // bit-for-bit reproducible.
        let mut sorted_users: Vec<&UserId> = user_rows.keys().collect();
        sorted_users.sort();
        let rows: Vec<&Vec<(usize, f64)>> = sorted_users.iter().map(|u| &user_rows[u]).collect();
        let mut holders: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        for (row_idx, row) in rows.iter().enumerate() {
            for &(i, wi) in row.iter() {
                holders[i].push((row_idx, wi));
            }
        }
        let mut gram: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| {
                let mut out = vec![0.0; n];
                for &(row_idx, wi) in &holders[i] {
                    for &(j, wj) in rows[row_idx] {
                        out[j] += wi * wj;
                    }
                }
                out
            })
            .collect();
        for (i, row) in gram.iter_mut().enumerate() {
            row[i] += self.params.lambda;
        }

        let inverse = match linalg::cholesky(&gram) {
            Some(l) => linalg::cholesky_inverse(&l),
            // Regularized Gram should be positive-definite; fall back to
            // Gauss-Jordan for numerically borderline inputs.
            None => linalg::invert(&gram).ok_or_else(|| {
                RecError::Internal("ease: gram matrix is singular".to_string())
            })?,
        };

        let weights: Vec<Vec<f64>> = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| {
                        if i == j || inverse[j][j] == 0.0 {
                            0.0
                        } else {
                            -inverse[i][j] / inverse[j][j]
                        }
                    })
                    .collect()
            })
            .collect();

        Ok(AlgorithmState::Ease(EaseModel {
            items,
            index,
            weights,
            user_rows,
        }))
    }

    fn score(&self, state: &AlgorithmState, ctx: &ScoreContext) -> Result<Vec<ScoredItem>> {
        let AlgorithmState::Ease(model) = state else {
            return Err(RecError::StateMismatch {
                algorithm: self.name(),
            });
        };
        if model.items.is_empty() {
            return Ok(Vec::new());
        }

        let mut scores: HashMap<ItemId, f64> = HashMap::new();
        match ctx.mode {
            Mode::Similar => {
                let Some(&idx) = ctx
                    .current_item_id
                    .as_ref()
                    .and_then(|id| model.index.get(id))
                else {
                    return Ok(Vec::new());
                };
                for (j, &w) in model.weights[idx].iter().enumerate() {
                    if j != idx && w > 0.0 {
                        scores.insert(model.items[j], w);
                    }
                }
            }
            _ => {
                let Some(row) = model.user_rows.get(&ctx.user_id) else {
                    return Ok(Vec::new());
                };
                let mut dense = vec![0.0; model.items.len()];
                for &(i, wi) in row {
                    for (j, &b) in model.weights[i].iter().enumerate() {
                        dense[j] += wi * b;
                    }
                }
                for (j, &s) in dense.iter().enumerate() {
                    if s > 0.0 {
                        scores.insert(model.items[j], s);
                    }
                }
            }
        }

        Ok(crate::top_n(scores, ctx.limit, self.name()))
    }
}
