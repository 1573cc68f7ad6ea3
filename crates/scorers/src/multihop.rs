//! Multi-hop traversal of an item similarity graph. Direct neighbors
//! are one hop; neighbors-of-neighbors arrive discounted by a per-hop
//! decay factor, surfacing items with no direct audience overlap but a
//! strong indirect path. Edges below a similarity floor are pruned so
//! the walk does not wander through noise.

use std::collections::HashMap;

use rayon::prelude::*;

use rec_types::config::MultiHopParams;
use rec_types::{Interaction, Item, ItemId, Mode, RecError, Result, ScoredItem, UserId};

use crate::dataset;
use crate::{AlgorithmState, ScoreContext, Scorer};

const MIN_OVERLAP: usize = 1;
/// Recent items seeding a personalized walk.
const SEED_ITEMS: usize = 5;

/// Trained multi-hop state: the pruned similarity graph.
#[derive(Debug, Clone, Default)]
pub struct MultiHopModel {
    /// item -> outgoing edges (neighbor, similarity), sorted descending,
    /// capped at `top_k_per_hop`.
    pub graph: HashMap<ItemId, Vec<(ItemId, f64)>>,
    pub user_recent: HashMap<UserId, Vec<ItemId>>,
}

pub struct MultiHopScorer {
    params: MultiHopParams,
}

impl MultiHopScorer {
    pub fn new(params: MultiHopParams) -> Self {
        Self { params }
    }

    /// Walk outward from the seeds, accumulating path scores. Each hop
    /// multiplies by the edge similarity and the decay factor, so long
    /// paths contribute progressively less.
    fn walk(&self, model: &MultiHopModel, seeds: &[ItemId]) -> HashMap<ItemId, f64> {
        let mut scores: HashMap<ItemId, f64> = HashMap::new();
        // (item, accumulated path score), deduplicated per hop.
        let mut frontier: Vec<(ItemId, f64)> = seeds.iter().map(|&s| (s, 1.0)).collect();

        for hop in 0..self.params.num_hops {
            let decay = self.params.decay_factor.powi(hop as i32);
            let mut next: HashMap<ItemId, f64> = HashMap::new();
            for &(item, path_score) in &frontier {
                let Some(edges) = model.graph.get(&item) else {
                    continue;
                };
                for &(neighbor, sim) in edges {
                    if seeds.contains(&neighbor) {
                        continue;
                    }
                    let contribution = path_score * sim * decay;
                    *scores.entry(neighbor).or_insert(0.0) += contribution;
                    let entry = next.entry(neighbor).or_insert(0.0);
                    if path_score * sim > *entry {
                        *entry = path_score * sim;
                    }
                }
            }
            let mut ordered: Vec<(ItemId, f64)> = next.into_iter().collect();
            ordered.sort_by_key(|&(id, _)| id);
            frontier = ordered;
        }

        scores
    }
}

impl Scorer for MultiHopScorer {
    fn name(&self) -> &'static str {
        "multihop"
    }

    fn train(&self, interactions: &[Interaction], _items: &[Item]) -> Result<AlgorithmState> {
        let item_users = dataset::item_user_weights(interactions);
        let mut items: Vec<ItemId> = item_users.keys().copied().collect();
        items.sort_unstable();

        let graph: HashMap<ItemId, Vec<(ItemId, f64)>> = items
            .par_iter()
            .map(|&item| {
                let row = &item_users[&item];
                let mut edges: Vec<(ItemId, f64)> = items
                    .iter()
                    .filter(|&&other| other != item)
                    .filter_map(|&other| {
                        let sim = dataset::cosine(row, &item_users[&other], MIN_OVERLAP);
                        (sim >= self.params.min_similarity).then_some((other, sim))
                    })
                    .collect();
                edges.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(&b.0))
                });
                edges.truncate(self.params.top_k_per_hop);
                (item, edges)
            })
            .collect();

        let user_recent = dataset::by_user(interactions)
            .into_iter()
            .map(|(user, events)| (user, dataset::recent_items(&events, SEED_ITEMS)))
            .collect();

        Ok(AlgorithmState::MultiHop(MultiHopModel { graph, user_recent }))
    }

    fn score(&self, state: &AlgorithmState, ctx: &ScoreContext) -> Result<Vec<ScoredItem>> {
        let AlgorithmState::MultiHop(model) = state else {
            return Err(RecError::StateMismatch {
                algorithm: self.name(),
            });
        };

        let seeds: Vec<ItemId> = match ctx.mode {
            Mode::Similar => ctx.current_item_id.into_iter().collect(),
            _ => model
                .user_recent
                .get(&ctx.user_id)
                .cloned()
                .unwrap_or_default(),
        };
        if seeds.is_empty() {
            return Ok(Vec::new());
        }

        Ok(crate::top_n(self.walk(model, &seeds), ctx.limit, self.name()))
    }
}
