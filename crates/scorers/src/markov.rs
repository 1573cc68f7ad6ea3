//! First-order Markov chain over within-session plays. Consecutive
//! pairs (a then b) become transition counts; Laplace smoothing turns
//! counts into probabilities so a single dominant successor does not
//! collapse to certainty. The primary consumer is Next mode, where the
//! current item's outgoing row *is* the answer.

use std::collections::HashMap;

use rec_types::config::MarkovParams;
use rec_types::{Interaction, Item, ItemId, Mode, RecError, Result, ScoredItem, UserId};

use crate::dataset;
use crate::{AlgorithmState, ScoreContext, Scorer};

/// Trained Markov state.
#[derive(Debug, Clone, Default)]
pub struct MarkovModel {
    /// item -> (successor, smoothed probability), sorted descending.
    pub transitions: HashMap<ItemId, Vec<(ItemId, f64)>>,
    /// Each user's most recent item, the chain state for Personalized.
    pub user_last: HashMap<UserId, ItemId>,
}

pub struct MarkovScorer {
    params: MarkovParams,
}

impl MarkovScorer {
    pub fn new(params: MarkovParams) -> Self {
        Self { params }
    }
}

impl Scorer for MarkovScorer {
    fn name(&self) -> &'static str {
        "markov"
    }

    fn train(&self, interactions: &[Interaction], _items: &[Item]) -> Result<AlgorithmState> {
        let mut counts: HashMap<ItemId, HashMap<ItemId, u32>> = HashMap::new();
        let mut user_last: HashMap<UserId, ItemId> = HashMap::new();

        for (user, events) in dataset::by_user(interactions) {
            if let Some(last) = events.last() {
                user_last.insert(user, last.item_id);
            }
            for session in dataset::sessions(&events, self.params.session_window_secs) {
                for pair in session.windows(2) {
                    *counts.entry(pair[0]).or_default().entry(pair[1]).or_insert(0) += 1;
                }
            }
        }

        let alpha = self.params.smoothing_alpha;
        let mut transitions: HashMap<ItemId, Vec<(ItemId, f64)>> = HashMap::new();
        for (from, successors) in counts {
            let kept: Vec<(ItemId, u32)> = successors
                .into_iter()
                .filter(|&(_, count)| count >= self.params.min_transition_count)
                .collect();
            if kept.is_empty() {
                continue;
            }
            let total: u32 = kept.iter().map(|&(_, c)| c).sum();
            let denom = f64::from(total) + alpha * kept.len() as f64;
            let mut row: Vec<(ItemId, f64)> = kept
                .into_iter()
                .map(|(to, count)| (to, (f64::from(count) + alpha) / denom))
                .collect();
            row.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            row.truncate(self.params.max_transitions_per_item);
            transitions.insert(from, row);
        }

        Ok(AlgorithmState::Markov(MarkovModel {
            transitions,
            user_last,
        }))
    }

    fn score(&self, state: &AlgorithmState, ctx: &ScoreContext) -> Result<Vec<ScoredItem>> {
        let AlgorithmState::Markov(model) = state else {
            return Err(RecError::StateMismatch {
                algorithm: self.name(),
            });
        };

        // Chain state: the current item when the request has one,
        // otherwise the user's last play.
        let from = match ctx.mode {
            Mode::Similar | Mode::Next => ctx.current_item_id,
            _ => model.user_last.get(&ctx.user_id).copied(),
        };
        let Some(row) = from.and_then(|id| model.transitions.get(&id)) else {
            return Ok(Vec::new());
        };

        Ok(row
            .iter()
            .take(ctx.limit)
            .map(|&(item, prob)| ScoredItem::new(item, prob, self.name()))
            .collect())
    }
}
