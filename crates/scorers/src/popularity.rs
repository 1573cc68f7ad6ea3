//! Time-decayed popularity. Each interaction contributes its weight
//! halved once per configured half-life, measured back from the newest
//! interaction in the log so retraining on the same data is stable.
//!
//! Serves three roles: a weak Personalized prior, the recency fallback
//! for Next, and the exploitation arm of Explore.

use std::collections::HashMap;

use rec_types::config::PopularityParams;
use rec_types::{Interaction, Item, ItemId, RecError, Result, ScoredItem};

use crate::{AlgorithmState, ScoreContext, Scorer};

/// Trained popularity state: items ranked by decayed interaction mass.
#[derive(Debug, Clone, Default)]
pub struct PopularityModel {
    /// Sorted descending by score, ties broken by ascending item id.
    pub ranked: Vec<(ItemId, f64)>,
}

pub struct PopularityScorer {
    params: PopularityParams,
}

impl PopularityScorer {
    pub fn new(params: PopularityParams) -> Self {
        Self { params }
    }
}

impl Scorer for PopularityScorer {
    fn name(&self) -> &'static str {
        "popularity"
    }

    fn train(&self, interactions: &[Interaction], _items: &[Item]) -> Result<AlgorithmState> {
        let now = interactions
            .iter()
            .map(|i| i.timestamp)
            .max()
            .unwrap_or_default();
        let half_life = self.params.half_life_secs as f64;

        let mut scores: HashMap<ItemId, f64> = HashMap::new();
        for inter in interactions {
            let age = (now - inter.timestamp).max(0) as f64;
            let decay = 0.5_f64.powf(age / half_life);
            *scores.entry(inter.item_id).or_insert(0.0) += inter.weight * decay;
        }

        let mut ranked: Vec<(ItemId, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        Ok(AlgorithmState::Popularity(PopularityModel { ranked }))
    }

    fn score(&self, state: &AlgorithmState, ctx: &ScoreContext) -> Result<Vec<ScoredItem>> {
        let AlgorithmState::Popularity(model) = state else {
            return Err(RecError::StateMismatch {
                algorithm: self.name(),
            });
        };

        // Popularity is user-agnostic; the orchestrator handles exclusions.
        Ok(model
            .ranked
            .iter()
            .filter(|&&(item_id, _)| Some(item_id) != ctx.current_item_id)
            .take(ctx.limit)
            .map(|&(item_id, score)| ScoredItem::new(item_id, score, self.name()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::play;
    use rec_types::Mode;

    const DAY: i64 = 24 * 3600;

    fn scorer() -> PopularityScorer {
        PopularityScorer::new(PopularityParams {
            half_life_secs: 30 * DAY,
        })
    }

    #[test]
    fn recent_plays_outweigh_old_ones() {
        // Item 1: three plays a year ago. Item 2: two plays today.
        let mut interactions = Vec::new();
        for user in 0..3 {
            interactions.push(play(user, 1, 0));
        }
        for user in 0..2 {
            interactions.push(play(user, 2, 365 * DAY));
        }
        let state = scorer().train(&interactions, &[]).unwrap();
        let ctx = ScoreContext {
            mode: Mode::Personalized,
            user_id: 42,
            current_item_id: None,
            limit: 10,
        };
        let ranked = scorer().score(&state, &ctx).unwrap();
        assert_eq!(ranked[0].item_id, 2, "fresh plays beat decayed volume");
        assert_eq!(ranked[1].item_id, 1);
    }

    #[test]
    fn current_item_is_skipped_for_next() {
        let interactions = vec![play(1, 5, 0), play(2, 5, 0), play(1, 6, 0)];
        let state = scorer().train(&interactions, &[]).unwrap();
        let ctx = ScoreContext {
            mode: Mode::Next,
            user_id: 1,
            current_item_id: Some(5),
            limit: 10,
        };
        let ranked = scorer().score(&state, &ctx).unwrap();
        assert!(!ranked.iter().any(|s| s.item_id == 5));
    }

    #[test]
    fn ranking_ignores_the_user() {
        let interactions = vec![play(1, 5, 0), play(2, 5, 0), play(3, 6, 0)];
        let state = scorer().train(&interactions, &[]).unwrap();
        for user in [1, 99] {
            let ctx = ScoreContext {
                mode: Mode::Personalized,
                user_id: user,
                current_item_id: None,
                limit: 10,
            };
            let ranked = scorer().score(&state, &ctx).unwrap();
            assert_eq!(ranked[0].item_id, 5);
        }
    }
}
