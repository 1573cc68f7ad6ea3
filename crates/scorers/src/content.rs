//! Content-based similarity over item metadata: weighted Jaccard on
//! genre and people sets plus a release-year proximity term. Works for
//! cold items that have metadata but no interaction history.

use std::collections::{HashMap, HashSet};

use rec_types::config::ContentParams;
use rec_types::{Interaction, Item, ItemId, Mode, RecError, Result, ScoredItem, UserId};

use crate::dataset;
use crate::{AlgorithmState, ScoreContext, Scorer};

const SEED_ITEMS: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct ItemFeatures {
    pub genres: HashSet<String>,
    pub people: HashSet<String>,
    pub year: Option<i32>,
}

/// Trained content state: the feature index plus per-user recent items
/// used to build a taste profile at serving time.
#[derive(Debug, Clone, Default)]
pub struct ContentModel {
    pub features: HashMap<ItemId, ItemFeatures>,
    pub user_recent: HashMap<UserId, Vec<ItemId>>,
}

pub struct ContentScorer {
    params: ContentParams,
}

impl ContentScorer {
    pub fn new(params: ContentParams) -> Self {
        Self { params }
    }

    fn similarity(&self, a: &ItemFeatures, b: &ItemFeatures) -> f64 {
        let genre = jaccard(&a.genres, &b.genres);
        let people = jaccard(&a.people, &b.people);
        let year = match (a.year, b.year) {
            (Some(ya), Some(yb)) => {
                let diff = (ya - yb).abs();
                if diff > self.params.max_year_difference {
                    0.0
                } else {
                    1.0 - f64::from(diff) / f64::from(self.params.max_year_difference.max(1))
                }
            }
            _ => 0.0,
        };
        self.params.genre_weight * genre
            + self.params.people_weight * people
            + self.params.year_weight * year
    }
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    if shared == 0 {
        return 0.0;
    }
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

impl Scorer for ContentScorer {
    fn name(&self) -> &'static str {
        "content"
    }

    fn train(&self, interactions: &[Interaction], items: &[Item]) -> Result<AlgorithmState> {
        let features = items
            .iter()
            .map(|item| {
                (
                    item.id,
                    ItemFeatures {
                        genres: item.genres.iter().cloned().collect(),
                        people: item.people.iter().cloned().collect(),
                        year: item.year,
                    },
                )
            })
            .collect();

        let user_recent = dataset::by_user(interactions)
            .into_iter()
            .map(|(user, events)| (user, dataset::recent_items(&events, SEED_ITEMS)))
            .collect();

        Ok(AlgorithmState::Content(ContentModel {
            features,
            user_recent,
        }))
    }

    fn score(&self, state: &AlgorithmState, ctx: &ScoreContext) -> Result<Vec<ScoredItem>> {
        let AlgorithmState::Content(model) = state else {
            return Err(RecError::StateMismatch {
                algorithm: self.name(),
            });
        };

        // Seed features: the current item for Similar, the user's recent
        // items otherwise.
        let seeds: Vec<&ItemFeatures> = match ctx.mode {
            Mode::Similar => ctx
                .current_item_id
                .and_then(|id| model.features.get(&id))
                .into_iter()
                .collect(),
            _ => model
                .user_recent
                .get(&ctx.user_id)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .filter_map(|id| model.features.get(id))
                .collect(),
        };
        if seeds.is_empty() {
            return Ok(Vec::new());
        }

        let seed_ids: HashSet<ItemId> = match ctx.mode {
            Mode::Similar => ctx.current_item_id.into_iter().collect(),
            _ => model
                .user_recent
                .get(&ctx.user_id)
                .map(|v| v.iter().copied().collect())
                .unwrap_or_default(),
        };

        let mut scores: HashMap<ItemId, f64> = HashMap::new();
        for (&item_id, features) in &model.features {
            if seed_ids.contains(&item_id) {
                continue;
            }
            let total: f64 = seeds.iter().map(|seed| self.similarity(seed, features)).sum();
            let mean = total / seeds.len() as f64;
            if mean > 0.0 {
                scores.insert(item_id, mean);
            }
        }

        Ok(crate::top_n(scores, ctx.limit, self.name()))
    }
}
