//! The serving path: select the scorers for a request, fan them out in
//! parallel under a per-scorer deadline, normalize and blend their
//! candidates, apply exclusions, and rank.
//!
//! Per-request flow:
//! 1. resolve k (mode default when zero, clamp to the mode cap),
//! 2. validate the request shape,
//! 3. pin one snapshot and one config for the whole request,
//! 4. select scorers: mode support, enabled, trained state present,
//! 5. fan out with `JoinSet` + `spawn_blocking`, each call bounded by
//!    `serving.scorer_timeout_ms` and the whole fan-out by the caller's
//!    `deadline_ms` when present; stragglers are dropped, not awaited,
//! 6. normalize each scorer's scores to [0, 1] and sum weighted,
//! 7. exclude the current item, caller excludes, and watch history,
//! 8. rank by blended score, break ties by popularity then item id.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, warn};

use rec_types::{
    EngineConfig, Item, ItemId, Mode, RecError, Request, Response, ResponseMetadata, Result,
    ScoredItem,
};
use scorers::{ScoreContext, Scorer};

use crate::metrics::EngineMetrics;
use crate::now_unix;
use crate::store::ModelSnapshot;

/// Per shared genre with a higher-ranked pick, the Explore popularity
/// arm's score is multiplied by this before blending.
const DIVERSITY_DECAY: f64 = 0.7;

pub(crate) async fn recommend(
    req: Request,
    scorers: Vec<Box<dyn Scorer>>,
    snapshot: Arc<ModelSnapshot>,
    config: Arc<EngineConfig>,
    metrics: Arc<EngineMetrics>,
) -> Result<Response> {
    let started = Instant::now();

    let k = if req.k == 0 {
        config.default_k(req.mode)
    } else {
        req.k.min(config.max_k(req.mode))
    };
    if req.mode.requires_current_item() && req.current_item_id.is_none() {
        metrics.record_error();
        return Err(RecError::InvalidRequest {
            reason: format!("{} mode requires current_item_id", req.mode.as_str()),
        });
    }

    let age_secs = now_unix() - snapshot.trained_at;
    if snapshot.version > 0 && age_secs > config.staleness_threshold_secs {
        warn!(
            version = snapshot.version,
            age_secs, "serving from a stale snapshot"
        );
    }

    let selected: Vec<Box<dyn Scorer>> = scorers
        .into_iter()
        .filter(|s| {
            s.supports(req.mode)
                && config.enabled(s.name())
                && snapshot.states.contains_key(s.name())
        })
        .collect();
    if selected.is_empty() {
        metrics.record_error();
        return Err(RecError::NoScorersAvailable);
    }
    let selected_count = selected.len();

    let ctx = ScoreContext {
        mode: req.mode,
        user_id: req.user_id,
        current_item_id: req.current_item_id,
        limit: k.saturating_mul(config.serving.candidate_multiplier),
    };
    let deadline = Duration::from_millis(config.serving.scorer_timeout_ms);

    let mut tasks: JoinSet<(&'static str, Result<Vec<ScoredItem>>, u64)> = JoinSet::new();
    let mut pending: HashSet<&'static str> = HashSet::new();
    for scorer in selected {
        let name = scorer.name();
        pending.insert(name);
        let state = snapshot.states[name].clone();
        let ctx = ctx.clone();
        tasks.spawn(async move {
            let call_started = Instant::now();
            let scored = match tokio::time::timeout(
                deadline,
                tokio::task::spawn_blocking(move || scorer.score(&state, &ctx)),
            )
            .await
            {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => {
                    Err(RecError::Internal(format!("scorer panicked: {join_err}")))
                }
                Err(_) => Err(RecError::ScorerTimeout { algorithm: name }),
            };
            (name, scored, call_started.elapsed().as_millis() as u64)
        });
    }

    let overall = req.deadline_ms.map(Duration::from_millis);
    let mut invoked: Vec<&'static str> = Vec::new();
    let mut failed: Vec<&'static str> = Vec::new();
    let mut contributions: Vec<(&'static str, Vec<ScoredItem>)> = Vec::new();
    loop {
        let next = match overall {
            Some(budget) => {
                let remaining = budget.saturating_sub(started.elapsed());
                match tokio::time::timeout(remaining, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        // Caller deadline expired: stragglers are dropped
                        // and the blend runs on whatever finished.
                        tasks.abort_all();
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        for &name in &pending {
                            metrics.record_algorithm(name, elapsed_ms, true);
                            failed.push(name);
                        }
                        warn!(
                            dropped = pending.len(),
                            deadline_ms = req.deadline_ms,
                            "request deadline expired before every scorer finished"
                        );
                        break;
                    }
                }
            }
            None => tasks.join_next().await,
        };
        let Some(joined) = next else {
            break;
        };
        let (name, scored, elapsed_ms) = joined
            .map_err(|e| RecError::Internal(format!("scoring task panicked: {e}")))?;
        pending.remove(name);
        match scored {
            Ok(candidates) => {
                metrics.record_algorithm(name, elapsed_ms, false);
                invoked.push(name);
                contributions.push((name, candidates));
            }
            Err(err) => {
                metrics.record_algorithm(name, elapsed_ms, true);
                warn!(algorithm = name, error = %err, "scorer dropped from blend");
                failed.push(name);
            }
        }
    }
    if invoked.is_empty() {
        metrics.record_error();
        return Err(RecError::NoScorersAvailable);
    }
    // Join order is nondeterministic; canonical order for metadata and
    // deterministic blending.
    invoked.sort_unstable();
    failed.sort_unstable();
    contributions.sort_by_key(|&(name, _)| name);

    // Explore's exploitation arm gets a diversity boost so its head is
    // not one genre deep.
    if req.mode == Mode::Explore {
        if let Some((_, candidates)) = contributions
            .iter_mut()
            .find(|(name, _)| *name == "popularity")
        {
            diversify(candidates, &snapshot.items);
        }
    }

    let mut blended: HashMap<ItemId, f64> = HashMap::new();
    let mut breakdown: HashMap<ItemId, HashMap<String, f64>> = HashMap::new();
    let mut top_source: HashMap<ItemId, (f64, &'static str)> = HashMap::new();
    for (name, candidates) in &contributions {
        let weight = blend_weight(&config, req.mode, name);
        if candidates.is_empty() || weight <= 0.0 {
            continue;
        }
        // Shift negatives to zero, then scale by the max. Unlike plain
        // min-max this preserves the ratio between positive scores
        // instead of zeroing the weakest candidate.
        let min = candidates
            .iter()
            .map(|s| s.score)
            .fold(f64::INFINITY, f64::min);
        let shift = if min < 0.0 { -min } else { 0.0 };
        let max = candidates
            .iter()
            .map(|s| s.score + shift)
            .fold(0.0_f64, f64::max);
        if max <= 0.0 {
            continue;
        }
        for item in candidates {
            let contribution = weight * (item.score + shift) / max;
            *blended.entry(item.item_id).or_insert(0.0) += contribution;
            breakdown
                .entry(item.item_id)
                .or_default()
                .insert((*name).to_string(), item.score);
            let best = top_source.entry(item.item_id).or_insert((contribution, *name));
            if contribution > best.0 {
                *best = (contribution, *name);
            }
        }
    }

    let mut excluded: HashSet<ItemId> = req.exclude.iter().copied().collect();
    if matches!(req.mode, Mode::Similar | Mode::Next) {
        if let Some(current) = req.current_item_id {
            excluded.insert(current);
        }
    }
    if matches!(req.mode, Mode::Personalized | Mode::Explore) {
        if let Some(seen) = snapshot.user_seen.get(&req.user_id) {
            excluded.extend(seen.iter().copied());
        }
    }

    let popularity = |id: ItemId| snapshot.item_popularity.get(&id).copied().unwrap_or(0.0);
    let mut ranked: Vec<(ItemId, f64)> = blended
        .into_iter()
        .filter(|(id, _)| !excluded.contains(id))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                popularity(b.0)
                    .partial_cmp(&popularity(a.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked.truncate(k);

    let items: Vec<ScoredItem> = ranked
        .into_iter()
        .map(|(item_id, score)| ScoredItem {
            item_id,
            score,
            source: top_source
                .get(&item_id)
                .map_or("blend", |&(_, name)| name)
                .to_string(),
            breakdown: breakdown.remove(&item_id).unwrap_or_default(),
        })
        .collect();

    let latency_ms = started.elapsed().as_millis() as u64;
    metrics.record_request(req.mode, latency_ms);
    debug!(
        mode = req.mode.as_str(),
        user = req.user_id,
        returned = items.len(),
        latency_ms,
        "request served"
    );

    Ok(Response {
        items,
        metadata: ResponseMetadata {
            request_id: req
                .request_id
                .unwrap_or_else(|| format!("req-{}-{}", snapshot.version, now_unix())),
            mode: req.mode.as_str().to_string(),
            model_version: snapshot.version,
            latency_ms,
            algorithms_invoked: invoked.iter().map(|s| s.to_string()).collect(),
            algorithms_failed: failed.iter().map(|s| s.to_string()).collect(),
            partial: selected_count != contributions.len(),
            generated_at: now_unix(),
        },
    })
}

/// Dampen candidates that repeat the genres of higher-ranked ones:
/// each candidate's score is multiplied by [`DIVERSITY_DECAY`] once per
/// genre it shares with a pick above it, then the list is re-ranked.
/// Items without catalog metadata pass through untouched.
fn diversify(candidates: &mut Vec<ScoredItem>, catalog: &HashMap<ItemId, Item>) {
    let by_score = |a: &ScoredItem, b: &ScoredItem| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.item_id.cmp(&b.item_id))
    };
    candidates.sort_by(by_score);

    let mut seen: HashSet<&str> = HashSet::new();
    for candidate in candidates.iter_mut() {
        let Some(item) = catalog.get(&candidate.item_id) else {
            continue;
        };
        let shared = item
            .genres
            .iter()
            .filter(|g| seen.contains(g.as_str()))
            .count();
        if shared > 0 {
            candidate.score *= DIVERSITY_DECAY.powi(shared as i32);
        }
        for genre in &item.genres {
            seen.insert(genre);
        }
    }
    candidates.sort_by(by_score);
}

/// Blend weight for one scorer in one mode. Explore splits the blend
/// between the bandit and the exploitation arm by `explore_ratio`
/// instead of the configured weights.
fn blend_weight(config: &EngineConfig, mode: Mode, name: &str) -> f64 {
    match (mode, name) {
        (Mode::Explore, "linucb") => config.explore_ratio,
        (Mode::Explore, "popularity") => 1.0 - config.explore_ratio,
        _ => config.weight(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rec_types::Interaction;
    use scorers::{AlgorithmState, PopularityModel};

    /// Returns a fixed candidate list, after an optional blocking delay.
    struct FixedScorer {
        name: &'static str,
        candidates: Vec<(ItemId, f64)>,
        delay_ms: u64,
    }

    impl Scorer for FixedScorer {
        fn name(&self) -> &'static str {
            self.name
        }
        fn train(&self, _: &[Interaction], _: &[Item]) -> Result<AlgorithmState> {
            Ok(AlgorithmState::Popularity(PopularityModel::default()))
        }
        fn score(&self, _: &AlgorithmState, _: &ScoreContext) -> Result<Vec<ScoredItem>> {
            if self.delay_ms > 0 {
                std::thread::sleep(Duration::from_millis(self.delay_ms));
            }
            Ok(self
                .candidates
                .iter()
                .map(|&(id, score)| ScoredItem::new(id, score, self.name))
                .collect())
        }
    }

    /// Always errors out of `score`.
    struct BrokenScorer {
        name: &'static str,
    }

    impl Scorer for BrokenScorer {
        fn name(&self) -> &'static str {
            self.name
        }
        fn train(&self, _: &[Interaction], _: &[Item]) -> Result<AlgorithmState> {
            Ok(AlgorithmState::Popularity(PopularityModel::default()))
        }
        fn score(&self, _: &AlgorithmState, _: &ScoreContext) -> Result<Vec<ScoredItem>> {
            Err(RecError::Internal("index corrupted".into()))
        }
    }

    /// Snapshot whose state map carries entries for the given names; the
    /// stub scorers above never read the state itself.
    fn snapshot_for(names: &[&'static str]) -> Arc<ModelSnapshot> {
        let mut snapshot = ModelSnapshot {
            version: 1,
            trained_at: now_unix(),
            ..ModelSnapshot::default()
        };
        for &name in names {
            snapshot.states.insert(
                name,
                Arc::new(AlgorithmState::Popularity(PopularityModel::default())),
            );
        }
        Arc::new(snapshot)
    }

    fn request(mode: Mode) -> Request {
        Request {
            user_id: 9,
            k: 5,
            mode,
            current_item_id: None,
            exclude: Vec::new(),
            deadline_ms: None,
            request_id: None,
        }
    }

    #[tokio::test]
    async fn failing_scorer_is_dropped_and_reported() {
        let scorers: Vec<Box<dyn Scorer>> = vec![
            Box::new(BrokenScorer { name: "content" }),
            Box::new(FixedScorer {
                name: "popularity",
                candidates: vec![(1, 1.0), (2, 0.5)],
                delay_ms: 0,
            }),
        ];
        let response = recommend(
            request(Mode::Personalized),
            scorers,
            snapshot_for(&["content", "popularity"]),
            Arc::new(EngineConfig::default()),
            Arc::new(EngineMetrics::new()),
        )
        .await
        .unwrap();

        assert_eq!(response.metadata.algorithms_failed, vec!["content"]);
        assert_eq!(response.metadata.algorithms_invoked, vec!["popularity"]);
        assert!(response.metadata.partial);
        assert_eq!(response.items[0].item_id, 1);
        assert!(response.items.iter().all(|s| s.source == "popularity"));
    }

    #[tokio::test]
    async fn caller_deadline_serves_a_partial_blend() {
        let scorers: Vec<Box<dyn Scorer>> = vec![
            Box::new(FixedScorer {
                name: "content",
                candidates: vec![(3, 1.0)],
                delay_ms: 400,
            }),
            Box::new(FixedScorer {
                name: "popularity",
                candidates: vec![(1, 1.0), (2, 0.5)],
                delay_ms: 0,
            }),
        ];
        let mut req = request(Mode::Personalized);
        req.deadline_ms = Some(50);
        let metrics = Arc::new(EngineMetrics::new());
        let response = recommend(
            req,
            scorers,
            snapshot_for(&["content", "popularity"]),
            Arc::new(EngineConfig::default()),
            metrics.clone(),
        )
        .await
        .unwrap();

        assert_eq!(response.metadata.algorithms_failed, vec!["content"]);
        assert!(response.metadata.partial);
        assert!(response.items.iter().any(|s| s.item_id == 1));
        assert!(!response.items.iter().any(|s| s.item_id == 3));
        assert_eq!(metrics.snapshot().algorithms["content"].failures, 1);
    }

    #[tokio::test]
    async fn every_scorer_failing_is_an_error() {
        let scorers: Vec<Box<dyn Scorer>> =
            vec![Box::new(BrokenScorer { name: "content" })];
        let err = recommend(
            request(Mode::Personalized),
            scorers,
            snapshot_for(&["content"]),
            Arc::new(EngineConfig::default()),
            Arc::new(EngineMetrics::new()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RecError::NoScorersAvailable));
    }

    #[test]
    fn diversify_dampens_repeated_genres() {
        let mut catalog = HashMap::new();
        catalog.insert(
            1,
            Item {
                id: 1,
                genres: vec!["action".into()],
                ..Item::default()
            },
        );
        catalog.insert(
            2,
            Item {
                id: 2,
                genres: vec!["action".into()],
                ..Item::default()
            },
        );
        catalog.insert(
            3,
            Item {
                id: 3,
                genres: vec!["drama".into()],
                ..Item::default()
            },
        );

        let mut candidates = vec![
            ScoredItem::new(1, 1.0, "popularity"),
            ScoredItem::new(2, 0.9, "popularity"),
            ScoredItem::new(3, 0.8, "popularity"),
        ];
        diversify(&mut candidates, &catalog);

        let ids: Vec<ItemId> = candidates.iter().map(|s| s.item_id).collect();
        // Item 2 repeats item 1's genre: 0.9 * 0.7 = 0.63 drops it below
        // the fresh-genre item 3.
        assert_eq!(ids, vec![1, 3, 2]);
        assert!((candidates[2].score - 0.63).abs() < 1e-9);
    }

    #[test]
    fn explore_weights_follow_the_ratio() {
        let mut config = EngineConfig::default();
        config.explore_ratio = 0.3;
        assert_eq!(blend_weight(&config, Mode::Explore, "linucb"), 0.3);
        assert_eq!(blend_weight(&config, Mode::Explore, "popularity"), 0.7);
        assert_eq!(
            blend_weight(&config, Mode::Personalized, "popularity"),
            config.weight("popularity")
        );
    }
}
