//! End-to-end exercises over an in-memory provider: train, serve each
//! mode, hot-reload config, and verify the serving guarantees.

use std::sync::Arc;

use rec_engine::{Engine, MemoryProvider};
use rec_types::config::AlgoToggle;
use rec_types::{EngineConfig, Interaction, Item, Mode, RecError, Request};

fn play(user_id: u64, item_id: u64, timestamp: i64) -> Interaction {
    Interaction {
        user_id,
        item_id,
        timestamp,
        weight: 1.0,
        session_id: None,
    }
}

fn movie(id: u64, genres: &[&str], year: i32) -> Item {
    Item {
        id,
        title: format!("Item {id}"),
        media_type: "movie".into(),
        genres: genres.iter().map(|s| s.to_string()).collect(),
        year: Some(year),
        ..Item::default()
    }
}

/// Small hyperparameters so every trainer finishes in milliseconds.
fn fast_config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.training.min_interactions = 1;
    cfg.als.factors = 8;
    cfg.als.iterations = 5;
    cfg.bpr.factors = 8;
    cfg.bpr.epochs = 5;
    cfg.fpmc.factors = 8;
    cfg.fpmc.epochs = 5;
    cfg
}

/// Two taste clusters with sequential viewing, plus a catalog.
async fn seeded_provider() -> Arc<MemoryProvider> {
    let provider = Arc::new(MemoryProvider::new());
    let mut log = Vec::new();
    for user in 1..=4u64 {
        log.push(play(user, 1, 0));
        log.push(play(user, 2, 600));
        log.push(play(user, 3, 1200));
    }
    for user in 11..=14u64 {
        log.push(play(user, 5, 0));
        log.push(play(user, 6, 600));
        log.push(play(user, 7, 1200));
    }
    provider.push_interactions(log).await;
    provider
        .push_items([
            movie(1, &["scifi"], 1999),
            movie(2, &["scifi"], 2003),
            movie(3, &["scifi"], 2021),
            movie(5, &["romance"], 1998),
            movie(6, &["romance"], 2005),
            movie(7, &["romance"], 2010),
        ])
        .await;
    provider
}

async fn trained_engine() -> Engine {
    let engine = Engine::new(seeded_provider().await, fast_config()).unwrap();
    engine.run_training().await.unwrap();
    engine
}

fn request(mode: Mode, user_id: u64, k: usize) -> Request {
    Request {
        user_id,
        k,
        mode,
        current_item_id: None,
        exclude: Vec::new(),
        deadline_ms: None,
        request_id: None,
    }
}

#[tokio::test]
async fn untrained_engine_has_no_scorers() {
    let engine = Engine::new(seeded_provider().await, fast_config()).unwrap();
    let err = engine
        .recommend(request(Mode::Personalized, 1, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, RecError::NoScorersAvailable));
}

#[tokio::test]
async fn similar_requires_a_current_item() {
    let engine = trained_engine().await;
    let err = engine
        .recommend(request(Mode::Similar, 1, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, RecError::InvalidRequest { .. }));
}

#[tokio::test]
async fn similar_never_returns_the_current_item_and_never_duplicates() {
    let engine = trained_engine().await;
    let mut req = request(Mode::Similar, 1, 10);
    req.current_item_id = Some(1);
    let response = engine.recommend(req).await.unwrap();

    assert!(!response.items.is_empty());
    assert!(response.items.iter().all(|s| s.item_id != 1));
    let mut ids: Vec<u64> = response.items.iter().map(|s| s.item_id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), response.items.len(), "no duplicate item ids");
}

#[tokio::test]
async fn personalized_excludes_watch_history_and_caller_excludes() {
    let engine = trained_engine().await;
    let mut req = request(Mode::Personalized, 1, 10);
    req.exclude = vec![7];
    let response = engine.recommend(req).await.unwrap();

    // User 1 watched 1, 2, 3; item 7 is caller-excluded.
    for item in &response.items {
        assert!(
            ![1, 2, 3, 7].contains(&item.item_id),
            "excluded item {} returned",
            item.item_id
        );
    }
}

#[tokio::test]
async fn k_zero_takes_the_mode_default_and_large_k_clamps() {
    let engine = trained_engine().await;

    let mut next = request(Mode::Next, 1, 0);
    next.current_item_id = Some(1);
    let response = engine.recommend(next).await.unwrap();
    assert!(response.items.len() <= 6, "Next defaults to k=6");

    let mut big = request(Mode::Next, 1, 500);
    big.current_item_id = Some(1);
    let response = engine.recommend(big).await.unwrap();
    assert!(response.items.len() <= 20, "Next clamps at 20");
}

#[tokio::test]
async fn identical_requests_rank_identically() {
    let engine = trained_engine().await;
    let a = engine
        .recommend(request(Mode::Personalized, 1, 10))
        .await
        .unwrap();
    let b = engine
        .recommend(request(Mode::Personalized, 1, 10))
        .await
        .unwrap();

    let ranks = |r: &rec_types::Response| -> Vec<(u64, f64)> {
        r.items.iter().map(|s| (s.item_id, s.score)).collect()
    };
    assert_eq!(ranks(&a), ranks(&b));
}

#[tokio::test]
async fn personalized_prefers_the_users_cluster() {
    let engine = trained_engine().await;
    let response = engine
        .recommend(request(Mode::Personalized, 1, 3))
        .await
        .unwrap();
    // User 1 watched 1-3; anything recommended first should come from
    // the leftover cluster overlap, not the disjoint romance cluster.
    assert!(!response.items.is_empty());
    for item in &response.items {
        assert!(!item.breakdown.is_empty(), "breakdown carries raw scores");
    }
}

#[tokio::test]
async fn next_mode_follows_the_transition_table() {
    // Seven users watch 100 then 101; three watch 100 then 102. Markov
    // dominates the blend, popularity is a weak fallback.
    let provider = Arc::new(MemoryProvider::new());
    let mut log = Vec::new();
    for user in 0..7u64 {
        log.push(play(user, 100, 0));
        log.push(play(user, 101, 60));
    }
    for user in 10..13u64 {
        log.push(play(user, 100, 0));
        log.push(play(user, 102, 60));
    }
    provider.push_interactions(log).await;
    provider
        .push_items([
            movie(100, &["drama"], 2000),
            movie(101, &["drama"], 2001),
            movie(102, &["drama"], 2002),
        ])
        .await;

    let mut cfg = fast_config();
    for toggle in cfg.algorithms.values_mut() {
        toggle.enabled = false;
    }
    cfg.algorithms
        .insert("markov".into(), AlgoToggle::new(true, 1.0));
    cfg.algorithms
        .insert("popularity".into(), AlgoToggle::new(true, 0.1));

    let engine = Engine::new(provider, cfg).unwrap();
    engine.run_training().await.unwrap();

    let mut req = request(Mode::Next, 0, 2);
    req.current_item_id = Some(100);
    let response = engine.recommend(req).await.unwrap();

    let ids: Vec<u64> = response.items.iter().map(|s| s.item_id).collect();
    assert_eq!(ids, vec![101, 102], "dominant successor first: {response:?}");
    assert_eq!(response.items[0].source, "markov");
    assert!(!response.items.iter().any(|s| s.item_id == 100));
}

#[tokio::test]
async fn explore_blends_bandit_and_popularity() {
    let engine = trained_engine().await;
    // User 99 has no history, so nothing is excluded.
    let response = engine
        .recommend(request(Mode::Explore, 99, 10))
        .await
        .unwrap();
    assert!(!response.items.is_empty());
    assert!(response.metadata.algorithms_invoked.iter().any(|s| s == "linucb"));
    assert!(response.metadata.algorithms_invoked.iter().any(|s| s == "popularity"));
}

#[tokio::test]
async fn second_train_while_running_is_rejected() {
    let engine = Engine::new(seeded_provider().await, fast_config()).unwrap();
    engine.train().unwrap();
    assert!(matches!(
        engine.train(),
        Err(RecError::TrainingInProgress)
    ));

    // Poll until the background run completes; it must flip back to idle.
    for _ in 0..100 {
        if !engine.status().is_training {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    let status = engine.status();
    assert!(!status.is_training);
    assert_eq!(status.model_version, 1);
    assert!(engine.train().is_ok(), "idle engine accepts a new run");
}

#[tokio::test]
async fn training_below_min_interactions_fails_without_publishing() {
    let provider = Arc::new(MemoryProvider::new());
    provider.push_interactions([play(1, 1, 0)]).await;
    let mut cfg = fast_config();
    cfg.training.min_interactions = 1000;

    let engine = Engine::new(provider, cfg).unwrap();
    let err = engine.run_training().await.unwrap_err();
    assert!(matches!(err, RecError::InsufficientData { .. }));
    assert_eq!(engine.snapshot().version, 0, "nothing published");
    let status = engine.status();
    assert!(!status.is_training);
    assert!(status.last_error.is_some());
}

#[tokio::test]
async fn disabled_algorithm_keeps_stale_state_and_leaves_the_blend() {
    let engine = trained_engine().await;
    let before = engine.snapshot();
    let fpmc_before = before.states.get("fpmc").cloned().unwrap();

    let mut cfg = fast_config();
    cfg.algorithms
        .insert("fpmc".into(), AlgoToggle::new(false, 0.0));
    engine.update_config(cfg).unwrap();
    engine.run_training().await.unwrap();

    let after = engine.snapshot();
    assert_eq!(after.version, 2);
    let fpmc_after = after.states.get("fpmc").cloned().unwrap();
    assert!(
        Arc::ptr_eq(&fpmc_before, &fpmc_after),
        "untrained module carries the previous state verbatim"
    );

    let mut req = request(Mode::Next, 1, 5);
    req.current_item_id = Some(1);
    let response = engine.recommend(req).await.unwrap();
    assert!(!response.metadata.algorithms_invoked.iter().any(|s| s == "fpmc"));
}

#[tokio::test]
async fn config_update_applies_to_subsequent_requests() {
    let engine = trained_engine().await;
    let mut req = request(Mode::Next, 1, 5);
    req.current_item_id = Some(1);
    let before = engine.recommend(req.clone()).await.unwrap();
    assert!(before.metadata.algorithms_invoked.iter().any(|s| s == "markov"));

    let mut cfg = fast_config();
    cfg.algorithms
        .insert("markov".into(), AlgoToggle::new(false, 0.0));
    engine.update_config(cfg).unwrap();

    let after = engine.recommend(req).await.unwrap();
    assert!(!after.metadata.algorithms_invoked.iter().any(|s| s == "markov"));
}

#[tokio::test]
async fn invalid_config_update_is_rejected() {
    let engine = trained_engine().await;
    let mut cfg = fast_config();
    cfg.explore_ratio = 9.0;
    assert!(matches!(
        engine.update_config(cfg),
        Err(RecError::InvalidConfig { .. })
    ));
    assert_eq!(engine.config().explore_ratio, fast_config().explore_ratio);
}

#[tokio::test]
async fn metadata_and_metrics_reflect_serving() {
    let engine = trained_engine().await;
    let response = engine
        .recommend(request(Mode::Personalized, 1, 5))
        .await
        .unwrap();
    assert_eq!(response.metadata.mode, "personalized");
    assert_eq!(response.metadata.model_version, 1);
    assert!(!response.metadata.algorithms_invoked.is_empty());
    assert!(!response.metadata.partial, "all scorers healthy");
    assert!(!response.metadata.request_id.is_empty());

    let metrics = engine.metrics();
    assert!(metrics.requests >= 1);
    assert_eq!(metrics.training_success, 1);
    assert_eq!(metrics.model_version, 1);
    assert!(metrics.modes.contains_key("personalized"));
}

#[tokio::test]
async fn one_failing_module_does_not_fail_the_run() {
    // Every user plays exactly one item: no sequences, so the
    // sequential factor model has nothing to learn and errors out.
    let provider = Arc::new(MemoryProvider::new());
    let log: Vec<Interaction> = (1..=20u64).map(|u| play(u, u % 5 + 1, 0)).collect();
    provider.push_interactions(log).await;
    provider
        .push_items((1..=5).map(|id| movie(id, &["drama"], 2000)).collect::<Vec<_>>())
        .await;

    let engine = Engine::new(provider, fast_config()).unwrap();
    engine.run_training().await.unwrap();

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.version, 1, "run publishes despite one failure");
    assert!(
        !snapshot.states.contains_key("fpmc"),
        "never-trained module has no state to go stale"
    );
    assert!(snapshot.states.contains_key("popularity"));
    assert_eq!(engine.metrics().algorithms["fpmc"].failures, 1);
}

#[tokio::test]
async fn popularity_dominated_personalized_ignores_the_user() {
    // Items 1..5 with strictly decreasing play counts, same timestamps.
    let provider = Arc::new(MemoryProvider::new());
    let mut log = Vec::new();
    let mut user = 0u64;
    for item in 1..=5u64 {
        for _ in 0..(6 - item) {
            user += 1;
            log.push(play(user, item, 0));
        }
    }
    provider.push_interactions(log).await;
    provider
        .push_items((1..=5).map(|id| movie(id, &["drama"], 2000)).collect::<Vec<_>>())
        .await;

    let mut cfg = fast_config();
    for toggle in cfg.algorithms.values_mut() {
        toggle.enabled = false;
        toggle.weight = 0.0;
    }
    cfg.algorithms
        .insert("popularity".into(), AlgoToggle::new(true, 1.0));
    // Content keeps Similar mode valid but contributes nothing.
    cfg.algorithms
        .insert("content".into(), AlgoToggle::new(true, 0.0));

    let engine = Engine::new(provider, cfg).unwrap();
    engine.run_training().await.unwrap();

    // User 999 has no history; ranking is pure popularity order.
    let response = engine
        .recommend(request(Mode::Personalized, 999, 5))
        .await
        .unwrap();
    let ids: Vec<u64> = response.items.iter().map(|s| s.item_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn single_eligible_scorer_is_reported_alone() {
    let provider = seeded_provider().await;
    let mut cfg = fast_config();
    for toggle in cfg.algorithms.values_mut() {
        toggle.enabled = false;
        toggle.weight = 0.0;
    }
    cfg.algorithms
        .insert("content".into(), AlgoToggle::new(true, 1.0));
    // The bandit keeps Explore valid; it is ineligible everywhere else.
    cfg.algorithms
        .insert("linucb".into(), AlgoToggle::new(true, 1.0));
    // Markov keeps Next valid.
    cfg.algorithms
        .insert("markov".into(), AlgoToggle::new(true, 1.0));

    let engine = Engine::new(provider, cfg).unwrap();
    engine.run_training().await.unwrap();

    let mut req = request(Mode::Similar, 1, 5);
    req.current_item_id = Some(1);
    let response = engine.recommend(req).await.unwrap();
    assert!(
        response
            .metadata
            .algorithms_invoked
            .iter()
            .all(|name| name == "content" || name == "markov"),
        "only Similar-eligible enabled scorers run: {:?}",
        response.metadata.algorithms_invoked
    );
    assert!(response.metadata.algorithms_invoked.iter().any(|s| s == "content"));
    assert!(response.items.iter().all(|s| s.source == "content" || s.source == "markov"));
}

#[tokio::test]
async fn serving_continues_against_the_old_snapshot_during_retraining() {
    let engine = trained_engine().await;
    let pinned = engine.snapshot();

    // New interactions arrive and a retrain publishes version 2.
    engine.run_training().await.unwrap();

    assert_eq!(pinned.version, 1, "held snapshot unchanged");
    assert_eq!(engine.snapshot().version, 2);
}
