//! The training coordinator: single-flight background retraining that
//! builds a fresh [`ModelSnapshot`] and publishes it atomically.
//!
//! One run:
//! 1. flip Idle -> Training, rejecting a second start,
//! 2. pull the interaction log and catalog from the provider,
//! 3. train every enabled algorithm in parallel workers bounded by
//!    `training.max_parallel`,
//! 4. merge: successes replace state, failures keep the previous
//!    version's state (stale, not missing),
//! 5. publish version+1 and flip back to Idle.
//!
//! The whole run honors `training.timeout_secs`; on expiry nothing
//! publishes and the run is recorded as failed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use rec_types::{EngineConfig, RecError, Result, Timestamp, TrainingStatus};
use scorers::{AlgorithmState, Scorer, build_scorers};

use crate::metrics::EngineMetrics;
use crate::now_unix;
use crate::provider::DataProvider;
use crate::store::{ModelSnapshot, ModelStore};

pub struct TrainingCoordinator {
    status: Mutex<TrainingStatus>,
}

struct RunReport {
    version: u64,
    interaction_count: usize,
    item_count: usize,
    user_count: usize,
}

impl TrainingCoordinator {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(TrainingStatus::default()),
        }
    }

    pub fn status(&self) -> TrainingStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Flip Idle -> Training. A run already in flight is rejected
    /// without touching `last_started_at`.
    pub fn try_begin(&self, now: Timestamp) -> Result<()> {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if status.is_training {
            return Err(RecError::TrainingInProgress);
        }
        status.is_training = true;
        status.last_started_at = Some(now);
        Ok(())
    }

    fn finish(&self, result: &Result<RunReport>, duration_ms: u64) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        status.is_training = false;
        status.last_completed_at = Some(now_unix());
        status.last_duration_ms = duration_ms;
        match result {
            Ok(report) => {
                status.last_error = None;
                status.model_version = report.version;
                status.interaction_count = report.interaction_count;
                status.item_count = report.item_count;
                status.user_count = report.user_count;
            }
            Err(err) => {
                status.last_error = Some(err.to_string());
            }
        }
    }

    /// Execute one full training run. Callers must not hold the
    /// coordinator's status lock; `try_begin` has already been called by
    /// the engine before this future is spawned.
    pub async fn run(
        &self,
        provider: Arc<dyn DataProvider>,
        store: Arc<ModelStore>,
        metrics: Arc<EngineMetrics>,
        config: Arc<EngineConfig>,
    ) -> Result<u64> {
        let started = Instant::now();
        let deadline = Duration::from_secs(config.training.timeout_secs);

        let result = match tokio::time::timeout(
            deadline,
            run_inner(provider, store, metrics.clone(), config),
        )
        .await
        {
            Ok(inner) => inner,
            Err(_) => Err(RecError::TrainingTimeout),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        self.finish(&result, duration_ms);
        match result {
            Ok(report) => {
                metrics.record_training(true, duration_ms, report.version);
                info!(
                    version = report.version,
                    interactions = report.interaction_count,
                    duration_ms,
                    "training run published"
                );
                Ok(report.version)
            }
            Err(err) => {
                metrics.record_training(false, duration_ms, 0);
                warn!(error = %err, duration_ms, "training run failed");
                Err(err)
            }
        }
    }
}

impl Default for TrainingCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_inner(
    provider: Arc<dyn DataProvider>,
    store: Arc<ModelStore>,
    metrics: Arc<EngineMetrics>,
    config: Arc<EngineConfig>,
) -> Result<RunReport> {
    let interactions = Arc::new(provider.interactions(None).await?);
    let items = Arc::new(provider.items().await?);
    if interactions.len() < config.training.min_interactions {
        return Err(RecError::InsufficientData {
            needed: config.training.min_interactions,
            got: interactions.len(),
        });
    }

    let previous = store.current();
    let scorers: Vec<Box<dyn Scorer>> = build_scorers(&config)
        .into_iter()
        .filter(|s| config.enabled(s.name()))
        .collect();

    let semaphore = Arc::new(Semaphore::new(config.training.max_parallel));
    let mut workers: JoinSet<(&'static str, Result<AlgorithmState>, u64)> = JoinSet::new();
    for scorer in scorers {
        let semaphore = semaphore.clone();
        let interactions = interactions.clone();
        let items = items.clone();
        workers.spawn(async move {
            let name = scorer.name();
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return (name, Err(RecError::Internal("worker pool closed".into())), 0);
                }
            };
            let started = Instant::now();
            let trained =
                tokio::task::spawn_blocking(move || scorer.train(&interactions, &items))
                    .await
                    .unwrap_or_else(|join_err| {
                        Err(RecError::Internal(format!("trainer panicked: {join_err}")))
                    });
            (name, trained, started.elapsed().as_millis() as u64)
        });
    }

    // Failed modules keep their previous state by starting from the old
    // map; successes overwrite their entry.
    let mut states = previous.states.clone();
    let mut successes = 0usize;
    while let Some(joined) = workers.join_next().await {
        let (name, trained, elapsed_ms) = joined
            .map_err(|e| RecError::Internal(format!("training worker panicked: {e}")))?;
        match trained {
            Ok(state) => {
                metrics.record_algorithm(name, elapsed_ms, false);
                states.insert(name, Arc::new(state));
                successes += 1;
            }
            Err(err) => {
                metrics.record_algorithm(name, elapsed_ms, true);
                warn!(algorithm = name, error = %err, "module failed to train, keeping stale state");
            }
        }
    }
    if successes == 0 {
        return Err(RecError::Internal(
            "every enabled algorithm failed to train".into(),
        ));
    }

    let mut item_popularity: HashMap<_, f64> = HashMap::new();
    let mut user_seen: HashMap<_, HashSet<_>> = HashMap::new();
    for inter in interactions.iter() {
        *item_popularity.entry(inter.item_id).or_insert(0.0) += inter.weight;
        user_seen.entry(inter.user_id).or_default().insert(inter.item_id);
    }
    let user_count = user_seen.len();

    let snapshot = ModelSnapshot {
        version: previous.version + 1,
        trained_at: now_unix(),
        states,
        item_popularity,
        user_seen,
        items: items.iter().map(|i| (i.id, i.clone())).collect(),
    };
    let report = RunReport {
        version: snapshot.version,
        interaction_count: interactions.len(),
        item_count: items.len(),
        user_count,
    };
    store.publish(snapshot);
    Ok(report)
}
