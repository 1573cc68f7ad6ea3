//! # Recommendation engine
//!
//! Ties the trained algorithms together behind one facade: an immutable
//! model snapshot for serving, a single-flight training coordinator, a
//! hot-reloadable configuration manager, and the blending orchestrator.
//!
//! Serving and training never contend: requests pin an `Arc` of the
//! current snapshot and config, training builds a replacement off to the
//! side and publishes it with one atomic swap.

pub mod config_manager;
pub mod metrics;
pub mod orchestrator;
pub mod provider;
pub mod store;
pub mod trainer;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::instrument;

use rec_types::{EngineConfig, Request, Response, Result, Timestamp, TrainingStatus};
use scorers::build_scorers;

pub use config_manager::ConfigManager;
pub use metrics::{CallStats, EngineMetrics, MetricsSnapshot};
pub use provider::{DataProvider, MemoryProvider};
pub use store::{ModelSnapshot, ModelStore};
pub use trainer::TrainingCoordinator;

pub(crate) fn now_unix() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as Timestamp)
        .unwrap_or_default()
}

/// The engine facade. Cheap to share: every component behind it is an
/// `Arc`, so clones serve and train against the same state.
#[derive(Clone)]
pub struct Engine {
    provider: Arc<dyn DataProvider>,
    store: Arc<ModelStore>,
    config: Arc<ConfigManager>,
    metrics: Arc<EngineMetrics>,
    trainer: Arc<TrainingCoordinator>,
}

impl Engine {
    /// Build an engine over a data provider. The configuration is
    /// validated up front; nothing is trained yet, so `recommend` fails
    /// with "no scorer available" until the first training run.
    pub fn new(provider: Arc<dyn DataProvider>, config: EngineConfig) -> Result<Self> {
        Ok(Self {
            provider,
            store: Arc::new(ModelStore::new()),
            config: Arc::new(ConfigManager::new(config)?),
            metrics: Arc::new(EngineMetrics::new()),
            trainer: Arc::new(TrainingCoordinator::new()),
        })
    }

    /// Serve one recommendation request against the current snapshot.
    #[instrument(skip(self, req), fields(mode = req.mode.as_str(), user = req.user_id))]
    pub async fn recommend(&self, req: Request) -> Result<Response> {
        let config = self.config.get();
        orchestrator::recommend(
            req,
            build_scorers(&config),
            self.store.current(),
            config,
            self.metrics.clone(),
        )
        .await
    }

    /// Kick off a background training run. Returns immediately;
    /// rejects synchronously when a run is already in flight. Progress
    /// is polled via [`Engine::status`].
    pub fn train(&self) -> Result<()> {
        self.trainer.try_begin(now_unix())?;
        let trainer = self.trainer.clone();
        let provider = self.provider.clone();
        let store = self.store.clone();
        let metrics = self.metrics.clone();
        let config = self.config.get();
        tokio::spawn(async move {
            // Outcome lands in TrainingStatus; nothing to do with it here.
            let _ = trainer.run(provider, store, metrics, config).await;
        });
        Ok(())
    }

    /// Run one training run to completion. Same semantics as
    /// [`Engine::train`] but awaitable; returns the published version.
    pub async fn run_training(&self) -> Result<u64> {
        self.trainer.try_begin(now_unix())?;
        self.trainer
            .run(
                self.provider.clone(),
                self.store.clone(),
                self.metrics.clone(),
                self.config.get(),
            )
            .await
    }

    pub fn status(&self) -> TrainingStatus {
        self.trainer.status()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn config(&self) -> Arc<EngineConfig> {
        self.config.get()
    }

    /// Validate and swap the active configuration. Takes effect for
    /// requests and training runs that start after this returns.
    pub fn update_config(&self, config: EngineConfig) -> Result<()> {
        self.config.update(config)
    }

    /// The current model snapshot, for inspection.
    pub fn snapshot(&self) -> Arc<ModelSnapshot> {
        self.store.current()
    }
}
