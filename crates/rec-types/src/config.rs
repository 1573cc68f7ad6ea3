//! Engine configuration: algorithm enablement and blend weights, mode
//! limits, training and serving knobs, per-algorithm hyperparameters.
//!
//! The active config is an immutable value replaced atomically by the
//! configuration manager; nothing here is mutated in place.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{RecError, Result};
use crate::types::{ALGORITHM_NAMES, Mode};

/// Enablement and blend weight for one algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlgoToggle {
    pub enabled: bool,
    /// Applied after per-scorer score normalization. Must be >= 0.
    pub weight: f64,
}

impl AlgoToggle {
    pub fn new(enabled: bool, weight: f64) -> Self {
        Self { enabled, weight }
    }
}

/// Knobs for the serving path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServingConfig {
    /// Per-scorer deadline; a scorer past this is dropped from the blend.
    pub scorer_timeout_ms: u64,
    /// Each scorer is asked for `k * candidate_multiplier` items so the
    /// blend has enough overlap to rank from.
    pub candidate_multiplier: usize,
}

/// Knobs for training runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Runs with fewer interactions than this are rejected.
    pub min_interactions: usize,
    /// Bound on concurrently training algorithms.
    pub max_parallel: usize,
    /// Whole-run deadline; on expiry the run fails and nothing publishes.
    pub timeout_secs: u64,
}

/// EASE hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EaseParams {
    /// L2 regularization on the Gram matrix diagonal.
    pub lambda: f64,
    /// Cap on model vocabulary; memory scales quadratically with this.
    pub max_items: usize,
}

/// Implicit-feedback ALS hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlsParams {
    pub factors: usize,
    pub lambda: f64,
    /// Confidence scaling: c = 1 + alpha * weight.
    pub alpha: f64,
    pub iterations: usize,
}

/// BPR hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BprParams {
    pub factors: usize,
    pub learning_rate: f64,
    pub regularization: f64,
    pub epochs: usize,
    pub negative_samples: usize,
}

/// FPMC hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FpmcParams {
    pub factors: usize,
    pub learning_rate: f64,
    pub regularization: f64,
    pub epochs: usize,
}

/// Co-visitation hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoVisitParams {
    /// Interactions this close in time count as one session when no
    /// explicit session id is present.
    pub session_window_secs: i64,
    /// Pairs seen fewer times than this are dropped as noise.
    pub min_co_occurrence: u32,
    /// Neighbors retained per item.
    pub max_neighbors: usize,
}

/// Content-based similarity hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContentParams {
    pub genre_weight: f64,
    pub people_weight: f64,
    pub year_weight: f64,
    /// Year gaps beyond this contribute zero year similarity.
    pub max_year_difference: i32,
}

/// Time-decayed popularity hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PopularityParams {
    /// Interaction weight halves every this many seconds.
    pub half_life_secs: i64,
}

/// Neighborhood CF hyperparameters (user- and item-based).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KnnParams {
    pub neighbors: usize,
    /// Minimum co-rated entities for a similarity to count.
    pub min_overlap: usize,
}

/// Time-aware item CF hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeCfParams {
    /// Exponential decay rate per decay unit.
    pub decay_rate: f64,
    pub decay_unit_secs: i64,
    /// Floor so ancient interactions never vanish entirely.
    pub min_weight: f64,
    pub neighbors: usize,
}

/// Multi-hop item graph hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MultiHopParams {
    pub num_hops: usize,
    pub top_k_per_hop: usize,
    /// Score multiplier applied per hop.
    pub decay_factor: f64,
    pub min_similarity: f64,
}

/// Markov chain hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkovParams {
    pub session_window_secs: i64,
    pub min_transition_count: u32,
    pub max_transitions_per_item: usize,
    /// Laplace smoothing added to transition counts.
    pub smoothing_alpha: f64,
}

/// LinUCB hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinUcbParams {
    /// Width of the confidence bonus.
    pub alpha: f64,
    /// Item feature vector dimension (bias + year + popularity + hashed genres).
    pub feature_dim: usize,
}

/// Complete engine configuration. Replaced wholesale via
/// `ConfigManager::update`; never mutated piecemeal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-algorithm enablement and blend weight, keyed by algorithm name.
    pub algorithms: BTreeMap<String, AlgoToggle>,
    /// Bandit share of the Explore blend, in [0, 1]; the remainder goes
    /// to the exploitation (popularity) arm.
    pub explore_ratio: f64,
    /// Snapshots older than this are logged as stale while serving.
    pub staleness_threshold_secs: i64,
    pub serving: ServingConfig,
    pub training: TrainingConfig,
    pub ease: EaseParams,
    pub als: AlsParams,
    pub bpr: BprParams,
    pub fpmc: FpmcParams,
    pub covisit: CoVisitParams,
    pub content: ContentParams,
    pub popularity: PopularityParams,
    pub knn: KnnParams,
    pub time_cf: TimeCfParams,
    pub multihop: MultiHopParams,
    pub markov: MarkovParams,
    pub linucb: LinUcbParams,
    /// Seed for the randomized trainers (ALS, BPR, FPMC).
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut algorithms = BTreeMap::new();
        for (name, weight) in [
            ("covisit", 0.10),
            ("content", 0.15),
            ("popularity", 0.05),
            ("ease", 0.15),
            ("als", 0.10),
            ("user_cf", 0.10),
            ("item_cf", 0.10),
            ("time_cf", 0.05),
            ("multihop", 0.05),
            ("fpmc", 0.05),
            ("markov", 0.10),
            ("bpr", 0.05),
            ("linucb", 0.05),
        ] {
            algorithms.insert(name.to_string(), AlgoToggle::new(true, weight));
        }

        Self {
            algorithms,
            explore_ratio: 0.4,
            staleness_threshold_secs: 48 * 3600,
            serving: ServingConfig {
                scorer_timeout_ms: 250,
                candidate_multiplier: 5,
            },
            training: TrainingConfig {
                min_interactions: 100,
                max_parallel: 4,
                timeout_secs: 600,
            },
            ease: EaseParams {
                lambda: 500.0,
                max_items: 10_000,
            },
            als: AlsParams {
                factors: 64,
                lambda: 0.1,
                alpha: 40.0,
                iterations: 15,
            },
            bpr: BprParams {
                factors: 64,
                learning_rate: 0.01,
                regularization: 0.01,
                epochs: 30,
                negative_samples: 5,
            },
            fpmc: FpmcParams {
                factors: 32,
                learning_rate: 0.05,
                regularization: 0.01,
                epochs: 20,
            },
            covisit: CoVisitParams {
                session_window_secs: 24 * 3600,
                min_co_occurrence: 2,
                max_neighbors: 100,
            },
            content: ContentParams {
                genre_weight: 0.4,
                people_weight: 0.5,
                year_weight: 0.1,
                max_year_difference: 20,
            },
            popularity: PopularityParams {
                half_life_secs: 30 * 24 * 3600,
            },
            knn: KnnParams {
                neighbors: 50,
                min_overlap: 2,
            },
            time_cf: TimeCfParams {
                decay_rate: 0.1,
                decay_unit_secs: 24 * 3600,
                min_weight: 0.01,
                neighbors: 50,
            },
            multihop: MultiHopParams {
                num_hops: 2,
                top_k_per_hop: 10,
                decay_factor: 0.5,
                min_similarity: 0.1,
            },
            markov: MarkovParams {
                session_window_secs: 6 * 3600,
                min_transition_count: 2,
                max_transitions_per_item: 50,
                smoothing_alpha: 0.1,
            },
            linucb: LinUcbParams {
                alpha: 1.0,
                feature_dim: 16,
            },
            seed: 42,
        }
    }
}

impl EngineConfig {
    /// Default k for a mode when the request leaves it unset.
    pub fn default_k(&self, mode: Mode) -> usize {
        match mode {
            Mode::Personalized | Mode::Explore => 20,
            Mode::Similar => 10,
            Mode::Next => 6,
        }
    }

    /// Hard cap on k per mode. Requests above this are clamped, not
    /// rejected.
    pub fn max_k(&self, mode: Mode) -> usize {
        match mode {
            Mode::Personalized | Mode::Explore => 100,
            Mode::Similar => 50,
            Mode::Next => 20,
        }
    }

    /// Whether an algorithm is enabled.
    pub fn enabled(&self, name: &str) -> bool {
        self.algorithms.get(name).is_some_and(|t| t.enabled)
    }

    /// Blend weight for an algorithm; disabled or unknown names get 0.
    pub fn weight(&self, name: &str) -> f64 {
        self.algorithms
            .get(name)
            .filter(|t| t.enabled)
            .map_or(0.0, |t| t.weight)
    }

    /// Validate the configuration. Called before a config is accepted;
    /// a rejected config leaves the active one unchanged.
    pub fn validate(&self) -> Result<()> {
        for (name, toggle) in &self.algorithms {
            if !ALGORITHM_NAMES.contains(&name.as_str()) {
                return Err(invalid(format!("unknown algorithm {name:?}")));
            }
            if !toggle.weight.is_finite() || toggle.weight < 0.0 {
                return Err(invalid(format!(
                    "weight for {name} must be non-negative, got {}",
                    toggle.weight
                )));
            }
        }

        for mode in [Mode::Personalized, Mode::Similar, Mode::Explore, Mode::Next] {
            let any_enabled = mode
                .eligible_algorithms()
                .iter()
                .any(|name| self.enabled(name));
            if !any_enabled {
                return Err(invalid(format!(
                    "no enabled algorithm serves {} mode",
                    mode.as_str()
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.explore_ratio) {
            return Err(invalid(format!(
                "explore_ratio must be in [0, 1], got {}",
                self.explore_ratio
            )));
        }
        if self.serving.candidate_multiplier == 0 {
            return Err(invalid("serving.candidate_multiplier must be positive"));
        }
        if self.training.max_parallel == 0 {
            return Err(invalid("training.max_parallel must be positive"));
        }
        if self.training.timeout_secs == 0 {
            return Err(invalid("training.timeout_secs must be positive"));
        }
        if self.ease.lambda < 0.0 {
            return Err(invalid("ease.lambda must be non-negative"));
        }
        if self.ease.max_items == 0 {
            return Err(invalid("ease.max_items must be positive"));
        }
        if self.als.factors == 0 || self.als.iterations == 0 {
            return Err(invalid("als.factors and als.iterations must be positive"));
        }
        if self.bpr.factors == 0 || self.bpr.epochs == 0 || self.bpr.negative_samples == 0 {
            return Err(invalid("bpr factors/epochs/negative_samples must be positive"));
        }
        if self.fpmc.factors == 0 || self.fpmc.epochs == 0 {
            return Err(invalid("fpmc.factors and fpmc.epochs must be positive"));
        }
        if self.popularity.half_life_secs <= 0 {
            return Err(invalid("popularity.half_life_secs must be positive"));
        }
        if self.markov.session_window_secs <= 0 || self.covisit.session_window_secs <= 0 {
            return Err(invalid("session windows must be positive"));
        }
        if self.multihop.num_hops == 0 {
            return Err(invalid("multihop.num_hops must be positive"));
        }
        if !(0.0..=1.0).contains(&self.multihop.decay_factor) {
            return Err(invalid("multihop.decay_factor must be in [0, 1]"));
        }
        if self.linucb.feature_dim < 3 {
            return Err(invalid("linucb.feature_dim must be at least 3"));
        }

        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> RecError {
    RecError::InvalidConfig {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn negative_weight_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.algorithms
            .insert("ease".into(), AlgoToggle::new(true, -0.5));
        assert!(matches!(
            cfg.validate(),
            Err(RecError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn mode_without_any_enabled_algorithm_is_rejected() {
        let mut cfg = EngineConfig::default();
        // Explore is served by linucb and popularity only.
        cfg.algorithms
            .insert("linucb".into(), AlgoToggle::new(false, 0.0));
        cfg.algorithms
            .insert("popularity".into(), AlgoToggle::new(false, 0.0));
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("explore"));
    }

    #[test]
    fn explore_ratio_out_of_range_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.explore_ratio = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_algorithm_name_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.algorithms
            .insert("sasrec".into(), AlgoToggle::new(true, 0.1));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn mode_defaults_and_caps() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.default_k(Mode::Personalized), 20);
        assert_eq!(cfg.default_k(Mode::Explore), 20);
        assert_eq!(cfg.default_k(Mode::Similar), 10);
        assert_eq!(cfg.default_k(Mode::Next), 6);
        assert_eq!(cfg.max_k(Mode::Next), 20);
    }

    #[test]
    fn disabled_algorithm_has_zero_weight() {
        let mut cfg = EngineConfig::default();
        cfg.algorithms
            .insert("ease".into(), AlgoToggle::new(false, 0.8));
        assert_eq!(cfg.weight("ease"), 0.0);
        assert!(cfg.weight("content") > 0.0);
    }
}
