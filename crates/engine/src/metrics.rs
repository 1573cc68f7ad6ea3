//! Engine counters. Hot-path increments are atomics or a short-lived
//! mutex over a small map; `snapshot()` produces a serializable view
//! for whatever surface the host exposes.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use rec_types::Mode;

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct CallStats {
    pub invocations: u64,
    pub failures: u64,
    /// Cumulative; average = total_latency_ms / invocations.
    pub total_latency_ms: u64,
}

#[derive(Default)]
pub struct EngineMetrics {
    requests: AtomicU64,
    errors: AtomicU64,
    training_success: AtomicU64,
    training_failure: AtomicU64,
    last_training_ms: AtomicU64,
    model_version: AtomicU64,
    modes: Mutex<BTreeMap<&'static str, CallStats>>,
    algorithms: Mutex<BTreeMap<&'static str, CallStats>>,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub training_success: u64,
    pub training_failure: u64,
    pub last_training_ms: u64,
    pub model_version: u64,
    pub modes: BTreeMap<&'static str, CallStats>,
    pub algorithms: BTreeMap<&'static str, CallStats>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, mode: Mode, latency_ms: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let mut modes = self.modes.lock().unwrap_or_else(|e| e.into_inner());
        let entry = modes.entry(mode.as_str()).or_default();
        entry.invocations += 1;
        entry.total_latency_ms += latency_ms;
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_algorithm(&self, name: &'static str, latency_ms: u64, failed: bool) {
        let mut algos = self.algorithms.lock().unwrap_or_else(|e| e.into_inner());
        let entry = algos.entry(name).or_default();
        entry.invocations += 1;
        entry.total_latency_ms += latency_ms;
        if failed {
            entry.failures += 1;
        }
    }

    pub fn record_training(&self, success: bool, duration_ms: u64, model_version: u64) {
        if success {
            self.training_success.fetch_add(1, Ordering::Relaxed);
            self.model_version.store(model_version, Ordering::Relaxed);
        } else {
            self.training_failure.fetch_add(1, Ordering::Relaxed);
        }
        self.last_training_ms.store(duration_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            training_success: self.training_success.load(Ordering::Relaxed),
            training_failure: self.training_failure.load(Ordering::Relaxed),
            last_training_ms: self.last_training_ms.load(Ordering::Relaxed),
            model_version: self.model_version.load(Ordering::Relaxed),
            modes: self.modes.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            algorithms: self
                .algorithms
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = EngineMetrics::new();
        metrics.record_request(Mode::Similar, 12);
        metrics.record_request(Mode::Similar, 8);
        metrics.record_algorithm("ease", 3, false);
        metrics.record_algorithm("ease", 5, true);
        metrics.record_training(true, 900, 4);

        let snap = metrics.snapshot();
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.modes["similar"].invocations, 2);
        assert_eq!(snap.modes["similar"].total_latency_ms, 20);
        assert_eq!(snap.algorithms["ease"].failures, 1);
        assert_eq!(snap.model_version, 4);
    }

    #[test]
    fn snapshot_serializes() {
        let metrics = EngineMetrics::new();
        metrics.record_request(Mode::Next, 1);
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains("\"next\""));
    }
}
