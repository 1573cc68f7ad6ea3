//! The model store: one immutable snapshot of all trained state,
//! swapped atomically on publish. Serving reads clone an `Arc` and keep
//! it for the life of the request, so a concurrent publish never
//! changes what an in-flight request sees.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use rec_types::{Item, ItemId, Timestamp, UserId};
use scorers::AlgorithmState;

/// Everything the serving path needs, trained as one unit.
#[derive(Debug, Default)]
pub struct ModelSnapshot {
    /// Monotonic publish counter; 0 means never trained.
    pub version: u64,
    pub trained_at: Timestamp,
    /// Trained state per algorithm name. A module that failed its last
    /// run keeps the previous version's state here (stale, not missing).
    pub states: HashMap<&'static str, Arc<AlgorithmState>>,
    /// Raw interaction mass per item, for deterministic tie-breaking.
    pub item_popularity: HashMap<ItemId, f64>,
    /// Items each user has already consumed, for history exclusion.
    pub user_seen: HashMap<UserId, HashSet<ItemId>>,
    /// Item catalog as of training time.
    pub items: HashMap<ItemId, Item>,
}

/// Holder of the current snapshot. The lock is held only long enough to
/// clone or replace an `Arc`.
pub struct ModelStore {
    current: RwLock<Arc<ModelSnapshot>>,
}

impl ModelStore {
    /// Starts with an empty version-0 snapshot; serving against it finds
    /// no trained state and fails with "no scorer available".
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(ModelSnapshot::default())),
        }
    }

    pub fn current(&self) -> Arc<ModelSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn publish(&self, snapshot: ModelSnapshot) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(snapshot);
    }
}

impl Default for ModelStore {
    fn default() -> Self {
        Self::new()
    }
}
