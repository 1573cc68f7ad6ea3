//! Hot-reloadable configuration. The active config is an immutable
//! `Arc` swapped wholesale after validation; a rejected update leaves
//! the active config untouched, and in-flight requests finish on the
//! config they started with.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use rec_types::{EngineConfig, Result};

pub struct ConfigManager {
    current: RwLock<Arc<EngineConfig>>,
}

impl ConfigManager {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(config)),
        })
    }

    pub fn get(&self) -> Arc<EngineConfig> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate and swap. Visible to every call that starts after this
    /// returns.
    pub fn update(&self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        let enabled = config.algorithms.values().filter(|t| t.enabled).count();
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(config);
        info!(enabled_algorithms = enabled, "configuration updated");
        Ok(())
    }
}
