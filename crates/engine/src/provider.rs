//! The data access seam. The engine never talks to a store directly;
//! everything it learns from arrives through [`DataProvider`], which the
//! host wires to its own persistence. [`MemoryProvider`] backs the demo
//! binary and the test suites.

use async_trait::async_trait;
use tokio::sync::RwLock;

use rec_types::{Interaction, Item, ItemId, Result, Timestamp};

/// Read-only access to the interaction log and item catalog. Called
/// from the background training task, so implementations must be safe
/// to invoke concurrently with serving.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Interactions at or after `since`; all of them when `None`.
    async fn interactions(&self, since: Option<Timestamp>) -> Result<Vec<Interaction>>;

    async fn items(&self) -> Result<Vec<Item>>;

    async fn item(&self, id: ItemId) -> Result<Option<Item>>;
}

/// In-memory provider for tests and the demo binary.
#[derive(Default)]
pub struct MemoryProvider {
    interactions: RwLock<Vec<Interaction>>,
    items: RwLock<Vec<Item>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_interactions(&self, batch: impl IntoIterator<Item = Interaction>) {
        self.interactions.write().await.extend(batch);
    }

    pub async fn push_items(&self, batch: impl IntoIterator<Item = Item>) {
        self.items.write().await.extend(batch);
    }
}

#[async_trait]
impl DataProvider for MemoryProvider {
    async fn interactions(&self, since: Option<Timestamp>) -> Result<Vec<Interaction>> {
        let log = self.interactions.read().await;
        Ok(match since {
            Some(cutoff) => log.iter().filter(|i| i.timestamp >= cutoff).cloned().collect(),
            None => log.clone(),
        })
    }

    async fn items(&self) -> Result<Vec<Item>> {
        Ok(self.items.read().await.clone())
    }

    async fn item(&self, id: ItemId) -> Result<Option<Item>> {
        Ok(self.items.read().await.iter().find(|i| i.id == id).cloned())
    }
}
