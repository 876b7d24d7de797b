use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{StoreAdapter, StoreInfo};
use crate::utils::error::{AppError, Result};

pub type StoreAdapterRef = Arc<dyn StoreAdapter>;

/// Registered store adapters, kept in registration order. That order is the
/// order in which a query schedules them.
#[derive(Clone)]
pub struct StoreRegistry {
    adapters: Arc<RwLock<Vec<StoreAdapterRef>>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self {
            adapters: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register an adapter. Names must be unique.
    pub async fn register(&self, adapter: StoreAdapterRef) -> Result<()> {
        let mut adapters = self.adapters.write().await;
        if adapters.iter().any(|a| a.name() == adapter.name()) {
            return Err(AppError::store(adapter.name(), "adapter already registered"));
        }

        tracing::debug!(store = adapter.name(), kind = ?adapter.kind(), "Registered store adapter");
        adapters.push(adapter);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<StoreAdapterRef> {
        let adapters = self.adapters.read().await;
        adapters.iter().find(|a| a.name() == name).cloned()
    }

    /// All enabled adapters, in registration order.
    pub async fn enabled(&self) -> Vec<StoreAdapterRef> {
        let adapters = self.adapters.read().await;
        adapters.iter().filter(|a| a.is_enabled()).cloned().collect()
    }

    pub async fn available_stores(&self) -> Vec<StoreInfo> {
        self.enabled().await.iter().map(|a| a.info()).collect()
    }

    /// Adapters to schedule for an allow-list. An empty allow-list, or one that
    /// names no enabled adapter, selects every enabled adapter.
    pub async fn select(&self, allow_list: &[String]) -> Vec<StoreAdapterRef> {
        let enabled = self.enabled().await;
        if allow_list.is_empty() {
            return enabled;
        }

        let selected: Vec<StoreAdapterRef> = enabled
            .iter()
            .filter(|a| allow_list.iter().any(|name| name == a.name()))
            .cloned()
            .collect();

        if selected.is_empty() {
            tracing::debug!(?allow_list, "Allow-list matched no enabled store, using all");
            enabled
        } else {
            selected
        }
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}
