use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::CandidateRecord;
use crate::utils::error::Result;

/// How an adapter reaches its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// Plain HTTP requests.
    Fetch,
    /// Borrows a session from the shared render pool.
    Render,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub max_results: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { max_results: 20 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreInfo {
    pub name: String,
    pub display_name: String,
    pub enabled: bool,
    pub kind: AdapterKind,
}

/// One external store. An empty `search` result is a valid answer.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Stable identifier, used in allow-lists and persisted rows.
    fn name(&self) -> &str;
    fn display_name(&self) -> &str;
    fn base_url(&self) -> &str;
    fn kind(&self) -> AdapterKind;

    /// Disabled adapters are never scheduled.
    fn is_enabled(&self) -> bool {
        true
    }

    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<CandidateRecord>>;

    fn info(&self) -> StoreInfo {
        StoreInfo {
            name: self.name().to_string(),
            display_name: self.display_name().to_string(),
            enabled: self.is_enabled(),
            kind: self.kind(),
        }
    }
}
