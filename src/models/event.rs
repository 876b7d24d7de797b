use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::product::NormalizedProduct;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreStatus {
    Pending,
    Searching,
    Done,
    Empty,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreProgress {
    pub name: String,
    pub display_name: String,
    pub status: StoreStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchStarted {
    pub query: String,
    pub total_stores: usize,
    pub stores: Vec<StoreProgress>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSearching {
    pub store: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreResult {
    pub store: String,
    pub display_name: String,
    pub new_products: Vec<NormalizedProduct>,
    pub all_products: Vec<NormalizedProduct>,
    pub total_results: usize,
    pub stores_completed: usize,
    pub total_stores: usize,
    pub stores_searched: Vec<String>,
    pub stores_failed: Vec<String>,
    pub search_time_ms: u64,
    pub engine_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreEmpty {
    pub store: String,
    pub display_name: String,
    pub stores_completed: usize,
    pub total_stores: usize,
    pub engine_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreFailure {
    pub store: String,
    pub display_name: String,
    pub error: String,
    pub timed_out: bool,
    pub stores_completed: usize,
    pub total_stores: usize,
}

/// Final aggregate of one query, also the cached snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSummary {
    pub query: String,
    pub results: Vec<NormalizedProduct>,
    pub total_results: usize,
    pub search_time_ms: u64,
    pub stores_searched: Vec<String>,
    pub stores_failed: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub from_cache: bool,
}

/// Progress of one query invocation. `Cached` and `Done` are terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SearchEvent {
    Start(SearchStarted),
    Searching(StoreSearching),
    StoreResult(StoreResult),
    StoreEmpty(StoreEmpty),
    StoreError(StoreFailure),
    Cached(SearchSummary),
    Done(SearchSummary),
}

impl SearchEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SearchEvent::Start(_) => "start",
            SearchEvent::Searching(_) => "searching",
            SearchEvent::StoreResult(_) => "store_result",
            SearchEvent::StoreEmpty(_) => "store_empty",
            SearchEvent::StoreError(_) => "store_error",
            SearchEvent::Cached(_) => "cached",
            SearchEvent::Done(_) => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SearchEvent::Cached(_) | SearchEvent::Done(_))
    }

    /// Store id for per-store events.
    pub fn store(&self) -> Option<&str> {
        match self {
            SearchEvent::Searching(e) => Some(&e.store),
            SearchEvent::StoreResult(e) => Some(&e.store),
            SearchEvent::StoreEmpty(e) => Some(&e.store),
            SearchEvent::StoreError(e) => Some(&e.store),
            _ => None,
        }
    }

    /// True for the event that settles a store: result, empty or error.
    pub fn is_completion(&self) -> bool {
        matches!(
            self,
            SearchEvent::StoreResult(_) | SearchEvent::StoreEmpty(_) | SearchEvent::StoreError(_)
        )
    }

    pub fn into_summary(self) -> Option<SearchSummary> {
        match self {
            SearchEvent::Cached(summary) | SearchEvent::Done(summary) => Some(summary),
            _ => None,
        }
    }
}
