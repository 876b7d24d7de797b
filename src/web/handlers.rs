use axum::{
    extract::{Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_stream::StreamExt;

use super::{ApiResponse, AppState, HealthResponse, HttpError};
use crate::cache::CacheStats;
use crate::models::{HistoryStats, RecentSearch, SearchFilters, SearchRequest, SearchResultRow, SearchSummary, SortBy};
use crate::stores::StoreInfo;

const KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Query string shared by the streaming and classic search endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub q: Option<String>,
    /// Comma-separated store ids.
    pub stores: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub in_stock_only: Option<bool>,
    pub with_discount_only: Option<bool>,
    pub sort_by: Option<String>,
}

impl SearchParams {
    pub fn into_request(self) -> SearchRequest {
        let stores = self
            .stores
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        SearchRequest::new(self.q.unwrap_or_default()).with_filters(SearchFilters {
            stores,
            min_price: self.min_price,
            max_price: self.max_price,
            in_stock_only: self.in_stock_only.unwrap_or(false),
            discounted_only: self.with_discount_only.unwrap_or(false),
            sort_by: SortBy::from_param(self.sort_by.as_deref()),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PriceHistoryParams {
    pub name: Option<String>,
    pub store: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub history: HistoryStats,
    pub cache: CacheStats,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let stores = state.orchestrator.registry().enabled().await.len();
    Json(HealthResponse::healthy(stores))
}

/// Streams the query's events as Server-Sent Events. An invalid query is
/// rejected with 400 before the stream opens.
pub async fn search_stream(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, HttpError> {
    let request = params.into_request();
    tracing::debug!(query = %request.query, "Opening search stream");

    let events = state
        .orchestrator
        .search_stream(request)?
        .map(|event| Event::default().json_data(event));

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE)))
}

pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<ApiResponse<SearchSummary>>, HttpError> {
    let summary = state.orchestrator.search(params.into_request()).await?;
    Ok(Json(ApiResponse::success(summary)))
}

pub async fn list_stores(State(state): State<AppState>) -> Json<ApiResponse<Vec<StoreInfo>>> {
    let stores = state.orchestrator.registry().available_stores().await;
    Json(ApiResponse::success(stores))
}

pub async fn recent_searches(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<ApiResponse<Vec<RecentSearch>>>, HttpError> {
    let limit = params.limit.unwrap_or(10).clamp(1, 100);
    let searches = state.history.recent_searches(limit).await?;
    Ok(Json(ApiResponse::success(searches)))
}

pub async fn price_history(
    State(state): State<AppState>,
    Query(params): Query<PriceHistoryParams>,
) -> Result<Json<ApiResponse<Vec<SearchResultRow>>>, HttpError> {
    let name = params
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| HttpError::bad_request("Parameter 'name' is required"))?;
    let store = params
        .store
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| HttpError::bad_request("Parameter 'store' is required"))?;

    if state.orchestrator.registry().get(&store).await.is_none() {
        return Err(HttpError::not_found(format!("Store '{}'", store)));
    }

    let limit = params.limit.unwrap_or(30).clamp(1, 500);
    let rows = state.history.price_history(name.trim(), &store, limit).await?;
    Ok(Json(ApiResponse::success(rows)))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<ApiResponse<StatsResponse>>, HttpError> {
    let history = state.history.stats().await?;
    let cache = state.orchestrator.cache().stats();
    Ok(Json(ApiResponse::success(StatsResponse { history, cache })))
}

pub async fn clear_cache(State(state): State<AppState>) -> Json<ApiResponse<CacheStats>> {
    state.orchestrator.cache().clear().await;
    tracing::info!("Search cache cleared");
    Json(ApiResponse::success(state.orchestrator.cache().stats()))
}
