use chrono::Utc;
use futures::FutureExt;
use metrics::{counter, histogram};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::aggregate::{AggregationState, FilterSet};
use crate::cache::SearchCache;
use crate::config::SearchConfig;
use crate::history::HistorySink;
use crate::models::{
    NormalizedProduct, SearchEvent, SearchRequest, SearchStarted, SearchSummary, SortBy, StoreEmpty,
    StoreFailure, StoreProgress, StoreResult, StoreSearching, StoreStatus,
};
use crate::stores::normalize;
use crate::stores::{SearchOptions, StoreAdapterRef, StoreRegistry};
use crate::utils::error::{AppError, Result};

/// Events of one query, ending with `cached` or `done`.
pub type SearchEventStream = UnboundedReceiverStream<SearchEvent>;

/// What an adapter task reports back to the aggregation loop.
#[derive(Debug)]
enum Progress {
    Started {
        index: usize,
    },
    Finished {
        index: usize,
        outcome: Outcome,
        engine_time_ms: u64,
    },
}

#[derive(Debug)]
enum Outcome {
    Products(Vec<NormalizedProduct>),
    Failed { error: String, timed_out: bool },
}

/// Runs queries across the registered stores.
///
/// Each query is served by its own task. Adapters run under a shared
/// concurrency bound and report back over a channel to a single
/// aggregation loop, which owns the query's [`AggregationState`] and emits
/// the progress events.
#[derive(Clone)]
pub struct SearchOrchestrator {
    registry: StoreRegistry,
    cache: SearchCache,
    history: Arc<dyn HistorySink>,
    config: SearchConfig,
}

impl SearchOrchestrator {
    pub fn new(
        registry: StoreRegistry,
        cache: SearchCache,
        history: Arc<dyn HistorySink>,
        config: SearchConfig,
    ) -> Self {
        Self {
            registry,
            cache,
            history,
            config,
        }
    }

    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &SearchCache {
        &self.cache
    }

    /// Validates `request` and starts it. Validation errors are returned
    /// before any event is produced.
    ///
    /// Dropping the stream does not cancel the adapters already running;
    /// they finish or time out and the result is still cached and saved.
    pub fn search_stream(&self, request: SearchRequest) -> Result<SearchEventStream> {
        request.validate(self.config.min_query_chars)?;

        let (events, receiver) = mpsc::unbounded_channel();
        let orchestrator = self.clone();
        let span = info_span!("search", id = %Uuid::new_v4(), query = %request.query);
        tokio::spawn(
            async move {
                orchestrator.execute(request, events).await;
            }
            .instrument(span),
        );

        Ok(UnboundedReceiverStream::new(receiver))
    }

    /// Runs a query to completion and returns its terminal payload.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchSummary> {
        let mut stream = self.search_stream(request)?;

        while let Some(event) = stream.next().await {
            if let Some(summary) = event.into_summary() {
                return Ok(summary);
            }
        }

        Err(AppError::Internal("Search ended without a terminal event".to_string()))
    }

    async fn execute(self, request: SearchRequest, events: mpsc::UnboundedSender<SearchEvent>) {
        let query = request.query.clone();
        let fingerprint = request.fingerprint();
        counter!("searches_total").increment(1);

        if let Some(cached) = self.cache.get(&fingerprint).await {
            info!(query = %query, results = cached.total_results, "Serving search from cache");
            let mut summary = (*cached).clone();
            summary.from_cache = true;
            let _ = events.send(SearchEvent::Cached(summary));
            return;
        }

        let adapters = self.registry.select(&request.filters.stores).await;
        let stores: Vec<StoreProgress> = adapters
            .iter()
            .map(|adapter| StoreProgress {
                name: adapter.name().to_string(),
                display_name: adapter.display_name().to_string(),
                status: StoreStatus::Pending,
            })
            .collect();
        let scheduled: Vec<String> = stores.iter().map(|s| s.name.clone()).collect();
        let filters = FilterSet::from_request(&request.filters, &scheduled);
        let sort_by = request.filters.sort_by;

        info!(query = %query, stores = stores.len(), "Search started");
        let _ = events.send(SearchEvent::Start(SearchStarted {
            query: query.clone(),
            total_stores: stores.len(),
            stores: stores.clone(),
        }));

        let mut state = AggregationState::new(stores.clone());
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

        let dispatcher = self.dispatch(adapters, query.clone(), progress_tx);
        let aggregator = async {
            while let Some(progress) = progress_rx.recv().await {
                if let Some(event) = apply_progress(&mut state, &stores, &filters, sort_by, progress) {
                    let _ = events.send(event);
                }
            }
        };
        tokio::join!(dispatcher, aggregator);

        if !state.is_complete() {
            warn!(
                query = %query,
                completed = state.completed(),
                total = state.total(),
                "Adapters stopped reporting before completion"
            );
        }

        let all_products = state.sorted(sort_by);
        let results = filters.apply(&all_products);
        let summary = SearchSummary {
            query: query.clone(),
            total_results: results.len(),
            results,
            search_time_ms: state.elapsed_ms(),
            stores_searched: state.stores_searched().to_vec(),
            stores_failed: state.stores_failed().to_vec(),
            timestamp: Utc::now(),
            from_cache: false,
        };

        self.save_history(&query, all_products);
        self.cache.set(fingerprint, summary.clone()).await;

        histogram!("search_duration_seconds").record(summary.search_time_ms as f64 / 1000.0);
        info!(
            query = %query,
            results = summary.total_results,
            ok = summary.stores_searched.len(),
            failed = summary.stores_failed.len(),
            elapsed_ms = summary.search_time_ms,
            "Search finished"
        );

        let _ = events.send(SearchEvent::Done(summary));
    }

    /// Starts adapters in registry order, at most `concurrency` at a time.
    /// Returns once every adapter has been started.
    async fn dispatch(&self, adapters: Vec<StoreAdapterRef>, query: String, progress: mpsc::UnboundedSender<Progress>) {
        let slots = Arc::new(Semaphore::new(self.config.concurrency));
        let query: Arc<str> = Arc::from(query);
        let options = SearchOptions {
            max_results: self.config.max_results_per_store,
        };
        let timeout = self.config.adapter_timeout();

        for (index, adapter) in adapters.into_iter().enumerate() {
            let permit = match Arc::clone(&slots).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    let _ = progress.send(Progress::Finished {
                        index,
                        outcome: Outcome::Failed {
                            error: e.to_string(),
                            timed_out: false,
                        },
                        engine_time_ms: 0,
                    });
                    continue;
                }
            };

            let query = Arc::clone(&query);
            let progress = progress.clone();
            tokio::spawn(
                async move {
                    run_adapter(index, adapter, &query, options, timeout, &progress).await;
                    drop(permit);
                }
                .in_current_span(),
            );
        }
    }

    fn save_history(&self, query: &str, products: Vec<NormalizedProduct>) {
        if products.is_empty() {
            return;
        }

        let history = Arc::clone(&self.history);
        let query = query.to_string();
        tokio::spawn(async move {
            match history.save(&query, &products).await {
                Ok(()) => debug!(query = %query, saved = products.len(), "Saved search history"),
                Err(e) => warn!(query = %query, error = %e, "Failed to save search history"),
            }
        });
    }
}

async fn run_adapter(
    index: usize,
    adapter: StoreAdapterRef,
    query: &str,
    options: SearchOptions,
    timeout: Duration,
    progress: &mpsc::UnboundedSender<Progress>,
) {
    let _ = progress.send(Progress::Started { index });
    let started = Instant::now();
    let store = adapter.name().to_string();

    let result = tokio::time::timeout(timeout, AssertUnwindSafe(adapter.search(query, &options)).catch_unwind()).await;
    let engine_time = started.elapsed();

    let outcome = match result {
        Ok(Ok(Ok(records))) => Outcome::Products(normalize::process(
            records,
            query,
            adapter.name(),
            adapter.display_name(),
            options.max_results,
        )),
        Ok(Ok(Err(e))) => {
            warn!(store = %store, error = %e, "Store search failed");
            Outcome::Failed {
                error: e.to_string(),
                timed_out: false,
            }
        }
        Ok(Err(_)) => {
            warn!(store = %store, "Store search panicked");
            Outcome::Failed {
                error: "Adapter panicked".to_string(),
                timed_out: false,
            }
        }
        Err(_) => {
            let timeout_ms = timeout.as_millis() as u64;
            warn!(store = %store, timeout_ms, "Store search timed out");
            Outcome::Failed {
                error: AppError::Timeout { timeout_ms }.to_string(),
                timed_out: true,
            }
        }
    };

    let label = match &outcome {
        Outcome::Products(products) if products.is_empty() => "empty",
        Outcome::Products(_) => "result",
        Outcome::Failed { timed_out: true, .. } => "timeout",
        Outcome::Failed { .. } => "error",
    };
    counter!("store_searches_total", "store" => store.clone(), "outcome" => label).increment(1);
    histogram!("store_search_duration_seconds", "store" => store).record(engine_time.as_secs_f64());

    let _ = progress.send(Progress::Finished {
        index,
        outcome,
        engine_time_ms: engine_time.as_millis() as u64,
    });
}

/// Folds one adapter report into the query state and returns the event to
/// emit, if any. Reports for a store that already settled are dropped.
fn apply_progress(
    state: &mut AggregationState,
    stores: &[StoreProgress],
    filters: &FilterSet,
    sort_by: SortBy,
    progress: Progress,
) -> Option<SearchEvent> {
    match progress {
        Progress::Started { index } => {
            let store = stores.get(index)?;
            if !state.mark_searching(index) {
                return None;
            }
            debug!(store = %store.name, "Store search started");
            Some(SearchEvent::Searching(StoreSearching {
                store: store.name.clone(),
                display_name: store.display_name.clone(),
            }))
        }
        Progress::Finished {
            index,
            outcome,
            engine_time_ms,
        } => {
            let store = stores.get(index)?;
            match outcome {
                Outcome::Products(products) if !products.is_empty() => {
                    let new_products = filters.apply(&products);
                    let found = products.len();
                    if !state.record_products(index, products) {
                        warn!(store = %store.name, "Dropped duplicate store report");
                        return None;
                    }

                    let all_products = filters.apply(&state.sorted(sort_by));
                    debug!(store = %store.name, found, total = all_products.len(), engine_time_ms, "Store results");
                    Some(SearchEvent::StoreResult(StoreResult {
                        store: store.name.clone(),
                        display_name: store.display_name.clone(),
                        new_products,
                        total_results: all_products.len(),
                        all_products,
                        stores_completed: state.completed(),
                        total_stores: state.total(),
                        stores_searched: state.stores_searched().to_vec(),
                        stores_failed: state.stores_failed().to_vec(),
                        search_time_ms: state.elapsed_ms(),
                        engine_time_ms,
                    }))
                }
                Outcome::Products(_) => {
                    if !state.record_products(index, Vec::new()) {
                        return None;
                    }
                    debug!(store = %store.name, engine_time_ms, "Store returned nothing");
                    Some(SearchEvent::StoreEmpty(StoreEmpty {
                        store: store.name.clone(),
                        display_name: store.display_name.clone(),
                        stores_completed: state.completed(),
                        total_stores: state.total(),
                        engine_time_ms,
                    }))
                }
                Outcome::Failed { error, timed_out } => {
                    if !state.record_failure(index) {
                        return None;
                    }
                    Some(SearchEvent::StoreError(StoreFailure {
                        store: store.name.clone(),
                        display_name: store.display_name.clone(),
                        error,
                        timed_out,
                        stores_completed: state.completed(),
                        total_stores: state.total(),
                    }))
                }
            }
        }
    }
}
