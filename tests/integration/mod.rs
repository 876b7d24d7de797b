// Shared fixtures for the integration tests: scripted stores, a recording
// history sink and an in-process render backend.

pub mod api_tests;
pub mod orchestrator_tests;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use busca_precos::{
    config::{AppConfig, SearchConfig},
    history::HistorySink,
    models::{CandidateRecord, NormalizedProduct, SearchEvent, SearchRequest},
    render::{RenderBackend, RenderBrowser, RenderPage, SessionProfile},
    stores::{AdapterKind, SearchOptions, StoreAdapter, StoreAdapterRef},
    web::{create_router, AppState},
    AppError, Result, SearchCache, SearchOrchestrator, SqliteHistory, StoreRegistry,
};

/// Test configuration: default stack with a short adapter deadline.
pub fn get_test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.search.adapter_timeout_secs = 1;
    config.database.url = "sqlite::memory:".to_string();
    config
}

/// How a scripted store answers.
#[derive(Clone)]
pub enum Script {
    Items(Vec<CandidateRecord>),
    Fail(String),
    Hang,
    Panic,
}

/// Tracks how many stores are searching at the same time.
#[derive(Default)]
pub struct ConcurrencyTracker {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyTracker {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct ScriptedStore {
    name: String,
    script: Script,
    delay: Duration,
    enabled: bool,
    tracker: Option<Arc<ConcurrencyTracker>>,
    calls: AtomicUsize,
}

impl ScriptedStore {
    pub fn new(name: &str, script: Script) -> Self {
        Self {
            name: name.to_string(),
            script,
            delay: Duration::ZERO,
            enabled: true,
            tracker: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn tracked(mut self, tracker: Arc<ConcurrencyTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreAdapter for ScriptedStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn base_url(&self) -> &str {
        "https://loja.test"
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Fetch
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn search(&self, _query: &str, _options: &SearchOptions) -> Result<Vec<CandidateRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(tracker) = &self.tracker {
            tracker.enter();
        }
        tokio::time::sleep(self.delay).await;
        if let Some(tracker) = &self.tracker {
            tracker.exit();
        }

        match &self.script {
            Script::Items(items) => Ok(items.clone()),
            Script::Fail(message) => Err(AppError::store(self.name.clone(), message.clone())),
            Script::Hang => {
                std::future::pending::<()>().await;
                Ok(Vec::new())
            }
            Script::Panic => panic!("scripted store panicked"),
        }
    }
}

/// Candidate records named after `query` so they pass the relevance gate.
pub fn items(store: &str, query: &str, prices: &[f64]) -> Vec<CandidateRecord> {
    prices
        .iter()
        .enumerate()
        .map(|(i, price)| {
            CandidateRecord::new(
                format!("{} {} modelo {}", query, store, i),
                *price,
                format!("https://{}.test/produto/{}", store, i),
            )
        })
        .collect()
}

pub fn scripted(name: &str, script: Script) -> StoreAdapterRef {
    Arc::new(ScriptedStore::new(name, script))
}

/// History sink that keeps every save in memory.
#[derive(Default)]
pub struct RecordingSink {
    saved: Mutex<Vec<(String, Vec<NormalizedProduct>)>>,
    fail: AtomicBool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.fail.store(true, Ordering::SeqCst);
        sink
    }

    pub fn saves(&self) -> Vec<(String, Vec<NormalizedProduct>)> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistorySink for RecordingSink {
    async fn save(&self, query: &str, products: &[NormalizedProduct]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Internal("disk full".to_string()));
        }
        self.saved
            .lock()
            .unwrap()
            .push((query.to_string(), products.to_vec()));
        Ok(())
    }
}

pub async fn create_orchestrator(
    adapters: Vec<StoreAdapterRef>,
    search: SearchConfig,
    sink: Arc<dyn HistorySink>,
) -> anyhow::Result<SearchOrchestrator> {
    let registry = StoreRegistry::new();
    for adapter in adapters {
        registry.register(adapter).await?;
    }

    Ok(SearchOrchestrator::new(
        registry,
        SearchCache::new(100, Duration::from_secs(60)),
        sink,
        search,
    ))
}

/// Runs `request` and collects every event up to the end of the stream.
pub async fn collect_events(orchestrator: &SearchOrchestrator, request: SearchRequest) -> anyhow::Result<Vec<SearchEvent>> {
    let stream = orchestrator.search_stream(request)?;
    let events = tokio::time::timeout(Duration::from_secs(10), stream.collect::<Vec<_>>()).await?;
    Ok(events)
}

/// App state backed by an in-memory history and the given stores.
pub async fn create_test_app_state(adapters: Vec<StoreAdapterRef>) -> anyhow::Result<AppState> {
    let config = get_test_config();
    let history = SqliteHistory::in_memory().await?;
    let orchestrator = create_orchestrator(adapters, config.search.clone(), Arc::new(history.clone())).await?;

    Ok(AppState::new(orchestrator, history))
}

pub async fn create_test_app(adapters: Vec<StoreAdapterRef>) -> anyhow::Result<(Router, AppState)> {
    let state = create_test_app_state(adapters).await?;
    Ok((create_router(state.clone()), state))
}

/// Sends one request through the router and returns status and body.
pub async fn make_request(app: &Router, method: Method, uri: &str) -> anyhow::Result<(axum::http::StatusCode, String)> {
    let request = Request::builder().method(method).uri(uri).body(Body::empty())?;

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;

    Ok((status, String::from_utf8(bytes.to_vec())?))
}

/// Helper to wait for async operations
pub async fn wait_for_condition<F, Fut>(mut condition: F, timeout_seconds: u64) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_seconds);

    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    false
}

/// Render backend serving fixed HTML, with launch and page counters.
#[derive(Clone, Default)]
pub struct FakeBackend {
    pub html: Arc<String>,
    pub launches: Arc<AtomicUsize>,
    pub pages_open: Arc<AtomicUsize>,
    pub fail_launch: bool,
    pub launch_delay: Duration,
}

impl FakeBackend {
    pub fn serving(html: &str) -> Self {
        Self {
            html: Arc::new(html.to_string()),
            launch_delay: Duration::from_millis(50),
            ..Default::default()
        }
    }
}

pub struct FakeBrowser {
    html: Arc<String>,
    pages_open: Arc<AtomicUsize>,
}

#[derive(Clone)]
pub struct FakePage {
    html: Arc<String>,
    visited: Arc<Mutex<Vec<String>>>,
}

impl RenderPage for FakePage {
    fn navigate(&self, url: &str) -> Result<()> {
        self.visited.lock().unwrap().push(url.to_string());
        Ok(())
    }

    fn content(&self) -> Result<String> {
        Ok(self.html.as_ref().clone())
    }

    fn scroll_by(&self, _pixels: u32) -> Result<()> {
        Ok(())
    }
}

impl RenderBackend for FakeBackend {
    type Browser = FakeBrowser;

    fn launch(&self) -> Result<FakeBrowser> {
        std::thread::sleep(self.launch_delay);
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_launch {
            return Err(AppError::RenderLaunch("no chrome binary".to_string()));
        }
        Ok(FakeBrowser {
            html: Arc::clone(&self.html),
            pages_open: Arc::clone(&self.pages_open),
        })
    }
}

impl RenderBrowser for FakeBrowser {
    type Page = FakePage;

    fn is_connected(&self) -> bool {
        true
    }

    fn open_page(&self, _profile: &SessionProfile) -> Result<FakePage> {
        self.pages_open.fetch_add(1, Ordering::SeqCst);
        Ok(FakePage {
            html: Arc::clone(&self.html),
            visited: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn close_page(&self, _page: &FakePage) -> Result<()> {
        self.pages_open.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
