use futures::future::{BoxFuture, FutureExt, Shared};
use headless_chrome::protocol::cdp::Network;
use headless_chrome::{Browser, LaunchOptions, Tab};
use metrics::counter;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::RenderConfig;
use crate::utils::error::{AppError, Result};

const CHROME_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-accelerated-2d-canvas",
    "--disable-gpu",
    "--disable-extensions",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-renderer-backgrounding",
];

const ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8";

/// Identity and limits applied to every page the pool opens.
#[derive(Debug, Clone)]
pub struct SessionProfile {
    pub user_agent: String,
    pub accept_language: String,
    pub default_timeout: Duration,
    pub blocked_url_patterns: Vec<String>,
}

impl From<&RenderConfig> for SessionProfile {
    fn from(config: &RenderConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            accept_language: config.accept_language.clone(),
            default_timeout: config.default_timeout(),
            blocked_url_patterns: config.blocked_url_patterns.clone(),
        }
    }
}

/// A browser page. All calls block.
pub trait RenderPage: Clone + Send + Sync + 'static {
    fn navigate(&self, url: &str) -> Result<()>;
    fn content(&self) -> Result<String>;
    fn scroll_by(&self, pixels: u32) -> Result<()>;
}

pub trait RenderBrowser: Send + Sync + 'static {
    type Page: RenderPage;

    fn is_connected(&self) -> bool;
    fn open_page(&self, profile: &SessionProfile) -> Result<Self::Page>;
    fn close_page(&self, page: &Self::Page) -> Result<()>;
    fn close(&self) -> Result<()>;
}

pub trait RenderBackend: Send + Sync + 'static {
    type Browser: RenderBrowser;

    fn launch(&self) -> Result<Self::Browser>;
}

pub type PageOf<B> = <<B as RenderBackend>::Browser as RenderBrowser>::Page;

type LaunchFuture<Br> = Shared<BoxFuture<'static, std::result::Result<Arc<Br>, String>>>;

/// A leased page. Dropping the session closes the page, on every exit path.
pub struct RenderSession<Br: RenderBrowser> {
    browser: Arc<Br>,
    page: Br::Page,
    active: Arc<AtomicUsize>,
}

impl<Br: RenderBrowser> RenderSession<Br> {
    fn new(browser: Arc<Br>, page: Br::Page, active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self { browser, page, active }
    }

    pub fn page(&self) -> &Br::Page {
        &self.page
    }
}

impl<Br: RenderBrowser> Drop for RenderSession<Br> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);

        let browser = Arc::clone(&self.browser);
        let page = self.page.clone();
        let close = move || {
            if let Err(e) = browser.close_page(&page) {
                debug!(error = %e, "Failed to close page");
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(close);
            }
            Err(_) => close(),
        }
    }
}

struct PoolInner<B: RenderBackend> {
    backend: Arc<B>,
    profile: Arc<SessionProfile>,
    launch_timeout: Duration,
    instance: RwLock<Option<Arc<B::Browser>>>,
    /// In-flight launch shared by every caller that finds no instance.
    launching: Mutex<Option<LaunchFuture<B::Browser>>>,
    closed: AtomicBool,
    launches: AtomicUsize,
    active_sessions: Arc<AtomicUsize>,
}

impl<B: RenderBackend> PoolInner<B> {
    async fn run_launch(self: Arc<Self>) -> std::result::Result<Arc<B::Browser>, String> {
        let started = Instant::now();
        let backend = Arc::clone(&self.backend);
        let launched = match tokio::task::spawn_blocking(move || backend.launch()).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(format!("launch task failed: {}", e)),
        };

        let mut launching = self.launching.lock().unwrap_or_else(PoisonError::into_inner);
        *launching = None;

        let browser = match launched {
            Ok(browser) => Arc::new(browser),
            Err(message) => {
                counter!("render_launch_failures_total").increment(1);
                error!(error = %message, "Browser launch failed");
                return Err(message);
            }
        };

        if self.closed.load(Ordering::SeqCst) {
            drop(launching);
            warn!("Browser finished launching after shutdown, closing it");
            close_in_background(browser);
            return Err(AppError::RenderClosed.to_string());
        }

        *self.instance.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&browser));
        drop(launching);

        self.launches.fetch_add(1, Ordering::SeqCst);
        counter!("render_launches_total").increment(1);
        info!(elapsed_ms = started.elapsed().as_millis() as u64, "Browser launched");
        Ok(browser)
    }
}

fn close_in_background<Br: RenderBrowser>(browser: Arc<Br>) {
    tokio::task::spawn_blocking(move || {
        if let Err(e) = browser.close() {
            warn!(error = %e, "Error closing browser");
        }
    });
}

/// Owner of the single shared browser, launched on first demand.
pub struct RenderPool<B: RenderBackend = ChromeBackend> {
    inner: Arc<PoolInner<B>>,
}

impl<B: RenderBackend> Clone for RenderPool<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl RenderPool<ChromeBackend> {
    pub fn new(config: &RenderConfig) -> Self {
        Self::with_backend(ChromeBackend::new(config.clone()), config)
    }
}

impl<B: RenderBackend> RenderPool<B> {
    pub fn with_backend(backend: B, config: &RenderConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                backend: Arc::new(backend),
                profile: Arc::new(SessionProfile::from(config)),
                launch_timeout: config.launch_timeout(),
                instance: RwLock::new(None),
                launching: Mutex::new(None),
                closed: AtomicBool::new(false),
                launches: AtomicUsize::new(0),
                active_sessions: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    pub fn launch_count(&self) -> usize {
        self.inner.launches.load(Ordering::SeqCst)
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.active_sessions.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub async fn acquire_session(&self) -> Result<RenderSession<B::Browser>> {
        let browser = self.browser().await?;

        match self.open_session(Arc::clone(&browser)).await {
            Ok(session) => Ok(session),
            Err((err, true)) => Err(err),
            Err((err, false)) => {
                warn!(error = %err, "Browser is no longer usable, relaunching");
                self.invalidate(&browser);
                let browser = self.browser().await?;
                self.open_session(browser).await.map_err(|(e, _)| e)
            }
        }
    }

    pub async fn with_page<F, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&PageOf<B>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let session = self.acquire_session().await?;
        tokio::task::spawn_blocking(move || work(session.page())).await?
    }

    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!("Render pool already shut down");
            return;
        }

        let browser = {
            let _launching = self.inner.launching.lock().unwrap_or_else(PoisonError::into_inner);
            self.inner
                .instance
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
        };

        let Some(browser) = browser else {
            info!("Render pool shut down, no browser was running");
            return;
        };

        match tokio::task::spawn_blocking(move || browser.close()).await {
            Ok(Ok(())) => info!("Browser closed"),
            Ok(Err(e)) => warn!(error = %e, "Error closing browser"),
            Err(e) => warn!(error = %e, "Browser close task failed"),
        }
    }

    fn current(&self) -> Option<Arc<B::Browser>> {
        self.inner
            .instance
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn browser(&self) -> Result<Arc<B::Browser>> {
        if self.is_shut_down() {
            return Err(AppError::RenderClosed);
        }

        if let Some(browser) = self.current() {
            return Ok(browser);
        }

        match tokio::time::timeout(self.inner.launch_timeout, self.launch_future()).await {
            Ok(Ok(browser)) => Ok(browser),
            Ok(Err(message)) => Err(AppError::RenderLaunch(message)),
            Err(_) => Err(AppError::RenderLaunch(format!(
                "no browser after waiting {}ms",
                self.inner.launch_timeout.as_millis()
            ))),
        }
    }

    fn launch_future(&self) -> LaunchFuture<B::Browser> {
        let mut launching = self.inner.launching.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(launch) = launching.as_ref() {
            return launch.clone();
        }

        // A launch may have completed since the caller last looked.
        if let Some(browser) = self.current() {
            return futures::future::ready(Ok(browser)).boxed().shared();
        }

        debug!("Launching browser");
        let handle = tokio::spawn(Arc::clone(&self.inner).run_launch());
        let launch = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(format!("launch task failed: {}", e)))
        }
        .boxed()
        .shared();

        *launching = Some(launch.clone());
        launch
    }

    fn invalidate(&self, stale: &Arc<B::Browser>) {
        let removed = {
            let mut instance = self.inner.instance.write().unwrap_or_else(PoisonError::into_inner);
            match instance.as_ref() {
                Some(current) if Arc::ptr_eq(current, stale) => instance.take(),
                _ => None,
            }
        };

        if let Some(browser) = removed {
            counter!("render_disconnects_total").increment(1);
            close_in_background(browser);
        }
    }

    async fn open_session(
        &self,
        browser: Arc<B::Browser>,
    ) -> std::result::Result<RenderSession<B::Browser>, (AppError, bool)> {
        let profile = Arc::clone(&self.inner.profile);
        let target = Arc::clone(&browser);
        let opened = tokio::task::spawn_blocking(move || {
            target
                .open_page(&profile)
                .map_err(|e| (e, target.is_connected()))
        })
        .await;

        match opened {
            Ok(Ok(page)) => Ok(RenderSession::new(
                browser,
                page,
                Arc::clone(&self.inner.active_sessions),
            )),
            Ok(Err(failure)) => Err(failure),
            Err(e) => Err((e.into(), true)),
        }
    }
}

fn render_error<E: Display>(context: &'static str) -> impl FnOnce(E) -> AppError {
    move |e| AppError::Render(format!("{}: {}", context, e))
}

/// Launches Chrome/Chromium through `headless_chrome`.
pub struct ChromeBackend {
    config: RenderConfig,
}

impl ChromeBackend {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }
}

impl RenderBackend for ChromeBackend {
    type Browser = ChromeBrowser;

    fn launch(&self) -> Result<ChromeBrowser> {
        let mut launch_options = LaunchOptions::default_builder()
            .headless(self.config.headless)
            .sandbox(false)
            .window_size(Some((1920, 1080)))
            .idle_browser_timeout(self.config.idle_timeout())
            .args(CHROME_ARGS.iter().map(OsStr::new).collect())
            .build()
            .map_err(|e| AppError::RenderLaunch(format!("invalid launch options: {}", e)))?;

        if let Some(chrome_path) = &self.config.chrome_path {
            launch_options.path = Some(PathBuf::from(chrome_path));
        }

        let browser = Browser::new(launch_options).map_err(|e| AppError::RenderLaunch(e.to_string()))?;

        Ok(ChromeBrowser {
            browser: RwLock::new(Some(browser)),
        })
    }
}

pub struct ChromeBrowser {
    browser: RwLock<Option<Browser>>,
}

impl RenderBrowser for ChromeBrowser {
    type Page = ChromePage;

    fn is_connected(&self) -> bool {
        let browser = self.browser.read().unwrap_or_else(PoisonError::into_inner);
        browser.as_ref().is_some_and(|b| b.get_version().is_ok())
    }

    fn open_page(&self, profile: &SessionProfile) -> Result<ChromePage> {
        let browser = self.browser.read().unwrap_or_else(PoisonError::into_inner);
        let browser = browser.as_ref().ok_or(AppError::RenderDisconnected)?;

        let tab = browser.new_tab().map_err(render_error("failed to open tab"))?;
        tab.set_default_timeout(profile.default_timeout);
        tab.set_user_agent(&profile.user_agent, Some(profile.accept_language.as_str()), None)
            .map_err(render_error("failed to set user agent"))?;

        let headers = HashMap::from([
            ("Accept-Language", profile.accept_language.as_str()),
            ("Accept", ACCEPT),
        ]);
        tab.set_extra_http_headers(headers)
            .map_err(render_error("failed to set headers"))?;

        if !profile.blocked_url_patterns.is_empty() {
            tab.call_method(Network::SetBlockedURLs {
                urls: profile.blocked_url_patterns.clone(),
            })
            .map_err(render_error("failed to block urls"))?;
        }

        Ok(ChromePage { tab })
    }

    fn close_page(&self, page: &ChromePage) -> Result<()> {
        page.tab
            .close(true)
            .map(|_| ())
            .map_err(render_error("failed to close tab"))
    }

    fn close(&self) -> Result<()> {
        // Dropping the handle terminates the browser process.
        drop(self.browser.write().unwrap_or_else(PoisonError::into_inner).take());
        Ok(())
    }
}

#[derive(Clone)]
pub struct ChromePage {
    tab: Arc<Tab>,
}

impl RenderPage for ChromePage {
    fn navigate(&self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .map_err(render_error("navigation failed"))?
            .wait_until_navigated()
            .map_err(render_error("page load failed"))?;
        Ok(())
    }

    fn content(&self) -> Result<String> {
        self.tab.get_content().map_err(render_error("failed to read page"))
    }

    fn scroll_by(&self, pixels: u32) -> Result<()> {
        self.tab
            .evaluate(&format!("window.scrollBy(0, {})", pixels), false)
            .map_err(render_error("scroll failed"))?;
        Ok(())
    }
}
