use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

use crate::models::{CandidateRecord, PriceValue};
use crate::render::{ChromeBackend, RenderBackend, RenderPage, RenderPool};
use crate::stores::traits::{AdapterKind, SearchOptions, StoreAdapter};
use crate::utils::error::{AppError, Result};

pub const PICHAU_BASE_URL: &str = "https://www.pichau.com.br";

const SCROLL_ROUNDS: usize = 4;
const SCROLL_STEP_PX: u32 = 800;
const MIN_CARD_TEXT_CHARS: usize = 20;
const MIN_NAME_CHARS: usize = 10;

const EXCLUDED_PATHS: &[&str] = &["/search", "/departamento", "/carrinho", "/conta"];

pub struct PichauAdapter<B: RenderBackend = ChromeBackend> {
    pool: RenderPool<B>,
    base_url: String,
    settle: Duration,
    scroll_pause: Duration,
}

impl<B: RenderBackend> PichauAdapter<B> {
    pub fn new(pool: RenderPool<B>) -> Self {
        Self::with_base_url(pool, PICHAU_BASE_URL)
    }

    pub fn with_base_url(pool: RenderPool<B>, base_url: &str) -> Self {
        Self {
            pool,
            base_url: base_url.trim_end_matches('/').to_string(),
            settle: Duration::from_secs(3),
            scroll_pause: Duration::from_millis(800),
        }
    }

    pub fn with_timing(mut self, settle: Duration, scroll_pause: Duration) -> Self {
        self.settle = settle;
        self.scroll_pause = scroll_pause;
        self
    }

    fn search_url(&self, query: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| AppError::parse(format!("Invalid base url: {}", e)))?;
        url.set_path("/search");
        url.query_pairs_mut().append_pair("q", query);
        Ok(url)
    }
}

fn current_price_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"por\s+R\$\s*([\d.]+,\d{2})").expect("valid current price pattern"))
}

fn any_price_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"R\$\s*([\d.]+,\d{2})").expect("valid price pattern"))
}

fn original_price_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"de\s+R\$\s*([\d.]+,\d{2})\s*por").expect("valid original price pattern"))
}

fn name_cut_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bde\s+R\$|\bR\$").expect("valid name cut pattern"))
}

fn noise_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)frete gr[aá]tis[:\s]*(sul e sudeste|[^a-z]*)|\d+%\s*off|em estoque|openbox")
            .expect("valid badge pattern")
    })
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace pattern"))
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| AppError::parse(format!("Invalid selector {}: {:?}", css, e)))
}

fn product_link(base: &Url, base_url: &str, href: &str) -> Option<String> {
    if href.contains('#') {
        return None;
    }
    let link = base.join(href).ok()?;
    let link = link.as_str().trim_end_matches('/');

    let path = link.strip_prefix(base_url)?;
    if !path.starts_with('/') || EXCLUDED_PATHS.iter().any(|p| path.starts_with(p)) {
        return None;
    }
    Some(link.to_string())
}

fn card_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn product_name(text: &str) -> Option<String> {
    let head = match name_cut_re().find(text) {
        Some(m) => &text[..m.start()],
        None => text,
    };
    let cleaned = noise_re().replace_all(head, " ");
    let name = whitespace_re().replace_all(&cleaned, " ").trim().to_string();

    (name.chars().count() >= MIN_NAME_CHARS).then_some(name)
}

fn image_of(link: ElementRef<'_>, images: &Selector, store_images: &Selector) -> Option<String> {
    let card = link
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| matches!(e.value().name(), "div" | "li" | "article"));

    card.and_then(|c| c.select(store_images).next())
        .or_else(|| link.select(images).next())
        .and_then(|img| img.value().attr("src").or_else(|| img.value().attr("data-src")))
        .map(str::to_string)
}

pub fn parse_products(html: &str, base_url: &str) -> Result<Vec<CandidateRecord>> {
    let base_url = base_url.trim_end_matches('/');
    let base = Url::parse(base_url).map_err(|e| AppError::parse(format!("Invalid base url: {}", e)))?;
    let anchors = selector("a[href]")?;
    let images = selector("img")?;
    let store_images = selector(r#"img[src*="pichau"], img[src*="media"]"#)?;

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut products = Vec::new();

    for link in document.select(&anchors) {
        let Some(url) = link
            .value()
            .attr("href")
            .and_then(|href| product_link(&base, base_url, href))
        else {
            continue;
        };
        if seen.contains(&url) {
            continue;
        }

        let text = card_text(link);
        if text.chars().count() < MIN_CARD_TEXT_CHARS {
            continue;
        }

        let price = current_price_re()
            .captures(&text)
            .or_else(|| any_price_re().captures(&text))
            .and_then(|c| c.get(1))
            .map(|m| format!("R$ {}", m.as_str()));
        let Some(price) = price else {
            continue;
        };

        let Some(name) = product_name(&text) else {
            continue;
        };
        if !seen.insert(name.clone()) {
            continue;
        }
        seen.insert(url.clone());

        let original_price = original_price_re()
            .captures(&text)
            .and_then(|c| c.get(1))
            .map(|m| PriceValue::Text(format!("R$ {}", m.as_str())));

        products.push(CandidateRecord {
            name: Some(name),
            price: Some(PriceValue::Text(price)),
            original_price,
            url: Some(url),
            image_url: image_of(link, &images, &store_images),
            rating: None,
            review_count: None,
            in_stock: Some(true),
        });
    }

    Ok(products)
}

#[async_trait]
impl<B: RenderBackend> StoreAdapter for PichauAdapter<B> {
    fn name(&self) -> &str {
        "pichau"
    }

    fn display_name(&self) -> &str {
        "Pichau"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Render
    }

    async fn search(&self, query: &str, _options: &SearchOptions) -> Result<Vec<CandidateRecord>> {
        let url = self.search_url(query)?;
        let (settle, pause) = (self.settle, self.scroll_pause);

        let html = self
            .pool
            .with_page(move |page| {
                page.navigate(url.as_str())?;
                std::thread::sleep(settle);
                for _ in 0..SCROLL_ROUNDS {
                    page.scroll_by(SCROLL_STEP_PX)?;
                    std::thread::sleep(pause);
                }
                page.content()
            })
            .await?;

        let products = parse_products(&html, &self.base_url)?;
        tracing::debug!(store = self.name(), found = products.len(), "Parsed rendered page");
        Ok(products)
    }
}
