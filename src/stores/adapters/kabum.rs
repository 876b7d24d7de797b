use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use scraper::{Html, Selector};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::models::{CandidateRecord, PriceValue};
use crate::stores::traits::{AdapterKind, SearchOptions, StoreAdapter};
use crate::utils::error::{AppError, Result};

pub const KABUM_BASE_URL: &str = "https://www.kabum.com.br";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// KaBuM! serves its catalog inside the Next.js `__NEXT_DATA__` payload.
pub struct KabumAdapter {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct KabumItem {
    code: Option<u64>,
    name: Option<String>,
    friendly_name: Option<String>,
    price: Option<f64>,
    price_with_discount: Option<f64>,
    old_price: Option<f64>,
    image: Option<String>,
    rating: Option<f64>,
    rating_count: Option<u64>,
    available: Option<bool>,
    quantity: Option<i64>,
}

impl KabumAdapter {
    pub fn new(user_agent: &str) -> Result<Self> {
        Self::with_base_url(KABUM_BASE_URL, user_agent)
    }

    pub fn with_base_url(base_url: &str, user_agent: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/html"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("pt-BR,pt;q=0.9"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|e| AppError::Validation(format!("Invalid user agent: {}", e)))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn search_url(&self, query: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| AppError::parse(format!("Invalid base url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| AppError::parse("Base url cannot hold a path"))?
            .pop_if_empty()
            .push("busca")
            .push(query);
        Ok(url)
    }
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v > 0.0)
}

impl KabumItem {
    fn into_candidate(self, base_url: &str) -> CandidateRecord {
        let price = positive(self.price_with_discount).or(positive(self.price));
        let original_price = match (self.old_price, price) {
            (Some(old), Some(current)) if old > current => Some(old),
            _ => None,
        };
        let url = self.code.map(|code| {
            format!(
                "{}/produto/{}/{}",
                base_url,
                code,
                self.friendly_name.as_deref().unwrap_or_default()
            )
        });

        CandidateRecord {
            name: self.name,
            price: price.map(PriceValue::Number),
            original_price: original_price.map(PriceValue::Number),
            url,
            image_url: self.image,
            rating: self.rating,
            review_count: self.rating_count,
            in_stock: Some(self.available == Some(true) && self.quantity.unwrap_or(0) > 0),
        }
    }
}

/// Extracts listings from a search page. A page without the catalog payload
/// has no listings.
pub fn parse_products(html: &str, base_url: &str) -> Result<Vec<CandidateRecord>> {
    let selector = Selector::parse("script#__NEXT_DATA__")
        .map_err(|e| AppError::parse(format!("Invalid selector: {:?}", e)))?;

    let document = Html::parse_document(html);
    let Some(script) = document.select(&selector).next() else {
        tracing::debug!(store = "kabum", "No __NEXT_DATA__ payload");
        return Ok(Vec::new());
    };

    let outer: serde_json::Value = match serde_json::from_str(&script.inner_html()) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(store = "kabum", error = %e, "Malformed __NEXT_DATA__");
            return Ok(Vec::new());
        }
    };

    // pageProps.data is itself a JSON document encoded as a string
    let Some(inner) = outer.pointer("/props/pageProps/data").and_then(|v| v.as_str()) else {
        return Ok(Vec::new());
    };
    let inner: serde_json::Value = match serde_json::from_str(inner) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(store = "kabum", error = %e, "Malformed catalog payload");
            return Ok(Vec::new());
        }
    };

    let items = inner
        .pointer("/catalogServer/data")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<KabumItem>(item).ok())
        .map(|item| item.into_candidate(base_url))
        .collect())
}

#[async_trait]
impl StoreAdapter for KabumAdapter {
    fn name(&self) -> &str {
        "kabum"
    }

    fn display_name(&self) -> &str {
        "KaBuM!"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Fetch
    }

    async fn search(&self, query: &str, _options: &SearchOptions) -> Result<Vec<CandidateRecord>> {
        let url = self.search_url(query)?;
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::store(self.name(), format!("HTTP {}", status.as_u16())));
        }

        let html = response.text().await?;
        parse_products(&html, &self.base_url)
    }
}
