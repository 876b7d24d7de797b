use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

use crate::utils::error::{AppError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    PriceAsc,
    PriceDesc,
    /// Keep the order in which stores completed.
    Relevance,
}

impl SortBy {
    /// Lenient parse used for query strings: unknown values fall back to the default.
    pub fn from_param(value: Option<&str>) -> Self {
        value.and_then(|v| v.parse().ok()).unwrap_or_default()
    }
}

impl FromStr for SortBy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "price_asc" => Ok(SortBy::PriceAsc),
            "price_desc" => Ok(SortBy::PriceDesc),
            "relevance" => Ok(SortBy::Relevance),
            other => Err(AppError::Validation(format!("Unknown sort criterion: {}", other))),
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            SortBy::PriceAsc => "price_asc",
            SortBy::PriceDesc => "price_desc",
            SortBy::Relevance => "relevance",
        };
        write!(f, "{}", value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    /// Store allow-list. Empty means every enabled store.
    pub stores: Vec<String>,
    #[validate(range(min = 0.0))]
    pub min_price: Option<f64>,
    #[validate(range(min = 0.0))]
    pub max_price: Option<f64>,
    pub in_stock_only: bool,
    pub discounted_only: bool,
    pub sort_by: SortBy,
}

impl SearchFilters {
    /// Same filters with the allow-list trimmed, sorted and de-duplicated, so
    /// equivalent filter sets serialize identically.
    pub fn canonical(&self) -> Self {
        let mut stores: Vec<String> = self
            .stores
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        stores.sort();
        stores.dedup();

        Self {
            stores,
            ..self.clone()
        }
    }
}

/// Deterministic cache key for a (query, filters) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub filters: SearchFilters,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into().trim().to_string(),
            filters: SearchFilters::default(),
        }
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_stores<I, S>(mut self, stores: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.stores = stores.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sort(mut self, sort_by: SortBy) -> Self {
        self.filters.sort_by = sort_by;
        self
    }

    /// Fails fast on malformed input; nothing is scheduled for a rejected request.
    pub fn validate(&self, min_query_chars: usize) -> Result<()> {
        if self.query.trim().chars().count() < min_query_chars {
            return Err(AppError::InvalidQuery(format!(
                "Query must have at least {} characters",
                min_query_chars
            )));
        }

        Validate::validate(&self.filters)?;

        if let (Some(min), Some(max)) = (self.filters.min_price, self.filters.max_price) {
            if min > max {
                return Err(AppError::Validation(
                    "minPrice must not be greater than maxPrice".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let filters = serde_json::to_string(&self.filters.canonical()).unwrap_or_default();
        Fingerprint(format!(
            "search:{}:{}",
            self.query.trim().to_lowercase(),
            filters
        ))
    }
}
