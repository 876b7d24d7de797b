use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A price as a store reported it: either already numeric or raw text
/// such as `"R$ 1.299,90"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PriceValue {
    Number(f64),
    Text(String),
}

impl From<f64> for PriceValue {
    fn from(value: f64) -> Self {
        PriceValue::Number(value)
    }
}

impl From<&str> for PriceValue {
    fn from(value: &str) -> Self {
        PriceValue::Text(value.to_string())
    }
}

impl From<String> for PriceValue {
    fn from(value: String) -> Self {
        PriceValue::Text(value)
    }
}

/// Listing as extracted by a store adapter. Nothing here is trusted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRecord {
    pub name: Option<String>,
    pub price: Option<PriceValue>,
    pub original_price: Option<PriceValue>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u64>,
    pub in_stock: Option<bool>,
}

impl CandidateRecord {
    pub fn new(name: impl Into<String>, price: impl Into<PriceValue>, url: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            price: Some(price.into()),
            url: Some(url.into()),
            ..Default::default()
        }
    }
}

/// A listing that passed the validity gate: non-empty name and url, price > 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedProduct {
    pub name: String,
    pub price: Decimal,
    pub original_price: Option<Decimal>,
    pub url: String,
    pub image_url: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u64>,
    pub in_stock: bool,
    pub store: String,
    pub store_display_name: String,
}

impl NormalizedProduct {
    pub fn is_valid(&self) -> bool {
        !self.name.trim().is_empty() && !self.url.trim().is_empty() && self.price > Decimal::ZERO
    }

    pub fn is_discounted(&self) -> bool {
        self.original_price.is_some_and(|original| original > self.price)
    }
}
