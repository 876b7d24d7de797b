use regex::Regex;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::models::{CandidateRecord, NormalizedProduct, PriceValue};
use crate::stores::relevance::RelevanceFilter;

fn br_price_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"R?\$?\s*(\d{1,3}(?:\.\d{3})*,\d{2})").expect("valid BRL price pattern"))
}

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d[\d.,]*\d)").expect("valid number pattern"))
}

/// `1.299,90` -> `1299.90`
fn from_brazilian(text: &str) -> String {
    text.replace('.', "").replacen(',', ".", 1)
}

// Tries, in order: the numeric value, the first `R$ x.xxx,xx`, the first
// digit run, then every digit and separator in the text.
pub fn parse_price(value: &PriceValue) -> Option<Decimal> {
    match value {
        PriceValue::Number(n) => Decimal::from_f64(*n),
        PriceValue::Text(text) => parse_price_text(text),
    }
}

pub fn parse_price_text(text: &str) -> Option<Decimal> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(captures) = br_price_regex().captures(text) {
        return Decimal::from_str(&from_brazilian(&captures[1])).ok();
    }

    if let Some(captures) = number_regex().captures(text) {
        let number = &captures[1];
        let cleaned = if number.contains(',') {
            from_brazilian(number)
        } else {
            number.to_string()
        };
        return Decimal::from_str(&cleaned).ok();
    }

    let digits: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    Decimal::from_str(&from_brazilian(&digits)).ok()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn normalize(record: CandidateRecord, store: &str, display_name: &str) -> NormalizedProduct {
    let price = record
        .price
        .as_ref()
        .and_then(parse_price)
        .unwrap_or(Decimal::ZERO);

    let original_price = record
        .original_price
        .as_ref()
        .and_then(parse_price)
        .filter(|original| *original > price);

    NormalizedProduct {
        name: non_empty(record.name).unwrap_or_default(),
        price,
        original_price,
        url: non_empty(record.url).unwrap_or_default(),
        image_url: non_empty(record.image_url),
        rating: record.rating.filter(|r| *r > 0.0 && *r <= 5.0),
        review_count: record.review_count.filter(|c| *c > 0),
        in_stock: record.in_stock != Some(false),
        store: store.to_string(),
        store_display_name: display_name.to_string(),
    }
}

/// Drops invalid and irrelevant products and keeps at most `max_results`.
pub fn process(
    records: Vec<CandidateRecord>,
    query: &str,
    store: &str,
    display_name: &str,
    max_results: usize,
) -> Vec<NormalizedProduct> {
    let relevance = RelevanceFilter::new(query);
    let total = records.len();

    let valid: Vec<NormalizedProduct> = records
        .into_iter()
        .map(|record| normalize(record, store, display_name))
        .filter(NormalizedProduct::is_valid)
        .collect();
    let valid_count = valid.len();

    let products: Vec<NormalizedProduct> = valid
        .into_iter()
        .filter(|product| relevance.matches(product))
        .take(max_results)
        .collect();

    if valid_count < total {
        tracing::debug!(store, dropped = total - valid_count, "Dropped invalid candidates");
    }
    if products.len() < valid_count.min(max_results) {
        tracing::debug!(store, kept = products.len(), "Dropped irrelevant products");
    }

    products
}
