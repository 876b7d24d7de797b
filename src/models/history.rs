use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One persisted product row of a past search.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultRow {
    pub id: i64,
    pub query: String,
    pub store: String,
    pub product_name: String,
    pub price: f64,
    pub original_price: Option<f64>,
    pub url: String,
    pub image_url: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
    pub in_stock: bool,
    pub searched_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecentSearch {
    pub query: String,
    pub last_searched: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct StoreCount {
    pub store: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total_searches: i64,
    pub total_products: i64,
    pub store_stats: Vec<StoreCount>,
}
