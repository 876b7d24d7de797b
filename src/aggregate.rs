use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::time::Instant;

use crate::models::{NormalizedProduct, SearchFilters, SortBy, StoreProgress, StoreStatus};

/// Stable sort, so equal prices keep completion order.
pub fn sort_products(products: &mut [NormalizedProduct], sort_by: SortBy) {
    match sort_by {
        SortBy::PriceAsc => products.sort_by(|a, b| a.price.cmp(&b.price)),
        SortBy::PriceDesc => products.sort_by(|a, b| b.price.cmp(&a.price)),
        SortBy::Relevance => {}
    }
}

pub fn sorted(products: &[NormalizedProduct], sort_by: SortBy) -> Vec<NormalizedProduct> {
    let mut products = products.to_vec();
    sort_products(&mut products, sort_by);
    products
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProductFilter {
    Stores(Vec<String>),
    MinPrice(Decimal),
    MaxPrice(Decimal),
    InStockOnly,
    DiscountedOnly,
}

impl ProductFilter {
    pub fn matches(&self, product: &NormalizedProduct) -> bool {
        match self {
            ProductFilter::Stores(stores) => stores.iter().any(|s| *s == product.store),
            ProductFilter::MinPrice(min) => product.price >= *min,
            ProductFilter::MaxPrice(max) => product.price <= *max,
            ProductFilter::InStockOnly => product.in_stock,
            ProductFilter::DiscountedOnly => product.is_discounted(),
        }
    }

    pub fn apply(&self, products: &[NormalizedProduct]) -> Vec<NormalizedProduct> {
        products.iter().filter(|p| self.matches(p)).cloned().collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    filters: Vec<ProductFilter>,
}

impl FilterSet {
    pub fn new(filters: Vec<ProductFilter>) -> Self {
        Self { filters }
    }

    // The store filter only keeps stores in `scheduled`.
    pub fn from_request(filters: &SearchFilters, scheduled: &[String]) -> Self {
        let mut set = Vec::new();

        if !filters.stores.is_empty() {
            set.push(ProductFilter::Stores(scheduled.to_vec()));
        }
        if let Some(min) = filters.min_price.and_then(Decimal::from_f64) {
            set.push(ProductFilter::MinPrice(min));
        }
        if let Some(max) = filters.max_price.and_then(Decimal::from_f64) {
            set.push(ProductFilter::MaxPrice(max));
        }
        if filters.in_stock_only {
            set.push(ProductFilter::InStockOnly);
        }
        if filters.discounted_only {
            set.push(ProductFilter::DiscountedOnly);
        }

        Self { filters: set }
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn matches(&self, product: &NormalizedProduct) -> bool {
        self.filters.iter().all(|f| f.matches(product))
    }

    pub fn apply(&self, products: &[NormalizedProduct]) -> Vec<NormalizedProduct> {
        products.iter().filter(|p| self.matches(p)).cloned().collect()
    }
}

/// Running state of one query. Owned by a single task; never shared.
#[derive(Debug)]
pub struct AggregationState {
    started: Instant,
    products: Vec<NormalizedProduct>,
    stores: Vec<StoreProgress>,
    completed: usize,
    stores_searched: Vec<String>,
    stores_failed: Vec<String>,
}

impl AggregationState {
    pub fn new(stores: Vec<StoreProgress>) -> Self {
        Self {
            started: Instant::now(),
            products: Vec::new(),
            stores,
            completed: 0,
            stores_searched: Vec::new(),
            stores_failed: Vec::new(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn total(&self) -> usize {
        self.stores.len()
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn is_complete(&self) -> bool {
        self.completed == self.stores.len()
    }

    pub fn products(&self) -> &[NormalizedProduct] {
        &self.products
    }

    pub fn stores_searched(&self) -> &[String] {
        &self.stores_searched
    }

    pub fn stores_failed(&self) -> &[String] {
        &self.stores_failed
    }

    pub fn status(&self, index: usize) -> Option<StoreStatus> {
        self.stores.get(index).map(|s| s.status)
    }

    pub fn mark_searching(&mut self, index: usize) -> bool {
        match self.stores.get_mut(index) {
            Some(store) if store.status == StoreStatus::Pending => {
                store.status = StoreStatus::Searching;
                true
            }
            _ => false,
        }
    }

    /// Settles store `index`. Returns false if it was already settled.
    fn settle(&mut self, index: usize, status: StoreStatus) -> bool {
        let Some(store) = self.stores.get_mut(index) else {
            return false;
        };
        if matches!(store.status, StoreStatus::Done | StoreStatus::Empty | StoreStatus::Error) {
            return false;
        }

        store.status = status;
        self.completed += 1;
        match status {
            StoreStatus::Error => self.stores_failed.push(store.display_name.clone()),
            _ => self.stores_searched.push(store.display_name.clone()),
        }
        true
    }

    pub fn record_products(&mut self, index: usize, products: Vec<NormalizedProduct>) -> bool {
        let status = if products.is_empty() {
            StoreStatus::Empty
        } else {
            StoreStatus::Done
        };

        if !self.settle(index, status) {
            return false;
        }
        self.products.extend(products);
        true
    }

    pub fn record_failure(&mut self, index: usize) -> bool {
        self.settle(index, StoreStatus::Error)
    }

    pub fn sorted(&self, sort_by: SortBy) -> Vec<NormalizedProduct> {
        sorted(&self.products, sort_by)
    }
}
