pub mod aggregate;
pub mod cache;
pub mod config;
pub mod history;
pub mod models;
pub mod orchestrator;
pub mod render;
pub mod stores;
pub mod utils;
pub mod web;

// Re-export commonly used types
pub use cache::SearchCache;
pub use config::AppConfig;
pub use history::{HistorySink, SqliteHistory};
pub use orchestrator::{SearchEventStream, SearchOrchestrator};
pub use render::RenderPool;
pub use stores::{StoreAdapter, StoreRegistry};
pub use utils::error::{AppError, Result};
