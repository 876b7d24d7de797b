pub mod event;
pub mod history;
pub mod product;
pub mod search;

// Re-exports for convenience
pub use event::*;
pub use history::*;
pub use product::*;
pub use search::*;
