pub mod adapters;
pub mod normalize;
pub mod registry;
pub mod relevance;
pub mod traits;

pub use registry::{StoreAdapterRef, StoreRegistry};
pub use relevance::RelevanceFilter;
pub use traits::{AdapterKind, SearchOptions, StoreAdapter, StoreInfo};
