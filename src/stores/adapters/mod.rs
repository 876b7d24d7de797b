pub mod kabum;
pub mod pichau;

pub use kabum::{KabumAdapter, KABUM_BASE_URL};
pub use pichau::{PichauAdapter, PICHAU_BASE_URL};

use std::sync::Arc;

use crate::config::RenderConfig;
use crate::render::RenderPool;
use crate::stores::registry::StoreRegistry;
use crate::utils::error::Result;

/// Registers the built-in stores in their scheduling order.
pub async fn register_builtin(registry: &StoreRegistry, pool: RenderPool, config: &RenderConfig) -> Result<()> {
    registry
        .register(Arc::new(KabumAdapter::new(&config.user_agent)?))
        .await?;
    registry.register(Arc::new(PichauAdapter::new(pool))).await?;
    Ok(())
}
