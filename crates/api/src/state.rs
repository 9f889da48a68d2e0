//! Application state

use std::sync::Arc;

use sqlx::PgPool;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub core: Arc<giftforge_core::CoreService>,
}

impl AppState {
    pub async fn new(pool: PgPool) -> anyhow::Result<Self> {
        let core = Arc::new(giftforge_core::CoreService::new(pool.clone()).await?);
        tracing::info!("Core services initialized");

        Ok(Self { pool, core })
    }
}
