use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde_json::Value;

use crate::{config::AppConfig, db::create_pool};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<sqlx::PgPool>,
    /// Rendered dashboard summaries, keyed by business date.
    pub dashboard_cache: Cache<String, Value>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = create_pool(&config)?;
        let dashboard_cache = Cache::builder()
            .max_capacity(16)
            .time_to_live(Duration::from_secs(config.dashboard_cache_ttl_seconds.max(1)))
            .build();

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            dashboard_cache,
        })
    }

    /// Drop cached dashboard data after a mutation that changes its counts.
    pub async fn invalidate_dashboard(&self) {
        self.dashboard_cache.invalidate_all();
        self.dashboard_cache.run_pending_tasks().await;
    }
}
