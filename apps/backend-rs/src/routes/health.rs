use std::time::Duration;

use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::AppState;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

async fn probe_database(pool: &sqlx::PgPool) -> &'static str {
    match tokio::time::timeout(PROBE_TIMEOUT, sqlx::query("SELECT 1").execute(pool)).await {
        Ok(Ok(_)) => "up",
        Ok(Err(error)) => {
            tracing::error!(error = %error, "Database probe failed");
            "down"
        }
        Err(_) => {
            tracing::error!(timeout_secs = PROBE_TIMEOUT.as_secs(), "Database probe timed out");
            "timeout"
        }
    }
}

fn overall_status(database: &str) -> &'static str {
    if database == "up" {
        "ok"
    } else {
        "degraded"
    }
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let (database, pool) = match state.db_pool.as_ref() {
        Some(pool) => (
            probe_database(pool).await,
            json!({ "size": pool.size(), "idle": pool.num_idle() }),
        ),
        None => ("unconfigured", Value::Null),
    };

    Json(json!({
        "status": overall_status(database),
        "app": state.config.app_name,
        "environment": state.config.environment,
        "business_date": state.config.today(),
        "timezone": state.config.business_timezone.to_string(),
        "checked_at": Utc::now().to_rfc3339(),
        "database": database,
        "pool": pool,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_a_live_database_is_ok() {
        assert_eq!(overall_status("up"), "ok");
        assert_eq!(overall_status("timeout"), "degraded");
        assert_eq!(overall_status("unconfigured"), "degraded");
    }
}
