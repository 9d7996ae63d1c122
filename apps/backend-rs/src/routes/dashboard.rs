use axum::{extract::State, http::HeaderMap, Json};
use serde_json::Value;

use crate::{
    auth::require_user_id, error::AppResult, routes::db_pool,
    services::dashboard::dashboard_summary, state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route("/dashboard/summary/", axum::routing::get(summary))
}

async fn summary(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let today = state.config.today();
    Ok(Json(dashboard_summary(&state, pool, today).await?))
}
