use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
    Router,
};
use tower_http::services::ServeDir;

use crate::{auth::require_user_id, error::AppResult, state::AppState};

/// Stored receipt images, readable by signed-in users only.
pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .nest_service("/media", ServeDir::new(&state.config.media_root))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_signed_in,
        ))
}

async fn require_signed_in(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> AppResult<Response> {
    let user_id = require_user_id(&state, request.headers()).await?;
    tracing::debug!(user_id, path = %request.uri().path(), "Serving media file");
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::config::AppConfig;

    #[tokio::test]
    async fn receipts_need_a_bearer_token() {
        let mut config = AppConfig::from_env();
        config.database_url = None;
        config.jwt_secret = Some("unit-test-secret".to_string());
        let state = AppState::build(config).unwrap();
        let app = router(&state).with_state(state);

        let request = Request::builder()
            .uri("/media/receipts/2026/04/missing.png")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
