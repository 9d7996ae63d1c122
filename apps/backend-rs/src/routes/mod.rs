use axum::{routing::get, Router};
use serde_json::{Map, Value};

use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

pub mod auth;
pub mod customers;
pub mod dashboard;
pub mod health;
pub mod lotes;
pub mod media;
pub mod payments;
pub mod reports;
pub mod sales;
pub mod schedules;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(auth::router())
        .merge(customers::router())
        .merge(lotes::router())
        .merge(sales::router())
        .merge(schedules::router())
        .merge(payments::router())
        .merge(reports::router())
        .merge(dashboard::router())
}

pub(crate) fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

pub(crate) fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

pub(crate) fn value_i64(row: &Value, key: &str) -> Option<i64> {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_i64)
}

pub(crate) fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}

/// Adds the derived `full_name` to a user or customer row.
pub(crate) fn with_full_name(mut row: Value) -> Value {
    let full_name = format!(
        "{} {}",
        value_str(&row, "first_name"),
        value_str(&row, "last_name")
    )
    .trim()
    .to_string();
    if let Some(obj) = row.as_object_mut() {
        obj.insert("full_name".to_string(), Value::String(full_name));
    }
    row
}

pub(crate) fn json_map(entries: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in entries {
        map.insert((*key).to_string(), value.clone());
    }
    map
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::config::AppConfig;

    fn offline_app() -> Router {
        let mut config = AppConfig::from_env();
        config.environment = "test".to_string();
        config.database_url = None;
        config.jwt_secret = Some("unit-test-secret".to_string());
        let state = AppState::build(config).unwrap();
        v1_router().with_state(state)
    }

    async fn status_of(method: Method, uri: &str) -> StatusCode {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        offline_app().oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn client_path_spellings_are_routed() {
        for (method, uri) in [
            (Method::POST, "/auth/token/refresh/"),
            (Method::POST, "/auth/refresh/"),
            (Method::GET, "/auth/"),
            (Method::GET, "/auth/7/"),
            (Method::PATCH, "/auth/7/"),
            (Method::GET, "/auth/users/7/"),
            (Method::GET, "/auth/profile/"),
            (Method::POST, "/lotes/3/transfer-owner/"),
            (Method::POST, "/lotes/3/transfer_owner/"),
            (Method::GET, "/sales/ventas/?lote=5&customer=3"),
        ] {
            let status = status_of(method.clone(), uri).await;
            assert_ne!(status, StatusCode::NOT_FOUND, "{method} {uri}");
            assert_ne!(status, StatusCode::METHOD_NOT_ALLOWED, "{method} {uri}");
        }
    }

    #[tokio::test]
    async fn static_auth_routes_win_over_user_ids() {
        assert_eq!(
            status_of(Method::GET, "/auth/login/").await,
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            status_of(Method::GET, "/auth/me/").await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn value_helpers_read_rows() {
        let row = json!({"id": 12, "block": " A ", "notes": ""});
        assert_eq!(value_i64(&row, "id"), Some(12));
        assert_eq!(value_str(&row, "block"), "A");
        assert_eq!(value_str(&row, "notes"), "");
        assert_eq!(value_i64(&row, "missing"), None);
    }

    #[test]
    fn non_empty_drops_blank() {
        assert_eq!(non_empty_opt(Some("  ")), None);
        assert_eq!(non_empty_opt(Some(" x ")), Some("x".to_string()));
    }
}
