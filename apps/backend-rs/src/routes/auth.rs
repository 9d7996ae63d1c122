use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};
use sqlx::Row;

use crate::{
    auth::{decode_token, issue_tokens, require_role, require_user, Role, TokenKind},
    error::{AppError, AppResult},
    repository::table_service::{count_rows, create_row, get_row, list_rows, update_row, ListQuery, Search},
    routes::{db_pool, json_map, non_empty_opt, with_full_name},
    schemas::{
        clamp_limit_in_range, remove_nulls, validate_input, ChangePasswordInput, CreateUserInput,
        LoginInput, RefreshInput, UpdateProfileInput, UpdateUserInput, UserPath, UsersQuery,
    },
    services::{
        audit::write_audit_log,
        passwords::{hash_password, verify_password},
    },
    state::AppState,
};

const USER_SEARCH_COLUMNS: &[&str] = &["email", "first_name", "last_name"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/auth/login/", axum::routing::post(login))
        .route("/auth/token/refresh/", axum::routing::post(refresh))
        .route("/auth/refresh/", axum::routing::post(refresh))
        .route("/auth/logout/", axum::routing::post(logout))
        .route("/auth/me/", axum::routing::get(me))
        .route(
            "/auth/profile/",
            axum::routing::get(me)
                .patch(update_profile)
                .put(update_profile),
        )
        .route("/auth/change-password/", axum::routing::post(change_password))
        .route("/auth/", axum::routing::get(list_users).post(create_user))
        .route(
            "/auth/{user_id}/",
            axum::routing::get(get_user)
                .patch(update_user)
                .put(update_user),
        )
        .route(
            "/auth/users/",
            axum::routing::get(list_users).post(create_user),
        )
        .route(
            "/auth/users/{user_id}/",
            axum::routing::get(get_user)
                .patch(update_user)
                .put(update_user),
        )
        .route(
            "/auth/users/{user_id}/deactivate/",
            axum::routing::post(deactivate_user),
        )
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

fn parse_role(raw: &str) -> AppResult<Role> {
    Role::parse(raw).ok_or_else(|| {
        AppError::BadRequest(format!("Unknown role '{raw}'. Use 'admin' or 'worker'."))
    })
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let pool = db_pool(&state)?;
    let email = normalize_email(&payload.email);

    let row = sqlx::query("SELECT id, role, is_active, password_hash FROM users WHERE lower(email) = $1")
        .bind(&email)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        tracing::info!(email = %email, "Login rejected: unknown email");
        return Err(AppError::Unauthorized("Invalid email or password.".to_string()));
    };

    let user_id: i64 = row.try_get("id")?;
    let stored_hash: String = row.try_get("password_hash")?;
    if !verify_password(&payload.password, &stored_hash) {
        tracing::info!(user_id, "Login rejected: wrong password");
        return Err(AppError::Unauthorized("Invalid email or password.".to_string()));
    }
    if !row.try_get::<bool, _>("is_active")? {
        return Err(AppError::Unauthorized("User account is disabled.".to_string()));
    }
    let role = Role::parse(&row.try_get::<String, _>("role")?).unwrap_or(Role::Worker);

    sqlx::query("UPDATE users SET last_login_at = now() WHERE id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;

    let tokens = issue_tokens(&state.config, user_id, &email, role)?;
    let user = with_full_name(get_row(pool, "users", user_id).await?);
    tracing::info!(user_id, role = role.as_str(), "User logged in");

    Ok(Json(json!({
        "user": user,
        "access": tokens.access,
        "refresh": tokens.refresh,
        "token_type": tokens.token_type,
        "expires_in": tokens.expires_in,
    })))
}

async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let pool = db_pool(&state)?;
    let claims = decode_token(&state.config, payload.refresh.trim(), TokenKind::Refresh)?;
    let user_id = claims
        .sub
        .parse::<i64>()
        .map_err(|_| AppError::Unauthorized("Invalid token subject.".to_string()))?;

    let row = sqlx::query("SELECT email, role, is_active FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User no longer exists.".to_string()))?;
    if !row.try_get::<bool, _>("is_active")? {
        return Err(AppError::Unauthorized("User account is disabled.".to_string()));
    }
    let email: String = row.try_get("email")?;
    let role = Role::parse(&row.try_get::<String, _>("role")?).unwrap_or(Role::Worker);

    let tokens = issue_tokens(&state.config, user_id, &email, role)?;
    Ok(Json(json!({
        "access": tokens.access,
        "refresh": tokens.refresh,
        "token_type": tokens.token_type,
        "expires_in": tokens.expires_in,
    })))
}

/// Tokens are stateless; the client discards them.
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers).await?;
    tracing::info!(user_id = user.id, "User logged out");
    Ok(Json(json!({ "detail": "Logged out." })))
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let mut profile = with_full_name(get_row(pool, "users", user.id).await?);
    if let Some(obj) = profile.as_object_mut() {
        obj.insert("is_admin".to_string(), Value::Bool(user.is_admin()));
    }
    Ok(Json(profile))
}

async fn update_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UpdateProfileInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let user = require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut patch = Map::new();
    for (key, value) in [
        ("first_name", payload.first_name.as_deref()),
        ("last_name", payload.last_name.as_deref()),
        ("phone", payload.phone.as_deref()),
    ] {
        if let Some(value) = value {
            patch.insert(key.to_string(), Value::String(value.trim().to_string()));
        }
    }
    if patch.is_empty() {
        return me(State(state), headers).await;
    }

    let before = get_row(pool, "users", user.id).await?;
    let updated = update_row(pool, "users", user.id, &patch).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(user.id),
        "update_profile",
        "users",
        Some(user.id),
        Some(before),
        Some(updated.clone()),
    )
    .await;
    Ok(Json(with_full_name(updated)))
}

async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ChangePasswordInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let user = require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let stored_hash: String = sqlx::query_scalar("SELECT password_hash FROM users WHERE id = $1")
        .bind(user.id)
        .fetch_one(pool)
        .await?;
    if !verify_password(&payload.old_password, &stored_hash) {
        return Err(AppError::BadRequest("Current password is incorrect.".to_string()));
    }
    if payload.old_password == payload.new_password {
        return Err(AppError::BadRequest(
            "The new password must differ from the current one.".to_string(),
        ));
    }

    let new_hash = hash_password(&payload.new_password)?;
    sqlx::query("UPDATE users SET password_hash = $1, updated_at = now() WHERE id = $2")
        .bind(new_hash)
        .bind(user.id)
        .execute(pool)
        .await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(user.id),
        "change_password",
        "users",
        Some(user.id),
        None,
        None,
    )
    .await;
    Ok(Json(json!({ "detail": "Password updated." })))
}

async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<UsersQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_role(&state, &headers, &[Role::Admin]).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(role) = non_empty_opt(query.role.as_deref()) {
        filters.insert(
            "role".to_string(),
            Value::String(parse_role(&role)?.as_str().to_string()),
        );
    }
    if let Some(is_active) = query.is_active {
        filters.insert("is_active".to_string(), Value::Bool(is_active));
    }
    let search = non_empty_opt(query.search.as_deref());
    let list = ListQuery {
        filters: Some(&filters),
        search: search.as_deref().map(|term| Search {
            term,
            columns: USER_SEARCH_COLUMNS,
        }),
        limit: clamp_limit_in_range(query.limit, 1, 500),
        offset: query.offset.max(0),
        order_by: "email",
        ascending: true,
    };
    let rows = list_rows(pool, "users", list).await?;
    let count = count_rows(pool, "users", list).await?;
    Ok(Json(json!({
        "count": count,
        "results": rows.into_iter().map(with_full_name).collect::<Vec<_>>(),
    })))
}

async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateUserInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let admin = require_role(&state, &headers, &[Role::Admin]).await?;
    let pool = db_pool(&state)?;

    let role = parse_role(&payload.role)?;
    let record = json_map(&[
        ("email", Value::String(normalize_email(&payload.email))),
        ("first_name", Value::String(payload.first_name.trim().to_string())),
        ("last_name", Value::String(payload.last_name.trim().to_string())),
        ("phone", Value::String(payload.phone.trim().to_string())),
        ("role", Value::String(role.as_str().to_string())),
        ("password_hash", Value::String(hash_password(&payload.password)?)),
    ]);
    let created = with_full_name(create_row(pool, "users", &record).await?);
    write_audit_log(
        state.db_pool.as_ref(),
        Some(admin.id),
        "create",
        "users",
        created.get("id").and_then(Value::as_i64),
        None,
        Some(created.clone()),
    )
    .await;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_user(
    State(state): State<AppState>,
    Path(path): Path<UserPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_role(&state, &headers, &[Role::Admin]).await?;
    let pool = db_pool(&state)?;
    Ok(Json(with_full_name(get_row(pool, "users", path.user_id).await?)))
}

async fn update_user(
    State(state): State<AppState>,
    Path(path): Path<UserPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateUserInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let admin = require_role(&state, &headers, &[Role::Admin]).await?;
    let pool = db_pool(&state)?;
    let before = get_row(pool, "users", path.user_id).await?;

    let mut patch = Map::new();
    if let Some(email) = payload.email.as_deref() {
        patch.insert("email".to_string(), Value::String(normalize_email(email)));
    }
    for (key, value) in [
        ("first_name", payload.first_name.as_deref()),
        ("last_name", payload.last_name.as_deref()),
        ("phone", payload.phone.as_deref()),
    ] {
        if let Some(value) = value {
            patch.insert(key.to_string(), Value::String(value.trim().to_string()));
        }
    }
    if let Some(role) = payload.role.as_deref() {
        let role = parse_role(role)?;
        if admin.id == path.user_id && role != Role::Admin {
            return Err(AppError::BadRequest(
                "You cannot remove your own admin role.".to_string(),
            ));
        }
        patch.insert("role".to_string(), Value::String(role.as_str().to_string()));
    }
    if let Some(is_active) = payload.is_active {
        if admin.id == path.user_id && !is_active {
            return Err(AppError::BadRequest(
                "You cannot deactivate your own account.".to_string(),
            ));
        }
        patch.insert("is_active".to_string(), Value::Bool(is_active));
    }
    if let Some(password) = payload.password.as_deref() {
        patch.insert(
            "password_hash".to_string(),
            Value::String(hash_password(password)?),
        );
    }
    let patch = remove_nulls(patch);
    if patch.is_empty() {
        return Ok(Json(with_full_name(before)));
    }

    let updated = update_row(pool, "users", path.user_id, &patch).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(admin.id),
        "update",
        "users",
        Some(path.user_id),
        Some(before),
        Some(updated.clone()),
    )
    .await;
    Ok(Json(with_full_name(updated)))
}

async fn deactivate_user(
    State(state): State<AppState>,
    Path(path): Path<UserPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let admin = require_role(&state, &headers, &[Role::Admin]).await?;
    let pool = db_pool(&state)?;
    if admin.id == path.user_id {
        return Err(AppError::BadRequest(
            "You cannot deactivate your own account.".to_string(),
        ));
    }

    let before = get_row(pool, "users", path.user_id).await?;
    let patch = json_map(&[("is_active", Value::Bool(false))]);
    let updated = update_row(pool, "users", path.user_id, &patch).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(admin.id),
        "deactivate",
        "users",
        Some(path.user_id),
        Some(before),
        Some(updated.clone()),
    )
    .await;
    Ok(Json(with_full_name(updated)))
}

/// Seed an admin from `BOOTSTRAP_ADMIN_EMAIL` / `BOOTSTRAP_ADMIN_PASSWORD`
/// when the users table holds no admin yet.
pub async fn ensure_bootstrap_admin(state: &AppState) -> AppResult<()> {
    let (Some(email), Some(password)) = (
        state.config.bootstrap_admin_email.as_deref(),
        state.config.bootstrap_admin_password.as_deref(),
    ) else {
        return Ok(());
    };
    let pool = db_pool(state)?;

    let admins: i64 = sqlx::query_scalar("SELECT COUNT(*)::bigint FROM users WHERE role = 'admin'")
        .fetch_one(pool)
        .await?;
    if admins > 0 {
        return Ok(());
    }

    let email = normalize_email(email);
    sqlx::query(
        "INSERT INTO users (email, role, password_hash) VALUES ($1, 'admin', $2)
         ON CONFLICT (email) DO UPDATE SET role = 'admin', is_active = true",
    )
    .bind(&email)
    .bind(hash_password(password)?)
    .execute(pool)
    .await?;
    tracing::warn!(email = %email, "Bootstrap admin account created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Ana@Villanueva.PE "), "ana@villanueva.pe");
    }

    #[test]
    fn full_name_is_derived() {
        let user = with_full_name(json!({"first_name": "Ana", "last_name": "Torres"}));
        assert_eq!(user["full_name"], json!("Ana Torres"));
        let user = with_full_name(json!({"first_name": "", "last_name": ""}));
        assert_eq!(user["full_name"], json!(""));
    }

    #[test]
    fn roles_must_be_known() {
        assert_eq!(parse_role("ADMIN").unwrap(), Role::Admin);
        assert!(matches!(parse_role("owner"), Err(AppError::BadRequest(_))));
    }
}
