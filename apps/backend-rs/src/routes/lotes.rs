use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::{require_role, require_user_id, Role},
    error::{AppError, AppResult},
    repository::{
        lotes::{
            active_sale_id, count_lotes, fetch_lote, insert_lote_history, list_lote_history,
            list_lotes, lock_lote, set_lote_ownership, LoteFilter, LoteHistoryEntry,
        },
        table_service::{create_row, delete_row, get_row, update_row},
    },
    routes::{db_pool, non_empty_opt, value_i64, value_str},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, CreateLoteInput,
        LotePath, LotesQuery, TransferOwnerInput, UpdateLoteInput,
    },
    services::{
        audit::write_audit_log,
        lotes::{
            ensure_transferable, monitored_changes, parse_lote_status, validate_dimensions,
            validate_ownership,
        },
        sales::LoteStatus,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/lotes/", axum::routing::get(list).post(create_lote))
        .route(
            "/lotes/{lote_id}/",
            axum::routing::get(get_lote)
                .patch(update_lote)
                .put(update_lote)
                .delete(delete_lote),
        )
        .route("/lotes/{lote_id}/history/", axum::routing::get(history))
        .route(
            "/lotes/{lote_id}/transfer-owner/",
            axum::routing::post(transfer_owner),
        )
        .route(
            "/lotes/{lote_id}/transfer_owner/",
            axum::routing::post(transfer_owner),
        )
}

async fn list(
    State(state): State<AppState>,
    Query(query): Query<LotesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let status = match non_empty_opt(query.status.as_deref()) {
        Some(raw) => Some(parse_lote_status(&raw)?.as_str().to_string()),
        None => None,
    };
    let filter = LoteFilter {
        status,
        block: non_empty_opt(query.block.as_deref()),
        owner_id: query.owner_id,
        search: non_empty_opt(query.search.as_deref()),
        limit: clamp_limit_in_range(query.limit, 1, 1000),
        offset: query.offset.max(0),
    };
    let rows = list_lotes(pool, &filter).await?;
    let count = count_lotes(pool, &filter).await?;
    Ok(Json(json!({ "count": count, "results": rows })))
}

async fn create_lote(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateLoteInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    validate_dimensions(Some(payload.area), Some(payload.price))?;
    let status = parse_lote_status(&payload.status)?;
    validate_ownership(status, payload.owner_id)?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert("block".to_string(), json!(payload.block.trim().to_ascii_uppercase()));
    record.insert("lot_number".to_string(), json!(payload.lot_number.trim()));
    record.insert("status".to_string(), json!(status.as_str()));
    record.insert("created_by".to_string(), json!(user_id));

    let mut tx = pool.begin().await?;
    let created = create_row(&mut *tx, "lotes", &record).await?;
    let lote_id = value_i64(&created, "id")
        .ok_or_else(|| AppError::Internal("Created lot has no id.".to_string()))?;
    insert_lote_history(
        &mut *tx,
        lote_id,
        &LoteHistoryEntry::note("created", format!("Lot created with status {}", status.as_str())),
        Some(user_id),
    )
    .await?;
    tx.commit().await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(user_id),
        "create",
        "lotes",
        Some(lote_id),
        None,
        Some(created),
    )
    .await;
    state.invalidate_dashboard().await;
    Ok((StatusCode::CREATED, Json(fetch_lote(pool, lote_id).await?)))
}

async fn get_lote(
    State(state): State<AppState>,
    Path(path): Path<LotePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    Ok(Json(fetch_lote(pool, path.lote_id).await?))
}

async fn update_lote(
    State(state): State<AppState>,
    Path(path): Path<LotePath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateLoteInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    validate_dimensions(payload.area, payload.price)?;

    let mut patch = Map::new();
    if let Some(block) = payload.block.as_deref() {
        patch.insert("block".to_string(), json!(block.trim().to_ascii_uppercase()));
    }
    if let Some(lot_number) = payload.lot_number.as_deref() {
        patch.insert("lot_number".to_string(), json!(lot_number.trim()));
    }
    if let Some(area) = payload.area {
        patch.insert("area".to_string(), json!(area));
    }
    if let Some(price) = payload.price {
        patch.insert("price".to_string(), json!(price));
    }
    if let Some(status) = payload.status.as_deref() {
        patch.insert("status".to_string(), json!(parse_lote_status(status)?.as_str()));
    }
    if let Some(owner_id) = payload.owner_id {
        patch.insert("owner_id".to_string(), json!(owner_id));
    }
    if patch.is_empty() {
        return Ok(Json(fetch_lote(pool, path.lote_id).await?));
    }

    let mut tx = pool.begin().await?;
    lock_lote(&mut tx, path.lote_id).await?;
    let before = get_row(&mut *tx, "lotes", path.lote_id).await?;

    let touches_ownership = patch.contains_key("status") || patch.contains_key("owner_id");
    if touches_ownership && active_sale_id(&mut *tx, path.lote_id).await?.is_some() {
        return Err(AppError::Conflict(
            "The lot has an active sale; cancel or complete the sale to change its status or owner."
                .to_string(),
        ));
    }
    let next_status = patch
        .get("status")
        .and_then(Value::as_str)
        .and_then(LoteStatus::parse)
        .or_else(|| LoteStatus::parse(&value_str(&before, "status")))
        .unwrap_or(LoteStatus::Disponible);
    let next_owner = match payload.owner_id {
        Some(owner) => owner,
        None => value_i64(&before, "owner_id"),
    };
    validate_ownership(next_status, next_owner)?;

    let updated = update_row(&mut *tx, "lotes", path.lote_id, &patch).await?;
    for change in monitored_changes(&before, &updated) {
        insert_lote_history(&mut *tx, path.lote_id, &(&change).into(), Some(user_id)).await?;
    }
    tx.commit().await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(user_id),
        "update",
        "lotes",
        Some(path.lote_id),
        Some(before),
        Some(updated),
    )
    .await;
    state.invalidate_dashboard().await;
    Ok(Json(fetch_lote(pool, path.lote_id).await?))
}

async fn delete_lote(
    State(state): State<AppState>,
    Path(path): Path<LotePath>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let admin = require_role(&state, &headers, &[Role::Admin]).await?;
    let pool = db_pool(&state)?;

    let deleted = delete_row(pool, "lotes", path.lote_id)
        .await
        .map_err(|error| match error {
            AppError::Conflict(_) => {
                AppError::Conflict("Lot has sales on record and cannot be deleted.".to_string())
            }
            other => other,
        })?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(admin.id),
        "delete",
        "lotes",
        Some(path.lote_id),
        Some(deleted),
        None,
    )
    .await;
    state.invalidate_dashboard().await;
    Ok(StatusCode::NO_CONTENT)
}

async fn history(
    State(state): State<AppState>,
    Path(path): Path<LotePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    // 404 for unknown lots instead of an empty list.
    get_row(pool, "lotes", path.lote_id).await?;
    let rows = list_lote_history(pool, path.lote_id).await?;
    Ok(Json(json!({ "count": rows.len(), "results": rows })))
}

async fn transfer_owner(
    State(state): State<AppState>,
    Path(path): Path<LotePath>,
    headers: HeaderMap,
    Json(payload): Json<TransferOwnerInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut tx = pool.begin().await?;
    // Lock in id order so two opposite transfers cannot deadlock.
    let (first, second) = if path.lote_id < payload.new_lote_id {
        (path.lote_id, payload.new_lote_id)
    } else {
        (payload.new_lote_id, path.lote_id)
    };
    let first_row = lock_lote(&mut tx, first).await?;
    let second_row = lock_lote(&mut tx, second).await?;
    let ((_, source_owner), (target_status, target_owner)) = if first == path.lote_id {
        (first_row, second_row)
    } else {
        (second_row, first_row)
    };

    let owner_id = ensure_transferable(
        path.lote_id,
        source_owner,
        payload.new_lote_id,
        target_owner,
        LoteStatus::parse(&target_status),
    )?;
    if active_sale_id(&mut *tx, path.lote_id).await?.is_some() {
        return Err(AppError::Conflict(
            "The lot has an active sale; ownership follows the sale.".to_string(),
        ));
    }

    set_lote_ownership(&mut tx, path.lote_id, LoteStatus::Disponible.as_str(), None).await?;
    set_lote_ownership(
        &mut tx,
        payload.new_lote_id,
        LoteStatus::Vendido.as_str(),
        Some(owner_id),
    )
    .await?;

    let note = payload.notes.trim();
    let suffix = if note.is_empty() {
        String::new()
    } else {
        format!(": {note}")
    };
    insert_lote_history(
        &mut *tx,
        path.lote_id,
        &LoteHistoryEntry {
            action: "owner_transfer_out",
            details: format!("Owner moved to lot {}{suffix}", payload.new_lote_id),
            field_name: Some("owner_id"),
            old_value: Some(owner_id.to_string()),
            new_value: None,
        },
        Some(user_id),
    )
    .await?;
    insert_lote_history(
        &mut *tx,
        payload.new_lote_id,
        &LoteHistoryEntry {
            action: "owner_transfer_in",
            details: format!("Owner moved from lot {}{suffix}", path.lote_id),
            field_name: Some("owner_id"),
            old_value: None,
            new_value: Some(owner_id.to_string()),
        },
        Some(user_id),
    )
    .await?;
    tx.commit().await?;

    let source = fetch_lote(pool, path.lote_id).await?;
    let target = fetch_lote(pool, payload.new_lote_id).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(user_id),
        "transfer_owner",
        "lotes",
        Some(path.lote_id),
        None,
        Some(json!({ "owner_id": owner_id, "new_lote_id": payload.new_lote_id })),
    )
    .await;
    state.invalidate_dashboard().await;
    tracing::info!(
        from_lote = path.lote_id,
        to_lote = payload.new_lote_id,
        owner_id,
        "Lot owner transferred"
    );
    Ok(Json(json!({ "source": source, "target": target })))
}
