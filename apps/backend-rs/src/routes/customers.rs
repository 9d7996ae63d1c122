use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};

use crate::{
    auth::{require_role, require_user_id, Role},
    error::{AppError, AppResult},
    repository::{
        sales::{list_ventas, VentaFilter},
        table_service::{count_rows, create_row, delete_row, get_row, list_rows, update_row, ListQuery, Search},
    },
    routes::{db_pool, non_empty_opt, sales::sale_views, with_full_name},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, CreateCustomerInput,
        CustomerPath, CustomersQuery, UpdateCustomerInput,
    },
    services::{audit::write_audit_log, sales::VentaStatus},
    state::AppState,
};

const CUSTOMER_SEARCH_COLUMNS: &[&str] = &["first_name", "last_name", "email", "document_number"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/customers/",
            axum::routing::get(list_customers).post(create_customer),
        )
        .route(
            "/customers/{customer_id}/",
            axum::routing::get(get_customer)
                .patch(update_customer)
                .put(update_customer)
                .delete(delete_customer),
        )
}

/// Trim text fields and turn blank optional identifiers into NULL so the
/// unique indexes on email and document number ignore them.
fn normalize_customer_payload(record: &mut Map<String, Value>) {
    for value in record.values_mut() {
        if let Value::String(text) = value {
            *text = text.trim().to_string();
        }
    }
    if let Some(Value::String(email)) = record.get_mut("email") {
        *email = email.to_ascii_lowercase();
    }
    for key in ["email", "document_number"] {
        if matches!(record.get(key), Some(Value::String(text)) if text.is_empty()) {
            record.insert(key.to_string(), Value::Null);
        }
    }
}

async fn list_customers(
    State(state): State<AppState>,
    Query(query): Query<CustomersQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(document_number) = non_empty_opt(query.document_number.as_deref()) {
        filters.insert("document_number".to_string(), Value::String(document_number));
    }
    let search = non_empty_opt(query.search.as_deref());
    let list = ListQuery {
        filters: Some(&filters),
        search: search.as_deref().map(|term| Search {
            term,
            columns: CUSTOMER_SEARCH_COLUMNS,
        }),
        limit: clamp_limit_in_range(query.limit, 1, 1000),
        offset: query.offset.max(0),
        ..ListQuery::default()
    };
    let rows = list_rows(pool, "customers", list).await?;
    let count = count_rows(pool, "customers", list).await?;
    Ok(Json(json!({
        "count": count,
        "results": rows.into_iter().map(with_full_name).collect::<Vec<_>>(),
    })))
}

async fn create_customer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateCustomerInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut record = serialize_to_map(&payload);
    normalize_customer_payload(&mut record);
    let mut record = remove_nulls(record);
    record.insert("created_by".to_string(), json!(user_id));

    let created = with_full_name(create_row(pool, "customers", &record).await?);
    let customer_id = created.get("id").and_then(Value::as_i64);
    write_audit_log(
        state.db_pool.as_ref(),
        Some(user_id),
        "create",
        "customers",
        customer_id,
        None,
        Some(created.clone()),
    )
    .await;
    state.invalidate_dashboard().await;
    tracing::info!(customer_id, "Customer created");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_customer(
    State(state): State<AppState>,
    Path(path): Path<CustomerPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut customer = with_full_name(get_row(pool, "customers", path.customer_id).await?);
    let ventas = list_ventas(
        pool,
        &VentaFilter {
            customer_id: Some(path.customer_id),
            limit: 1000,
            ..VentaFilter::default()
        },
    )
    .await?;
    let sales = sale_views(pool, &ventas).await?;
    let total_pending_balance = ventas
        .iter()
        .zip(&sales)
        .filter(|(venta, _)| venta.status == VentaStatus::Active)
        .filter_map(|(_, view)| view.get("remaining_balance").and_then(Value::as_str))
        .filter_map(|raw| raw.parse::<Decimal>().ok())
        .sum::<Decimal>();

    if let Some(obj) = customer.as_object_mut() {
        obj.insert("sales".to_string(), Value::Array(sales));
        obj.insert(
            "total_pending_balance".to_string(),
            json!(total_pending_balance),
        );
    }
    Ok(Json(customer))
}

async fn update_customer(
    State(state): State<AppState>,
    Path(path): Path<CustomerPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateCustomerInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let before = get_row(pool, "customers", path.customer_id).await?;
    // Absent fields stay untouched; blank email or document clears it.
    let mut patch = remove_nulls(serialize_to_map(&payload));
    normalize_customer_payload(&mut patch);
    if patch.is_empty() {
        return Ok(Json(with_full_name(before)));
    }
    for key in ["first_name", "last_name"] {
        if matches!(patch.get(key), Some(Value::String(text)) if text.is_empty()) {
            return Err(AppError::BadRequest(format!("{key} cannot be blank.")));
        }
    }

    let updated = with_full_name(update_row(pool, "customers", path.customer_id, &patch).await?);
    write_audit_log(
        state.db_pool.as_ref(),
        Some(user_id),
        "update",
        "customers",
        Some(path.customer_id),
        Some(before),
        Some(updated.clone()),
    )
    .await;
    Ok(Json(updated))
}

async fn delete_customer(
    State(state): State<AppState>,
    Path(path): Path<CustomerPath>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let admin = require_role(&state, &headers, &[Role::Admin]).await?;
    let pool = db_pool(&state)?;

    let deleted = delete_row(pool, "customers", path.customer_id)
        .await
        .map_err(|error| match error {
            AppError::Conflict(_) => AppError::Conflict(
                "Customer has sales or owned lots and cannot be deleted.".to_string(),
            ),
            other => other,
        })?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(admin.id),
        "delete",
        "customers",
        Some(path.customer_id),
        Some(deleted),
        None,
    )
    .await;
    state.invalidate_dashboard().await;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn blank_identifiers_become_null() {
        let mut record = json!({
            "first_name": "  Rosa ",
            "email": " ROSA@Mail.com ",
            "document_number": "   ",
        })
        .as_object()
        .cloned()
        .unwrap();
        normalize_customer_payload(&mut record);
        assert_eq!(record["first_name"], json!("Rosa"));
        assert_eq!(record["email"], json!("rosa@mail.com"));
        assert_eq!(record["document_number"], Value::Null);
    }
}
