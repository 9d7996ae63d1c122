use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::PgConnection;

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    repository::{
        lotes::{insert_lote_history, lock_lote, set_lote_ownership, LoteHistoryEntry},
        sales::{
            count_ventas, fetch_venta, insert_payment, insert_venta, list_ventas, lock_venta,
            sale_summaries, save_venta, total_initial_payments, NewPayment, VentaFilter,
            VentaRecord,
        },
        schedules::{
            delete_sale_schedule, fetch_plan, fetch_sale_schedule, insert_installments,
            lock_sale_schedule, upsert_plan,
        },
        table_service::get_row,
    },
    routes::{db_pool, non_empty_opt, schedules::installment_view},
    schemas::{
        clamp_limit_in_range, validate_input, CancelVentaInput, CreateVentaInput, LoteIdQuery,
        RegisterPaymentInput, UpdateVentaInput, UrgencyQuery, VentaPath, VentasQuery,
    },
    services::{
        audit::write_audit_log,
        installments::{ensure_replannable, plan_installments, Installment, PlanSummary},
        sales::{
            ensure_active, ensure_completable, ensure_initial_payment_fits,
            initial_payment_balance, LoteStatus, PaymentMethod, PaymentType, SaleTerms,
            VentaStatus,
        },
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/sales/ventas/",
            axum::routing::get(list_sales).post(create_sale),
        )
        .route("/sales/ventas/active_sales/", axum::routing::get(active_sales))
        .route("/sales/ventas/sales_by_lote/", axum::routing::get(sales_by_lote))
        .route(
            "/sales/ventas/{venta_id}/",
            axum::routing::get(get_sale).patch(update_sale).put(update_sale),
        )
        .route(
            "/sales/ventas/{venta_id}/cancel_sale/",
            axum::routing::post(cancel_sale),
        )
        .route(
            "/sales/ventas/{venta_id}/complete_sale/",
            axum::routing::post(complete_sale),
        )
        .route(
            "/sales/ventas/{venta_id}/register_initial_payment/",
            axum::routing::post(register_initial_payment),
        )
        .route(
            "/sales/ventas/{venta_id}/payment_schedule/",
            axum::routing::get(payment_schedule),
        )
        .route(
            "/sales/ventas/{venta_id}/payment_plan/",
            axum::routing::get(payment_plan),
        )
        .route(
            "/sales/ventas/{venta_id}/regenerate_payment_schedule/",
            axum::routing::post(regenerate_payment_schedule),
        )
}

/// Sales as served by the API: the stored row plus names and balances.
pub(crate) async fn sale_views(pool: &sqlx::PgPool, ventas: &[VentaRecord]) -> AppResult<Vec<Value>> {
    let ids = ventas.iter().map(|venta| venta.id).collect::<Vec<_>>();
    let summaries = sale_summaries(pool, &ids).await?;

    Ok(ventas
        .iter()
        .map(|venta| {
            let mut item = serde_json::to_value(venta).unwrap_or(Value::Null);
            let summary = summaries.get(&venta.id);
            let paid_initial = summary.map_or(Decimal::ZERO, |s| s.total_initial_payments);
            let balance = initial_payment_balance(venta.initial_payment, paid_initial);
            if let Some(obj) = item.as_object_mut() {
                obj.insert(
                    "customer_name".to_string(),
                    json!(summary.map(|s| s.customer_name.as_str())),
                );
                obj.insert(
                    "lote_display".to_string(),
                    json!(summary.map(|s| s.lote_display.as_str())),
                );
                obj.insert("financed_amount".to_string(), json!(venta.terms().financed_amount()));
                obj.insert(
                    "remaining_balance".to_string(),
                    json!(summary.map_or(Decimal::ZERO, |s| s.remaining_balance)),
                );
                obj.insert("total_initial_payments".to_string(), json!(paid_initial));
                obj.insert("initial_payment_balance".to_string(), json!(balance));
                obj.insert(
                    "is_initial_payment_complete".to_string(),
                    json!(balance.is_zero()),
                );
            }
            item
        })
        .collect())
}

async fn sale_view(pool: &sqlx::PgPool, venta: &VentaRecord) -> AppResult<Value> {
    Ok(sale_views(pool, std::slice::from_ref(venta))
        .await?
        .into_iter()
        .next()
        .unwrap_or(Value::Null))
}

/// Replace a sale's schedule with one planned from its current terms and
/// record the plan. Callers check that no installment payment exists.
pub(crate) async fn rebuild_schedule(
    conn: &mut PgConnection,
    venta: &VentaRecord,
    today: chrono::NaiveDate,
) -> AppResult<Vec<Installment>> {
    let terms = venta.terms();
    let start = terms.schedule_start();
    let planned = plan_installments(
        terms.financed_amount(),
        terms.financing_months,
        terms.payment_day,
        start,
    )?;
    delete_sale_schedule(&mut *conn, venta.id).await?;
    upsert_plan(
        &mut *conn,
        venta.id,
        terms.financed_amount(),
        venta.financing_months,
        venta.payment_day,
        start,
    )
    .await?;
    insert_installments(&mut *conn, venta.id, venta.lote_id, &planned, today).await
}

fn parse_venta_status(raw: Option<&str>) -> AppResult<Option<VentaStatus>> {
    non_empty_opt(raw)
        .map(|value| VentaStatus::from_str(&value).map_err(AppError::BadRequest))
        .transpose()
}

async fn list_sales(
    State(state): State<AppState>,
    Query(query): Query<VentasQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let filter = VentaFilter {
        status: match parse_venta_status(query.status.as_deref())? {
            None if query.active_only => Some(VentaStatus::Active),
            status => status,
        },
        lote_id: query.lote_id,
        customer_id: query.customer_id,
        search: non_empty_opt(query.search.as_deref()),
        limit: clamp_limit_in_range(query.limit, 1, 1000),
        offset: query.offset.max(0),
    };
    let ventas = list_ventas(pool, &filter).await?;
    let count = count_ventas(pool, &filter).await?;
    Ok(Json(json!({
        "count": count,
        "results": sale_views(pool, &ventas).await?,
    })))
}

async fn create_sale(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateVentaInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let today = state.config.today();

    let terms = SaleTerms {
        sale_price: payload.sale_price,
        initial_payment: payload.initial_payment,
        financing_months: payload.financing_months.max(0) as u32,
        payment_day: payload
            .payment_day
            .map_or(state.config.default_payment_day, |day| day.max(0) as u32),
        sale_date: payload.sale_date.unwrap_or(today),
        contract_date: payload.contract_date,
        schedule_start_date: payload.schedule_start_date,
    };
    terms.validate()?;

    let mut tx = pool.begin().await?;
    let (lote_status, _) = lock_lote(&mut tx, payload.lote_id).await?;
    if LoteStatus::parse(&lote_status) != Some(LoteStatus::Disponible) {
        return Err(AppError::BadRequest(format!(
            "Lot is {lote_status}; only available lots can be sold."
        )));
    }
    get_row(&mut *tx, "customers", payload.customer_id)
        .await
        .map_err(|error| match error {
            AppError::NotFound(_) => AppError::BadRequest("Customer does not exist.".to_string()),
            other => other,
        })?;

    let venta = insert_venta(
        &mut tx,
        payload.lote_id,
        payload.customer_id,
        &terms,
        payload.notes.trim(),
        user_id,
    )
    .await?;
    set_lote_ownership(
        &mut tx,
        payload.lote_id,
        LoteStatus::Vendido.as_str(),
        Some(payload.customer_id),
    )
    .await?;
    insert_lote_history(
        &mut *tx,
        payload.lote_id,
        &LoteHistoryEntry {
            action: "status_change",
            details: format!("Lot sold under sale {}", venta.id),
            field_name: Some("status"),
            old_value: Some(lote_status),
            new_value: Some(LoteStatus::Vendido.as_str().to_string()),
        },
        Some(user_id),
    )
    .await?;
    insert_lote_history(
        &mut *tx,
        payload.lote_id,
        &LoteHistoryEntry {
            action: "owner_change",
            details: format!("owner_id changed from none to {}", payload.customer_id),
            field_name: Some("owner_id"),
            old_value: None,
            new_value: Some(payload.customer_id.to_string()),
        },
        Some(user_id),
    )
    .await?;
    let schedule = rebuild_schedule(&mut tx, &venta, today).await?;
    tx.commit().await?;

    let view = sale_view(pool, &venta).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(user_id),
        "create",
        "ventas",
        Some(venta.id),
        None,
        Some(view.clone()),
    )
    .await;
    state.invalidate_dashboard().await;
    tracing::info!(
        venta_id = venta.id,
        lote_id = venta.lote_id,
        installments = schedule.len(),
        "Sale registered"
    );
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_sale(
    State(state): State<AppState>,
    Path(path): Path<VentaPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let venta = fetch_venta(pool, path.venta_id).await?;
    Ok(Json(sale_view(pool, &venta).await?))
}

async fn update_sale(
    State(state): State<AppState>,
    Path(path): Path<VentaPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateVentaInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let today = state.config.today();

    let mut tx = pool.begin().await?;
    let before = lock_venta(&mut tx, path.venta_id).await?;
    let mut venta = before.clone();
    if let Some(notes) = payload.notes.as_deref() {
        venta.notes = notes.trim().to_string();
    }
    if let Some(contract_date) = payload.contract_date {
        venta.contract_date = Some(contract_date);
    }
    if let Some(payment_day) = payload.payment_day {
        venta.payment_day = payment_day;
    }
    if let Some(months) = payload.financing_months {
        venta.financing_months = months;
    }
    if let Some(start) = payload.schedule_start_date {
        venta.schedule_start_date = Some(start);
    }

    let old_terms = before.terms();
    let new_terms = venta.terms();
    let reshaped = old_terms.financing_months != new_terms.financing_months
        || old_terms.payment_day != new_terms.payment_day
        || old_terms.schedule_start() != new_terms.schedule_start();
    if reshaped {
        ensure_active(venta.status, "re-planned")?;
        new_terms.validate()?;
        let current = lock_sale_schedule(&mut tx, venta.id).await?;
        ensure_replannable(&current)?;
    }

    let saved = save_venta(&mut tx, &venta).await?;
    if reshaped {
        rebuild_schedule(&mut tx, &saved, today).await?;
    }
    tx.commit().await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(user_id),
        "update",
        "ventas",
        Some(saved.id),
        serde_json::to_value(&before).ok(),
        serde_json::to_value(&saved).ok(),
    )
    .await;
    if reshaped {
        state.invalidate_dashboard().await;
    }
    Ok(Json(sale_view(pool, &saved).await?))
}

async fn cancel_sale(
    State(state): State<AppState>,
    Path(path): Path<VentaPath>,
    headers: HeaderMap,
    Json(payload): Json<CancelVentaInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let reason = payload.reason.trim();
    if reason.is_empty() {
        return Err(AppError::BadRequest(
            "A cancellation reason is required.".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    let before = lock_venta(&mut tx, path.venta_id).await?;
    ensure_active(before.status, "cancelled")?;
    let (lote_status, lote_owner) = lock_lote(&mut tx, before.lote_id).await?;

    let mut venta = before.clone();
    venta.status = VentaStatus::Cancelled;
    venta.cancellation_date = Some(payload.cancellation_date.unwrap_or_else(|| state.config.today()));
    venta.cancellation_reason = reason.to_string();
    let saved = save_venta(&mut tx, &venta).await?;

    set_lote_ownership(&mut tx, saved.lote_id, LoteStatus::Disponible.as_str(), None).await?;
    insert_lote_history(
        &mut *tx,
        saved.lote_id,
        &LoteHistoryEntry {
            action: "status_change",
            details: format!("Sale {} cancelled: {reason}", saved.id),
            field_name: Some("status"),
            old_value: Some(lote_status),
            new_value: Some(LoteStatus::Disponible.as_str().to_string()),
        },
        Some(user_id),
    )
    .await?;
    if let Some(owner) = lote_owner {
        insert_lote_history(
            &mut *tx,
            saved.lote_id,
            &LoteHistoryEntry {
                action: "owner_change",
                details: format!("owner_id changed from {owner} to none"),
                field_name: Some("owner_id"),
                old_value: Some(owner.to_string()),
                new_value: None,
            },
            Some(user_id),
        )
        .await?;
    }
    tx.commit().await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(user_id),
        "cancel",
        "ventas",
        Some(saved.id),
        serde_json::to_value(&before).ok(),
        serde_json::to_value(&saved).ok(),
    )
    .await;
    state.invalidate_dashboard().await;
    tracing::info!(venta_id = saved.id, "Sale cancelled");
    Ok(Json(sale_view(pool, &saved).await?))
}

async fn complete_sale(
    State(state): State<AppState>,
    Path(path): Path<VentaPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut tx = pool.begin().await?;
    let before = lock_venta(&mut tx, path.venta_id).await?;
    ensure_active(before.status, "completed")?;
    let rows = lock_sale_schedule(&mut tx, before.id).await?;
    ensure_completable(&rows)?;
    let paid_initial = total_initial_payments(&mut *tx, before.id).await?;
    if !initial_payment_balance(before.initial_payment, paid_initial).is_zero() {
        return Err(AppError::BadRequest(
            "The initial payment has not been fully paid.".to_string(),
        ));
    }

    let mut venta = before.clone();
    venta.status = VentaStatus::Completed;
    venta.completion_date = Some(state.config.today());
    let saved = save_venta(&mut tx, &venta).await?;
    tx.commit().await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(user_id),
        "complete",
        "ventas",
        Some(saved.id),
        serde_json::to_value(&before).ok(),
        serde_json::to_value(&saved).ok(),
    )
    .await;
    state.invalidate_dashboard().await;
    tracing::info!(venta_id = saved.id, "Sale completed");
    Ok(Json(sale_view(pool, &saved).await?))
}

async fn register_initial_payment(
    State(state): State<AppState>,
    Path(path): Path<VentaPath>,
    headers: HeaderMap,
    Json(payload): Json<RegisterPaymentInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let method = PaymentMethod::parse_or_default(payload.method.as_deref())?;

    let mut tx = pool.begin().await?;
    let venta = lock_venta(&mut tx, path.venta_id).await?;
    ensure_active(venta.status, "paid")?;
    let paid_so_far = total_initial_payments(&mut *tx, venta.id).await?;
    let balance = initial_payment_balance(venta.initial_payment, paid_so_far);
    ensure_initial_payment_fits(payload.amount, balance)?;

    let payment = insert_payment(
        &mut tx,
        &NewPayment {
            venta_id: venta.id,
            payment_schedule_id: None,
            lote_id: venta.lote_id,
            payment_type: PaymentType::Initial.as_str(),
            amount: payload.amount,
            method: method.as_str(),
            receipt_number: payload.receipt_number.trim(),
            receipt_date: payload.receipt_date,
            receipt_image: None,
            payment_date: payload.payment_date.unwrap_or_else(|| state.config.today()),
            notes: payload.notes.trim(),
            recorded_by: Some(user_id),
        },
    )
    .await?;
    tx.commit().await?;

    let payment_json = serde_json::to_value(&payment).unwrap_or(Value::Null);
    write_audit_log(
        state.db_pool.as_ref(),
        Some(user_id),
        "register_initial_payment",
        "ventas",
        Some(venta.id),
        None,
        Some(payment_json.clone()),
    )
    .await;
    state.invalidate_dashboard().await;

    let remaining = balance - payload.amount;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "payment": payment_json,
            "initial_payment_balance": remaining,
            "is_initial_payment_complete": remaining.is_zero(),
        })),
    ))
}

async fn payment_schedule(
    State(state): State<AppState>,
    Path(path): Path<VentaPath>,
    Query(query): Query<UrgencyQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let today = state.config.today();
    let cutoffs = query.cutoffs();

    let venta = fetch_venta(pool, path.venta_id).await?;
    let rows = fetch_sale_schedule(pool, venta.id).await?;
    let results = rows
        .iter()
        .map(|row| installment_view(row, today, cutoffs))
        .collect::<Vec<_>>();
    Ok(Json(json!({
        "venta_id": venta.id,
        "count": results.len(),
        "summary": PlanSummary::from_rows(&rows),
        "results": results,
    })))
}

async fn payment_plan(
    State(state): State<AppState>,
    Path(path): Path<VentaPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let venta = fetch_venta(pool, path.venta_id).await?;
    let plan = fetch_plan(pool, venta.id).await?;
    let rows = fetch_sale_schedule(pool, venta.id).await?;
    Ok(Json(json!({
        "venta_id": venta.id,
        "plan": plan,
        "payment_status": PlanSummary::from_rows(&rows),
    })))
}

async fn active_sales(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let ventas = list_ventas(
        pool,
        &VentaFilter {
            status: Some(VentaStatus::Active),
            limit: 1000,
            ..VentaFilter::default()
        },
    )
    .await?;
    let results = sale_views(pool, &ventas).await?;
    Ok(Json(json!({ "count": results.len(), "results": results })))
}

async fn sales_by_lote(
    State(state): State<AppState>,
    Query(query): Query<LoteIdQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    get_row(pool, "lotes", query.lote_id).await?;
    let ventas = list_ventas(
        pool,
        &VentaFilter {
            lote_id: Some(query.lote_id),
            limit: 1000,
            ..VentaFilter::default()
        },
    )
    .await?;
    let results = sale_views(pool, &ventas).await?;
    Ok(Json(json!({ "count": results.len(), "results": results })))
}

async fn regenerate_payment_schedule(
    State(state): State<AppState>,
    Path(path): Path<VentaPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let today = state.config.today();

    let mut tx = pool.begin().await?;
    let venta = lock_venta(&mut tx, path.venta_id).await?;
    ensure_active(venta.status, "re-planned")?;
    let previous = lock_sale_schedule(&mut tx, venta.id).await?;
    ensure_replannable(&previous)?;
    let rows = rebuild_schedule(&mut tx, &venta, today).await?;
    tx.commit().await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(user_id),
        "regenerate_schedule",
        "ventas",
        Some(venta.id),
        Some(json!({ "installments": previous.len() })),
        Some(json!({ "installments": rows.len() })),
    )
    .await;
    state.invalidate_dashboard().await;
    tracing::info!(
        venta_id = venta.id,
        previous = previous.len(),
        installments = rows.len(),
        "Payment schedule regenerated"
    );

    let cutoffs = crate::services::urgency::UrgencyCutoffs::SCHEDULE_TABLE;
    Ok(Json(json!({
        "venta_id": venta.id,
        "count": rows.len(),
        "summary": PlanSummary::from_rows(&rows),
        "results": rows.iter().map(|row| installment_view(row, today, cutoffs)).collect::<Vec<_>>(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sale_status_filter_parses() {
        assert_eq!(parse_venta_status(None).unwrap(), None);
        assert_eq!(parse_venta_status(Some(" ")).unwrap(), None);
        assert_eq!(
            parse_venta_status(Some("Active")).unwrap(),
            Some(VentaStatus::Active)
        );
        assert!(matches!(
            parse_venta_status(Some("closed")),
            Err(AppError::BadRequest(_))
        ));
    }
}
