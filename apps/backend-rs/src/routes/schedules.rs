use std::collections::HashMap;
use std::str::FromStr;

use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    repository::{
        lotes::active_sale_id,
        sales::{insert_payment, lock_venta, payments_for_schedules, NewPayment, PaymentRecord},
        schedules::{
            count_schedules, fetch_schedule, get_schedule_with_context, insert_installments,
            list_schedules, lock_sale_schedule, sales_for_schedules, save_installment,
            ScheduleFilter, ScheduleWithContext,
        },
        table_service::get_row,
    },
    routes::{db_pool, sales::rebuild_schedule},
    schemas::{
        clamp_limit_in_range, split_csv, validate_input, CreateScheduleInput,
        ForgiveInstallmentInput, GenerateForLoteInput, LoteIdQuery, ModifyAmountInput,
        ModifyMultipleAmountsInput, RegisterPaymentInput, SchedulePath, SchedulesQuery,
        UpcomingQuery, UrgencyQuery, VentaIdQuery,
    },
    services::{
        audit::write_audit_log,
        installments::{
            append_note, apply_payment, ensure_replannable, forgive, plan_amount_modification,
            validate_money, AmountChange, Installment, PlanSummary, PlannedInstallment,
            ScheduleStatus,
        },
        receipts::{discard_receipt, store_receipt, validate_receipt, ReceiptUpload},
        sales::{ensure_active, PaymentMethod, PaymentType},
        urgency::{classify, days_until_due, UrgencyCutoffs},
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/payments/schedules/",
            axum::routing::get(list).post(create_schedule),
        )
        .route("/payments/schedules/by_lote/", axum::routing::get(by_lote))
        .route("/payments/schedules/by_venta/", axum::routing::get(by_venta))
        .route("/payments/schedules/upcoming/", axum::routing::get(upcoming))
        .route("/payments/schedules/overdue/", axum::routing::get(overdue))
        .route(
            "/payments/schedules/modify_multiple_amounts/",
            axum::routing::post(modify_multiple_amounts),
        )
        .route(
            "/payments/schedules/generate_for_lote/",
            axum::routing::post(generate_for_lote),
        )
        .route(
            "/payments/schedules/{schedule_id}/",
            axum::routing::get(get_schedule),
        )
        .route(
            "/payments/schedules/{schedule_id}/register_payment/",
            axum::routing::post(register_payment),
        )
        .route(
            "/payments/schedules/{schedule_id}/forgive_installment/",
            axum::routing::post(forgive_installment),
        )
        .route(
            "/payments/schedules/{schedule_id}/modify_amount/",
            axum::routing::post(modify_amount),
        )
}

fn enrich(mut value: Value, row: &Installment, today: NaiveDate, cutoffs: UrgencyCutoffs) -> Value {
    if let Some(obj) = value.as_object_mut() {
        let days_overdue = row.days_overdue(today);
        obj.insert("remaining_amount".to_string(), json!(row.remaining_amount()));
        obj.insert("collectible_amount".to_string(), json!(row.collectible_amount()));
        obj.insert(
            "is_overdue".to_string(),
            json!(row.status == ScheduleStatus::Overdue || days_overdue > 0),
        );
        obj.insert("days_overdue".to_string(), json!(days_overdue));
        obj.insert(
            "days_until_due".to_string(),
            json!(days_until_due(row.due_date, today)),
        );
        obj.insert(
            "urgency".to_string(),
            json!(classify(row.due_date, today, row.status, cutoffs)),
        );
    }
    value
}

/// Installment with its derived amounts, overdue days and urgency bucket.
pub(crate) fn installment_view(row: &Installment, today: NaiveDate, cutoffs: UrgencyCutoffs) -> Value {
    enrich(
        serde_json::to_value(row).unwrap_or(Value::Null),
        row,
        today,
        cutoffs,
    )
}

fn context_view(
    item: &ScheduleWithContext,
    payments: Option<&Vec<PaymentRecord>>,
    today: NaiveDate,
    cutoffs: UrgencyCutoffs,
) -> Value {
    let mut value = enrich(
        serde_json::to_value(item).unwrap_or(Value::Null),
        &item.installment,
        today,
        cutoffs,
    );
    if let (Some(obj), Some(payments)) = (value.as_object_mut(), payments) {
        obj.insert("payments".to_string(), json!(payments));
    }
    value
}

async fn context_views(
    pool: &sqlx::PgPool,
    items: &[ScheduleWithContext],
    include_payments: bool,
    today: NaiveDate,
    cutoffs: UrgencyCutoffs,
) -> AppResult<Vec<Value>> {
    let mut by_schedule: HashMap<i64, Vec<PaymentRecord>> = HashMap::new();
    if include_payments {
        let ids = items.iter().map(|item| item.installment.id).collect::<Vec<_>>();
        for payment in payments_for_schedules(pool, &ids).await? {
            if let Some(schedule_id) = payment.payment_schedule_id {
                by_schedule.entry(schedule_id).or_default().push(payment);
            }
        }
    }
    let empty = Vec::new();
    Ok(items
        .iter()
        .map(|item| {
            let payments = include_payments
                .then(|| by_schedule.get(&item.installment.id).unwrap_or(&empty));
            context_view(item, payments, today, cutoffs)
        })
        .collect())
}

fn parse_statuses(raw: Option<&str>) -> AppResult<Vec<ScheduleStatus>> {
    split_csv(raw)
        .iter()
        .map(|value| ScheduleStatus::from_str(value).map_err(AppError::BadRequest))
        .collect()
}

/// Body that may be empty; an empty body reads as the default value.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> AppResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|error| AppError::UnprocessableEntity(format!("Invalid request body: {error}")))
}

async fn list(
    State(state): State<AppState>,
    Query(query): Query<SchedulesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let today = state.config.today();

    let filter = ScheduleFilter {
        venta_id: query.venta_id,
        lote_id: query.lote_id,
        customer_id: query.customer_id,
        statuses: parse_statuses(query.status.as_deref())?,
        due_from: query.due_from,
        due_to: query.due_to,
        active_sales_only: query.active_only,
        limit: clamp_limit_in_range(query.limit, 1, 5000),
        offset: query.offset.max(0),
    };
    let items = list_schedules(pool, &filter).await?;
    let count = count_schedules(pool, &filter).await?;
    let results = context_views(pool, &items, query.include_payments, today, query.cutoffs()).await?;
    Ok(Json(json!({ "count": count, "results": results })))
}

async fn create_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateScheduleInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let today = state.config.today();
    validate_money(payload.scheduled_amount)?;

    let mut tx = pool.begin().await?;
    let venta = lock_venta(&mut tx, payload.venta_id).await?;
    ensure_active(venta.status, "scheduled")?;
    let rows = lock_sale_schedule(&mut tx, venta.id).await?;
    let next_number = rows.iter().map(|row| row.installment_number).max().unwrap_or(0) + 1;
    let installment_number = payload.installment_number.unwrap_or(next_number);
    if installment_number < 1 {
        return Err(AppError::BadRequest(
            "Installment number must be positive.".to_string(),
        ));
    }
    if rows.iter().any(|row| row.installment_number == installment_number) {
        return Err(AppError::Conflict(format!(
            "Installment #{installment_number} already exists for this sale."
        )));
    }

    let schedule = insert_installments(
        &mut tx,
        venta.id,
        venta.lote_id,
        &[PlannedInstallment {
            installment_number,
            amount: payload.scheduled_amount,
            due_date: payload.due_date,
        }],
        today,
    )
    .await?;
    let mut created = schedule
        .into_iter()
        .find(|row| row.installment_number == installment_number)
        .ok_or_else(|| AppError::Internal("Created installment was not returned.".to_string()))?;
    let note = payload.notes.trim();
    if !note.is_empty() {
        created.notes = note.to_string();
        created = save_installment(&mut tx, &created).await?;
    }
    tx.commit().await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(user_id),
        "create",
        "payment_schedules",
        Some(created.id),
        None,
        serde_json::to_value(&created).ok(),
    )
    .await;
    state.invalidate_dashboard().await;
    Ok((
        StatusCode::CREATED,
        Json(installment_view(&created, today, UrgencyCutoffs::SCHEDULE_TABLE)),
    ))
}

async fn get_schedule(
    State(state): State<AppState>,
    Path(path): Path<SchedulePath>,
    Query(query): Query<UrgencyQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let item = get_schedule_with_context(pool, path.schedule_id).await?;
    let views = context_views(
        pool,
        std::slice::from_ref(&item),
        true,
        state.config.today(),
        query.cutoffs(),
    )
    .await?;
    Ok(Json(views.into_iter().next().unwrap_or(Value::Null)))
}

async fn schedules_for(
    state: &AppState,
    filter: ScheduleFilter,
    cutoffs: UrgencyCutoffs,
) -> AppResult<Json<Value>> {
    let pool = db_pool(state)?;
    let today = state.config.today();
    let items = list_schedules(pool, &filter).await?;
    let rows = items
        .iter()
        .map(|item| item.installment.clone())
        .collect::<Vec<_>>();
    let results = context_views(pool, &items, true, today, cutoffs).await?;
    Ok(Json(json!({
        "count": results.len(),
        "summary": PlanSummary::from_rows(&rows),
        "results": results,
    })))
}

async fn by_lote(
    State(state): State<AppState>,
    Query(lote): Query<LoteIdQuery>,
    Query(query): Query<UrgencyQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    get_row(db_pool(&state)?, "lotes", lote.lote_id).await?;
    let filter = ScheduleFilter {
        lote_id: Some(lote.lote_id),
        limit: 5000,
        ..ScheduleFilter::default()
    };
    schedules_for(&state, filter, query.cutoffs()).await
}

async fn by_venta(
    State(state): State<AppState>,
    Query(venta): Query<VentaIdQuery>,
    Query(query): Query<UrgencyQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    get_row(db_pool(&state)?, "ventas", venta.venta_id).await?;
    let filter = ScheduleFilter {
        venta_id: Some(venta.venta_id),
        limit: 5000,
        ..ScheduleFilter::default()
    };
    schedules_for(&state, filter, query.cutoffs()).await
}

async fn upcoming(
    State(state): State<AppState>,
    Query(query): Query<UpcomingQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let today = state.config.today();
    let days = query.days.clamp(0, 366) as u64;
    let filter = ScheduleFilter {
        statuses: vec![ScheduleStatus::Pending, ScheduleStatus::Partial],
        due_from: Some(today),
        due_to: today.checked_add_days(Days::new(days)),
        active_sales_only: true,
        limit: clamp_limit_in_range(query.limit, 1, 1000),
        ..ScheduleFilter::default()
    };
    schedules_for(&state, filter, query.cutoffs()).await
}

/// Past-due open rows of active sales, whether or not the sweep has
/// flipped them yet.
async fn overdue(
    State(state): State<AppState>,
    Query(query): Query<SchedulesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let today = state.config.today();
    let filter = ScheduleFilter {
        venta_id: query.venta_id,
        lote_id: query.lote_id,
        customer_id: query.customer_id,
        statuses: vec![
            ScheduleStatus::Pending,
            ScheduleStatus::Partial,
            ScheduleStatus::Overdue,
        ],
        due_to: today.pred_opt(),
        active_sales_only: true,
        limit: clamp_limit_in_range(query.limit, 1, 5000),
        offset: query.offset.max(0),
        ..ScheduleFilter::default()
    };
    schedules_for(&state, filter, query.cutoffs()).await
}

fn text_field(fields: &HashMap<String, String>, key: &str) -> Option<String> {
    fields
        .get(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn date_field(fields: &HashMap<String, String>, key: &str) -> AppResult<Option<NaiveDate>> {
    text_field(fields, key)
        .map(|raw| {
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                .map_err(|_| AppError::BadRequest(format!("{key} must be a YYYY-MM-DD date.")))
        })
        .transpose()
}

/// Payment input from multipart text fields.
fn payment_from_fields(fields: &HashMap<String, String>) -> AppResult<RegisterPaymentInput> {
    let amount = text_field(fields, "amount")
        .ok_or_else(|| AppError::BadRequest("amount is required.".to_string()))?;
    let amount = Decimal::from_str(&amount)
        .map_err(|_| AppError::BadRequest("amount must be a decimal number.".to_string()))?;
    Ok(RegisterPaymentInput {
        amount,
        method: text_field(fields, "method"),
        receipt_number: text_field(fields, "receipt_number").unwrap_or_default(),
        receipt_date: date_field(fields, "receipt_date")?,
        payment_date: date_field(fields, "payment_date")?,
        notes: text_field(fields, "notes").unwrap_or_default(),
    })
}

async fn read_multipart(
    mut multipart: Multipart,
) -> AppResult<(RegisterPaymentInput, Option<ReceiptUpload>)> {
    let mut fields = HashMap::new();
    let mut receipt = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| AppError::BadRequest(format!("Invalid multipart body: {error}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "receipt_image" {
            let file_name = field.file_name().unwrap_or("receipt").to_string();
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|error| AppError::BadRequest(format!("Could not read the receipt: {error}")))?;
            if !bytes.is_empty() {
                receipt = Some(ReceiptUpload {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
        } else {
            let value = field
                .text()
                .await
                .map_err(|error| AppError::BadRequest(format!("Invalid field {name}: {error}")))?;
            fields.insert(name, value);
        }
    }
    Ok((payment_from_fields(&fields)?, receipt))
}

async fn register_payment(
    State(state): State<AppState>,
    Path(path): Path<SchedulePath>,
    headers: HeaderMap,
    request: Request,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let today = state.config.today();

    let is_multipart = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));
    let (payload, receipt) = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|error| AppError::BadRequest(error.body_text()))?;
        read_multipart(multipart).await?
    } else {
        let Json(payload) = Json::<RegisterPaymentInput>::from_request(request, &state)
            .await
            .map_err(|error| AppError::UnprocessableEntity(error.body_text()))?;
        (payload, None)
    };
    validate_input(&payload)?;
    let method = PaymentMethod::parse_or_default(payload.method.as_deref())?;
    let payment_date = payload.payment_date.unwrap_or(today);

    let receipt_path = match receipt.as_ref() {
        Some(upload) => {
            validate_receipt(upload, state.config.max_receipt_bytes)?;
            Some(store_receipt(&state.config.media_root, upload, payment_date).await?)
        }
        None => None,
    };

    let result = apply_schedule_payment(
        pool,
        path.schedule_id,
        &payload,
        method,
        payment_date,
        receipt_path.as_deref(),
        user_id,
        today,
    )
    .await;
    let (row, payment) = match result {
        Ok(value) => value,
        Err(error) => {
            if let Some(relative) = receipt_path.as_deref() {
                discard_receipt(&state.config.media_root, relative).await;
            }
            return Err(error);
        }
    };

    let payment_json = serde_json::to_value(&payment).unwrap_or(Value::Null);
    write_audit_log(
        state.db_pool.as_ref(),
        Some(user_id),
        "register_payment",
        "payment_schedules",
        Some(row.id),
        None,
        Some(payment_json.clone()),
    )
    .await;
    state.invalidate_dashboard().await;
    tracing::info!(
        schedule_id = row.id,
        venta_id = row.venta_id,
        amount = %payment.amount,
        status = %row.status,
        "Installment payment registered"
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "schedule": installment_view(&row, today, UrgencyCutoffs::SCHEDULE_TABLE),
            "payment": payment_json,
        })),
    ))
}

#[allow(clippy::too_many_arguments)]
async fn apply_schedule_payment(
    pool: &sqlx::PgPool,
    schedule_id: i64,
    payload: &RegisterPaymentInput,
    method: PaymentMethod,
    payment_date: NaiveDate,
    receipt_image: Option<&str>,
    user_id: i64,
    today: NaiveDate,
) -> AppResult<(Installment, PaymentRecord)> {
    let venta_id = fetch_schedule(pool, schedule_id).await?.venta_id;

    let mut tx = pool.begin().await?;
    let venta = lock_venta(&mut tx, venta_id).await?;
    ensure_active(venta.status, "paid")?;
    let mut row = locked_row(lock_sale_schedule(&mut tx, venta_id).await?, schedule_id)?;
    apply_payment(&mut row, payload.amount, payment_date, today)?;
    let row = save_installment(&mut tx, &row).await?;
    let payment = insert_payment(
        &mut tx,
        &NewPayment {
            venta_id,
            payment_schedule_id: Some(row.id),
            lote_id: row.lote_id,
            payment_type: PaymentType::Installment.as_str(),
            amount: payload.amount,
            method: method.as_str(),
            receipt_number: payload.receipt_number.trim(),
            receipt_date: payload.receipt_date,
            receipt_image,
            payment_date,
            notes: payload.notes.trim(),
            recorded_by: Some(user_id),
        },
    )
    .await?;
    tx.commit().await?;
    Ok((row, payment))
}

fn locked_row(rows: Vec<Installment>, schedule_id: i64) -> AppResult<Installment> {
    rows.into_iter()
        .find(|row| row.id == schedule_id)
        .ok_or_else(|| AppError::NotFound("Payment schedule not found.".to_string()))
}

async fn forgive_installment(
    State(state): State<AppState>,
    Path(path): Path<SchedulePath>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let payload: ForgiveInstallmentInput = optional_body(&body)?;
    let venta_id = fetch_schedule(pool, path.schedule_id).await?.venta_id;

    let mut tx = pool.begin().await?;
    let venta = lock_venta(&mut tx, venta_id).await?;
    ensure_active(venta.status, "modified")?;
    let before = locked_row(lock_sale_schedule(&mut tx, venta_id).await?, path.schedule_id)?;
    let mut row = before.clone();
    forgive(&mut row, payload.notes.as_deref(), Utc::now())?;
    let row = save_installment(&mut tx, &row).await?;
    tx.commit().await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(user_id),
        "forgive_installment",
        "payment_schedules",
        Some(row.id),
        serde_json::to_value(&before).ok(),
        serde_json::to_value(&row).ok(),
    )
    .await;
    state.invalidate_dashboard().await;
    tracing::info!(schedule_id = row.id, venta_id, "Installment forgiven");
    Ok(Json(installment_view(
        &row,
        state.config.today(),
        UrgencyCutoffs::SCHEDULE_TABLE,
    )))
}

/// Apply a planned amount change to one sale under lock and report the
/// touched rows.
/// Sale total once `changes` apply; errors if it differs from the current one.
fn ensure_total_unchanged(rows: &[Installment], changes: &[AmountChange]) -> AppResult<Decimal> {
    let total_before = rows.iter().map(|row| row.scheduled_amount).sum::<Decimal>();
    let total_after = rows
        .iter()
        .map(|row| {
            changes
                .iter()
                .find(|change| change.schedule_id == row.id)
                .map_or(row.scheduled_amount, |change| change.new_amount)
        })
        .sum::<Decimal>();
    if total_after != total_before {
        return Err(AppError::Internal(format!(
            "Amount change would move the sale total from {total_before} to {total_after}."
        )));
    }
    Ok(total_after)
}

async fn modify_sale_amounts(
    state: &AppState,
    user_id: i64,
    venta_id: i64,
    schedule_ids: &[i64],
    new_amount: Decimal,
    notes: Option<&str>,
) -> AppResult<Value> {
    let pool = db_pool(state)?;
    let today = state.config.today();

    let mut tx = pool.begin().await?;
    let venta = lock_venta(&mut tx, venta_id).await?;
    ensure_active(venta.status, "modified")?;
    let rows = lock_sale_schedule(&mut tx, venta_id).await?;
    let changes = plan_amount_modification(&rows, schedule_ids, new_amount)?;
    let note = notes.map(str::trim).filter(|value| !value.is_empty());

    let mut updated = Vec::with_capacity(changes.len());
    for change in &changes {
        let Some(mut row) = rows.iter().find(|row| row.id == change.schedule_id).cloned() else {
            continue;
        };
        row.scheduled_amount = change.new_amount;
        if change.selected {
            if let Some(note) = note {
                row.notes = append_note(&row.notes, note);
            }
        }
        row.refresh_status(today);
        updated.push(save_installment(&mut tx, &row).await?);
    }
    let total_after = ensure_total_unchanged(&rows, &changes)?;
    tx.commit().await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(user_id),
        "modify_amount",
        "ventas",
        Some(venta_id),
        None,
        Some(json!({ "changes": changes, "notes": note })),
    )
    .await;
    state.invalidate_dashboard().await;
    tracing::info!(
        venta_id,
        selected = schedule_ids.len(),
        touched = updated.len(),
        "Installment amounts modified"
    );

    let cutoffs = UrgencyCutoffs::AMOUNT_MODIFICATION;
    Ok(json!({
        "venta_id": venta_id,
        "sale_total": total_after,
        "changes": changes,
        "updated": updated
            .iter()
            .map(|row| installment_view(row, today, cutoffs))
            .collect::<Vec<_>>(),
    }))
}

async fn modify_amount(
    State(state): State<AppState>,
    Path(path): Path<SchedulePath>,
    headers: HeaderMap,
    Json(payload): Json<ModifyAmountInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let venta_id = fetch_schedule(pool, path.schedule_id).await?.venta_id;
    let result = modify_sale_amounts(
        &state,
        user_id,
        venta_id,
        &[path.schedule_id],
        payload.new_amount,
        payload.notes.as_deref(),
    )
    .await?;
    Ok(Json(result))
}

/// The single sale every requested schedule id belongs to.
fn owning_sale(requested: &[i64], owners: &[(i64, i64)]) -> AppResult<i64> {
    let missing = requested
        .iter()
        .copied()
        .filter(|id| !owners.iter().any(|(found, _)| found == id))
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(AppError::NotFound(format!(
            "Payment schedules not found: {missing:?}."
        )));
    }
    let mut ventas = owners.iter().map(|(_, venta_id)| *venta_id).collect::<Vec<_>>();
    ventas.sort_unstable();
    ventas.dedup();
    match ventas.as_slice() {
        [venta_id] => Ok(*venta_id),
        [] => Err(AppError::BadRequest("No installments were selected.".to_string())),
        _ => Err(AppError::BadRequest(
            "All selected installments must belong to the same sale.".to_string(),
        )),
    }
}

async fn modify_multiple_amounts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ModifyMultipleAmountsInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut ids = payload.schedule_ids.clone();
    ids.sort_unstable();
    ids.dedup();
    let owners = sales_for_schedules(pool, &ids).await?;
    let venta_id = owning_sale(&ids, &owners)?;
    let result = modify_sale_amounts(
        &state,
        user_id,
        venta_id,
        &ids,
        payload.new_amount,
        payload.notes.as_deref(),
    )
    .await?;
    Ok(Json(result))
}

async fn generate_for_lote(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GenerateForLoteInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let today = state.config.today();

    get_row(pool, "lotes", payload.lote_id).await?;
    let venta_id = active_sale_id(pool, payload.lote_id).await?.ok_or_else(|| {
        AppError::BadRequest("The lot has no active sale to schedule.".to_string())
    })?;

    let mut tx = pool.begin().await?;
    let venta = lock_venta(&mut tx, venta_id).await?;
    ensure_active(venta.status, "scheduled")?;
    let existing = lock_sale_schedule(&mut tx, venta_id).await?;
    if !existing.is_empty() {
        if !payload.regenerate {
            return Err(AppError::Conflict(
                "The sale already has a payment schedule.".to_string(),
            ));
        }
        ensure_replannable(&existing)?;
    }
    let rows = rebuild_schedule(&mut tx, &venta, today).await?;
    tx.commit().await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(user_id),
        "generate_schedule",
        "ventas",
        Some(venta_id),
        Some(json!({ "installments": existing.len() })),
        Some(json!({ "installments": rows.len() })),
    )
    .await;
    state.invalidate_dashboard().await;

    let cutoffs = UrgencyCutoffs::SCHEDULE_TABLE;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "venta_id": venta_id,
            "lote_id": payload.lote_id,
            "count": rows.len(),
            "summary": PlanSummary::from_rows(&rows),
            "results": rows.iter().map(|row| installment_view(row, today, cutoffs)).collect::<Vec<_>>(),
        })),
    ))
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::services::installments::tests::{date, row};

    #[test]
    fn views_carry_derived_fields() {
        let mut item = row(5, 1, dec!(500.00), dec!(200.00));
        item.status = ScheduleStatus::Overdue;
        let view = installment_view(&item, date(2026, 1, 20), UrgencyCutoffs::SCHEDULE_TABLE);
        assert_eq!(view["id"], json!(5));
        assert_eq!(view["remaining_amount"], json!("300.00"));
        assert_eq!(view["days_overdue"], json!(5));
        assert_eq!(view["days_until_due"], json!(-5));
        assert_eq!(view["urgency"], json!("overdue"));
        assert_eq!(view["is_overdue"], json!(true));
    }

    #[test]
    fn bulk_ids_must_exist_and_share_a_sale() {
        assert_eq!(owning_sale(&[10, 11], &[(10, 4), (11, 4)]).unwrap(), 4);

        let missing = owning_sale(&[10, 12], &[(10, 4)]).unwrap_err();
        assert!(matches!(missing, AppError::NotFound(ref message) if message.contains("[12]")));

        let mixed = owning_sale(&[10, 20], &[(10, 4), (20, 5)]).unwrap_err();
        assert!(matches!(mixed, AppError::BadRequest(ref message) if message.contains("same sale")));

        assert!(matches!(owning_sale(&[], &[]), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn applied_changes_keep_the_sale_total() {
        let rows = (1..=4)
            .map(|number| row(number * 10, number as i32, dec!(1000.00), Decimal::ZERO))
            .collect::<Vec<_>>();
        let changes = plan_amount_modification(&rows, &[10, 20], dec!(700.00)).unwrap();
        assert_eq!(ensure_total_unchanged(&rows, &changes).unwrap(), dec!(4000.00));

        let skewed = vec![AmountChange {
            schedule_id: 30,
            installment_number: 3,
            previous_amount: dec!(1000.00),
            new_amount: dec!(900.00),
            selected: true,
        }];
        assert!(matches!(
            ensure_total_unchanged(&rows, &skewed),
            Err(AppError::Internal(_))
        ));
    }

    #[test]
    fn status_lists_parse() {
        assert_eq!(
            parse_statuses(Some("pending, overdue")).unwrap(),
            vec![ScheduleStatus::Pending, ScheduleStatus::Overdue]
        );
        assert!(parse_statuses(None).unwrap().is_empty());
        assert!(parse_statuses(Some("late")).is_err());
    }

    #[test]
    fn empty_bodies_use_defaults() {
        let input: ForgiveInstallmentInput = optional_body(&Bytes::from_static(b"  ")).unwrap();
        assert!(input.notes.is_none());
        let input: ForgiveInstallmentInput =
            optional_body(&Bytes::from_static(br#"{"notes": "acuerdo"}"#)).unwrap();
        assert_eq!(input.notes.as_deref(), Some("acuerdo"));
    }

    #[test]
    fn multipart_fields_build_payment_input() {
        let mut fields = HashMap::new();
        fields.insert("amount".to_string(), " 150.50 ".to_string());
        fields.insert("method".to_string(), "cash".to_string());
        fields.insert("payment_date".to_string(), "2026-03-02".to_string());
        let input = payment_from_fields(&fields).unwrap();
        assert_eq!(input.amount, dec!(150.50));
        assert_eq!(input.payment_date, Some(date(2026, 3, 2)));
        assert_eq!(input.receipt_number, "");

        fields.insert("receipt_date".to_string(), "02/03/2026".to_string());
        assert!(payment_from_fields(&fields).is_err());
        fields.remove("amount");
        assert!(payment_from_fields(&HashMap::new()).is_err());
    }
}
