use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde_json::{json, Map, Value};

use crate::{
    auth::{require_role, require_user_id, Role},
    error::{AppError, AppResult},
    repository::{
        reports::load_dataset,
        table_service::{count_rows, create_row, delete_row, get_row, list_rows, update_row, ListQuery},
    },
    routes::{db_pool, json_map, non_empty_opt, value_str},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, CreateReportInput,
        ReportPath, ReportPeriodQuery, ReportTypePath, ReportsQuery, UpdateReportInput,
    },
    services::{
        audit::write_audit_log,
        reports::{build_report, ReportPeriod, ReportStatus, ReportType},
    },
    state::AppState,
};

const RECENT_REPORTS: i64 = 5;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/reports/",
            axum::routing::get(list_reports).post(create_report),
        )
        .route("/reports/summary/", axum::routing::get(summary))
        .route("/reports/types/", axum::routing::get(report_types))
        .route(
            "/reports/live/{report_type}/",
            axum::routing::get(live_report),
        )
        .route(
            "/reports/{report_id}/",
            axum::routing::get(get_report)
                .patch(update_report)
                .put(update_report)
                .delete(delete_report),
        )
        .route(
            "/reports/{report_id}/generate/",
            axum::routing::post(generate_report),
        )
        .route(
            "/reports/{report_id}/download/",
            axum::routing::get(download_report),
        )
}

fn parse_report_type(raw: &str) -> AppResult<ReportType> {
    ReportType::parse(raw).ok_or_else(|| {
        let known = ReportType::ALL
            .iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        AppError::BadRequest(format!("Unknown report type '{raw}'. Use one of: {known}."))
    })
}

fn parse_report_status(raw: &str) -> AppResult<ReportStatus> {
    [
        ReportStatus::Pending,
        ReportStatus::Processing,
        ReportStatus::Completed,
        ReportStatus::Failed,
    ]
    .into_iter()
    .find(|status| status.as_str() == raw.trim().to_ascii_lowercase())
    .ok_or_else(|| AppError::BadRequest(format!("Unknown report status '{raw}'.")))
}

fn validate_period(start: Option<NaiveDate>, end: Option<NaiveDate>) -> AppResult<ReportPeriod> {
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(AppError::BadRequest(
                "start_date must be on or before end_date.".to_string(),
            ));
        }
    }
    Ok(ReportPeriod { start, end })
}

fn row_period(row: &Value) -> ReportPeriod {
    let date = |key: &str| {
        row.get(key)
            .and_then(Value::as_str)
            .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
    };
    ReportPeriod {
        start: date("start_date"),
        end: date("end_date"),
    }
}

/// Adds the type label and drops the stored payload from list entries.
fn list_entry(mut row: Value) -> Value {
    let label = ReportType::parse(&value_str(&row, "report_type")).map(ReportType::label);
    if let Some(obj) = row.as_object_mut() {
        obj.remove("data");
        obj.insert("report_type_label".to_string(), json!(label));
    }
    row
}

/// Download file name built from the report name.
fn download_file_name(name: &str, report_id: i64) -> String {
    let cleaned = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect::<String>();
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        format!("report_{report_id}.json")
    } else {
        format!("{cleaned}.json")
    }
}

async fn list_reports(
    State(state): State<AppState>,
    Query(query): Query<ReportsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(raw) = non_empty_opt(query.report_type.as_deref()) {
        filters.insert("report_type".to_string(), json!(parse_report_type(&raw)?.as_str()));
    }
    if let Some(raw) = non_empty_opt(query.status.as_deref()) {
        filters.insert("status".to_string(), json!(parse_report_status(&raw)?.as_str()));
    }
    let list = ListQuery {
        filters: Some(&filters),
        limit: clamp_limit_in_range(query.limit, 1, 1000),
        offset: query.offset.max(0),
        ..ListQuery::default()
    };
    let rows = list_rows(pool, "reports", list).await?;
    let count = count_rows(pool, "reports", list).await?;
    Ok(Json(json!({
        "count": count,
        "results": rows.into_iter().map(list_entry).collect::<Vec<_>>(),
    })))
}

async fn create_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateReportInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let report_type = parse_report_type(&payload.report_type)?;
    validate_period(payload.start_date, payload.end_date)?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert("name".to_string(), json!(payload.name.trim()));
    record.insert("report_type".to_string(), json!(report_type.as_str()));
    record.insert("status".to_string(), json!(ReportStatus::Pending.as_str()));
    record.insert("requested_by".to_string(), json!(user_id));

    let created = create_row(pool, "reports", &record).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(user_id),
        "create",
        "reports",
        created.get("id").and_then(Value::as_i64),
        None,
        Some(created.clone()),
    )
    .await;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_report(
    State(state): State<AppState>,
    Path(path): Path<ReportPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    Ok(Json(get_row(pool, "reports", path.report_id).await?))
}

async fn update_report(
    State(state): State<AppState>,
    Path(path): Path<ReportPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateReportInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let before = get_row(pool, "reports", path.report_id).await?;
    let patch = remove_nulls(serialize_to_map(&payload));
    if patch.is_empty() {
        return Ok(Json(before));
    }
    let current = row_period(&before);
    validate_period(
        payload.start_date.or(current.start),
        payload.end_date.or(current.end),
    )?;

    let updated = update_row(pool, "reports", path.report_id, &patch).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(user_id),
        "update",
        "reports",
        Some(path.report_id),
        Some(list_entry(before)),
        Some(list_entry(updated.clone())),
    )
    .await;
    Ok(Json(updated))
}

async fn delete_report(
    State(state): State<AppState>,
    Path(path): Path<ReportPath>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let admin = require_role(&state, &headers, &[Role::Admin]).await?;
    let pool = db_pool(&state)?;
    let deleted = delete_row(pool, "reports", path.report_id).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(admin.id),
        "delete",
        "reports",
        Some(path.report_id),
        Some(list_entry(deleted)),
        None,
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

async fn generate_report(
    State(state): State<AppState>,
    Path(path): Path<ReportPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let report = get_row(pool, "reports", path.report_id).await?;
    let raw_type = value_str(&report, "report_type");
    let report_type = parse_report_type(&raw_type)?;
    if value_str(&report, "status") == ReportStatus::Processing.as_str() {
        return Err(AppError::Conflict(
            "The report is already being generated.".to_string(),
        ));
    }
    update_row(
        pool,
        "reports",
        path.report_id,
        &json_map(&[
            ("status", json!(ReportStatus::Processing.as_str())),
            ("error_message", Value::Null),
        ]),
    )
    .await?;

    let started = std::time::Instant::now();
    let outcome = load_dataset(pool, report_type)
        .await
        .map(|dataset| build_report(report_type, &dataset, row_period(&report), state.config.today()));

    let patch = match &outcome {
        Ok(data) => json_map(&[
            ("status", json!(ReportStatus::Completed.as_str())),
            ("data", data.clone()),
            ("generated_at", json!(Utc::now())),
        ]),
        Err(error) => json_map(&[
            ("status", json!(ReportStatus::Failed.as_str())),
            ("error_message", json!(error.to_string())),
        ]),
    };
    let updated = update_row(pool, "reports", path.report_id, &patch).await?;

    match &outcome {
        Ok(_) => tracing::info!(
            report_id = path.report_id,
            report_type = report_type.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Report generated"
        ),
        Err(error) => tracing::warn!(
            report_id = path.report_id,
            report_type = report_type.as_str(),
            error = %error,
            "Report generation failed"
        ),
    }
    write_audit_log(
        state.db_pool.as_ref(),
        Some(user_id),
        "generate",
        "reports",
        Some(path.report_id),
        None,
        Some(list_entry(updated.clone())),
    )
    .await;
    Ok(Json(updated))
}

async fn download_report(
    State(state): State<AppState>,
    Path(path): Path<ReportPath>,
    headers: HeaderMap,
) -> AppResult<Response> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let report = get_row(pool, "reports", path.report_id).await?;
    if value_str(&report, "status") != ReportStatus::Completed.as_str() {
        return Err(AppError::BadRequest(
            "Only completed reports can be downloaded.".to_string(),
        ));
    }
    let data = report.get("data").cloned().unwrap_or(Value::Null);
    let body = serde_json::to_vec_pretty(&json!({
        "id": path.report_id,
        "name": value_str(&report, "name"),
        "report_type": value_str(&report, "report_type"),
        "generated_at": report.get("generated_at"),
        "data": data,
    }))
    .map_err(|error| AppError::Internal(format!("Could not serialize the report: {error}")))?;

    let file_name = download_file_name(&value_str(&report, "name"), path.report_id);
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
        .map_err(|error| AppError::Internal(format!("Invalid download header: {error}")))?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

async fn summary(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let by_status = sqlx::query_as::<_, (String, i64)>(
        "SELECT status, COUNT(*)::bigint FROM reports GROUP BY status",
    )
    .fetch_all(pool)
    .await?;
    let by_type = sqlx::query_as::<_, (String, i64)>(
        "SELECT report_type, COUNT(*)::bigint FROM reports GROUP BY report_type",
    )
    .fetch_all(pool)
    .await?;
    let recent = list_rows(
        pool,
        "reports",
        ListQuery {
            limit: RECENT_REPORTS,
            ..ListQuery::default()
        },
    )
    .await?;

    let total = by_status.iter().map(|(_, count)| count).sum::<i64>();
    let status_counts = by_status
        .into_iter()
        .map(|(status, count)| (status, json!(count)))
        .collect::<Map<String, Value>>();
    let type_counts = by_type
        .into_iter()
        .map(|(kind, count)| (kind, json!(count)))
        .collect::<Map<String, Value>>();
    Ok(Json(json!({
        "total": total,
        "by_status": status_counts,
        "by_type": type_counts,
        "recent": recent.into_iter().map(list_entry).collect::<Vec<_>>(),
    })))
}

async fn report_types(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let types = ReportType::ALL
        .iter()
        .map(|kind| json!({ "value": kind.as_str(), "label": kind.label() }))
        .collect::<Vec<_>>();
    Ok(Json(Value::Array(types)))
}

/// Compute a report on the fly without storing it.
async fn live_report(
    State(state): State<AppState>,
    Path(path): Path<ReportTypePath>,
    Query(query): Query<ReportPeriodQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let report_type = parse_report_type(&path.report_type)?;
    let period = validate_period(query.start_date, query.end_date)?;

    let dataset = load_dataset(pool, report_type).await?;
    Ok(Json(build_report(
        report_type,
        &dataset,
        period,
        state.config.today(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_types_accept_url_form() {
        assert_eq!(
            parse_report_type("customers-debt").unwrap(),
            ReportType::CustomersDebt
        );
        assert!(parse_report_type("inventory").is_err());
        assert_eq!(parse_report_status("Completed").unwrap(), ReportStatus::Completed);
        assert!(parse_report_status("queued").is_err());
    }

    #[test]
    fn periods_must_be_ordered() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1);
        let end = NaiveDate::from_ymd_opt(2026, 3, 31);
        assert!(validate_period(start, end).is_ok());
        assert!(validate_period(end, start).is_err());
        assert!(validate_period(None, start).is_ok());
    }

    #[test]
    fn stored_periods_are_read_back() {
        let row = json!({"start_date": "2026-01-01", "end_date": null});
        let period = row_period(&row);
        assert_eq!(period.start, NaiveDate::from_ymd_opt(2026, 1, 1));
        assert_eq!(period.end, None);
    }

    #[test]
    fn list_entries_hide_payload() {
        let row = json!({"id": 1, "report_type": "available_lots", "data": {"lots": []}});
        let entry = list_entry(row);
        assert!(entry.get("data").is_none());
        assert_eq!(entry["report_type_label"], json!(ReportType::AvailableLots.label()));
    }

    #[test]
    fn download_names_are_safe() {
        assert_eq!(download_file_name("Deudas marzo", 4), "Deudas_marzo.json");
        assert_eq!(download_file_name("\"../x\"", 4), "x.json");
        assert_eq!(download_file_name("   ", 9), "report_9.json");
    }
}
