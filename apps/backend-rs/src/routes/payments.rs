use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    repository::sales::{
        fetch_payment, list_payments, payment_totals, sale_summaries, PaymentFilter,
        PaymentRecord,
    },
    routes::{db_pool, non_empty_opt},
    schemas::{PaymentPath, PaymentsQuery},
    services::sales::{PaymentMethod, PaymentType},
    state::AppState,
};

const MAX_PAGE_SIZE: i64 = 5000;
/// Keeps `(page - 1) * page_size` inside `i64`.
const MAX_PAGE: i64 = i64::MAX / MAX_PAGE_SIZE;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/payments/payments/", axum::routing::get(list_payments_page))
        .route(
            "/payments/payments/{payment_id}/",
            axum::routing::get(get_payment),
        )
}

/// Clamped `(page, page_size, offset)` for a requested page.
fn page_window(page: i64, page_size: i64) -> (i64, i64, i64) {
    let page = page.clamp(1, MAX_PAGE);
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
    (page, page_size, (page - 1) * page_size)
}

fn page_info(page: i64, page_size: i64, count: i64, total: Decimal) -> Value {
    let pages = if count == 0 {
        1
    } else {
        (count + page_size - 1) / page_size
    };
    json!({
        "page": page,
        "count": count,
        "pages": pages,
        "next": (page < pages).then_some(page + 1),
        "prev": (page > 1).then(|| (page - 1).min(pages)),
        "total_recaudado": total,
    })
}

fn parse_payment_type(raw: Option<&str>) -> AppResult<Option<String>> {
    match non_empty_opt(raw).as_deref() {
        None => Ok(None),
        Some("initial") => Ok(Some(PaymentType::Initial.as_str().to_string())),
        Some("installment") => Ok(Some(PaymentType::Installment.as_str().to_string())),
        Some(other) => Err(AppError::BadRequest(format!(
            "Unknown payment type '{other}'. Use initial or installment."
        ))),
    }
}

async fn payment_views(pool: &sqlx::PgPool, payments: &[PaymentRecord]) -> AppResult<Vec<Value>> {
    let mut venta_ids = payments.iter().map(|payment| payment.venta_id).collect::<Vec<_>>();
    venta_ids.sort_unstable();
    venta_ids.dedup();
    let summaries = sale_summaries(pool, &venta_ids).await?;

    Ok(payments
        .iter()
        .map(|payment| {
            let mut item = serde_json::to_value(payment).unwrap_or(Value::Null);
            let summary = summaries.get(&payment.venta_id);
            if let Some(obj) = item.as_object_mut() {
                obj.insert(
                    "customer_name".to_string(),
                    json!(summary.map(|s| s.customer_name.as_str())),
                );
                obj.insert(
                    "lote_display".to_string(),
                    json!(summary.map(|s| s.lote_display.as_str())),
                );
            }
            item
        })
        .collect())
}

async fn list_payments_page(
    State(state): State<AppState>,
    Query(query): Query<PaymentsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let method = match non_empty_opt(query.method.as_deref()) {
        Some(raw) => Some(
            PaymentMethod::parse(&raw)
                .ok_or_else(|| AppError::BadRequest(format!("Unknown payment method '{raw}'.")))?
                .as_str()
                .to_string(),
        ),
        None => None,
    };
    let filter = PaymentFilter {
        venta_id: query.venta_id,
        lote_id: query.lote_id,
        schedule_id: None,
        method,
        payment_type: parse_payment_type(query.payment_type.as_deref())?,
        date_from: query.date_from,
        date_to: query.date_to,
        search: non_empty_opt(query.search.as_deref()),
    };

    let (page, page_size, offset) = page_window(query.page, query.page_size);
    let (count, total) = payment_totals(pool, &filter).await?;
    let payments = list_payments(pool, &filter, page_size, offset).await?;
    Ok(Json(json!({
        "info": page_info(page, page_size, count, total),
        "results": payment_views(pool, &payments).await?,
    })))
}

async fn get_payment(
    State(state): State<AppState>,
    Path(path): Path<PaymentPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let payment = fetch_payment(pool, path.payment_id).await?;
    let views = payment_views(pool, std::slice::from_ref(&payment)).await?;
    Ok(Json(views.into_iter().next().unwrap_or(Value::Null)))
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn page_info_links_neighbours() {
        let info = page_info(2, 50, 120, dec!(3500.00));
        assert_eq!(info["pages"], json!(3));
        assert_eq!(info["next"], json!(3));
        assert_eq!(info["prev"], json!(1));
        assert_eq!(info["total_recaudado"], json!("3500.00"));

        let last = page_info(3, 50, 120, Decimal::ZERO);
        assert_eq!(last["next"], Value::Null);

        let empty = page_info(1, 50, 0, Decimal::ZERO);
        assert_eq!(empty["pages"], json!(1));
        assert_eq!(empty["prev"], Value::Null);
    }

    #[test]
    fn huge_pages_do_not_overflow_the_offset() {
        let (page, page_size, offset) = page_window(i64::MAX, MAX_PAGE_SIZE);
        assert_eq!(page, MAX_PAGE);
        assert_eq!(page_size, MAX_PAGE_SIZE);
        assert_eq!(offset, (MAX_PAGE - 1) * MAX_PAGE_SIZE);

        assert_eq!(page_window(-3, 0), (1, 1, 0));
        assert_eq!(page_window(3, 50_000), (3, MAX_PAGE_SIZE, 2 * MAX_PAGE_SIZE));
        assert_eq!(page_window(4, 25), (4, 25, 75));
    }

    #[test]
    fn payment_type_filter_is_checked() {
        assert_eq!(parse_payment_type(None).unwrap(), None);
        assert_eq!(
            parse_payment_type(Some("initial")).unwrap().as_deref(),
            Some("initial")
        );
        assert!(parse_payment_type(Some("refund")).is_err());
    }
}
