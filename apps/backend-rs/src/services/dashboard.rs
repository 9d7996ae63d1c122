use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};

use crate::{
    error::AppResult,
    repository::schedules::{list_schedules, ScheduleFilter},
    services::installments::ScheduleStatus,
    state::AppState,
};

const RECENT_LIMIT: i64 = 5;

#[derive(Debug, Clone, Default, Serialize, sqlx::FromRow)]
pub struct DashboardCounts {
    pub total_customers: i64,
    pub total_lots: i64,
    pub available_lots: i64,
    pub sold_lots: i64,
    pub active_sales: i64,
    pub overdue_installments: i64,
    pub overdue_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RecentPayment {
    pub id: i64,
    pub venta_id: i64,
    pub amount: Decimal,
    pub method: String,
    pub payment_type: String,
    pub payment_date: NaiveDate,
    pub customer_name: String,
    pub lote_display: String,
}

async fn load_counts(pool: &sqlx::PgPool, today: NaiveDate) -> AppResult<DashboardCounts> {
    Ok(sqlx::query_as::<_, DashboardCounts>(
        "SELECT
            (SELECT COUNT(*) FROM customers)::bigint AS total_customers,
            (SELECT COUNT(*) FROM lotes)::bigint AS total_lots,
            (SELECT COUNT(*) FROM lotes WHERE status = 'disponible')::bigint AS available_lots,
            (SELECT COUNT(*) FROM lotes WHERE status = 'vendido')::bigint AS sold_lots,
            (SELECT COUNT(*) FROM ventas WHERE status = 'active')::bigint AS active_sales,
            (SELECT COUNT(*) FROM payment_schedules s JOIN ventas v ON v.id = s.venta_id
              WHERE v.status = 'active' AND s.is_forgiven = false
                AND s.paid_amount < s.scheduled_amount AND s.due_date < $1)::bigint
              AS overdue_installments,
            (SELECT COALESCE(SUM(s.scheduled_amount - s.paid_amount), 0)
               FROM payment_schedules s JOIN ventas v ON v.id = s.venta_id
              WHERE v.status = 'active' AND s.is_forgiven = false
                AND s.paid_amount < s.scheduled_amount AND s.due_date < $1)
              AS overdue_amount",
    )
    .bind(today)
    .fetch_one(pool)
    .await?)
}

async fn load_recent_payments(pool: &sqlx::PgPool) -> AppResult<Vec<RecentPayment>> {
    Ok(sqlx::query_as::<_, RecentPayment>(
        "SELECT p.id, p.venta_id, p.amount, p.method, p.payment_type, p.payment_date,
                (c.first_name || ' ' || c.last_name) AS customer_name,
                ('Mz. ' || l.block || ' - Lote ' || l.lot_number) AS lote_display
         FROM payments p
         JOIN ventas v ON v.id = p.venta_id
         JOIN customers c ON c.id = v.customer_id
         JOIN lotes l ON l.id = p.lote_id
         ORDER BY p.payment_date DESC, p.id DESC
         LIMIT $1",
    )
    .bind(RECENT_LIMIT)
    .fetch_all(pool)
    .await?)
}

/// Dashboard summary for `today`, served from the in-process cache when a
/// fresh copy exists.
pub async fn dashboard_summary(
    state: &AppState,
    pool: &sqlx::PgPool,
    today: NaiveDate,
) -> AppResult<Value> {
    let cache_key = today.to_string();
    if let Some(cached) = state.dashboard_cache.get(&cache_key).await {
        return Ok(cached);
    }

    let counts = load_counts(pool, today).await?;
    let recent_payments = load_recent_payments(pool).await?;
    let upcoming = list_schedules(
        pool,
        &ScheduleFilter {
            statuses: vec![ScheduleStatus::Pending, ScheduleStatus::Partial],
            due_from: Some(today),
            active_sales_only: true,
            limit: RECENT_LIMIT,
            ..ScheduleFilter::default()
        },
    )
    .await?;

    let upcoming = upcoming
        .into_iter()
        .map(|row| {
            json!({
                "id": row.installment.id,
                "venta_id": row.installment.venta_id,
                "installment_number": row.installment.installment_number,
                "due_date": row.installment.due_date,
                "days_until_due": (row.installment.due_date - today).num_days(),
                "remaining_amount": row.installment.remaining_amount(),
                "status": row.installment.status,
                "customer_name": row.customer_name,
                "lote_display": row.lote_display,
            })
        })
        .collect::<Vec<_>>();

    let summary = json!({
        "date": today,
        "counts": counts,
        "recent_payments": recent_payments,
        "upcoming_installments": upcoming,
    });
    state
        .dashboard_cache
        .insert(cache_key, summary.clone())
        .await;
    Ok(summary)
}
