use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{Executor, PgConnection, Postgres, QueryBuilder};

use crate::{
    error::{AppError, AppResult},
    services::installments::{Installment, PlannedInstallment, ScheduleStatus},
};

const INSTALLMENT_COLUMNS: &str = "s.id, s.venta_id, s.lote_id, s.installment_number, \
     s.original_amount, s.scheduled_amount, s.paid_amount, s.due_date, s.payment_date, \
     s.status, s.is_forgiven, s.forgiven_at, s.notes, s.created_at, s.updated_at";

/// Installment joined with the names the schedule screens display.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ScheduleWithContext {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub installment: Installment,
    pub customer_id: i64,
    pub customer_name: String,
    pub lote_display: String,
    pub venta_status: String,
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleFilter {
    pub venta_id: Option<i64>,
    pub lote_id: Option<i64>,
    pub customer_id: Option<i64>,
    pub statuses: Vec<ScheduleStatus>,
    pub due_from: Option<NaiveDate>,
    pub due_to: Option<NaiveDate>,
    pub active_sales_only: bool,
    pub limit: i64,
    pub offset: i64,
}

fn push_context_select(query: &mut QueryBuilder<'_, Postgres>) {
    query.push("SELECT ");
    query.push(INSTALLMENT_COLUMNS);
    query.push(
        ", v.customer_id, (c.first_name || ' ' || c.last_name) AS customer_name, \
         ('Mz. ' || l.block || ' - Lote ' || l.lot_number) AS lote_display, \
         v.status AS venta_status \
         FROM payment_schedules s \
         JOIN ventas v ON v.id = s.venta_id \
         JOIN customers c ON c.id = v.customer_id \
         JOIN lotes l ON l.id = s.lote_id \
         WHERE 1=1",
    );
}

fn push_schedule_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &ScheduleFilter) {
    if let Some(venta_id) = filter.venta_id {
        query.push(" AND s.venta_id = ").push_bind(venta_id);
    }
    if let Some(lote_id) = filter.lote_id {
        query.push(" AND s.lote_id = ").push_bind(lote_id);
    }
    if let Some(customer_id) = filter.customer_id {
        query.push(" AND v.customer_id = ").push_bind(customer_id);
    }
    if !filter.statuses.is_empty() {
        let statuses = filter
            .statuses
            .iter()
            .map(|status| status.as_str().to_string())
            .collect::<Vec<_>>();
        query.push(" AND s.status = ANY(").push_bind(statuses).push(")");
    }
    if let Some(due_from) = filter.due_from {
        query.push(" AND s.due_date >= ").push_bind(due_from);
    }
    if let Some(due_to) = filter.due_to {
        query.push(" AND s.due_date <= ").push_bind(due_to);
    }
    if filter.active_sales_only {
        query.push(" AND v.status = 'active'");
    }
}

pub async fn list_schedules(
    pool: &sqlx::PgPool,
    filter: &ScheduleFilter,
) -> AppResult<Vec<ScheduleWithContext>> {
    let mut query = QueryBuilder::<Postgres>::new("");
    push_context_select(&mut query);
    push_schedule_filter(&mut query, filter);
    query
        .push(" ORDER BY s.due_date ASC, s.venta_id ASC, s.installment_number ASC LIMIT ")
        .push_bind(filter.limit.clamp(1, 5000))
        .push(" OFFSET ")
        .push_bind(filter.offset.max(0));

    Ok(query
        .build_query_as::<ScheduleWithContext>()
        .fetch_all(pool)
        .await?)
}

pub async fn count_schedules(pool: &sqlx::PgPool, filter: &ScheduleFilter) -> AppResult<i64> {
    let mut query = QueryBuilder::<Postgres>::new(
        "SELECT COUNT(*)::bigint FROM payment_schedules s \
         JOIN ventas v ON v.id = s.venta_id WHERE 1=1",
    );
    push_schedule_filter(&mut query, filter);
    Ok(query.build_query_scalar::<i64>().fetch_one(pool).await?)
}

pub async fn get_schedule_with_context(
    pool: &sqlx::PgPool,
    schedule_id: i64,
) -> AppResult<ScheduleWithContext> {
    let mut query = QueryBuilder::<Postgres>::new("");
    push_context_select(&mut query);
    query.push(" AND s.id = ").push_bind(schedule_id);
    query
        .build_query_as::<ScheduleWithContext>()
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Payment schedule not found.".to_string()))
}

pub async fn fetch_schedule<'e, E>(executor: E, schedule_id: i64) -> AppResult<Installment>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, Installment>(&format!(
        "SELECT {INSTALLMENT_COLUMNS} FROM payment_schedules s WHERE s.id = $1"
    ))
    .bind(schedule_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| AppError::NotFound("Payment schedule not found.".to_string()))
}

pub async fn fetch_sale_schedule<'e, E>(executor: E, venta_id: i64) -> AppResult<Vec<Installment>>
where
    E: Executor<'e, Database = Postgres>,
{
    Ok(sqlx::query_as::<_, Installment>(&format!(
        "SELECT {INSTALLMENT_COLUMNS} FROM payment_schedules s \
         WHERE s.venta_id = $1 ORDER BY s.installment_number"
    ))
    .bind(venta_id)
    .fetch_all(executor)
    .await?)
}

/// Lock every installment of a sale for the rest of the transaction.
/// Concurrent schedule mutations on the same sale serialize here.
pub async fn lock_sale_schedule(
    conn: &mut PgConnection,
    venta_id: i64,
) -> AppResult<Vec<Installment>> {
    Ok(sqlx::query_as::<_, Installment>(&format!(
        "SELECT {INSTALLMENT_COLUMNS} FROM payment_schedules s \
         WHERE s.venta_id = $1 ORDER BY s.installment_number FOR UPDATE"
    ))
    .bind(venta_id)
    .fetch_all(&mut *conn)
    .await?)
}

/// `(schedule_id, venta_id)` pairs for the ids that exist.
pub async fn sales_for_schedules(
    pool: &sqlx::PgPool,
    schedule_ids: &[i64],
) -> AppResult<Vec<(i64, i64)>> {
    Ok(sqlx::query_as::<_, (i64, i64)>(
        "SELECT id, venta_id FROM payment_schedules WHERE id = ANY($1)",
    )
    .bind(schedule_ids)
    .fetch_all(pool)
    .await?)
}

pub async fn save_installment(conn: &mut PgConnection, row: &Installment) -> AppResult<Installment> {
    Ok(sqlx::query_as::<_, Installment>(&format!(
        "UPDATE payment_schedules s SET scheduled_amount = $2, paid_amount = $3, \
         payment_date = $4, status = $5, is_forgiven = $6, forgiven_at = $7, notes = $8, \
         updated_at = now() WHERE s.id = $1 RETURNING {INSTALLMENT_COLUMNS}"
    ))
    .bind(row.id)
    .bind(row.scheduled_amount)
    .bind(row.paid_amount)
    .bind(row.payment_date)
    .bind(row.status.as_str())
    .bind(row.is_forgiven)
    .bind(row.forgiven_at)
    .bind(&row.notes)
    .fetch_one(&mut *conn)
    .await?)
}

pub async fn insert_installments(
    conn: &mut PgConnection,
    venta_id: i64,
    lote_id: i64,
    planned: &[PlannedInstallment],
    today: NaiveDate,
) -> AppResult<Vec<Installment>> {
    if planned.is_empty() {
        return Ok(Vec::new());
    }

    let mut query = QueryBuilder::<Postgres>::new(
        "INSERT INTO payment_schedules (venta_id, lote_id, installment_number, \
         original_amount, scheduled_amount, due_date, status) ",
    );
    query.push_values(planned, |mut row, item| {
        let status = if item.due_date < today {
            ScheduleStatus::Overdue
        } else {
            ScheduleStatus::Pending
        };
        row.push_bind(venta_id)
            .push_bind(lote_id)
            .push_bind(item.installment_number)
            .push_bind(item.amount)
            .push_bind(item.amount)
            .push_bind(item.due_date)
            .push_bind(status.as_str());
    });
    query.build().execute(&mut *conn).await?;

    fetch_sale_schedule(&mut *conn, venta_id).await
}

pub async fn delete_sale_schedule(conn: &mut PgConnection, venta_id: i64) -> AppResult<u64> {
    Ok(sqlx::query("DELETE FROM payment_schedules WHERE venta_id = $1")
        .bind(venta_id)
        .execute(&mut *conn)
        .await?
        .rows_affected())
}

/// Flip every open installment of an active sale whose due date has passed.
pub async fn sweep_overdue(pool: &sqlx::PgPool, today: NaiveDate) -> AppResult<u64> {
    Ok(sqlx::query(
        "UPDATE payment_schedules s SET status = 'overdue', updated_at = now() \
         FROM ventas v \
         WHERE v.id = s.venta_id AND v.status = 'active' \
           AND s.status IN ('pending', 'partial') \
           AND s.is_forgiven = FALSE \
           AND s.paid_amount < s.scheduled_amount \
           AND s.due_date < $1",
    )
    .bind(today)
    .execute(pool)
    .await?
    .rows_affected())
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PlanRecord {
    pub id: i64,
    pub venta_id: i64,
    pub financed_amount: Decimal,
    pub financing_months: i32,
    pub payment_day: i32,
    pub start_date: NaiveDate,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

pub async fn upsert_plan(
    conn: &mut PgConnection,
    venta_id: i64,
    financed_amount: Decimal,
    financing_months: i32,
    payment_day: i32,
    start_date: NaiveDate,
) -> AppResult<PlanRecord> {
    Ok(sqlx::query_as::<_, PlanRecord>(
        "INSERT INTO payment_plans (venta_id, financed_amount, financing_months, payment_day, start_date)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (venta_id) DO UPDATE SET financed_amount = EXCLUDED.financed_amount,
             financing_months = EXCLUDED.financing_months, payment_day = EXCLUDED.payment_day,
             start_date = EXCLUDED.start_date, updated_at = now()
         RETURNING id, venta_id, financed_amount, financing_months, payment_day, start_date,
             created_at, updated_at",
    )
    .bind(venta_id)
    .bind(financed_amount)
    .bind(financing_months)
    .bind(payment_day)
    .bind(start_date)
    .fetch_one(&mut *conn)
    .await?)
}

pub async fn fetch_plan(pool: &sqlx::PgPool, venta_id: i64) -> AppResult<Option<PlanRecord>> {
    Ok(sqlx::query_as::<_, PlanRecord>(
        "SELECT id, venta_id, financed_amount, financing_months, payment_day, start_date,
             created_at, updated_at
         FROM payment_plans WHERE venta_id = $1",
    )
    .bind(venta_id)
    .fetch_optional(pool)
    .await?)
}

#[cfg(test)]
mod tests {
    use sqlx::{Postgres, QueryBuilder};

    use super::*;

    #[test]
    fn schedule_filter_binds_each_condition() {
        let filter = ScheduleFilter {
            venta_id: Some(3),
            statuses: vec![ScheduleStatus::Pending, ScheduleStatus::Overdue],
            active_sales_only: true,
            ..ScheduleFilter::default()
        };
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 WHERE 1=1");
        push_schedule_filter(&mut query, &filter);
        assert_eq!(
            query.sql(),
            "SELECT 1 WHERE 1=1 AND s.venta_id = $1 AND s.status = ANY($2) AND v.status = 'active'"
        );
    }

    #[test]
    fn context_select_joins_sale_customer_and_lot() {
        let mut query = QueryBuilder::<Postgres>::new("");
        push_context_select(&mut query);
        let sql = query.sql();
        assert!(sql.contains("JOIN ventas v ON v.id = s.venta_id"));
        assert!(sql.contains("JOIN customers c ON c.id = v.customer_id"));
        assert!(sql.contains("AS lote_display"));
    }
}
