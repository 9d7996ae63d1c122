use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{Executor, PgConnection, Postgres, QueryBuilder};

use crate::{
    error::{AppError, AppResult},
    services::sales::{SaleTerms, VentaStatus},
};

const VENTA_COLUMNS: &str = "v.id, v.lote_id, v.customer_id, v.status, v.sale_price, \
     v.initial_payment, v.financing_months, v.payment_day, v.sale_date, v.contract_date, \
     v.schedule_start_date, v.cancellation_date, v.cancellation_reason, v.completion_date, \
     v.notes, v.created_by, v.created_at, v.updated_at";

const PAYMENT_COLUMNS: &str = "p.id, p.venta_id, p.payment_schedule_id, p.lote_id, \
     p.payment_type, p.amount, p.method, p.receipt_number, p.receipt_date, p.receipt_image, \
     p.payment_date, p.notes, p.recorded_by, p.created_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct VentaRecord {
    pub id: i64,
    pub lote_id: i64,
    pub customer_id: i64,
    #[sqlx(try_from = "String")]
    pub status: VentaStatus,
    pub sale_price: Decimal,
    pub initial_payment: Decimal,
    pub financing_months: i32,
    pub payment_day: i32,
    pub sale_date: NaiveDate,
    pub contract_date: Option<NaiveDate>,
    pub schedule_start_date: Option<NaiveDate>,
    pub cancellation_date: Option<NaiveDate>,
    pub cancellation_reason: String,
    pub completion_date: Option<NaiveDate>,
    pub notes: String,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VentaRecord {
    pub fn terms(&self) -> SaleTerms {
        SaleTerms {
            sale_price: self.sale_price,
            initial_payment: self.initial_payment,
            financing_months: self.financing_months.max(0) as u32,
            payment_day: self.payment_day.max(0) as u32,
            sale_date: self.sale_date,
            contract_date: self.contract_date,
            schedule_start_date: self.schedule_start_date,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PaymentRecord {
    pub id: i64,
    pub venta_id: i64,
    pub payment_schedule_id: Option<i64>,
    pub lote_id: i64,
    pub payment_type: String,
    pub amount: Decimal,
    pub method: String,
    pub receipt_number: String,
    pub receipt_date: Option<NaiveDate>,
    pub receipt_image: Option<String>,
    pub payment_date: NaiveDate,
    pub notes: String,
    pub recorded_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment<'a> {
    pub venta_id: i64,
    pub payment_schedule_id: Option<i64>,
    pub lote_id: i64,
    pub payment_type: &'a str,
    pub amount: Decimal,
    pub method: &'a str,
    pub receipt_number: &'a str,
    pub receipt_date: Option<NaiveDate>,
    pub receipt_image: Option<&'a str>,
    pub payment_date: NaiveDate,
    pub notes: &'a str,
    pub recorded_by: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct VentaFilter {
    pub status: Option<VentaStatus>,
    pub lote_id: Option<i64>,
    pub customer_id: Option<i64>,
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub venta_id: Option<i64>,
    pub lote_id: Option<i64>,
    pub schedule_id: Option<i64>,
    pub method: Option<String>,
    pub payment_type: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub search: Option<String>,
}

pub async fn fetch_venta<'e, E>(executor: E, venta_id: i64) -> AppResult<VentaRecord>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, VentaRecord>(&format!(
        "SELECT {VENTA_COLUMNS} FROM ventas v WHERE v.id = $1"
    ))
    .bind(venta_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| AppError::NotFound("Sale not found.".to_string()))
}

pub async fn lock_venta(conn: &mut PgConnection, venta_id: i64) -> AppResult<VentaRecord> {
    sqlx::query_as::<_, VentaRecord>(&format!(
        "SELECT {VENTA_COLUMNS} FROM ventas v WHERE v.id = $1 FOR UPDATE"
    ))
    .bind(venta_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Sale not found.".to_string()))
}

fn push_venta_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &VentaFilter) {
    if let Some(status) = filter.status {
        query.push(" AND v.status = ").push_bind(status.as_str());
    }
    if let Some(lote_id) = filter.lote_id {
        query.push(" AND v.lote_id = ").push_bind(lote_id);
    }
    if let Some(customer_id) = filter.customer_id {
        query.push(" AND v.customer_id = ").push_bind(customer_id);
    }
    if let Some(term) = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let pattern = format!("%{term}%");
        query
            .push(" AND (c.first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR c.last_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR l.block ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR l.lot_number ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub async fn list_ventas(pool: &sqlx::PgPool, filter: &VentaFilter) -> AppResult<Vec<VentaRecord>> {
    let mut query = QueryBuilder::<Postgres>::new(format!(
        "SELECT {VENTA_COLUMNS} FROM ventas v \
         JOIN customers c ON c.id = v.customer_id \
         JOIN lotes l ON l.id = v.lote_id WHERE 1=1"
    ));
    push_venta_filter(&mut query, filter);
    query
        .push(" ORDER BY v.sale_date DESC, v.id DESC LIMIT ")
        .push_bind(filter.limit.clamp(1, 1000))
        .push(" OFFSET ")
        .push_bind(filter.offset.max(0));
    Ok(query
        .build_query_as::<VentaRecord>()
        .fetch_all(pool)
        .await?)
}

pub async fn count_ventas(pool: &sqlx::PgPool, filter: &VentaFilter) -> AppResult<i64> {
    let mut query = QueryBuilder::<Postgres>::new(
        "SELECT COUNT(*)::bigint FROM ventas v \
         JOIN customers c ON c.id = v.customer_id \
         JOIN lotes l ON l.id = v.lote_id WHERE 1=1",
    );
    push_venta_filter(&mut query, filter);
    Ok(query.build_query_scalar::<i64>().fetch_one(pool).await?)
}

pub async fn insert_venta(
    conn: &mut PgConnection,
    lote_id: i64,
    customer_id: i64,
    terms: &SaleTerms,
    notes: &str,
    created_by: i64,
) -> AppResult<VentaRecord> {
    Ok(sqlx::query_as::<_, VentaRecord>(&format!(
        "INSERT INTO ventas AS v (lote_id, customer_id, status, sale_price, initial_payment, \
         financing_months, payment_day, sale_date, contract_date, schedule_start_date, notes, \
         created_by) VALUES ($1, $2, 'active', $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         RETURNING {VENTA_COLUMNS}"
    ))
    .bind(lote_id)
    .bind(customer_id)
    .bind(terms.sale_price)
    .bind(terms.initial_payment)
    .bind(terms.financing_months as i32)
    .bind(terms.payment_day as i32)
    .bind(terms.sale_date)
    .bind(terms.contract_date)
    .bind(terms.schedule_start_date)
    .bind(notes)
    .bind(created_by)
    .fetch_one(&mut *conn)
    .await?)
}

pub async fn save_venta(conn: &mut PgConnection, venta: &VentaRecord) -> AppResult<VentaRecord> {
    Ok(sqlx::query_as::<_, VentaRecord>(&format!(
        "UPDATE ventas v SET status = $2, financing_months = $3, payment_day = $4, \
         contract_date = $5, schedule_start_date = $6, cancellation_date = $7, \
         cancellation_reason = $8, completion_date = $9, notes = $10, updated_at = now() \
         WHERE v.id = $1 RETURNING {VENTA_COLUMNS}"
    ))
    .bind(venta.id)
    .bind(venta.status.as_str())
    .bind(venta.financing_months)
    .bind(venta.payment_day)
    .bind(venta.contract_date)
    .bind(venta.schedule_start_date)
    .bind(venta.cancellation_date)
    .bind(&venta.cancellation_reason)
    .bind(venta.completion_date)
    .bind(&venta.notes)
    .fetch_one(&mut *conn)
    .await?)
}

pub async fn insert_payment(conn: &mut PgConnection, payment: &NewPayment<'_>) -> AppResult<PaymentRecord> {
    Ok(sqlx::query_as::<_, PaymentRecord>(&format!(
        "INSERT INTO payments AS p (venta_id, payment_schedule_id, lote_id, payment_type, amount, \
         method, receipt_number, receipt_date, receipt_image, payment_date, notes, recorded_by) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING {PAYMENT_COLUMNS}"
    ))
    .bind(payment.venta_id)
    .bind(payment.payment_schedule_id)
    .bind(payment.lote_id)
    .bind(payment.payment_type)
    .bind(payment.amount)
    .bind(payment.method)
    .bind(payment.receipt_number)
    .bind(payment.receipt_date)
    .bind(payment.receipt_image)
    .bind(payment.payment_date)
    .bind(payment.notes)
    .bind(payment.recorded_by)
    .fetch_one(&mut *conn)
    .await?)
}

pub async fn total_initial_payments<'e, E>(executor: E, venta_id: i64) -> AppResult<Decimal>
where
    E: Executor<'e, Database = Postgres>,
{
    Ok(sqlx::query_scalar::<_, Decimal>(
        "SELECT COALESCE(SUM(amount), 0) FROM payments \
         WHERE venta_id = $1 AND payment_type = 'initial'",
    )
    .bind(venta_id)
    .fetch_one(executor)
    .await?)
}

/// Display names and running balances of a set of sales.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SaleSummary {
    pub venta_id: i64,
    pub customer_name: String,
    pub lote_display: String,
    /// Collectible amount left on the schedule; forgiven rows count as zero.
    pub remaining_balance: Decimal,
    pub total_initial_payments: Decimal,
}

pub async fn sale_summaries(
    pool: &sqlx::PgPool,
    venta_ids: &[i64],
) -> AppResult<HashMap<i64, SaleSummary>> {
    if venta_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = sqlx::query_as::<_, SaleSummary>(
        "SELECT v.id AS venta_id, \
           (c.first_name || ' ' || c.last_name) AS customer_name, \
           ('Mz. ' || l.block || ' - Lote ' || l.lot_number) AS lote_display, \
           COALESCE((SELECT SUM(CASE WHEN s.is_forgiven THEN 0 \
               ELSE GREATEST(s.scheduled_amount - s.paid_amount, 0) END) \
             FROM payment_schedules s WHERE s.venta_id = v.id), 0) AS remaining_balance, \
           COALESCE((SELECT SUM(p.amount) FROM payments p \
             WHERE p.venta_id = v.id AND p.payment_type = 'initial'), 0) AS total_initial_payments \
         FROM ventas v \
         JOIN customers c ON c.id = v.customer_id \
         JOIN lotes l ON l.id = v.lote_id \
         WHERE v.id = ANY($1)",
    )
    .bind(venta_ids)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|row| (row.venta_id, row)).collect())
}

pub async fn fetch_payment(pool: &sqlx::PgPool, payment_id: i64) -> AppResult<PaymentRecord> {
    sqlx::query_as::<_, PaymentRecord>(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments p WHERE p.id = $1"
    ))
    .bind(payment_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Payment not found.".to_string()))
}

fn push_payment_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &PaymentFilter) {
    if let Some(venta_id) = filter.venta_id {
        query.push(" AND p.venta_id = ").push_bind(venta_id);
    }
    if let Some(lote_id) = filter.lote_id {
        query.push(" AND p.lote_id = ").push_bind(lote_id);
    }
    if let Some(schedule_id) = filter.schedule_id {
        query.push(" AND p.payment_schedule_id = ").push_bind(schedule_id);
    }
    if let Some(method) = filter.method.as_deref() {
        query.push(" AND p.method = ").push_bind(method.to_string());
    }
    if let Some(payment_type) = filter.payment_type.as_deref() {
        query.push(" AND p.payment_type = ").push_bind(payment_type.to_string());
    }
    if let Some(date_from) = filter.date_from {
        query.push(" AND p.payment_date >= ").push_bind(date_from);
    }
    if let Some(date_to) = filter.date_to {
        query.push(" AND p.payment_date <= ").push_bind(date_to);
    }
    if let Some(term) = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let pattern = format!("%{term}%");
        query
            .push(" AND (p.receipt_number ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR p.notes ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR EXISTS (SELECT 1 FROM ventas sv JOIN customers sc ON sc.id = sv.customer_id \
                   WHERE sv.id = p.venta_id AND (sc.first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR sc.last_name ILIKE ")
            .push_bind(pattern)
            .push(")))");
    }
}

pub async fn list_payments(
    pool: &sqlx::PgPool,
    filter: &PaymentFilter,
    limit: i64,
    offset: i64,
) -> AppResult<Vec<PaymentRecord>> {
    let mut query = QueryBuilder::<Postgres>::new(format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments p WHERE 1=1"
    ));
    push_payment_filter(&mut query, filter);
    query
        .push(" ORDER BY p.payment_date DESC, p.id DESC LIMIT ")
        .push_bind(limit.clamp(1, 5000))
        .push(" OFFSET ")
        .push_bind(offset.max(0));
    Ok(query
        .build_query_as::<PaymentRecord>()
        .fetch_all(pool)
        .await?)
}

/// Row count and summed amount over the whole filtered set.
pub async fn payment_totals(pool: &sqlx::PgPool, filter: &PaymentFilter) -> AppResult<(i64, Decimal)> {
    let mut query = QueryBuilder::<Postgres>::new(
        "SELECT COUNT(*)::bigint, COALESCE(SUM(p.amount), 0) FROM payments p WHERE 1=1",
    );
    push_payment_filter(&mut query, filter);
    Ok(query
        .build_query_as::<(i64, Decimal)>()
        .fetch_one(pool)
        .await?)
}

pub async fn payments_for_schedules(
    pool: &sqlx::PgPool,
    schedule_ids: &[i64],
) -> AppResult<Vec<PaymentRecord>> {
    if schedule_ids.is_empty() {
        return Ok(Vec::new());
    }
    Ok(sqlx::query_as::<_, PaymentRecord>(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments p WHERE p.payment_schedule_id = ANY($1) \
         ORDER BY p.payment_date ASC, p.id ASC"
    ))
    .bind(schedule_ids)
    .fetch_all(pool)
    .await?)
}

#[cfg(test)]
mod tests {
    use sqlx::{Postgres, QueryBuilder};

    use super::*;

    #[test]
    fn payment_search_covers_receipt_notes_and_customer() {
        let filter = PaymentFilter {
            method: Some("efectivo".to_string()),
            search: Some("Quispe".to_string()),
            ..PaymentFilter::default()
        };
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 FROM payments p WHERE 1=1");
        push_payment_filter(&mut query, &filter);
        let sql = query.sql();
        assert!(sql.contains("p.method = $1"));
        assert!(sql.contains("p.receipt_number ILIKE $2"));
        assert!(sql.contains("sc.last_name ILIKE $5"));
    }

    #[test]
    fn venta_filter_is_empty_by_default() {
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 WHERE 1=1");
        push_venta_filter(&mut query, &VentaFilter::default());
        assert_eq!(query.sql(), "SELECT 1 WHERE 1=1");
    }
}
