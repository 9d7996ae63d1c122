use serde_json::Value;
use sqlx::{Executor, PgConnection, Postgres, QueryBuilder, Row};

use crate::{
    error::{AppError, AppResult},
    repository::table_service::normalize_row,
    services::lotes::LoteChange,
};

/// Lot row plus the owner's name, the display label and the price per m².
const LOTE_JSON: &str = "SELECT to_jsonb(l) || jsonb_build_object(\
     'display', 'Mz. ' || l.block || ' - Lote ' || l.lot_number, \
     'price_per_m2', ROUND(l.price / NULLIF(l.area, 0), 2)::text, \
     'owner_name', CASE WHEN c.id IS NULL THEN NULL ELSE c.first_name || ' ' || c.last_name END, \
     'active_venta_id', (SELECT v.id FROM ventas v WHERE v.lote_id = l.id AND v.status = 'active' LIMIT 1)\
     ) AS row FROM lotes l LEFT JOIN customers c ON c.id = l.owner_id WHERE 1=1";

#[derive(Debug, Clone, Default)]
pub struct LoteFilter {
    pub status: Option<String>,
    pub block: Option<String>,
    pub owner_id: Option<i64>,
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone)]
pub struct LoteHistoryEntry<'a> {
    pub action: &'a str,
    pub details: String,
    pub field_name: Option<&'a str>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl<'a> LoteHistoryEntry<'a> {
    pub fn note(action: &'a str, details: impl Into<String>) -> Self {
        Self {
            action,
            details: details.into(),
            field_name: None,
            old_value: None,
            new_value: None,
        }
    }
}

impl From<&LoteChange> for LoteHistoryEntry<'static> {
    fn from(change: &LoteChange) -> Self {
        Self {
            action: change.action,
            details: change.details(),
            field_name: Some(change.field_name),
            old_value: change.old_value.clone(),
            new_value: change.new_value.clone(),
        }
    }
}

fn push_lote_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &LoteFilter) {
    if let Some(status) = filter.status.as_deref() {
        query.push(" AND l.status = ").push_bind(status.to_string());
    }
    if let Some(block) = filter.block.as_deref() {
        query.push(" AND l.block = ").push_bind(block.to_string());
    }
    if let Some(owner_id) = filter.owner_id {
        query.push(" AND l.owner_id = ").push_bind(owner_id);
    }
    if let Some(term) = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let pattern = format!("%{term}%");
        query
            .push(" AND (l.block ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR l.lot_number ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR c.first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR c.last_name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn read_json_rows(rows: Vec<sqlx::postgres::PgRow>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .map(normalize_row)
        .collect()
}

pub async fn list_lotes(pool: &sqlx::PgPool, filter: &LoteFilter) -> AppResult<Vec<Value>> {
    let mut query = QueryBuilder::<Postgres>::new(LOTE_JSON);
    push_lote_filter(&mut query, filter);
    query
        .push(" ORDER BY l.block ASC, l.lot_number ASC, l.id ASC LIMIT ")
        .push_bind(filter.limit.clamp(1, 1000))
        .push(" OFFSET ")
        .push_bind(filter.offset.max(0));
    let rows = query.build().fetch_all(pool).await?;
    Ok(read_json_rows(rows))
}

pub async fn count_lotes(pool: &sqlx::PgPool, filter: &LoteFilter) -> AppResult<i64> {
    let mut query = QueryBuilder::<Postgres>::new(
        "SELECT COUNT(*)::bigint FROM lotes l LEFT JOIN customers c ON c.id = l.owner_id WHERE 1=1",
    );
    push_lote_filter(&mut query, filter);
    Ok(query.build_query_scalar::<i64>().fetch_one(pool).await?)
}

pub async fn fetch_lote<'e, E>(executor: E, lote_id: i64) -> AppResult<Value>
where
    E: Executor<'e, Database = Postgres>,
{
    let mut query = QueryBuilder::<Postgres>::new(LOTE_JSON);
    query.push(" AND l.id = ").push_bind(lote_id);
    let row = query.build().fetch_optional(executor).await?;
    row.and_then(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .map(normalize_row)
        .ok_or_else(|| AppError::NotFound("Lot not found.".to_string()))
}

/// Lock the lot row and report its status and owner.
pub async fn lock_lote(conn: &mut PgConnection, lote_id: i64) -> AppResult<(String, Option<i64>)> {
    sqlx::query_as::<_, (String, Option<i64>)>(
        "SELECT status, owner_id FROM lotes WHERE id = $1 FOR UPDATE",
    )
    .bind(lote_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Lot not found.".to_string()))
}

pub async fn set_lote_ownership(
    conn: &mut PgConnection,
    lote_id: i64,
    status: &str,
    owner_id: Option<i64>,
) -> AppResult<()> {
    sqlx::query("UPDATE lotes SET status = $2, owner_id = $3, updated_at = now() WHERE id = $1")
        .bind(lote_id)
        .bind(status)
        .bind(owner_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn insert_lote_history<'e, E>(
    executor: E,
    lote_id: i64,
    entry: &LoteHistoryEntry<'_>,
    changed_by: Option<i64>,
) -> AppResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO lote_history (lote_id, action, details, field_name, old_value, new_value, changed_by)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(lote_id)
    .bind(entry.action)
    .bind(&entry.details)
    .bind(entry.field_name)
    .bind(&entry.old_value)
    .bind(&entry.new_value)
    .bind(changed_by)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn list_lote_history(pool: &sqlx::PgPool, lote_id: i64) -> AppResult<Vec<Value>> {
    let rows = sqlx::query(
        "SELECT to_jsonb(h) || jsonb_build_object(\
           'changed_by_email', u.email) AS row \
         FROM lote_history h LEFT JOIN users u ON u.id = h.changed_by \
         WHERE h.lote_id = $1 ORDER BY h.changed_at DESC, h.id DESC",
    )
    .bind(lote_id)
    .fetch_all(pool)
    .await?;
    Ok(read_json_rows(rows))
}

pub async fn active_sale_id<'e, E>(executor: E, lote_id: i64) -> AppResult<Option<i64>>
where
    E: Executor<'e, Database = Postgres>,
{
    Ok(sqlx::query_scalar::<_, i64>(
        "SELECT id FROM ventas WHERE lote_id = $1 AND status = 'active' LIMIT 1",
    )
    .bind(lote_id)
    .fetch_optional(executor)
    .await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lot_search_includes_owner_names() {
        let filter = LoteFilter {
            status: Some("disponible".to_string()),
            search: Some("Quispe".to_string()),
            ..LoteFilter::default()
        };
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 FROM lotes l WHERE 1=1");
        push_lote_filter(&mut query, &filter);
        let sql = query.sql();
        assert!(sql.contains("l.status = $1"));
        assert!(sql.contains("c.last_name ILIKE $5"));
    }

    #[test]
    fn history_entries_carry_field_values() {
        let change = LoteChange {
            field_name: "status",
            action: "status_change",
            old_value: Some("disponible".to_string()),
            new_value: Some("vendido".to_string()),
        };
        let entry = LoteHistoryEntry::from(&change);
        assert_eq!(entry.field_name, Some("status"));
        assert_eq!(entry.details, "status changed from disponible to vendido");
        assert_eq!(LoteHistoryEntry::note("created", "Lot created").field_name, None);
    }
}
