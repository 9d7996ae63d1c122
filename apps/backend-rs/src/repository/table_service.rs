use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, Executor, Postgres, QueryBuilder, Row};

use crate::error::AppError;

const ALLOWED_TABLES: &[&str] = &[
    "audit_logs",
    "customers",
    "lote_history",
    "lotes",
    "payment_plans",
    "payment_schedules",
    "payments",
    "reports",
    "users",
    "ventas",
];

/// Never leaves the database through the generic read path.
const REDACTED_COLUMNS: &[&str] = &["password_hash"];

/// NUMERIC columns. `row_to_json` renders them as JSON numbers; they are
/// served as two-decimal strings like every other amount.
const MONEY_COLUMNS: &[&str] = &[
    "amount",
    "area",
    "financed_amount",
    "initial_payment",
    "original_amount",
    "paid_amount",
    "price",
    "sale_price",
    "scheduled_amount",
];

/// Free-text search over a set of columns, OR-ed together with ILIKE.
#[derive(Debug, Clone, Copy)]
pub struct Search<'a> {
    pub term: &'a str,
    pub columns: &'a [&'a str],
}

#[derive(Debug, Clone, Copy)]
pub struct ListQuery<'a> {
    pub filters: Option<&'a Map<String, Value>>,
    pub search: Option<Search<'a>>,
    pub limit: i64,
    pub offset: i64,
    pub order_by: &'a str,
    pub ascending: bool,
}

impl Default for ListQuery<'_> {
    fn default() -> Self {
        Self {
            filters: None,
            search: None,
            limit: 100,
            offset: 0,
            order_by: "created_at",
            ascending: false,
        }
    }
}

pub async fn list_rows(
    pool: &sqlx::PgPool,
    table: &str,
    list: ListQuery<'_>,
) -> Result<Vec<Value>, AppError> {
    let table_name = validate_table(table)?;
    let order_name = if list.order_by.trim().is_empty() {
        "created_at"
    } else {
        validate_identifier(list.order_by)?
    };

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    push_where(&mut query, &list)?;

    query.push(" ORDER BY t.").push(order_name);
    query.push(if list.ascending { " ASC" } else { " DESC" });
    query.push(", t.id ASC");
    query
        .push(" LIMIT ")
        .push_bind(list.limit.clamp(1, 1000))
        .push(" OFFSET ")
        .push_bind(list.offset.max(0));

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

pub async fn count_rows(
    pool: &sqlx::PgPool,
    table: &str,
    list: ListQuery<'_>,
) -> Result<i64, AppError> {
    let table_name = validate_table(table)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*)::bigint AS total FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    push_where(&mut query, &list)?;

    let row = query.build().fetch_one(pool).await.map_err(map_db_error)?;
    Ok(row.try_get::<i64, _>("total").unwrap_or(0))
}

pub async fn get_row<'e, E>(executor: E, table: &str, row_id: i64) -> Result<Value, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    let table_name = validate_table(table)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query
        .push(table_name)
        .push(" t WHERE t.id = ")
        .push_bind(row_id)
        .push(" LIMIT 1");

    let row = query
        .build()
        .fetch_optional(executor)
        .await
        .map_err(map_db_error)?;

    row.and_then(read_row)
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

/// Insert one row. `jsonb_populate_record` lets PostgreSQL coerce every
/// value to the column's declared type.
pub async fn create_row<'e, E>(
    executor: E,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    let table_name = validate_table(table)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Could not create {table_name} record."
        )));
    }
    let keys = sorted_keys(payload)?;

    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    query.push(table_name).push(" (");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(*key);
        }
    }
    query.push(") SELECT ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push("r.");
            separated.push_unseparated(*key);
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query
        .push(") r RETURNING row_to_json(")
        .push(table_name)
        .push(".*) AS row");

    let row = query
        .build()
        .fetch_optional(executor)
        .await
        .map_err(map_db_error)?;

    row.and_then(read_row)
        .ok_or_else(|| AppError::Internal(format!("Could not create {table_name} record.")))
}

/// Patch one row by id; `updated_at` is bumped when the table has one.
pub async fn update_row<'e, E>(
    executor: E,
    table: &str,
    row_id: i64,
    payload: &Map<String, Value>,
) -> Result<Value, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    let table_name = validate_table(table)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }
    let keys = sorted_keys(payload)?;

    let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
    query.push(table_name).push(" t SET ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(*key);
            separated.push_unseparated(" = r.");
            separated.push_unseparated(*key);
        }
        if has_updated_at(table_name) && !keys.contains(&"updated_at") {
            separated.push("updated_at = now()");
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query
        .push(") r WHERE t.id = ")
        .push_bind(row_id)
        .push(" RETURNING row_to_json(t) AS row");

    let row = query
        .build()
        .fetch_optional(executor)
        .await
        .map_err(map_db_error)?;

    row.and_then(read_row)
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn delete_row(pool: &sqlx::PgPool, table: &str, row_id: i64) -> Result<Value, AppError> {
    let existing = get_row(pool, table, row_id).await?;
    let table_name = validate_table(table)?;

    let mut query = QueryBuilder::<Postgres>::new("DELETE FROM ");
    query
        .push(table_name)
        .push(" t WHERE t.id = ")
        .push_bind(row_id);
    query.build().execute(pool).await.map_err(map_db_error)?;

    Ok(existing)
}

fn has_updated_at(table: &str) -> bool {
    !matches!(table, "audit_logs" | "lote_history" | "payments")
}

fn sorted_keys(payload: &Map<String, Value>) -> Result<Vec<&str>, AppError> {
    let mut keys = payload
        .keys()
        .map(|key| validate_identifier(key))
        .collect::<Result<Vec<_>, _>>()?;
    keys.sort_unstable();
    Ok(keys)
}

fn push_where(query: &mut QueryBuilder<Postgres>, list: &ListQuery<'_>) -> Result<(), AppError> {
    if let Some(filter_map) = list.filters {
        for (key, value) in filter_map {
            push_filter_clause(query, key, value)?;
        }
    }
    if let Some(search) = list.search {
        push_search_clause(query, search)?;
    }
    Ok(())
}

fn push_search_clause(query: &mut QueryBuilder<Postgres>, search: Search<'_>) -> Result<(), AppError> {
    let term = search.term.trim();
    if term.is_empty() || search.columns.is_empty() {
        return Ok(());
    }
    let pattern = format!("%{}%", escape_like(term));
    query.push(" AND (");
    for (index, column) in search.columns.iter().enumerate() {
        if index > 0 {
            query.push(" OR ");
        }
        query
            .push("t.")
            .push(validate_identifier(column)?)
            .push("::text ILIKE ")
            .push_bind(pattern.clone());
    }
    query.push(")");
    Ok(())
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn read_row(row: PgRow) -> Option<Value> {
    row.try_get::<Option<Value>, _>("row")
        .ok()
        .flatten()
        .map(normalize_row)
}

fn read_rows(rows: Vec<PgRow>) -> Vec<Value> {
    rows.into_iter().filter_map(read_row).collect()
}

pub fn normalize_row(mut row: Value) -> Value {
    if let Some(object) = row.as_object_mut() {
        for column in REDACTED_COLUMNS {
            object.remove(*column);
        }
        for column in MONEY_COLUMNS {
            if let Some(value) = object.get_mut(*column) {
                if let Some(amount) = money_string(value) {
                    *value = Value::String(amount);
                }
            }
        }
    }
    row
}

fn money_string(value: &Value) -> Option<String> {
    let Value::Number(number) = value else {
        return None;
    };
    let raw = number.to_string();
    let mut parsed = Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .ok()?
        .round_dp(2);
    parsed.rescale(2);
    Some(parsed.to_string())
}

fn validate_table(table: &str) -> Result<&str, AppError> {
    let normalized = validate_identifier(table)?;
    if ALLOWED_TABLES.contains(&normalized) {
        return Ok(normalized);
    }
    Err(AppError::Forbidden(format!(
        "Table '{normalized}' is not allowed."
    )))
}

fn validate_identifier(identifier: &str) -> Result<&str, AppError> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(
            "Identifier cannot be empty.".to_string(),
        ));
    }
    let well_formed = trimmed.chars().all(|character| {
        character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
    }) && !trimmed
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_digit());
    if !well_formed {
        return Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )));
    }
    Ok(trimmed)
}

#[derive(Debug, Clone, PartialEq)]
enum ScalarFilter {
    Text(String),
    Bool(bool),
    I64(i64),
    Decimal(Decimal),
    Date(NaiveDate),
    Timestamp(DateTime<FixedOffset>),
}

#[derive(Debug, Clone, PartialEq)]
enum ArrayFilter {
    Text(Vec<String>),
    I64(Vec<i64>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOperator {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    ILike,
    IsNull,
}

impl FilterOperator {
    fn sql(self) -> &'static str {
        match self {
            Self::Gt => " > ",
            Self::Gte => " >= ",
            Self::Lt => " < ",
            Self::Lte => " <= ",
            Self::ILike => " ILIKE ",
            Self::Eq | Self::IsNull => " = ",
        }
    }
}

/// `column`, `column__gte`, `column__in`, `column__is_null`, ...
fn parse_filter_key(filter_key: &str) -> Result<(&str, FilterOperator), AppError> {
    let (column, operator) = match filter_key.rsplit_once("__") {
        Some((column, "gt")) => (column, FilterOperator::Gt),
        Some((column, "gte")) => (column, FilterOperator::Gte),
        Some((column, "lt")) => (column, FilterOperator::Lt),
        Some((column, "lte")) => (column, FilterOperator::Lte),
        Some((column, "icontains" | "ilike")) => (column, FilterOperator::ILike),
        Some((column, "is_null")) => (column, FilterOperator::IsNull),
        Some((column, "in")) => (column, FilterOperator::Eq),
        _ => (filter_key, FilterOperator::Eq),
    };
    Ok((validate_identifier(column)?, operator))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_i64().is_some_and(|parsed| parsed != 0),
        Value::String(text) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "true" | "t" | "1" | "yes" | "y"
        ),
        _ => false,
    }
}

fn push_filter_clause(
    query: &mut QueryBuilder<Postgres>,
    filter_key: &str,
    value: &Value,
) -> Result<(), AppError> {
    let (column, operator) = parse_filter_key(filter_key)?;

    if operator == FilterOperator::IsNull {
        query.push(" AND t.").push(column);
        query.push(if is_truthy(value) { " IS NULL" } else { " IS NOT NULL" });
        return Ok(());
    }

    match value {
        Value::Null => Ok(()),
        Value::Array(items) => {
            if operator != FilterOperator::Eq {
                return Err(AppError::BadRequest(format!(
                    "Filter '{filter_key}' does not support array values."
                )));
            }
            query.push(" AND t.").push(column);
            match infer_array_filter(column, items) {
                ArrayFilter::I64(values) if values.is_empty() => {
                    query.push(" IS NULL AND FALSE");
                }
                ArrayFilter::Text(values) if values.is_empty() => {
                    query.push(" IS NULL AND FALSE");
                }
                ArrayFilter::I64(values) => {
                    query.push(" = ANY(").push_bind(values).push(")");
                }
                ArrayFilter::Text(values) => {
                    query.push("::text = ANY(").push_bind(values).push(")");
                }
            }
            Ok(())
        }
        _ => {
            query.push(" AND ");
            push_scalar_filter(query, column, operator, infer_scalar_filter(column, value));
            Ok(())
        }
    }
}

fn push_scalar_filter(
    query: &mut QueryBuilder<Postgres>,
    column: &str,
    operator: FilterOperator,
    value: ScalarFilter,
) {
    query.push("t.").push(column);
    if operator == FilterOperator::ILike {
        let text = match value {
            ScalarFilter::Text(text) => text,
            other => scalar_text(&other),
        };
        query
            .push("::text ILIKE ")
            .push_bind(format!("%{}%", escape_like(&text)));
        return;
    }

    let sql_operator = operator.sql();
    match value {
        ScalarFilter::Text(text) => {
            query.push("::text").push(sql_operator).push_bind(text);
        }
        ScalarFilter::Bool(flag) => {
            query.push(sql_operator).push_bind(flag);
        }
        ScalarFilter::I64(number) => {
            query.push(sql_operator).push_bind(number);
        }
        ScalarFilter::Decimal(number) => {
            query.push(sql_operator).push_bind(number);
        }
        ScalarFilter::Date(date) => {
            query.push(sql_operator).push_bind(date);
        }
        ScalarFilter::Timestamp(timestamp) => {
            query.push(sql_operator).push_bind(timestamp);
        }
    }
}

fn scalar_text(value: &ScalarFilter) -> String {
    match value {
        ScalarFilter::Text(text) => text.clone(),
        ScalarFilter::Bool(flag) => flag.to_string(),
        ScalarFilter::I64(number) => number.to_string(),
        ScalarFilter::Decimal(number) => number.to_string(),
        ScalarFilter::Date(date) => date.to_string(),
        ScalarFilter::Timestamp(timestamp) => timestamp.to_rfc3339(),
    }
}

fn infer_scalar_filter(column: &str, value: &Value) -> ScalarFilter {
    match value {
        Value::Bool(flag) => ScalarFilter::Bool(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(as_i64) if !is_money_identifier(column) => ScalarFilter::I64(as_i64),
            _ => Decimal::from_str(&number.to_string())
                .map(ScalarFilter::Decimal)
                .unwrap_or_else(|_| ScalarFilter::Text(number.to_string())),
        },
        Value::String(text) => {
            let trimmed = text.trim();
            if is_id_identifier(column) {
                if let Ok(parsed) = trimmed.parse::<i64>() {
                    return ScalarFilter::I64(parsed);
                }
            }
            if is_money_identifier(column) {
                if let Ok(parsed) = Decimal::from_str(trimmed) {
                    return ScalarFilter::Decimal(parsed);
                }
            }
            if is_timestamp_identifier(column) {
                if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
                    return ScalarFilter::Timestamp(parsed);
                }
            }
            if is_date_identifier(column) {
                if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                    return ScalarFilter::Date(parsed);
                }
            }
            ScalarFilter::Text(text.clone())
        }
        Value::Null => ScalarFilter::Text(String::new()),
        Value::Array(_) | Value::Object(_) => ScalarFilter::Text(value.to_string()),
    }
}

fn infer_array_filter(column: &str, values: &[Value]) -> ArrayFilter {
    let as_ids = values
        .iter()
        .map(|value| match value {
            Value::Number(number) => number.as_i64(),
            Value::String(text) if is_id_identifier(column) => text.trim().parse::<i64>().ok(),
            _ => None,
        })
        .collect::<Option<Vec<i64>>>();
    if let Some(ids) = as_ids {
        return ArrayFilter::I64(ids);
    }

    ArrayFilter::Text(
        values
            .iter()
            .map(|value| match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect(),
    )
}

fn is_id_identifier(identifier: &str) -> bool {
    identifier == "id"
        || identifier.ends_with("_id")
        || identifier.ends_with("_by")
        || identifier == "installment_number"
}

fn is_money_identifier(identifier: &str) -> bool {
    MONEY_COLUMNS.contains(&identifier)
}

fn is_date_identifier(identifier: &str) -> bool {
    identifier.ends_with("_date")
}

fn is_timestamp_identifier(identifier: &str) -> bool {
    identifier.ends_with("_at")
}

/// Translate a driver error into the API error taxonomy. Constraint
/// violations surface as client errors; anything else is a 502.
pub fn map_db_error(error: sqlx::Error) -> AppError {
    if let sqlx::Error::RowNotFound = error {
        return AppError::NotFound("Record not found.".to_string());
    }

    let code = error
        .as_database_error()
        .and_then(|db_error| db_error.code())
        .map(|code| code.into_owned());
    let message = error.to_string();

    match code.as_deref() {
        Some("23505") => {
            tracing::debug!(db_error = %message, "Unique constraint violated");
            AppError::Conflict("Duplicate value violates a unique constraint.".to_string())
        }
        Some("23503") => {
            tracing::debug!(db_error = %message, "Foreign key constraint violated");
            AppError::Conflict(
                "The record is referenced by other data or references a missing record."
                    .to_string(),
            )
        }
        Some("23514") | Some("22P02") | Some("22007") | Some("22008") => {
            tracing::debug!(db_error = %message, "Value rejected by the database");
            AppError::BadRequest("A value is outside the allowed range or format.".to_string())
        }
        _ => {
            tracing::error!(db_error = %message, "Database query failed");
            AppError::Dependency("Database operation failed.".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::{json, Map, Value};
    use sqlx::{Postgres, QueryBuilder};

    use super::*;

    #[test]
    fn filter_keys_carry_operators() {
        assert_eq!(
            parse_filter_key("due_date__gte").unwrap(),
            ("due_date", FilterOperator::Gte)
        );
        assert_eq!(
            parse_filter_key("status__in").unwrap(),
            ("status", FilterOperator::Eq)
        );
        assert_eq!(
            parse_filter_key("owner_id__is_null").unwrap(),
            ("owner_id", FilterOperator::IsNull)
        );
        assert_eq!(
            parse_filter_key("block").unwrap(),
            ("block", FilterOperator::Eq)
        );
        assert!(parse_filter_key("Block; DROP").is_err());
    }

    #[test]
    fn identifiers_are_strict() {
        assert!(validate_identifier("lot_number").is_ok());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("a-b").is_err());
        assert!(validate_table("pg_shadow").is_err());
        assert!(validate_table("lotes").is_ok());
    }

    #[test]
    fn id_columns_infer_integers() {
        assert_eq!(
            infer_scalar_filter("venta_id", &json!("42")),
            ScalarFilter::I64(42)
        );
        assert_eq!(
            infer_scalar_filter("price", &json!("1500.50")),
            ScalarFilter::Decimal(dec!(1500.50))
        );
        assert_eq!(
            infer_array_filter("customer_id", &[json!("3"), json!(4)]),
            ArrayFilter::I64(vec![3, 4])
        );
        assert_eq!(
            infer_array_filter("status", &[json!("disponible"), json!("reservado")]),
            ArrayFilter::Text(vec!["disponible".to_string(), "reservado".to_string()])
        );
    }

    #[test]
    fn rows_hide_secrets_and_format_money() {
        let row = normalize_row(json!({
            "id": 5,
            "email": "ana@villanueva.pe",
            "password_hash": "$argon2id$...",
            "price": 25000.5,
            "area": 120
        }));
        assert!(row.get("password_hash").is_none());
        assert_eq!(row["price"], json!("25000.50"));
        assert_eq!(row["area"], json!("120.00"));
        assert_eq!(row["id"], json!(5));
    }

    #[test]
    fn search_clause_ors_columns_and_escapes() {
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 FROM customers t WHERE 1=1");
        push_search_clause(
            &mut query,
            Search {
                term: "50%_off",
                columns: &["first_name", "last_name"],
            },
        )
        .unwrap();
        let sql = query.sql();
        assert!(
            sql.contains("(t.first_name::text ILIKE $1 OR t.last_name::text ILIKE $2)"),
            "unexpected SQL: {sql}"
        );
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
    }

    #[test]
    fn empty_in_filter_matches_nothing() {
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 FROM lotes t WHERE 1=1");
        push_filter_clause(&mut query, "status__in", &Value::Array(Vec::new())).unwrap();
        assert!(query.sql().ends_with("t.status IS NULL AND FALSE"));
    }

    #[test]
    fn null_filters_are_ignored() {
        let mut filters = Map::new();
        filters.insert("status".to_string(), Value::Null);
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 FROM lotes t WHERE 1=1");
        push_where(
            &mut query,
            &ListQuery {
                filters: Some(&filters),
                ..ListQuery::default()
            },
        )
        .unwrap();
        assert_eq!(query.sql(), "SELECT 1 FROM lotes t WHERE 1=1");
    }

    #[test]
    fn row_not_found_maps_to_404() {
        assert!(matches!(
            map_db_error(sqlx::Error::RowNotFound),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            map_db_error(sqlx::Error::PoolTimedOut),
            AppError::Dependency(_)
        ));
    }
}
