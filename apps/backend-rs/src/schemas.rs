use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use validator::Validate;

use crate::error::AppError;
use crate::services::urgency::UrgencyCutoffs;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

pub fn clamp_limit_in_range(limit: i64, minimum: i64, maximum: i64) -> i64 {
    limit.clamp(minimum, maximum)
}

pub fn serialize_to_map<T>(value: &T) -> serde_json::Map<String, serde_json::Value>
where
    T: serde::Serialize,
{
    let json = serde_json::to_value(value)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
    json.as_object().cloned().unwrap_or_default()
}

pub fn remove_nulls(
    mut map: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    map.retain(|_, value| !value.is_null());
    map
}

/// Comma-separated query values (`status=pending,overdue`).
pub fn split_csv(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn default_limit_100() -> i64 {
    100
}
fn default_page() -> i64 {
    1
}
fn default_page_size() -> i64 {
    50
}
fn default_upcoming_days() -> i64 {
    30
}
fn default_worker_role() -> String {
    "worker".to_string()
}
fn default_document_type() -> String {
    "dni".to_string()
}
fn default_lote_status() -> String {
    "disponible".to_string()
}
fn default_true() -> bool {
    true
}

// --- paths ---

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UserPath {
    pub user_id: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct CustomerPath {
    pub customer_id: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct LotePath {
    pub lote_id: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct VentaPath {
    pub venta_id: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct SchedulePath {
    pub schedule_id: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct PaymentPath {
    pub payment_id: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ReportPath {
    pub report_id: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ReportTypePath {
    pub report_type: String,
}

// --- auth and users ---

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginInput {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 256))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RefreshInput {
    #[validate(length(min = 1))]
    pub refresh: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChangePasswordInput {
    #[validate(length(min = 1))]
    pub old_password: String,
    #[validate(length(min = 8, max = 256))]
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateProfileInput {
    #[validate(length(min = 1, max = 150))]
    pub first_name: Option<String>,
    #[validate(length(min = 1, max = 150))]
    pub last_name: Option<String>,
    #[validate(length(max = 30))]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UsersQuery {
    pub search: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateUserInput {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 256))]
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default = "default_worker_role")]
    pub role: String,
    #[serde(default)]
    pub phone: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateUserInput {
    #[validate(email)]
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
    #[validate(length(min = 8, max = 256))]
    pub password: Option<String>,
}

// --- customers ---

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct CustomersQuery {
    pub search: Option<String>,
    pub document_number: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateCustomerInput {
    #[validate(length(min = 1, max = 150))]
    pub first_name: String,
    #[validate(length(min = 1, max = 150))]
    pub last_name: String,
    #[validate(email)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_document_type")]
    pub document_type: String,
    pub document_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateCustomerInput {
    #[validate(length(min = 1, max = 150))]
    pub first_name: Option<String>,
    #[validate(length(min = 1, max = 150))]
    pub last_name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub document_type: Option<String>,
    pub document_number: Option<String>,
}

// --- lotes ---

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct LotesQuery {
    pub status: Option<String>,
    pub block: Option<String>,
    pub owner_id: Option<i64>,
    pub search: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateLoteInput {
    #[validate(length(min = 1, max = 20))]
    pub block: String,
    #[validate(length(min = 1, max = 20))]
    pub lot_number: String,
    pub area: Decimal,
    pub price: Decimal,
    #[serde(default = "default_lote_status")]
    pub status: String,
    pub owner_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateLoteInput {
    #[validate(length(min = 1, max = 20))]
    pub block: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub lot_number: Option<String>,
    pub area: Option<Decimal>,
    pub price: Option<Decimal>,
    pub status: Option<String>,
    /// `Some(None)` clears the owner.
    #[serde(default, deserialize_with = "double_option::deserialize")]
    pub owner_id: Option<Option<i64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferOwnerInput {
    pub new_lote_id: i64,
    #[serde(default)]
    pub notes: String,
}

/// Distinguishes an absent field from an explicit `null`.
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

// --- ventas ---

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct VentasQuery {
    pub status: Option<String>,
    #[serde(default)]
    pub active_only: bool,
    #[serde(alias = "lote")]
    pub lote_id: Option<i64>,
    #[serde(alias = "customer")]
    pub customer_id: Option<i64>,
    pub search: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateVentaInput {
    pub lote_id: i64,
    pub customer_id: i64,
    pub sale_price: Decimal,
    #[serde(default)]
    pub initial_payment: Decimal,
    #[serde(default)]
    #[validate(range(min = 0, max = 360))]
    pub financing_months: i32,
    #[validate(range(min = 1, max = 31))]
    pub payment_day: Option<i32>,
    pub sale_date: Option<NaiveDate>,
    pub contract_date: Option<NaiveDate>,
    pub schedule_start_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateVentaInput {
    pub notes: Option<String>,
    pub contract_date: Option<NaiveDate>,
    #[validate(range(min = 1, max = 31))]
    pub payment_day: Option<i32>,
    #[validate(range(min = 0, max = 360))]
    pub financing_months: Option<i32>,
    pub schedule_start_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CancelVentaInput {
    #[validate(length(min = 1, max = 1000))]
    pub reason: String,
    pub cancellation_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoteIdQuery {
    pub lote_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VentaIdQuery {
    pub venta_id: i64,
}

// --- payments and schedules ---

/// Payment fields shared by initial and installment payments.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RegisterPaymentInput {
    pub amount: Decimal,
    pub method: Option<String>,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub receipt_number: String,
    pub receipt_date: Option<NaiveDate>,
    pub payment_date: Option<NaiveDate>,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub notes: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForgiveInstallmentInput {
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModifyAmountInput {
    pub new_amount: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ModifyMultipleAmountsInput {
    #[validate(length(min = 1, max = 360))]
    pub schedule_ids: Vec<i64>,
    pub new_amount: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateForLoteInput {
    pub lote_id: i64,
    /// Replace an existing schedule that has no payments yet.
    #[serde(default)]
    pub regenerate: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateScheduleInput {
    pub venta_id: i64,
    pub installment_number: Option<i32>,
    pub scheduled_amount: Decimal,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct SchedulesQuery {
    pub venta_id: Option<i64>,
    pub lote_id: Option<i64>,
    pub customer_id: Option<i64>,
    /// Comma-separated statuses.
    pub status: Option<String>,
    pub due_from: Option<NaiveDate>,
    pub due_to: Option<NaiveDate>,
    #[serde(default)]
    pub active_only: bool,
    #[serde(default = "default_true")]
    pub include_payments: bool,
    pub preset: Option<String>,
    pub urgent_days: Option<i64>,
    pub warning_days: Option<i64>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl SchedulesQuery {
    pub fn cutoffs(&self) -> UrgencyCutoffs {
        UrgencyCutoffs::from_preset(self.preset.as_deref())
            .with_overrides(self.urgent_days, self.warning_days)
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UrgencyQuery {
    pub preset: Option<String>,
    pub urgent_days: Option<i64>,
    pub warning_days: Option<i64>,
}

impl UrgencyQuery {
    pub fn cutoffs(&self) -> UrgencyCutoffs {
        UrgencyCutoffs::from_preset(self.preset.as_deref())
            .with_overrides(self.urgent_days, self.warning_days)
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpcomingQuery {
    #[serde(default = "default_upcoming_days")]
    pub days: i64,
    pub preset: Option<String>,
    pub urgent_days: Option<i64>,
    pub warning_days: Option<i64>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

impl UpcomingQuery {
    pub fn cutoffs(&self) -> UrgencyCutoffs {
        UrgencyCutoffs::from_preset(self.preset.as_deref())
            .with_overrides(self.urgent_days, self.warning_days)
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct PaymentsQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    pub venta_id: Option<i64>,
    #[serde(alias = "lote__id", alias = "lote")]
    pub lote_id: Option<i64>,
    pub method: Option<String>,
    pub payment_type: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub search: Option<String>,
}

// --- reports ---

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ReportsQuery {
    pub report_type: Option<String>,
    pub status: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateReportInput {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub report_type: String,
    #[serde(default)]
    pub description: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateReportInput {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
pub struct ReportPeriodQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use axum::{extract::Query, http::Uri};

    use super::*;

    fn query<T: serde::de::DeserializeOwned>(uri: &'static str) -> T {
        Query::<T>::try_from_uri(&Uri::from_static(uri)).unwrap().0
    }

    #[test]
    fn sale_filters_accept_short_names() {
        let short: VentasQuery = query("/sales/ventas/?lote=5&customer=3&active_only=true");
        assert_eq!(short.lote_id, Some(5));
        assert_eq!(short.customer_id, Some(3));
        assert!(short.active_only);

        let long: VentasQuery = query("/sales/ventas/?lote_id=7&customer_id=9");
        assert_eq!(long.lote_id, Some(7));
        assert_eq!(long.customer_id, Some(9));
        assert!(!long.active_only);
    }

    #[test]
    fn payment_filters_accept_lot_lookup_names() {
        let nested: PaymentsQuery = query("/payments/payments/?lote__id=4");
        assert_eq!(nested.lote_id, Some(4));
        let short: PaymentsQuery = query("/payments/payments/?lote=6");
        assert_eq!(short.lote_id, Some(6));
    }

    #[test]
    fn csv_values_are_trimmed() {
        assert_eq!(
            split_csv(Some(" pending, ,overdue ")),
            vec!["pending".to_string(), "overdue".to_string()]
        );
        assert!(split_csv(None).is_empty());
    }

    #[test]
    fn owner_distinguishes_null_from_absent() {
        let cleared: UpdateLoteInput = serde_json::from_str(r#"{"owner_id": null}"#).unwrap();
        assert_eq!(cleared.owner_id, Some(None));
        let untouched: UpdateLoteInput = serde_json::from_str(r#"{"price": "100.50"}"#).unwrap();
        assert_eq!(untouched.owner_id, None);
        assert!(untouched.price.is_some());
    }

    #[test]
    fn schedule_query_cutoffs_apply_overrides() {
        let query: SchedulesQuery =
            serde_json::from_str(r#"{"preset": "due_dates", "warning_days": 10}"#).unwrap();
        let cutoffs = query.cutoffs();
        assert_eq!(cutoffs.urgent_days, 2);
        assert_eq!(cutoffs.warning_days, 10);
        assert!(query.include_payments);
    }

    #[test]
    fn bulk_modification_needs_ids() {
        let input = ModifyMultipleAmountsInput {
            schedule_ids: Vec::new(),
            new_amount: Decimal::ONE,
            notes: None,
        };
        assert!(matches!(
            validate_input(&input),
            Err(AppError::UnprocessableEntity(_))
        ));
    }

    #[test]
    fn money_accepts_strings_and_numbers() {
        let input: RegisterPaymentInput =
            serde_json::from_str(r#"{"amount": "150.25", "method": "cash"}"#).unwrap();
        assert_eq!(input.amount, Decimal::new(15025, 2));
        let input: RegisterPaymentInput = serde_json::from_str(r#"{"amount": 80}"#).unwrap();
        assert_eq!(input.amount, Decimal::from(80));
    }
}
