//! Sale (venta) rules that do not touch the database.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::installments::{validate_money, Installment, InstallmentError, MAX_FINANCING_MONTHS};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VentaStatus {
    Active,
    Cancelled,
    Completed,
    Suspended,
}

impl VentaStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Suspended => "suspended",
        }
    }
}

impl fmt::Display for VentaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VentaStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            "suspended" => Ok(Self::Suspended),
            other => Err(format!("Unknown sale status '{other}'.")),
        }
    }
}

impl TryFrom<String> for VentaStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoteStatus {
    Disponible,
    Vendido,
    Reservado,
    Desarrollo,
}

impl LoteStatus {
    pub const ALL: [LoteStatus; 4] = [
        Self::Disponible,
        Self::Vendido,
        Self::Reservado,
        Self::Desarrollo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disponible => "disponible",
            Self::Vendido => "vendido",
            Self::Reservado => "reservado",
            Self::Desarrollo => "desarrollo",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == raw.trim().to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Efectivo,
    Transferencia,
    Cheque,
    Tarjeta,
    Otro,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Efectivo => "efectivo",
            Self::Transferencia => "transferencia",
            Self::Cheque => "cheque",
            Self::Tarjeta => "tarjeta",
            Self::Otro => "otro",
        }
    }

    /// Accepts the stored Spanish names and their English aliases.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "efectivo" | "cash" => Some(Self::Efectivo),
            "transferencia" | "transfer" | "bank_transfer" => Some(Self::Transferencia),
            "cheque" | "check" => Some(Self::Cheque),
            "tarjeta" | "card" => Some(Self::Tarjeta),
            "otro" | "other" => Some(Self::Otro),
            _ => None,
        }
    }

    pub fn parse_or_default(raw: Option<&str>) -> Result<Self, AppError> {
        match raw.map(str::trim).filter(|value| !value.is_empty()) {
            None => Ok(Self::Efectivo),
            Some(value) => Self::parse(value).ok_or_else(|| {
                AppError::BadRequest(format!("Unknown payment method '{value}'."))
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    Initial,
    Installment,
}

impl PaymentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Installment => "installment",
        }
    }
}

/// Terms a sale is created (or re-planned) with.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleTerms {
    pub sale_price: Decimal,
    pub initial_payment: Decimal,
    pub financing_months: u32,
    pub payment_day: u32,
    pub sale_date: NaiveDate,
    pub contract_date: Option<NaiveDate>,
    pub schedule_start_date: Option<NaiveDate>,
}

impl SaleTerms {
    pub fn validate(&self) -> Result<(), AppError> {
        validate_money(self.sale_price).map_err(|error| match error {
            InstallmentError::NonPositiveAmount => {
                AppError::BadRequest("Sale price must be greater than zero.".to_string())
            }
            other => other.into(),
        })?;
        if self.initial_payment < Decimal::ZERO {
            return Err(AppError::BadRequest(
                "Initial payment cannot be negative.".to_string(),
            ));
        }
        if self.initial_payment > self.sale_price {
            return Err(AppError::BadRequest(
                "Initial payment cannot exceed the sale price.".to_string(),
            ));
        }
        if self.financing_months > MAX_FINANCING_MONTHS {
            return Err(InstallmentError::InvalidFinancingMonths.into());
        }
        if !(1..=31).contains(&self.payment_day) {
            return Err(InstallmentError::InvalidPaymentDay.into());
        }
        let financed = self.financed_amount();
        if financed > Decimal::ZERO && self.financing_months == 0 {
            return Err(AppError::BadRequest(
                "A financed balance needs at least one financing month.".to_string(),
            ));
        }
        if self.financing_months > 0
            && financed > Decimal::ZERO
            && financed < Decimal::new(i64::from(self.financing_months), 2)
        {
            return Err(InstallmentError::FinancedAmountTooSmall {
                financed,
                months: self.financing_months,
            }
            .into());
        }
        Ok(())
    }

    pub fn financed_amount(&self) -> Decimal {
        (self.sale_price - self.initial_payment).max(Decimal::ZERO)
    }

    /// First day installments are counted from.
    pub fn schedule_start(&self) -> NaiveDate {
        self.schedule_start_date
            .or(self.contract_date)
            .unwrap_or(self.sale_date)
    }
}

pub fn initial_payment_balance(initial_payment: Decimal, paid_so_far: Decimal) -> Decimal {
    (initial_payment - paid_so_far).max(Decimal::ZERO)
}

pub fn ensure_active(status: VentaStatus, action: &str) -> Result<(), AppError> {
    if status != VentaStatus::Active {
        return Err(AppError::BadRequest(format!(
            "Only active sales can be {action}; this sale is {status}."
        )));
    }
    Ok(())
}

/// A sale completes once nothing is left to collect on its schedule.
pub fn ensure_completable(rows: &[Installment]) -> Result<(), AppError> {
    let open = rows
        .iter()
        .filter(|row| !row.status.is_settled())
        .count();
    if open > 0 {
        return Err(AppError::BadRequest(format!(
            "The sale still has {open} open installment(s)."
        )));
    }
    Ok(())
}

pub fn ensure_initial_payment_fits(amount: Decimal, balance: Decimal) -> Result<(), AppError> {
    validate_money(amount)?;
    if amount > balance {
        return Err(AppError::BadRequest(format!(
            "Amount {amount} exceeds the pending initial payment balance of {balance}."
        )));
    }
    Ok(())
}

pub fn lote_display(block: &str, lot_number: &str) -> String {
    format!("Mz. {} - Lote {}", block.trim(), lot_number.trim())
}

pub fn price_per_m2(price: Decimal, area: Decimal) -> Option<Decimal> {
    if area <= Decimal::ZERO {
        return None;
    }
    Some((price / area).round_dp(2))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::services::installments::{tests::row, ScheduleStatus};

    fn terms() -> SaleTerms {
        SaleTerms {
            sale_price: dec!(30000.00),
            initial_payment: dec!(6000.00),
            financing_months: 24,
            payment_day: 15,
            sale_date: NaiveDate::from_ymd_opt(2026, 2, 3).unwrap(),
            contract_date: None,
            schedule_start_date: None,
        }
    }

    #[test]
    fn valid_terms_pass() {
        let terms = terms();
        assert!(terms.validate().is_ok());
        assert_eq!(terms.financed_amount(), dec!(24000.00));
    }

    #[test]
    fn tiny_financed_balances_need_fewer_months() {
        let mut terms = terms();
        terms.initial_payment = dec!(29999.95);
        terms.financing_months = 12;
        let error = terms.validate().unwrap_err();
        assert!(error.to_string().contains("too small for 12 installments"));

        terms.financing_months = 5;
        assert!(terms.validate().is_ok());
    }

    #[test]
    fn initial_payment_cannot_exceed_price() {
        let mut terms = terms();
        terms.initial_payment = dec!(30000.01);
        assert!(matches!(terms.validate(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn financed_balance_needs_months() {
        let mut terms = terms();
        terms.financing_months = 0;
        assert!(terms.validate().is_err());
        terms.initial_payment = terms.sale_price;
        assert!(terms.validate().is_ok());
    }

    #[test]
    fn schedule_start_prefers_explicit_dates() {
        let mut terms = terms();
        assert_eq!(terms.schedule_start(), terms.sale_date);
        let contract = NaiveDate::from_ymd_opt(2026, 2, 10).unwrap();
        terms.contract_date = Some(contract);
        assert_eq!(terms.schedule_start(), contract);
        let start = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        terms.schedule_start_date = Some(start);
        assert_eq!(terms.schedule_start(), start);
    }

    #[test]
    fn payment_methods_accept_aliases() {
        assert_eq!(PaymentMethod::parse("cash"), Some(PaymentMethod::Efectivo));
        assert_eq!(PaymentMethod::parse("Transfer"), Some(PaymentMethod::Transferencia));
        assert_eq!(PaymentMethod::parse("cheque"), Some(PaymentMethod::Cheque));
        assert_eq!(PaymentMethod::parse("bitcoin"), None);
        assert_eq!(
            PaymentMethod::parse_or_default(None).unwrap(),
            PaymentMethod::Efectivo
        );
        assert!(PaymentMethod::parse_or_default(Some("bitcoin")).is_err());
    }

    #[test]
    fn completion_requires_settled_rows() {
        let mut rows = vec![
            row(1, 1, dec!(500), dec!(500)),
            row(2, 2, dec!(500), Decimal::ZERO),
        ];
        rows[0].status = ScheduleStatus::Paid;
        assert!(ensure_completable(&rows).is_err());
        rows[1].status = ScheduleStatus::Forgiven;
        assert!(ensure_completable(&rows).is_ok());
        assert!(ensure_completable(&[]).is_ok());
    }

    #[test]
    fn initial_payments_respect_balance() {
        let balance = initial_payment_balance(dec!(6000), dec!(4500));
        assert_eq!(balance, dec!(1500));
        assert!(ensure_initial_payment_fits(dec!(1500), balance).is_ok());
        assert!(ensure_initial_payment_fits(dec!(1500.01), balance).is_err());
        assert!(ensure_initial_payment_fits(Decimal::ZERO, balance).is_err());
        assert_eq!(initial_payment_balance(dec!(100), dec!(150)), Decimal::ZERO);
    }

    #[test]
    fn inactive_sales_reject_actions() {
        assert!(ensure_active(VentaStatus::Active, "cancelled").is_ok());
        assert!(ensure_active(VentaStatus::Completed, "cancelled").is_err());
    }

    #[test]
    fn lot_helpers_format() {
        assert_eq!(lote_display("A", "5"), "Mz. A - Lote 5");
        assert_eq!(price_per_m2(dec!(25000), dec!(200)), Some(dec!(125)));
        assert_eq!(price_per_m2(dec!(25000), Decimal::ZERO), None);
        assert_eq!(LoteStatus::parse("VENDIDO"), Some(LoteStatus::Vendido));
    }
}
