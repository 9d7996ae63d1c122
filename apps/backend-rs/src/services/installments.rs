//! Installment (cuota) model for financed sales.
//!
//! Everything here is pure: callers load a sale's rows, apply one of these
//! operations and persist the result inside a single transaction.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

const MONEY_SCALE: u32 = 2;
pub const MAX_FINANCING_MONTHS: u32 = 360;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
    Forgiven,
}

impl ScheduleStatus {
    pub const ALL: [ScheduleStatus; 5] = [
        Self::Pending,
        Self::Partial,
        Self::Paid,
        Self::Overdue,
        Self::Forgiven,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Partial => "partial",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
            Self::Forgiven => "forgiven",
        }
    }

    /// Paid and forgiven rows are closed to payments and amount changes.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Paid | Self::Forgiven)
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "partial" => Ok(Self::Partial),
            "paid" => Ok(Self::Paid),
            "overdue" => Ok(Self::Overdue),
            "forgiven" => Ok(Self::Forgiven),
            other => Err(format!("Unknown schedule status '{other}'.")),
        }
    }
}

impl TryFrom<String> for ScheduleStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstallmentError {
    #[error("Amount must be greater than zero.")]
    NonPositiveAmount,
    #[error("Amounts accept at most two decimal places.")]
    InvalidPrecision,
    #[error("Financing months must be between 0 and {MAX_FINANCING_MONTHS}.")]
    InvalidFinancingMonths,
    #[error("Payment day must be between 1 and 31.")]
    InvalidPaymentDay,
    #[error("A financed amount of {financed} is too small for {months} installments.")]
    FinancedAmountTooSmall { financed: Decimal, months: u32 },
    #[error("Could not compute a due date for installment {0}.")]
    DueDateOutOfRange(u32),
    #[error("No installments were selected.")]
    EmptySelection,
    #[error("Installment {0} does not belong to this sale.")]
    NotInSale(i64),
    #[error("Installment #{number} is {status} and cannot be modified.")]
    NotModifiable { number: i32, status: ScheduleStatus },
    #[error("Installment #{number} already has {paid} paid; the new amount cannot be lower.")]
    BelowPaidAmount { number: i32, paid: Decimal },
    #[error("There are no open installments left to absorb the difference.")]
    NothingToRebalance,
    #[error("Rebalancing would leave installment #{number} at {amount}, below what is already paid or not positive.")]
    RebalanceOutOfRange { number: i32, amount: Decimal },
    #[error("Installment #{number} is {status} and cannot receive payments.")]
    NotPayable { number: i32, status: ScheduleStatus },
    #[error("Payment of {amount} exceeds the remaining {remaining} of installment #{number}.")]
    ExceedsRemaining {
        number: i32,
        amount: Decimal,
        remaining: Decimal,
    },
    #[error("Installment #{number} is {status} and cannot be forgiven.")]
    NotForgivable { number: i32, status: ScheduleStatus },
    #[error("Installment #{number} {reason}; the schedule can no longer be re-planned.")]
    NotReplannable { number: i32, reason: &'static str },
}

impl From<InstallmentError> for AppError {
    fn from(error: InstallmentError) -> Self {
        AppError::BadRequest(error.to_string())
    }
}

/// One installment row of a sale's payment schedule.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Installment {
    pub id: i64,
    pub venta_id: i64,
    pub lote_id: i64,
    pub installment_number: i32,
    pub original_amount: Decimal,
    pub scheduled_amount: Decimal,
    pub paid_amount: Decimal,
    pub due_date: NaiveDate,
    pub payment_date: Option<NaiveDate>,
    #[sqlx(try_from = "String")]
    pub status: ScheduleStatus,
    pub is_forgiven: bool,
    pub forgiven_at: Option<DateTime<Utc>>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Installment {
    pub fn remaining_amount(&self) -> Decimal {
        remaining_amount(self.scheduled_amount, self.paid_amount)
    }

    /// What can still be collected: zero once the row is forgiven.
    pub fn collectible_amount(&self) -> Decimal {
        if self.is_forgiven {
            Decimal::ZERO
        } else {
            self.remaining_amount()
        }
    }

    pub fn is_modifiable(&self) -> bool {
        !self.status.is_settled()
    }

    pub fn days_overdue(&self, today: NaiveDate) -> i64 {
        if self.status.is_settled() || self.due_date >= today {
            return 0;
        }
        (today - self.due_date).num_days()
    }

    pub fn refresh_status(&mut self, today: NaiveDate) {
        self.status = derive_status(
            self.scheduled_amount,
            self.paid_amount,
            self.due_date,
            today,
            self.is_forgiven,
        );
    }
}

pub fn remaining_amount(scheduled: Decimal, paid: Decimal) -> Decimal {
    (scheduled - paid).max(Decimal::ZERO)
}

/// Server-side status derivation. Overdue wins over partial: a row that is
/// past due and not fully paid reads as overdue until it is settled.
pub fn derive_status(
    scheduled: Decimal,
    paid: Decimal,
    due_date: NaiveDate,
    today: NaiveDate,
    is_forgiven: bool,
) -> ScheduleStatus {
    if is_forgiven {
        return ScheduleStatus::Forgiven;
    }
    if paid >= scheduled {
        return ScheduleStatus::Paid;
    }
    if due_date < today {
        return ScheduleStatus::Overdue;
    }
    if paid > Decimal::ZERO {
        ScheduleStatus::Partial
    } else {
        ScheduleStatus::Pending
    }
}

pub fn validate_money(amount: Decimal) -> Result<Decimal, InstallmentError> {
    if amount <= Decimal::ZERO {
        return Err(InstallmentError::NonPositiveAmount);
    }
    if amount.round_dp(MONEY_SCALE) != amount {
        return Err(InstallmentError::InvalidPrecision);
    }
    Ok(amount)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedInstallment {
    pub installment_number: i32,
    pub amount: Decimal,
    pub due_date: NaiveDate,
}

/// Split `financed` into `months` equal installments. Every row but the last
/// is truncated to the cent; the last one absorbs the remainder so the
/// schedule sums to `financed` exactly.
pub fn plan_installments(
    financed: Decimal,
    months: u32,
    payment_day: u32,
    start: NaiveDate,
) -> Result<Vec<PlannedInstallment>, InstallmentError> {
    if months > MAX_FINANCING_MONTHS {
        return Err(InstallmentError::InvalidFinancingMonths);
    }
    if !(1..=31).contains(&payment_day) {
        return Err(InstallmentError::InvalidPaymentDay);
    }
    if months == 0 || financed <= Decimal::ZERO {
        return Ok(Vec::new());
    }
    if financed.round_dp(MONEY_SCALE) != financed {
        return Err(InstallmentError::InvalidPrecision);
    }

    let count = Decimal::from(months);
    let base = (financed / count).round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::ToZero);
    if base <= Decimal::ZERO {
        return Err(InstallmentError::FinancedAmountTooSmall { financed, months });
    }
    let last = financed - base * Decimal::from(months - 1);

    (0..months)
        .map(|index| {
            let due_date = installment_due_date(start, payment_day, index)
                .ok_or(InstallmentError::DueDateOutOfRange(index + 1))?;
            Ok(PlannedInstallment {
                installment_number: (index + 1) as i32,
                amount: if index + 1 == months { last } else { base },
                due_date,
            })
        })
        .collect()
}

/// A schedule may be rebuilt only while every row is still as generated:
/// nothing paid, nothing forgiven, no amount modified.
pub fn ensure_replannable(rows: &[Installment]) -> Result<(), InstallmentError> {
    for row in rows {
        let reason = if row.paid_amount > Decimal::ZERO {
            "has payments"
        } else if row.is_forgiven || row.status == ScheduleStatus::Forgiven {
            "was forgiven"
        } else if row.scheduled_amount != row.original_amount {
            "had its amount modified"
        } else {
            continue;
        };
        return Err(InstallmentError::NotReplannable {
            number: row.installment_number,
            reason,
        });
    }
    Ok(())
}

/// Due date of the installment at `index` (0-based). Installments fall on
/// `payment_day`, clamped to the month's last day; counting starts in the
/// start month unless that month's due day is already behind `start`.
pub fn installment_due_date(start: NaiveDate, payment_day: u32, index: u32) -> Option<NaiveDate> {
    let first_of_start = start.with_day(1)?;
    let first_candidate = clamp_to_month(first_of_start, payment_day)?;
    let offset = if first_candidate < start { 1 } else { 0 };
    let month_start = first_of_start.checked_add_months(Months::new(offset + index))?;
    clamp_to_month(month_start, payment_day)
}

fn clamp_to_month(first_of_month: NaiveDate, day: u32) -> Option<NaiveDate> {
    let last_day = first_of_month
        .checked_add_months(Months::new(1))?
        .checked_sub_days(Days::new(1))?
        .day();
    first_of_month.with_day(day.min(last_day))
}

/// Register a payment against one installment.
pub fn apply_payment(
    row: &mut Installment,
    amount: Decimal,
    payment_date: NaiveDate,
    today: NaiveDate,
) -> Result<(), InstallmentError> {
    validate_money(amount)?;
    if row.status.is_settled() {
        return Err(InstallmentError::NotPayable {
            number: row.installment_number,
            status: row.status,
        });
    }
    let remaining = row.remaining_amount();
    if amount > remaining {
        return Err(InstallmentError::ExceedsRemaining {
            number: row.installment_number,
            amount,
            remaining,
        });
    }

    row.paid_amount += amount;
    row.payment_date = Some(payment_date);
    row.refresh_status(today);
    Ok(())
}

/// Waive an installment. Terminal: nothing moves a row out of forgiven.
pub fn forgive(
    row: &mut Installment,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), InstallmentError> {
    if row.status.is_settled() {
        return Err(InstallmentError::NotForgivable {
            number: row.installment_number,
            status: row.status,
        });
    }
    row.is_forgiven = true;
    row.forgiven_at = Some(now);
    row.status = ScheduleStatus::Forgiven;
    if let Some(note) = note.map(str::trim).filter(|value| !value.is_empty()) {
        row.notes = append_note(&row.notes, note);
    }
    Ok(())
}

pub fn append_note(existing: &str, note: &str) -> String {
    if existing.trim().is_empty() {
        note.to_string()
    } else {
        format!("{existing}\n{note}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmountChange {
    pub schedule_id: i64,
    pub installment_number: i32,
    pub previous_amount: Decimal,
    pub new_amount: Decimal,
    pub selected: bool,
}

/// Set the selected installments of one sale to `new_amount` and shift the
/// difference onto the sale's other open installments so the sum of
/// `scheduled_amount` over the sale does not change.
///
/// `rows` must be every installment of the sale. The returned changes cover
/// the selected rows plus each rebalanced row; nothing is mutated.
pub fn plan_amount_modification(
    rows: &[Installment],
    selected_ids: &[i64],
    new_amount: Decimal,
) -> Result<Vec<AmountChange>, InstallmentError> {
    validate_money(new_amount)?;
    if selected_ids.is_empty() {
        return Err(InstallmentError::EmptySelection);
    }

    let selected: HashSet<i64> = selected_ids.iter().copied().collect();
    let mut changes = Vec::new();
    let mut delta = Decimal::ZERO;

    let mut ordered = rows.iter().collect::<Vec<_>>();
    ordered.sort_by_key(|row| row.installment_number);

    for id in &selected {
        if !rows.iter().any(|row| row.id == *id) {
            return Err(InstallmentError::NotInSale(*id));
        }
    }

    for row in ordered.iter().filter(|row| selected.contains(&row.id)) {
        if !row.is_modifiable() {
            return Err(InstallmentError::NotModifiable {
                number: row.installment_number,
                status: row.status,
            });
        }
        if new_amount < row.paid_amount {
            return Err(InstallmentError::BelowPaidAmount {
                number: row.installment_number,
                paid: row.paid_amount,
            });
        }
        delta += new_amount - row.scheduled_amount;
        changes.push(AmountChange {
            schedule_id: row.id,
            installment_number: row.installment_number,
            previous_amount: row.scheduled_amount,
            new_amount,
            selected: true,
        });
    }

    if delta.is_zero() {
        return Ok(changes);
    }

    let adjustable = ordered
        .iter()
        .filter(|row| !selected.contains(&row.id) && row.is_modifiable())
        .collect::<Vec<_>>();
    if adjustable.is_empty() {
        return Err(InstallmentError::NothingToRebalance);
    }

    let offset = -delta;
    let count = Decimal::from(adjustable.len() as u64);
    let share = (offset / count).round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::ToZero);
    let remainder = offset - share * count;

    for (position, row) in adjustable.iter().enumerate() {
        let adjustment = if position + 1 == adjustable.len() {
            share + remainder
        } else {
            share
        };
        if adjustment.is_zero() {
            continue;
        }
        let amount = row.scheduled_amount + adjustment;
        if amount <= Decimal::ZERO || amount < row.paid_amount {
            return Err(InstallmentError::RebalanceOutOfRange {
                number: row.installment_number,
                amount,
            });
        }
        changes.push(AmountChange {
            schedule_id: row.id,
            installment_number: row.installment_number,
            previous_amount: row.scheduled_amount,
            new_amount: amount,
            selected: false,
        });
    }

    Ok(changes)
}

/// Aggregate view of a sale's schedule, as served with the payment plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSummary {
    pub total: usize,
    pub total_installments: usize,
    pub paid: usize,
    pub pending: usize,
    pub partial: usize,
    pub overdue: usize,
    pub forgiven: usize,
    pub completion_percentage: f64,
    pub scheduled_amount: Decimal,
    pub paid_amount: Decimal,
    pub remaining_amount: Decimal,
    pub is_completed: bool,
}

impl PlanSummary {
    pub fn from_rows(rows: &[Installment]) -> Self {
        let count = |status: ScheduleStatus| rows.iter().filter(|row| row.status == status).count();
        let paid = count(ScheduleStatus::Paid);
        let forgiven = count(ScheduleStatus::Forgiven);
        let total = rows.len();
        let completion_percentage = if total == 0 {
            0.0
        } else {
            ((paid as f64 / total as f64) * 10000.0).round() / 100.0
        };

        Self {
            total,
            total_installments: total,
            paid,
            pending: count(ScheduleStatus::Pending),
            partial: count(ScheduleStatus::Partial),
            overdue: count(ScheduleStatus::Overdue),
            forgiven,
            completion_percentage,
            scheduled_amount: rows.iter().map(|row| row.scheduled_amount).sum(),
            paid_amount: rows.iter().map(|row| row.paid_amount).sum(),
            remaining_amount: rows.iter().map(Installment::collectible_amount).sum(),
            is_completed: paid + forgiven == total,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;

    pub(crate) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub(crate) fn row(id: i64, number: i32, scheduled: Decimal, paid: Decimal) -> Installment {
        let created = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let mut row = Installment {
            id,
            venta_id: 1,
            lote_id: 7,
            installment_number: number,
            original_amount: scheduled,
            scheduled_amount: scheduled,
            paid_amount: paid,
            due_date: date(2026, 1, 15)
                .checked_add_months(Months::new((number - 1) as u32))
                .unwrap(),
            payment_date: None,
            status: ScheduleStatus::Pending,
            is_forgiven: false,
            forgiven_at: None,
            notes: String::new(),
            created_at: created,
            updated_at: created,
        };
        row.refresh_status(date(2026, 1, 1));
        row
    }

    fn sale_rows() -> Vec<Installment> {
        (1..=6)
            .map(|number| row(number as i64 * 10, number, dec!(1000.00), Decimal::ZERO))
            .collect()
    }

    fn apply(rows: &mut [Installment], changes: &[AmountChange]) {
        for change in changes {
            let row = rows
                .iter_mut()
                .find(|row| row.id == change.schedule_id)
                .unwrap();
            row.scheduled_amount = change.new_amount;
        }
    }

    fn total(rows: &[Installment]) -> Decimal {
        rows.iter().map(|row| row.scheduled_amount).sum()
    }

    #[test]
    fn remaining_is_floored_at_zero() {
        assert_eq!(remaining_amount(dec!(500), dec!(200)), dec!(300));
        assert_eq!(remaining_amount(dec!(500), dec!(500)), Decimal::ZERO);
        assert_eq!(remaining_amount(dec!(500), dec!(650)), Decimal::ZERO);
    }

    #[test]
    fn status_derivation_covers_every_state() {
        let due = date(2026, 3, 15);
        let before = date(2026, 3, 1);
        let after = date(2026, 3, 16);
        assert_eq!(
            derive_status(dec!(100), dec!(0), due, before, false),
            ScheduleStatus::Pending
        );
        assert_eq!(
            derive_status(dec!(100), dec!(40), due, before, false),
            ScheduleStatus::Partial
        );
        assert_eq!(
            derive_status(dec!(100), dec!(100), due, after, false),
            ScheduleStatus::Paid
        );
        assert_eq!(
            derive_status(dec!(100), dec!(40), due, after, false),
            ScheduleStatus::Overdue
        );
        assert_eq!(
            derive_status(dec!(100), dec!(0), due, due, false),
            ScheduleStatus::Pending
        );
        assert_eq!(
            derive_status(dec!(100), dec!(0), due, after, true),
            ScheduleStatus::Forgiven
        );
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in ScheduleStatus::ALL {
            assert_eq!(status.as_str().parse::<ScheduleStatus>(), Ok(status));
        }
        assert!("vencido".parse::<ScheduleStatus>().is_err());
    }

    #[test]
    fn plan_sums_to_financed_amount() {
        let plan = plan_installments(dec!(10000.00), 3, 15, date(2026, 1, 10)).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].amount, dec!(3333.33));
        assert_eq!(plan[1].amount, dec!(3333.33));
        assert_eq!(plan[2].amount, dec!(3333.34));
        let sum: Decimal = plan.iter().map(|item| item.amount).sum();
        assert_eq!(sum, dec!(10000.00));
        assert_eq!(
            plan.iter()
                .map(|item| item.installment_number)
                .collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn plan_without_financing_is_empty() {
        assert!(plan_installments(dec!(5000), 0, 15, date(2026, 1, 1))
            .unwrap()
            .is_empty());
        assert!(plan_installments(Decimal::ZERO, 12, 15, date(2026, 1, 1))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn plan_rejects_bad_inputs() {
        assert_eq!(
            plan_installments(dec!(100), 12, 0, date(2026, 1, 1)),
            Err(InstallmentError::InvalidPaymentDay)
        );
        assert_eq!(
            plan_installments(dec!(100), 361, 10, date(2026, 1, 1)),
            Err(InstallmentError::InvalidFinancingMonths)
        );
        assert_eq!(
            plan_installments(dec!(100.005), 2, 10, date(2026, 1, 1)),
            Err(InstallmentError::InvalidPrecision)
        );
    }

    #[test]
    fn only_untouched_schedules_are_replannable() {
        let today = date(2026, 1, 10);
        let fresh = vec![
            row(1, 1, dec!(500), Decimal::ZERO),
            row(2, 2, dec!(500), Decimal::ZERO),
        ];
        assert_eq!(ensure_replannable(&fresh), Ok(()));
        assert_eq!(ensure_replannable(&[]), Ok(()));

        let mut forgiven = fresh.clone();
        forgive(&mut forgiven[1], Some("acuerdo"), Utc::now()).unwrap();
        assert_eq!(
            ensure_replannable(&forgiven),
            Err(InstallmentError::NotReplannable {
                number: 2,
                reason: "was forgiven",
            })
        );

        let mut modified = fresh.clone();
        modified[0].scheduled_amount = dec!(450);
        assert!(matches!(
            ensure_replannable(&modified),
            Err(InstallmentError::NotReplannable { number: 1, .. })
        ));

        let mut paid = fresh;
        apply_payment(&mut paid[0], dec!(100), today, today).unwrap();
        assert_eq!(
            ensure_replannable(&paid),
            Err(InstallmentError::NotReplannable {
                number: 1,
                reason: "has payments",
            })
        );
    }

    #[test]
    fn plan_refuses_installments_below_a_cent() {
        assert_eq!(
            plan_installments(dec!(0.05), 12, 15, date(2026, 1, 1)),
            Err(InstallmentError::FinancedAmountTooSmall {
                financed: dec!(0.05),
                months: 12,
            })
        );
        let plan = plan_installments(dec!(0.12), 12, 15, date(2026, 1, 1)).unwrap();
        assert!(plan.iter().all(|item| item.amount == dec!(0.01)));
    }

    #[test]
    fn due_dates_clamp_to_month_end() {
        let start = date(2026, 1, 5);
        assert_eq!(installment_due_date(start, 31, 0), Some(date(2026, 1, 31)));
        assert_eq!(installment_due_date(start, 31, 1), Some(date(2026, 2, 28)));
        assert_eq!(installment_due_date(start, 31, 2), Some(date(2026, 3, 31)));
        assert_eq!(installment_due_date(start, 31, 3), Some(date(2026, 4, 30)));
    }

    #[test]
    fn due_dates_skip_a_passed_first_month() {
        let start = date(2026, 1, 20);
        assert_eq!(installment_due_date(start, 15, 0), Some(date(2026, 2, 15)));
        assert_eq!(installment_due_date(start, 20, 0), Some(date(2026, 1, 20)));
        assert_eq!(installment_due_date(start, 15, 11), Some(date(2027, 1, 15)));
    }

    #[test]
    fn paying_the_remaining_amount_settles_the_row() {
        let mut installment = row(1, 1, dec!(850.00), dec!(200.00));
        assert_eq!(installment.status, ScheduleStatus::Partial);

        let remaining = installment.remaining_amount();
        apply_payment(&mut installment, remaining, date(2026, 1, 10), date(2026, 1, 10)).unwrap();

        assert_eq!(installment.status, ScheduleStatus::Paid);
        assert_eq!(installment.remaining_amount(), Decimal::ZERO);
        assert_eq!(installment.payment_date, Some(date(2026, 1, 10)));
    }

    #[test]
    fn partial_payment_on_overdue_row_stays_overdue() {
        let mut installment = row(1, 1, dec!(850.00), Decimal::ZERO);
        let today = date(2026, 2, 1);
        installment.refresh_status(today);
        assert_eq!(installment.status, ScheduleStatus::Overdue);

        apply_payment(&mut installment, dec!(100), today, today).unwrap();
        assert_eq!(installment.status, ScheduleStatus::Overdue);

        apply_payment(&mut installment, dec!(750), today, today).unwrap();
        assert_eq!(installment.status, ScheduleStatus::Paid);
    }

    #[test]
    fn overpayment_is_rejected() {
        let mut installment = row(1, 1, dec!(850.00), dec!(800.00));
        let error = apply_payment(&mut installment, dec!(60), date(2026, 1, 2), date(2026, 1, 2))
            .unwrap_err();
        assert!(matches!(error, InstallmentError::ExceedsRemaining { .. }));
        assert_eq!(installment.paid_amount, dec!(800.00));
    }

    #[test]
    fn forgiven_rows_accept_nothing_more() {
        let mut installment = row(1, 1, dec!(850.00), dec!(100.00));
        let now = Utc.with_ymd_and_hms(2026, 1, 3, 9, 0, 0).unwrap();
        forgive(&mut installment, Some("Condonada por gerencia"), now).unwrap();

        assert_eq!(installment.status, ScheduleStatus::Forgiven);
        assert_eq!(installment.collectible_amount(), Decimal::ZERO);
        assert_eq!(installment.remaining_amount(), dec!(750.00));
        assert_eq!(installment.notes, "Condonada por gerencia");

        installment.refresh_status(date(2026, 6, 1));
        assert_eq!(installment.status, ScheduleStatus::Forgiven);
        assert!(forgive(&mut installment, None, now).is_err());
        assert!(apply_payment(&mut installment, dec!(10), date(2026, 1, 4), date(2026, 1, 4)).is_err());
    }

    #[test]
    fn paid_rows_cannot_be_forgiven() {
        let mut installment = row(1, 1, dec!(850.00), dec!(850.00));
        let now = Utc.with_ymd_and_hms(2026, 1, 3, 9, 0, 0).unwrap();
        assert!(matches!(
            forgive(&mut installment, None, now),
            Err(InstallmentError::NotForgivable { .. })
        ));
    }

    #[test]
    fn bulk_modification_preserves_sale_total() {
        let mut rows = sale_rows();
        let before = total(&rows);

        let changes = plan_amount_modification(&rows, &[10, 20], dec!(1500.00)).unwrap();
        apply(&mut rows, &changes);

        assert_eq!(total(&rows), before);
        assert_eq!(rows[0].scheduled_amount, dec!(1500.00));
        assert_eq!(rows[1].scheduled_amount, dec!(1500.00));
        assert!(rows[2..]
            .iter()
            .all(|row| row.scheduled_amount == dec!(750.00)));
    }

    #[test]
    fn rounding_remainder_lands_on_last_open_row() {
        let mut rows = sale_rows();
        let before = total(&rows);

        let changes = plan_amount_modification(&rows, &[10], dec!(1100.00)).unwrap();
        apply(&mut rows, &changes);

        assert_eq!(total(&rows), before);
        assert_eq!(rows[1].scheduled_amount, dec!(980.00));
        assert_eq!(rows[5].scheduled_amount, dec!(980.00));

        let changes = plan_amount_modification(&rows, &[20], dec!(1000.00)).unwrap();
        apply(&mut rows, &changes);
        assert_eq!(total(&rows), before);
        assert_eq!(rows[2].scheduled_amount, dec!(975.00));
        assert_eq!(rows[5].scheduled_amount, dec!(975.00));
    }

    #[test]
    fn uneven_split_keeps_exact_total() {
        let mut rows = sale_rows();
        let before = total(&rows);
        let changes = plan_amount_modification(&rows, &[10], dec!(1000.01)).unwrap();
        apply(&mut rows, &changes);
        assert_eq!(total(&rows), before);
        let last = rows.last().unwrap().scheduled_amount;
        assert_eq!(last, dec!(999.99));
    }

    #[test]
    fn settled_rows_are_skipped_when_rebalancing() {
        let mut rows = sale_rows();
        rows[5].paid_amount = dec!(1000.00);
        rows[5].refresh_status(date(2026, 1, 1));
        let now = Utc.with_ymd_and_hms(2026, 1, 3, 9, 0, 0).unwrap();
        forgive(&mut rows[4], None, now).unwrap();
        let before = total(&rows);

        let changes = plan_amount_modification(&rows, &[10], dec!(1300.00)).unwrap();
        apply(&mut rows, &changes);

        assert_eq!(total(&rows), before);
        assert_eq!(rows[4].scheduled_amount, dec!(1000.00));
        assert_eq!(rows[5].scheduled_amount, dec!(1000.00));
        assert!(rows[1..4]
            .iter()
            .all(|row| row.scheduled_amount == dec!(900.00)));
    }

    #[test]
    fn paid_and_forgiven_rows_are_not_modifiable() {
        let mut rows = sale_rows();
        rows[0].paid_amount = dec!(1000.00);
        rows[0].refresh_status(date(2026, 1, 1));
        let now = Utc.with_ymd_and_hms(2026, 1, 3, 9, 0, 0).unwrap();
        forgive(&mut rows[1], None, now).unwrap();

        for id in [10, 20] {
            let error = plan_amount_modification(&rows, &[id, 30], dec!(900)).unwrap_err();
            assert!(matches!(error, InstallmentError::NotModifiable { .. }));
        }
    }

    #[test]
    fn modification_rejects_foreign_and_empty_selections() {
        let rows = sale_rows();
        assert_eq!(
            plan_amount_modification(&rows, &[], dec!(900)),
            Err(InstallmentError::EmptySelection)
        );
        assert_eq!(
            plan_amount_modification(&rows, &[10, 999], dec!(900)),
            Err(InstallmentError::NotInSale(999))
        );
        assert_eq!(
            plan_amount_modification(&rows, &[10], dec!(-5)),
            Err(InstallmentError::NonPositiveAmount)
        );
    }

    #[test]
    fn modification_cannot_go_below_paid() {
        let mut rows = sale_rows();
        rows[0].paid_amount = dec!(400.00);
        rows[0].refresh_status(date(2026, 1, 1));
        assert!(matches!(
            plan_amount_modification(&rows, &[10], dec!(300.00)),
            Err(InstallmentError::BelowPaidAmount { .. })
        ));
    }

    #[test]
    fn selecting_every_open_row_needs_zero_delta() {
        let rows = sale_rows();
        let ids = rows.iter().map(|row| row.id).collect::<Vec<_>>();
        assert_eq!(
            plan_amount_modification(&rows, &ids, dec!(1200)),
            Err(InstallmentError::NothingToRebalance)
        );
        let unchanged = plan_amount_modification(&rows, &ids, dec!(1000.00)).unwrap();
        assert_eq!(unchanged.len(), rows.len());
        assert!(unchanged.iter().all(|change| change.selected));
    }

    #[test]
    fn rebalance_cannot_push_rows_to_zero() {
        let rows = vec![
            row(1, 1, dec!(1000.00), Decimal::ZERO),
            row(2, 2, dec!(100.00), Decimal::ZERO),
        ];
        assert!(matches!(
            plan_amount_modification(&rows, &[1], dec!(1100.00)),
            Err(InstallmentError::RebalanceOutOfRange { number: 2, .. })
        ));
    }

    #[test]
    fn plan_summary_counts_and_balances() {
        let mut rows = sale_rows();
        rows[0].paid_amount = dec!(1000.00);
        rows[1].paid_amount = dec!(250.00);
        let now = Utc.with_ymd_and_hms(2026, 1, 3, 9, 0, 0).unwrap();
        forgive(&mut rows[2], None, now).unwrap();
        for row in rows.iter_mut() {
            row.refresh_status(date(2026, 1, 1));
        }

        let summary = PlanSummary::from_rows(&rows);
        assert_eq!(summary.total, 6);
        assert_eq!(summary.paid, 1);
        assert_eq!(summary.partial, 1);
        assert_eq!(summary.forgiven, 1);
        assert_eq!(summary.pending, 3);
        assert_eq!(summary.paid_amount, dec!(1250.00));
        assert_eq!(summary.remaining_amount, dec!(3750.00));
        assert_eq!(summary.completion_percentage, 16.67);
        assert!(!summary.is_completed);
    }
}
