//! Report builders. Each one is a pure function over rows loaded by
//! `repository::reports`, so stored and live reports render identically.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};

use super::installments::ScheduleStatus;

const PAYMENTS_HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    CustomersDebt,
    PaymentsHistory,
    AvailableLots,
    SalesSummary,
    FinancialOverview,
    PendingInstallments,
    MonthlyCollections,
}

impl ReportType {
    pub const ALL: [ReportType; 7] = [
        Self::CustomersDebt,
        Self::PaymentsHistory,
        Self::AvailableLots,
        Self::SalesSummary,
        Self::FinancialOverview,
        Self::PendingInstallments,
        Self::MonthlyCollections,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CustomersDebt => "customers_debt",
            Self::PaymentsHistory => "payments_history",
            Self::AvailableLots => "available_lots",
            Self::SalesSummary => "sales_summary",
            Self::FinancialOverview => "financial_overview",
            Self::PendingInstallments => "pending_installments",
            Self::MonthlyCollections => "monthly_collections",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::CustomersDebt => "Clientes con Deuda",
            Self::PaymentsHistory => "Historial de Pagos",
            Self::AvailableLots => "Lotes Disponibles",
            Self::SalesSummary => "Resumen de Ventas",
            Self::FinancialOverview => "Resumen Financiero",
            Self::PendingInstallments => "Cuotas Pendientes",
            Self::MonthlyCollections => "Cobranzas Mensuales",
        }
    }

    /// Accepts `customers_debt` as well as the URL form `customers-debt`.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ReportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportPeriod {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl ReportPeriod {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |start| date >= start) && self.end.map_or(true, |end| date <= end)
    }

    fn to_json(self) -> Value {
        json!({ "start_date": self.start, "end_date": self.end })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LotFact {
    pub id: i64,
    pub block: String,
    pub lot_number: String,
    pub area: Decimal,
    pub price: Decimal,
    pub status: String,
    pub owner_id: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SaleFact {
    pub id: i64,
    pub lote_id: i64,
    pub lote_display: String,
    pub lote_area: Decimal,
    pub customer_id: i64,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub customer_phone: String,
    pub status: String,
    pub sale_price: Decimal,
    pub initial_payment: Decimal,
    pub financing_months: i32,
    pub sale_date: NaiveDate,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InstallmentFact {
    pub schedule_id: i64,
    pub venta_id: i64,
    pub customer_id: i64,
    pub installment_number: i32,
    pub scheduled_amount: Decimal,
    pub paid_amount: Decimal,
    pub due_date: NaiveDate,
    #[sqlx(try_from = "String")]
    pub status: ScheduleStatus,
    pub is_forgiven: bool,
}

impl InstallmentFact {
    fn is_open(&self) -> bool {
        !self.status.is_settled()
    }

    fn collectible(&self) -> Decimal {
        if self.is_forgiven {
            Decimal::ZERO
        } else {
            (self.scheduled_amount - self.paid_amount).max(Decimal::ZERO)
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentFact {
    pub id: i64,
    pub venta_id: i64,
    pub customer_name: String,
    pub lote_display: String,
    pub installment_number: Option<i32>,
    pub payment_type: String,
    pub amount: Decimal,
    pub method: String,
    pub receipt_number: String,
    pub payment_date: NaiveDate,
    pub notes: String,
}

/// Everything a report may read. Sales and installments cover active sales
/// and history alike; builders filter what they need.
#[derive(Debug, Clone, Default)]
pub struct ReportDataset {
    pub lots: Vec<LotFact>,
    pub sales: Vec<SaleFact>,
    pub installments: Vec<InstallmentFact>,
    pub payments: Vec<PaymentFact>,
}

pub fn build_report(
    report_type: ReportType,
    dataset: &ReportDataset,
    period: ReportPeriod,
    today: NaiveDate,
) -> Value {
    match report_type {
        ReportType::CustomersDebt => customers_debt(dataset, today),
        ReportType::PaymentsHistory => payments_history(&dataset.payments, period),
        ReportType::AvailableLots => available_lots(&dataset.lots),
        ReportType::SalesSummary => sales_summary(&dataset.sales, period),
        ReportType::FinancialOverview => financial_overview(dataset, period, today),
        ReportType::PendingInstallments => pending_installments(dataset, today),
        ReportType::MonthlyCollections => monthly_collections(&dataset.payments, period),
    }
}

fn active_sales(sales: &[SaleFact]) -> impl Iterator<Item = &SaleFact> {
    sales.iter().filter(|sale| sale.status == "active")
}

fn open_rows<'a>(
    dataset: &'a ReportDataset,
    venta_id: i64,
) -> impl Iterator<Item = &'a InstallmentFact> + 'a {
    dataset
        .installments
        .iter()
        .filter(move |row| row.venta_id == venta_id && row.is_open())
}

struct CustomerDebt<'a> {
    sale: &'a SaleFact,
    sales: Vec<&'a SaleFact>,
    total_debt: Decimal,
    pending_installments: usize,
}

/// Debt per customer over active sales, largest first.
fn debts_by_customer(dataset: &ReportDataset) -> Vec<CustomerDebt<'_>> {
    let mut by_customer: BTreeMap<i64, CustomerDebt<'_>> = BTreeMap::new();
    for sale in active_sales(&dataset.sales) {
        let debt = open_rows(dataset, sale.id)
            .map(InstallmentFact::collectible)
            .sum::<Decimal>();
        let pending = open_rows(dataset, sale.id).count();
        let entry = by_customer
            .entry(sale.customer_id)
            .or_insert_with(|| CustomerDebt {
                sale,
                sales: Vec::new(),
                total_debt: Decimal::ZERO,
                pending_installments: 0,
            });
        entry.sales.push(sale);
        entry.total_debt += debt;
        entry.pending_installments += pending;
    }

    let mut debts = by_customer
        .into_values()
        .filter(|debt| debt.total_debt > Decimal::ZERO)
        .collect::<Vec<_>>();
    debts.sort_by(|a, b| {
        b.total_debt
            .cmp(&a.total_debt)
            .then_with(|| a.sale.customer_name.cmp(&b.sale.customer_name))
    });
    debts
}

pub fn customers_debt(dataset: &ReportDataset, today: NaiveDate) -> Value {
    let debts = debts_by_customer(dataset);
    let total_debt = debts.iter().map(|debt| debt.total_debt).sum::<Decimal>();

    let customers = debts
        .iter()
        .map(|debt| {
            let lotes = debt
                .sales
                .iter()
                .map(|sale| {
                    let remaining = open_rows(dataset, sale.id)
                        .map(InstallmentFact::collectible)
                        .sum::<Decimal>();
                    let next_due = open_rows(dataset, sale.id).map(|row| row.due_date).min();
                    let installments_paid = dataset
                        .installments
                        .iter()
                        .filter(|row| {
                            row.venta_id == sale.id && row.status == ScheduleStatus::Paid
                        })
                        .count();
                    json!({
                        "venta_id": sale.id,
                        "lote_id": sale.lote_id,
                        "lote_description": sale.lote_display,
                        "remaining_balance": remaining,
                        "installments_paid": installments_paid,
                        "financing_months": sale.financing_months,
                        "next_due_date": next_due,
                        "days_until_next_payment": next_due.map(|due| (due - today).num_days()),
                    })
                })
                .collect::<Vec<_>>();
            json!({
                "customer_id": debt.sale.customer_id,
                "customer_name": debt.sale.customer_name,
                "customer_email": debt.sale.customer_email,
                "customer_phone": debt.sale.customer_phone,
                "total_debt": debt.total_debt,
                "pending_installments": debt.pending_installments,
                "lotes": lotes,
            })
        })
        .collect::<Vec<_>>();

    json!({
        "total_customers_with_debt": debts.len(),
        "total_debt_amount": total_debt,
        "customers": customers,
    })
}

pub fn payments_history(payments: &[PaymentFact], period: ReportPeriod) -> Value {
    let mut selected = payments
        .iter()
        .filter(|payment| period.contains(payment.payment_date))
        .collect::<Vec<_>>();
    selected.sort_by(|a, b| b.payment_date.cmp(&a.payment_date).then(b.id.cmp(&a.id)));
    let total_amount = selected.iter().map(|payment| payment.amount).sum::<Decimal>();

    json!({
        "total_payments": selected.len(),
        "total_amount": total_amount,
        "period": period.to_json(),
        "payments": selected
            .iter()
            .take(PAYMENTS_HISTORY_LIMIT)
            .map(|payment| json!({
                "id": payment.id,
                "venta_id": payment.venta_id,
                "amount": payment.amount,
                "payment_date": payment.payment_date,
                "payment_type": payment.payment_type,
                "method": payment.method,
                "receipt_number": payment.receipt_number,
                "lote": payment.lote_display,
                "customer": payment.customer_name,
                "installment_number": payment.installment_number,
                "notes": payment.notes,
            }))
            .collect::<Vec<_>>(),
    })
}

pub fn available_lots(lots: &[LotFact]) -> Value {
    let available = lots
        .iter()
        .filter(|lot| lot.status == "disponible")
        .collect::<Vec<_>>();
    let total_area = available.iter().map(|lot| lot.area).sum::<Decimal>();
    let total_value = available.iter().map(|lot| lot.price).sum::<Decimal>();
    let avg_price_per_m2 = if total_area > Decimal::ZERO {
        (total_value / total_area).round_dp(2)
    } else {
        Decimal::ZERO
    };

    json!({
        "summary": {
            "total_count": available.len(),
            "total_area": total_area,
            "total_value": total_value,
            "avg_price_per_m2": avg_price_per_m2,
        },
        "lots": available
            .iter()
            .map(|lot| json!({
                "id": lot.id,
                "block": lot.block,
                "lot_number": lot.lot_number,
                "area": lot.area,
                "price": lot.price,
                "price_per_m2": super::sales::price_per_m2(lot.price, lot.area)
                    .unwrap_or(Decimal::ZERO),
            }))
            .collect::<Vec<_>>(),
    })
}

pub fn sales_summary(sales: &[SaleFact], period: ReportPeriod) -> Value {
    let in_period = sales
        .iter()
        .filter(|sale| period.contains(sale.sale_date))
        .collect::<Vec<_>>();
    let counted = in_period
        .iter()
        .filter(|sale| sale.status != "cancelled")
        .collect::<Vec<_>>();
    let total_value = counted.iter().map(|sale| sale.sale_price).sum::<Decimal>();
    let total_initial = counted.iter().map(|sale| sale.initial_payment).sum::<Decimal>();
    let average = if counted.is_empty() {
        Decimal::ZERO
    } else {
        (total_value / Decimal::from(counted.len() as u64)).round_dp(2)
    };

    let mut by_status = BTreeMap::<&str, usize>::new();
    for sale in &in_period {
        *by_status.entry(sale.status.as_str()).or_default() += 1;
    }

    json!({
        "period": period.to_json(),
        "total_lots_sold": counted.len(),
        "total_area_sold": counted.iter().map(|sale| sale.lote_area).sum::<Decimal>(),
        "total_sales_value": total_value,
        "total_initial_payments": total_initial,
        "total_financed": total_value - total_initial,
        "average_sale_price": average,
        "by_status": by_status,
    })
}

pub fn financial_overview(dataset: &ReportDataset, period: ReportPeriod, today: NaiveDate) -> Value {
    let payments = dataset
        .payments
        .iter()
        .filter(|payment| period.contains(payment.payment_date))
        .collect::<Vec<_>>();
    let available = available_lots(&dataset.lots);
    let debts = debts_by_customer(dataset);
    let overdue_amount = active_sales(&dataset.sales)
        .flat_map(|sale| open_rows(dataset, sale.id))
        .filter(|row| row.due_date < today)
        .map(InstallmentFact::collectible)
        .sum::<Decimal>();

    json!({
        "sales": sales_summary(&dataset.sales, period),
        "payments": {
            "total_payments": payments.len(),
            "total_amount": payments.iter().map(|payment| payment.amount).sum::<Decimal>(),
        },
        "inventory": {
            "available_lots": available["summary"]["total_count"],
            "available_value": available["summary"]["total_value"],
        },
        "receivables": {
            "customers_with_debt": debts.len(),
            "total_debt": debts.iter().map(|debt| debt.total_debt).sum::<Decimal>(),
            "overdue_amount": overdue_amount,
        },
    })
}

pub fn pending_installments(dataset: &ReportDataset, today: NaiveDate) -> Value {
    let debts = debts_by_customer(dataset);
    let customers = debts
        .iter()
        .filter(|debt| debt.pending_installments > 0)
        .map(|debt| {
            let detail = debt
                .sales
                .iter()
                .filter_map(|sale| {
                    let rows = open_rows(dataset, sale.id).collect::<Vec<_>>();
                    if rows.is_empty() {
                        return None;
                    }
                    let remaining = rows.iter().map(|row| row.collectible()).sum::<Decimal>();
                    Some(json!({
                        "venta_id": sale.id,
                        "lote": sale.lote_display,
                        "pending_installments": rows.len(),
                        "overdue_installments": rows.iter().filter(|row| row.due_date < today).count(),
                        "remaining_balance": remaining,
                        "next_due_date": rows.iter().map(|row| row.due_date).min(),
                        "next_installment_amount": rows
                            .iter()
                            .min_by_key(|row| row.installment_number)
                            .map(|row| row.collectible()),
                    }))
                })
                .collect::<Vec<_>>();
            json!({
                "customer_id": debt.sale.customer_id,
                "customer_name": debt.sale.customer_name,
                "pending_installments": debt.pending_installments,
                "total_debt": debt.total_debt,
                "lotes_detail": detail,
            })
        })
        .collect::<Vec<_>>();

    json!({
        "total_pending_installments": debts.iter().map(|debt| debt.pending_installments).sum::<usize>(),
        "customers": customers,
    })
}

pub fn monthly_collections(payments: &[PaymentFact], period: ReportPeriod) -> Value {
    let selected = payments
        .iter()
        .filter(|payment| period.contains(payment.payment_date))
        .collect::<Vec<_>>();

    let mut by_method = BTreeMap::<&str, (usize, Decimal)>::new();
    let mut by_month = BTreeMap::<String, (usize, Decimal)>::new();
    for payment in &selected {
        let method = by_method.entry(payment.method.as_str()).or_default();
        method.0 += 1;
        method.1 += payment.amount;
        let month_key = format!(
            "{:04}-{:02}",
            payment.payment_date.year(),
            payment.payment_date.month()
        );
        let month = by_month.entry(month_key).or_default();
        month.0 += 1;
        month.1 += payment.amount;
    }

    json!({
        "period": period.to_json(),
        "total_collected": selected.iter().map(|payment| payment.amount).sum::<Decimal>(),
        "total_transactions": selected.len(),
        "by_method": by_method
            .into_iter()
            .map(|(method, (count, total))| json!({ "method": method, "count": count, "total": total }))
            .collect::<Vec<_>>(),
        "monthly_breakdown": by_month
            .into_iter()
            .map(|(month, (count, total))| json!({ "month": month, "count": count, "total": total }))
            .collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    fn money(value: &serde_json::Value) -> Decimal {
        value.as_str().unwrap().parse().unwrap()
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, d).unwrap()
    }

    fn sale(id: i64, customer_id: i64, name: &str, status: &str, price: Decimal) -> SaleFact {
        SaleFact {
            id,
            lote_id: id * 100,
            lote_display: format!("Mz. A - Lote {id}"),
            lote_area: dec!(120.00),
            customer_id,
            customer_name: name.to_string(),
            customer_email: None,
            customer_phone: "999 111 222".to_string(),
            status: status.to_string(),
            sale_price: price,
            initial_payment: dec!(2000.00),
            financing_months: 12,
            sale_date: date(1, 10),
        }
    }

    fn cuota(
        venta_id: i64,
        customer_id: i64,
        number: i32,
        scheduled: Decimal,
        paid: Decimal,
        status: ScheduleStatus,
        due: NaiveDate,
    ) -> InstallmentFact {
        InstallmentFact {
            schedule_id: venta_id * 1000 + number as i64,
            venta_id,
            customer_id,
            installment_number: number,
            scheduled_amount: scheduled,
            paid_amount: paid,
            due_date: due,
            is_forgiven: status == ScheduleStatus::Forgiven,
            status,
        }
    }

    fn payment(id: i64, amount: Decimal, method: &str, day: NaiveDate) -> PaymentFact {
        PaymentFact {
            id,
            venta_id: 1,
            customer_name: "Rosa Quispe".to_string(),
            lote_display: "Mz. A - Lote 1".to_string(),
            installment_number: Some(1),
            payment_type: "installment".to_string(),
            amount,
            method: method.to_string(),
            receipt_number: format!("R-{id}"),
            payment_date: day,
            notes: String::new(),
        }
    }

    fn dataset() -> ReportDataset {
        ReportDataset {
            lots: vec![
                LotFact {
                    id: 1,
                    block: "A".to_string(),
                    lot_number: "1".to_string(),
                    area: dec!(100.00),
                    price: dec!(20000.00),
                    status: "disponible".to_string(),
                    owner_id: None,
                },
                LotFact {
                    id: 2,
                    block: "A".to_string(),
                    lot_number: "2".to_string(),
                    area: dec!(150.00),
                    price: dec!(40000.00),
                    status: "disponible".to_string(),
                    owner_id: None,
                },
                LotFact {
                    id: 3,
                    block: "B".to_string(),
                    lot_number: "1".to_string(),
                    area: dec!(200.00),
                    price: dec!(50000.00),
                    status: "vendido".to_string(),
                    owner_id: Some(9),
                },
            ],
            sales: vec![
                sale(1, 9, "Rosa Quispe", "active", dec!(12000.00)),
                sale(2, 8, "Luis Mamani", "active", dec!(8000.00)),
                sale(3, 7, "Ana Flores", "cancelled", dec!(9000.00)),
            ],
            installments: vec![
                cuota(1, 9, 1, dec!(1000), dec!(1000), ScheduleStatus::Paid, date(2, 15)),
                cuota(1, 9, 2, dec!(1000), dec!(300), ScheduleStatus::Overdue, date(3, 15)),
                cuota(1, 9, 3, dec!(1000), dec!(0), ScheduleStatus::Pending, date(4, 15)),
                cuota(2, 8, 1, dec!(500), dec!(0), ScheduleStatus::Forgiven, date(2, 15)),
                cuota(2, 8, 2, dec!(500), dec!(0), ScheduleStatus::Pending, date(4, 15)),
                cuota(3, 7, 1, dec!(900), dec!(0), ScheduleStatus::Pending, date(4, 15)),
            ],
            payments: vec![
                payment(1, dec!(1000), "efectivo", date(2, 14)),
                payment(2, dec!(300), "transferencia", date(3, 20)),
                payment(3, dec!(250), "efectivo", date(3, 21)),
            ],
        }
    }

    #[test]
    fn report_types_parse_both_spellings() {
        assert_eq!(ReportType::parse("customers-debt"), Some(ReportType::CustomersDebt));
        assert_eq!(ReportType::parse("monthly_collections"), Some(ReportType::MonthlyCollections));
        assert_eq!(ReportType::parse("custom"), None);
    }

    #[test]
    fn customers_debt_sums_collectible_balances() {
        let report = customers_debt(&dataset(), date(3, 20));
        assert_eq!(report["total_customers_with_debt"], json!(2));
        assert_eq!(money(&report["total_debt_amount"]), dec!(2200));
        assert_eq!(report["customers"][0]["customer_name"], json!("Rosa Quispe"));
        assert_eq!(money(&report["customers"][0]["total_debt"]), dec!(1700));
        assert_eq!(report["customers"][0]["pending_installments"], json!(2));
        assert_eq!(
            report["customers"][0]["lotes"][0]["days_until_next_payment"],
            json!(-5)
        );
        assert_eq!(money(&report["customers"][1]["total_debt"]), dec!(500));
    }

    #[test]
    fn payments_history_filters_period() {
        let period = ReportPeriod {
            start: Some(date(3, 1)),
            end: Some(date(3, 31)),
        };
        let report = payments_history(&dataset().payments, period);
        assert_eq!(report["total_payments"], json!(2));
        assert_eq!(money(&report["total_amount"]), dec!(550));
        assert_eq!(report["payments"][0]["id"], json!(3));
        assert_eq!(report["period"]["start_date"], json!("2026-03-01"));
    }

    #[test]
    fn available_lots_summarises_inventory() {
        let report = available_lots(&dataset().lots);
        assert_eq!(report["summary"]["total_count"], json!(2));
        assert_eq!(money(&report["summary"]["total_area"]), dec!(250.00));
        assert_eq!(money(&report["summary"]["avg_price_per_m2"]), dec!(240.00));
        assert_eq!(money(&report["lots"][1]["price_per_m2"]), dec!(266.67));
    }

    #[test]
    fn sales_summary_skips_cancelled() {
        let report = sales_summary(&dataset().sales, ReportPeriod::default());
        assert_eq!(report["total_lots_sold"], json!(2));
        assert_eq!(money(&report["total_sales_value"]), dec!(20000.00));
        assert_eq!(money(&report["total_financed"]), dec!(16000.00));
        assert_eq!(report["by_status"]["cancelled"], json!(1));
    }

    #[test]
    fn financial_overview_reports_overdue_receivables() {
        let report = financial_overview(&dataset(), ReportPeriod::default(), date(3, 20));
        assert_eq!(report["receivables"]["customers_with_debt"], json!(2));
        assert_eq!(money(&report["receivables"]["overdue_amount"]), dec!(700));
        assert_eq!(report["inventory"]["available_lots"], json!(2));
        assert_eq!(report["payments"]["total_payments"], json!(3));
    }

    #[test]
    fn pending_installments_details_each_sale() {
        let report = pending_installments(&dataset(), date(3, 20));
        assert_eq!(report["total_pending_installments"], json!(3));
        let rosa = &report["customers"][0];
        assert_eq!(rosa["lotes_detail"][0]["overdue_installments"], json!(1));
        assert_eq!(money(&rosa["lotes_detail"][0]["next_installment_amount"]), dec!(700));
    }

    #[test]
    fn monthly_collections_group_by_month_and_method() {
        let report = monthly_collections(&dataset().payments, ReportPeriod::default());
        assert_eq!(money(&report["total_collected"]), dec!(1550));
        assert_eq!(report["monthly_breakdown"][0]["month"], json!("2026-02"));
        assert_eq!(report["monthly_breakdown"][1]["count"], json!(2));
        assert_eq!(report["by_method"][0]["method"], json!("efectivo"));
        assert_eq!(money(&report["by_method"][0]["total"]), dec!(1250));
    }

    #[test]
    fn every_type_builds() {
        let data = dataset();
        for kind in ReportType::ALL {
            let value = build_report(kind, &data, ReportPeriod::default(), date(3, 20));
            assert!(value.is_object(), "{} should render an object", kind.as_str());
        }
    }
}
