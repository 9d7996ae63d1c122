use crate::{
    error::AppResult,
    services::reports::{
        InstallmentFact, LotFact, PaymentFact, ReportDataset, ReportType, SaleFact,
    },
};

const LOT_FACTS: &str = "SELECT id, block, lot_number, area, price, status, owner_id \
     FROM lotes ORDER BY block ASC, lot_number ASC";

const SALE_FACTS: &str = "SELECT v.id, v.lote_id, \
     ('Mz. ' || l.block || ' - Lote ' || l.lot_number) AS lote_display, l.area AS lote_area, \
     v.customer_id, (c.first_name || ' ' || c.last_name) AS customer_name, \
     c.email AS customer_email, c.phone AS customer_phone, v.status, v.sale_price, \
     v.initial_payment, v.financing_months, v.sale_date \
     FROM ventas v \
     JOIN lotes l ON l.id = v.lote_id \
     JOIN customers c ON c.id = v.customer_id \
     ORDER BY v.sale_date ASC, v.id ASC";

const INSTALLMENT_FACTS: &str = "SELECT s.id AS schedule_id, s.venta_id, v.customer_id, \
     s.installment_number, s.scheduled_amount, s.paid_amount, s.due_date, s.status, s.is_forgiven \
     FROM payment_schedules s \
     JOIN ventas v ON v.id = s.venta_id \
     WHERE v.status = 'active' \
     ORDER BY s.venta_id ASC, s.installment_number ASC";

const PAYMENT_FACTS: &str = "SELECT p.id, p.venta_id, \
     (c.first_name || ' ' || c.last_name) AS customer_name, \
     ('Mz. ' || l.block || ' - Lote ' || l.lot_number) AS lote_display, \
     s.installment_number, p.payment_type, p.amount, p.method, p.receipt_number, \
     p.payment_date, p.notes \
     FROM payments p \
     JOIN ventas v ON v.id = p.venta_id \
     JOIN customers c ON c.id = v.customer_id \
     JOIN lotes l ON l.id = p.lote_id \
     LEFT JOIN payment_schedules s ON s.id = p.payment_schedule_id \
     ORDER BY p.payment_date DESC, p.id DESC";

struct Needs {
    lots: bool,
    sales: bool,
    installments: bool,
    payments: bool,
}

fn needs(report_type: ReportType) -> Needs {
    match report_type {
        ReportType::AvailableLots => Needs {
            lots: true,
            sales: false,
            installments: false,
            payments: false,
        },
        ReportType::PaymentsHistory | ReportType::MonthlyCollections => Needs {
            lots: false,
            sales: false,
            installments: false,
            payments: true,
        },
        ReportType::SalesSummary => Needs {
            lots: false,
            sales: true,
            installments: false,
            payments: false,
        },
        ReportType::CustomersDebt | ReportType::PendingInstallments => Needs {
            lots: false,
            sales: true,
            installments: true,
            payments: false,
        },
        ReportType::FinancialOverview => Needs {
            lots: true,
            sales: true,
            installments: true,
            payments: true,
        },
    }
}

/// Loads only the row sets the given report reads.
pub async fn load_dataset(pool: &sqlx::PgPool, report_type: ReportType) -> AppResult<ReportDataset> {
    let needs = needs(report_type);
    let mut dataset = ReportDataset::default();

    if needs.lots {
        dataset.lots = sqlx::query_as::<_, LotFact>(LOT_FACTS).fetch_all(pool).await?;
    }
    if needs.sales {
        dataset.sales = sqlx::query_as::<_, SaleFact>(SALE_FACTS)
            .fetch_all(pool)
            .await?;
    }
    if needs.installments {
        dataset.installments = sqlx::query_as::<_, InstallmentFact>(INSTALLMENT_FACTS)
            .fetch_all(pool)
            .await?;
    }
    if needs.payments {
        dataset.payments = sqlx::query_as::<_, PaymentFact>(PAYMENT_FACTS)
            .fetch_all(pool)
            .await?;
    }

    tracing::debug!(
        report_type = report_type.as_str(),
        lots = dataset.lots.len(),
        sales = dataset.sales.len(),
        installments = dataset.installments.len(),
        payments = dataset.payments.len(),
        "Loaded report dataset"
    );
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overview_loads_everything() {
        let overview = needs(ReportType::FinancialOverview);
        assert!(overview.lots && overview.sales && overview.installments && overview.payments);
    }

    #[test]
    fn debt_reports_skip_payments() {
        for kind in [ReportType::CustomersDebt, ReportType::PendingInstallments] {
            let loaded = needs(kind);
            assert!(loaded.sales && loaded.installments);
            assert!(!loaded.payments && !loaded.lots);
        }
    }
}
