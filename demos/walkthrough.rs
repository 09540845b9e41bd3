// Walks one order from draft to a fully paid invoice against a throwaway store.
//
//   RUST_LOG=debug cargo run --example walkthrough

use rust_decimal::Decimal;
use sales_workflow::{
    WorkflowService,
    access::Role,
    invoice::InvoiceLineRequest,
    order::{LineItem, SalesOrderDraft, TaxType},
    payment::PaymentMethod,
    settings::Settings,
    telemetry,
    types::{Money, TaxRate},
};

fn main() -> anyhow::Result<()> {
    let mut settings = Settings::load()?;
    telemetry::init_tracing(&settings.log_filter);

    let scratch = tempfile::tempdir()?;
    settings.database_path = scratch.path().join("walkthrough.db");
    let service = WorkflowService::open(&settings)?;

    let draft = SalesOrderDraft::new()
        .set_customer("cust_shree_castings")
        .set_po_number("PO-2026-118")
        .set_tax(TaxType::Domestic, TaxRate::new(Decimal::from(18))?)
        .add_line(LineItem::new("FLANGE-80", 100, Money::from(50))?.with_weight_grams(1_250))
        .add_line(LineItem::new("SHAFT-12", 200, Money::from(75))?.with_weight_grams(800));
    let order = service.create_order(draft, "sales_rep")?;
    let totals = service.order_totals(&order.order_id)?;
    println!(
        "order {} subtotal {} tax {} total {}",
        order.order_id, totals.subtotal, totals.tax_amount, totals.total
    );

    let (_, work_orders) = service.approve_order(&order.order_id, "sales_manager")?;
    for wo in &work_orders {
        println!("{} → {} x{}", wo.number, wo.item_code, wo.quantity);
    }
    for view in service.work_order_views(&order.order_id, Role::Production)? {
        println!("production sees {} with snapshot: {}", view.number, view.snapshot.is_some());
    }

    let invoice = service.create_invoice(
        &order.order_id,
        &[InvoiceLineRequest::new(0, 100), InvoiceLineRequest::new(1, 80)],
    )?;
    let invoice = service.issue_invoice(&invoice.number)?;
    println!("{} issued for {}", invoice.number, invoice.totals.total);

    service.record_payment(
        &invoice.number,
        Money::from(10_000),
        PaymentMethod::BankTransfer,
        "UTR5520019",
    )?;
    let statement = service.invoice_statement(&invoice.number)?;
    println!("{} is {} with {} outstanding", statement.number, statement.status, statement.balance);

    service.record_payment(&invoice.number, statement.balance, PaymentMethod::Upi, "UPI-77")?;
    let statement = service.invoice_statement(&invoice.number)?;
    println!("{} is {}", statement.number, statement.status);

    for line in service.order_billing_summary(&order.order_id)? {
        println!(
            "line {} {}: invoiced {} of {}, {} open",
            line.line_index, line.item_code, line.invoiced, line.ordered, line.remaining
        );
    }

    Ok(())
}
