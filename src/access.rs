//! Role-based visibility of financial fields
//!
//! The workflow always computes complete figures. This layer sits on the read
//! path and blanks pricing, weights, snapshots and payment terms for roles that
//! may not see them. The role is always passed in by the caller.
use super::invoice::{DisplayStatus, Invoice};
use super::order::{OrderStatus, SalesOrder};
use super::payment::Payment;
use super::pricing::Totals;
use super::types::{Money, TimeStamp};
use super::work_order::{FinancialSnapshot, ProductionStage, WorkOrder};
use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Finance,
    Sales,
    Production,
    Warehouse,
}

pub fn can_view_financials(role: Role) -> bool {
    matches!(role, Role::Admin | Role::Finance | Role::Sales)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineView {
    pub item_code: String,
    pub quantity: u64,
    pub price_per_unit: Option<Money>,
    pub weight_per_piece_grams: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderView {
    pub order_id: String,
    pub customer_id: String,
    pub po_number: String,
    pub status: OrderStatus,
    pub lines: Vec<LineView>,
    pub totals: Option<Totals>,
    pub payment_terms_days: Option<u32>,
}

impl OrderView {
    pub fn for_role(order: &SalesOrder, totals: Totals, role: Role) -> Self {
        let visible = can_view_financials(role);
        Self {
            order_id: order.order_id.clone(),
            customer_id: order.customer_id().to_string(),
            po_number: order.po_number().to_string(),
            status: order.current_state(),
            lines: order
                .lines()
                .iter()
                .map(|l| LineView {
                    item_code: l.item_code.clone(),
                    quantity: l.quantity,
                    price_per_unit: visible.then_some(l.price_per_unit),
                    weight_per_piece_grams: visible.then_some(l.weight_per_piece_grams),
                })
                .collect(),
            totals: visible.then_some(totals),
            payment_terms_days: visible.then_some(order.payment_terms_days()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkOrderView {
    pub number: String,
    pub order_id: String,
    pub line_index: u32,
    pub item_code: String,
    pub quantity: u64,
    pub stage: ProductionStage,
    pub snapshot: Option<FinancialSnapshot>,
}

impl WorkOrderView {
    pub fn for_role(work_order: &WorkOrder, role: Role) -> Self {
        Self {
            number: work_order.number.clone(),
            order_id: work_order.order_id.clone(),
            line_index: work_order.line_index,
            item_code: work_order.item_code.clone(),
            quantity: work_order.quantity,
            stage: work_order.stage,
            snapshot: can_view_financials(role).then(|| work_order.snapshot.clone()),
        }
    }
}

/// Invoices are financial documents: restricted roles see only that one exists and its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceView {
    pub number: String,
    pub order_id: String,
    pub status: DisplayStatus,
    pub totals: Option<Totals>,
    pub balance: Option<Money>,
    pub due_date: Option<TimeStamp<Utc>>,
    pub payment_terms_days: Option<u32>,
}

impl InvoiceView {
    pub fn for_role(
        invoice: &Invoice,
        payments: &[Payment],
        as_of: TimeStamp<Utc>,
        role: Role,
    ) -> Self {
        let visible = can_view_financials(role);
        Self {
            number: invoice.number.clone(),
            order_id: invoice.order_id.clone(),
            status: invoice.display_status(payments, as_of),
            totals: visible.then_some(invoice.totals),
            balance: visible.then(|| invoice.ledger(payments).balance),
            due_date: invoice.due_date(),
            payment_terms_days: visible.then_some(invoice.payment_terms_days),
        }
    }
}
