//! Invoices raised against approved sales orders
use super::error::WorkflowError;
use super::order::{OrderStatus, SalesOrder};
use super::payment::{LedgerState, Payment, Settlement};
use super::pricing::{self, PricedLine, Totals};
use super::types::{Money, TaxRate, TimeStamp};
use chrono::Utc;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvoiceStatus {
    Draft,
    Issued,
    PartPaid,
    Paid,
}

/// What a reader is shown. `Overdue` is computed on every read and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayStatus {
    Draft,
    Issued,
    PartPaid,
    Paid,
    Overdue,
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::PartPaid => "part_paid",
            InvoiceStatus::Paid => "paid",
        })
    }
}

impl From<InvoiceStatus> for DisplayStatus {
    fn from(value: InvoiceStatus) -> Self {
        match value {
            InvoiceStatus::Draft => DisplayStatus::Draft,
            InvoiceStatus::Issued => DisplayStatus::Issued,
            InvoiceStatus::PartPaid => DisplayStatus::PartPaid,
            InvoiceStatus::Paid => DisplayStatus::Paid,
        }
    }
}

/// Caller's request to bill `quantity` units of order line `line_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceLineRequest {
    pub line_index: usize,
    pub quantity: u64,
}

impl InvoiceLineRequest {
    pub fn new(line_index: usize, quantity: u64) -> Self {
        Self {
            line_index,
            quantity,
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct InvoiceLine {
    #[n(0)]
    pub line_index: u32,
    #[n(1)]
    pub item_code: String,
    #[n(2)]
    pub quantity: u64,
    #[n(3)]
    pub price_per_unit: Money,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Issuance {
    #[n(0)]
    pub issued_at: TimeStamp<Utc>,
    #[n(1)]
    pub due_date: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    #[n(0)]
    pub number: String, // INV-YYYY-NNNNN
    #[n(1)]
    pub order_id: String,
    #[n(2)]
    pub customer_id: String,
    #[n(3)]
    pub currency: String,
    #[n(4)]
    pub tax_rate: TaxRate,
    #[n(5)]
    pub payment_terms_days: u32,
    #[n(6)]
    pub lines: Vec<InvoiceLine>,
    #[n(7)]
    pub totals: Totals,
    #[n(8)]
    pub created_at: TimeStamp<Utc>,
    #[n(9)]
    pub issuance: Option<Issuance>,
    #[n(10)]
    pub ledger_len: u64, // payments appended so far
}

/// Per-line quantity still open for invoicing, given what issued invoices already consumed.
pub fn remaining_quantities(order: &SalesOrder, invoiced: &[u64]) -> Vec<u64> {
    order
        .lines()
        .iter()
        .enumerate()
        .map(|(i, line)| line.quantity.saturating_sub(invoiced.get(i).copied().unwrap_or(0)))
        .collect()
}

fn check_quantities(
    order: &SalesOrder,
    requests: &[InvoiceLineRequest],
    invoiced: &[u64],
) -> Result<(), WorkflowError> {
    let remaining = remaining_quantities(order, invoiced);
    let mut requested: BTreeMap<usize, u64> = BTreeMap::new();

    for request in requests {
        order.line(request.line_index)?;
        if request.quantity == 0 {
            return Err(WorkflowError::invalid(format!(
                "invoiced quantity for line {} must be greater than zero",
                request.line_index
            )));
        }
        let entry = requested.entry(request.line_index).or_insert(0);
        *entry = entry
            .checked_add(request.quantity)
            .ok_or_else(|| WorkflowError::invalid("invoiced quantity overflows"))?;
    }

    for (line_index, quantity) in requested {
        if quantity > remaining[line_index] {
            return Err(WorkflowError::OverInvoiced {
                line_index,
                requested: quantity,
                remaining: remaining[line_index],
            });
        }
    }
    Ok(())
}

impl Invoice {
    /// Builds a draft. Quantities are checked here and again at issue, which is the commit point.
    pub fn draft(
        number: String,
        order: &SalesOrder,
        requests: &[InvoiceLineRequest],
        invoiced: &[u64],
        at: TimeStamp<Utc>,
    ) -> Result<Self, WorkflowError> {
        let state = order.current_state();
        if state != OrderStatus::Approved {
            return Err(WorkflowError::InvalidTransition {
                entity: "sales order",
                state: state.to_string(),
                action: "invoice",
            });
        }
        if requests.is_empty() {
            return Err(WorkflowError::invalid("an invoice needs at least one line"));
        }
        check_quantities(order, requests, invoiced)?;

        let lines = requests
            .iter()
            .map(|r| -> Result<InvoiceLine, WorkflowError> {
                let source = order.line(r.line_index)?;
                Ok(InvoiceLine {
                    line_index: u32::try_from(r.line_index)
                        .map_err(|_| WorkflowError::invalid("line index out of range"))?,
                    item_code: source.item_code.clone(),
                    quantity: r.quantity,
                    price_per_unit: source.price_per_unit,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let priced: Vec<PricedLine> = lines
            .iter()
            .map(|l| PricedLine::new(l.quantity, l.price_per_unit))
            .collect();
        let totals = pricing::compute_totals(&priced, order.tax_rate())?;

        Ok(Self {
            number,
            order_id: order.order_id.clone(),
            customer_id: order.customer_id().to_string(),
            currency: order.currency().to_string(),
            tax_rate: order.tax_rate(),
            payment_terms_days: order.payment_terms_days(),
            lines,
            totals,
            created_at: at,
            issuance: None,
            ledger_len: 0,
        })
    }

    pub fn requests(&self) -> Vec<InvoiceLineRequest> {
        self.lines
            .iter()
            .map(|l| InvoiceLineRequest::new(l.line_index as usize, l.quantity))
            .collect()
    }

    /// draft → issued. Returns the order's per-line invoiced quantities including this invoice.
    pub fn issue(
        &mut self,
        order: &SalesOrder,
        invoiced: &[u64],
        at: TimeStamp<Utc>,
    ) -> Result<Vec<u64>, WorkflowError> {
        if self.issuance.is_some() {
            return Err(WorkflowError::InvalidTransition {
                entity: "invoice",
                state: "issued".into(),
                action: "issue",
            });
        }
        if self.lines.is_empty() {
            return Err(WorkflowError::invalid("an invoice needs at least one line"));
        }
        let requests = self.requests();
        check_quantities(order, &requests, invoiced)?;

        let mut updated: Vec<u64> = (0..order.lines().len())
            .map(|i| invoiced.get(i).copied().unwrap_or(0))
            .collect();
        for request in &requests {
            updated[request.line_index] += request.quantity;
        }

        self.issuance = Some(Issuance {
            issued_at: at,
            due_date: at.plus_days(self.payment_terms_days),
        });
        Ok(updated)
    }

    pub fn due_date(&self) -> Option<TimeStamp<Utc>> {
        self.issuance.map(|i| i.due_date)
    }

    pub fn ledger(&self, payments: &[Payment]) -> LedgerState {
        LedgerState::replay(self.totals.total, payments)
    }

    pub fn status(&self, payments: &[Payment]) -> InvoiceStatus {
        if self.issuance.is_none() {
            return InvoiceStatus::Draft;
        }
        match self.ledger(payments).settlement() {
            Settlement::Unpaid => InvoiceStatus::Issued,
            Settlement::PartPaid => InvoiceStatus::PartPaid,
            Settlement::Paid => InvoiceStatus::Paid,
        }
    }

    /// Overdue once the as-of calendar day is after the due day with a balance left.
    pub fn display_status(&self, payments: &[Payment], as_of: TimeStamp<Utc>) -> DisplayStatus {
        let status = self.status(payments);
        match (status, self.due_date()) {
            (InvoiceStatus::Issued | InvoiceStatus::PartPaid, Some(due))
                if as_of.date() > due.date() =>
            {
                DisplayStatus::Overdue
            }
            _ => status.into(),
        }
    }
}

/// Point-in-time summary of an invoice and its ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceStatement {
    pub number: String,
    pub total: Money,
    pub paid: Money,
    pub balance: Money,
    pub status: InvoiceStatus,
    pub display_status: DisplayStatus,
    pub due_date: Option<TimeStamp<Utc>>,
    pub payments: Vec<Payment>,
}

impl InvoiceStatement {
    pub fn build(invoice: &Invoice, mut payments: Vec<Payment>, as_of: TimeStamp<Utc>) -> Self {
        payments.sort_by_key(|p| (p.recorded_at, p.ordinal));
        let ledger = invoice.ledger(&payments);

        Self {
            number: invoice.number.clone(),
            total: ledger.total,
            paid: ledger.paid,
            balance: ledger.balance,
            status: invoice.status(&payments),
            display_status: invoice.display_status(&payments, as_of),
            due_date: invoice.due_date(),
            payments,
        }
    }
}
