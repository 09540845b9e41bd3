//! Service layer API for the order to invoice workflow
//!
//! Each state-changing call is one sled transaction: it reads the current
//! records, validates the transition, and commits the new state together with
//! everything derived from it. A rejected call leaves the store untouched.
use super::access::{InvoiceView, OrderView, Role, WorkOrderView};
use super::clock::{Clock, SystemClock};
use super::error::WorkflowError;
use super::invoice::{Invoice, InvoiceLineRequest, InvoiceStatement, remaining_quantities};
use super::numbering::{DocumentKind, allocate_in, unwrap_tx_error};
use super::order::{LineItem, SalesOrder, SalesOrderDraft, TaxType};
use super::payment::{Payment, PaymentMethod};
use super::pricing::Totals;
use super::settings::Settings;
use super::store::{self, AbortExt, SledStore, not_found, tx_get, tx_insert_work_order, tx_put};
use super::types::{Money, TaxRate, TimeStamp};
use super::utils::{self, PAYMENT_HRP};
use super::work_order::{WorkOrder, derive_work_orders};
use chrono::Utc;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree};
use std::sync::Arc;

/// Ordered, billed and open quantity for one order line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineBilling {
    pub line_index: usize,
    pub item_code: String,
    pub ordered: u64,
    pub invoiced: u64,
    pub remaining: u64,
}

pub struct WorkflowService {
    store: SledStore,
    clock: Arc<dyn Clock>,
    default_payment_terms_days: u32,
    default_currency: String,
}

fn rejected<T>(
    operation: &'static str,
    id: &str,
    result: Result<T, WorkflowError>,
) -> anyhow::Result<T> {
    result.map_err(|e| {
        tracing::warn!(operation, id, kind = ?e.kind(), error = %e, "workflow operation rejected");
        anyhow::Error::new(e)
    })
}

fn tx_load_order(
    orders: &TransactionalTree,
    order_id: &str,
) -> ConflictableTransactionResult<SalesOrder, WorkflowError> {
    tx_get(orders, order_id)?
        .ok_or_else(|| not_found("sales order", order_id))
        .or_abort()
}

fn tx_load_invoice(
    invoices: &TransactionalTree,
    number: &str,
) -> ConflictableTransactionResult<Invoice, WorkflowError> {
    tx_get(invoices, number)?
        .ok_or_else(|| not_found("invoice", number))
        .or_abort()
}

/// Numbers and writes one work order per line of an approved order.
fn tx_raise_work_orders(
    order: &SalesOrder,
    work_orders: &TransactionalTree,
    index: &TransactionalTree,
    sequences: &TransactionalTree,
    snapshots: &TransactionalTree,
    at: TimeStamp<Utc>,
) -> ConflictableTransactionResult<Vec<WorkOrder>, WorkflowError> {
    let numbers = order
        .lines()
        .iter()
        .map(|_| allocate_in(sequences, DocumentKind::WorkOrder, at.year()))
        .collect::<Result<Vec<_>, _>>()?;
    let raised = derive_work_orders(order, numbers, at).or_abort()?;
    for work_order in &raised {
        tx_insert_work_order(work_orders, index, snapshots, work_order)?;
    }
    Ok(raised)
}

impl WorkflowService {
    pub fn new(instance: Arc<sled::Db>) -> anyhow::Result<Self> {
        let defaults = Settings::default();
        Ok(Self {
            store: SledStore::new(instance)?,
            clock: Arc::new(SystemClock),
            default_payment_terms_days: defaults.default_payment_terms_days,
            default_currency: defaults.default_currency,
        })
    }

    pub fn open(settings: &Settings) -> anyhow::Result<Self> {
        let db = Arc::new(sled::open(&settings.database_path)?);
        tracing::info!(path = %settings.database_path.display(), "opened workflow store");
        Ok(Self {
            store: SledStore::new(db)?,
            clock: Arc::new(SystemClock),
            default_payment_terms_days: settings.default_payment_terms_days,
            default_currency: settings.default_currency.clone(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &SledStore {
        &self.store
    }

    pub fn now(&self) -> TimeStamp<Utc> {
        self.clock.now()
    }

    /// Save a new draft order. Missing currency and payment terms take the configured defaults.
    pub fn create_order(
        &self,
        draft: SalesOrderDraft,
        actor: &str,
    ) -> anyhow::Result<SalesOrder> {
        let mut draft = draft;
        if draft.currency().is_none() {
            draft = draft.set_currency(self.default_currency.clone());
        }
        if draft.payment_terms_days().is_none() {
            draft = draft.set_payment_terms(self.default_payment_terms_days);
        }

        let order = rejected("create order", actor, draft.validate_and_finalise(actor, self.now()))?;
        self.store.save_order(&order)?;
        tracing::info!(order_id = %order.order_id, customer = %order.customer_id(), lines = order.lines().len(), "sales order created");

        Ok(order)
    }

    pub fn get_order(&self, order_id: &str) -> anyhow::Result<SalesOrder> {
        Ok(self.store.get_order(order_id)?)
    }

    /// Totals recomputed from the stored lines; identical on every call.
    pub fn order_totals(&self, order_id: &str) -> anyhow::Result<Totals> {
        Ok(self.store.get_order(order_id)?.totals()?)
    }

    fn revise_order<R>(
        &self,
        operation: &'static str,
        order_id: &str,
        revise: impl Fn(&mut SalesOrder, TimeStamp<Utc>) -> Result<R, WorkflowError>,
    ) -> anyhow::Result<(SalesOrder, R)> {
        let at = self.now();
        let result = self
            .store
            .orders
            .transaction(|orders| {
                let mut order = tx_load_order(orders, order_id)?;
                let out = revise(&mut order, at).or_abort()?;
                tx_put(orders, order_id, &order)?;
                Ok((order, out))
            })
            .map_err(unwrap_tx_error);
        let (order, out) = rejected(operation, order_id, result)?;
        tracing::info!(order_id, operation, "sales order revised");

        Ok((order, out))
    }

    pub fn add_line(
        &self,
        order_id: &str,
        line: LineItem,
        actor: &str,
    ) -> anyhow::Result<SalesOrder> {
        let (order, _) = self.revise_order("add line", order_id, |order, at| {
            order.add_line(line.clone(), actor, at)
        })?;
        Ok(order)
    }

    pub fn update_line(
        &self,
        order_id: &str,
        line_index: usize,
        quantity: u64,
        price_per_unit: Money,
        actor: &str,
    ) -> anyhow::Result<SalesOrder> {
        let (order, _) = self.revise_order("update line", order_id, |order, at| {
            order.update_line(line_index, quantity, price_per_unit, actor, at)
        })?;
        Ok(order)
    }

    pub fn remove_line(
        &self,
        order_id: &str,
        line_index: usize,
        actor: &str,
    ) -> anyhow::Result<LineItem> {
        let (_, removed) = self.revise_order("remove line", order_id, |order, at| {
            order.remove_line(line_index, actor, at)
        })?;
        Ok(removed)
    }

    pub fn set_tax(
        &self,
        order_id: &str,
        tax_type: TaxType,
        rate: TaxRate,
        actor: &str,
    ) -> anyhow::Result<SalesOrder> {
        let (order, _) = self.revise_order("set tax", order_id, |order, at| {
            order.set_tax(tax_type, rate, actor, at)
        })?;
        Ok(order)
    }

    pub fn set_payment_terms(
        &self,
        order_id: &str,
        days: u32,
        actor: &str,
    ) -> anyhow::Result<SalesOrder> {
        let (order, _) = self.revise_order("set payment terms", order_id, |order, at| {
            order.set_payment_terms(days, actor, at)
        })?;
        Ok(order)
    }

    pub fn cancel_order(&self, order_id: &str, actor: &str) -> anyhow::Result<SalesOrder> {
        let (order, _) =
            self.revise_order("cancel order", order_id, |order, at| order.cancel(actor, at))?;
        tracing::info!(order_id, actor, "sales order cancelled");
        Ok(order)
    }

    /// draft → approved, raising one work order per line in the same transaction.
    pub fn approve_order(
        &self,
        order_id: &str,
        actor: &str,
    ) -> anyhow::Result<(SalesOrder, Vec<WorkOrder>)> {
        let at = self.now();
        let s = &self.store;
        let result = (
            &s.orders,
            &s.work_orders,
            &s.work_order_index,
            &s.sequences,
            &s.snapshots,
        )
            .transaction(|(orders, work_orders, index, sequences, snapshots)| {
                let mut order = tx_load_order(orders, order_id)?;
                order.approve(actor, at).or_abort()?;
                let raised =
                    tx_raise_work_orders(&order, work_orders, index, sequences, snapshots, at)?;
                tx_put(orders, order_id, &order)?;
                Ok((order, raised))
            })
            .map_err(unwrap_tx_error);
        let (order, raised) = rejected("approve order", order_id, result)?;

        tracing::info!(
            order_id,
            actor,
            work_orders = raised.len(),
            "sales order approved"
        );
        Ok((order, raised))
    }

    /// Raises work orders for an approved order that has none. Once any exist this
    /// returns them unchanged.
    pub fn derive_work_orders(&self, order_id: &str) -> anyhow::Result<Vec<WorkOrder>> {
        let at = self.now();
        let s = &self.store;
        let result = (
            &s.orders,
            &s.work_orders,
            &s.work_order_index,
            &s.sequences,
            &s.snapshots,
        )
            .transaction(|(orders, work_orders, index, sequences, snapshots)| {
                let order = tx_load_order(orders, order_id)?;
                let refs: Vec<store::WorkOrderRef> = tx_get(index, order_id)?.unwrap_or_default();
                if !refs.is_empty() {
                    let mut existing = Vec::with_capacity(refs.len());
                    for r in &refs {
                        let work_order: WorkOrder = tx_get(work_orders, &r.number)?
                            .ok_or_else(|| not_found("work order", &r.number))
                            .or_abort()?;
                        existing.push(work_order);
                    }
                    existing.sort_by_key(|w| w.line_index);
                    return Ok((existing, false));
                }
                let raised =
                    tx_raise_work_orders(&order, work_orders, index, sequences, snapshots, at)?;
                Ok((raised, true))
            })
            .map_err(unwrap_tx_error);
        let (work_orders, created) = rejected("derive work orders", order_id, result)?;

        if created {
            tracing::info!(order_id, count = work_orders.len(), "work orders derived");
        } else {
            tracing::debug!(order_id, "work orders already derived");
        }
        Ok(work_orders)
    }

    pub fn work_orders_for_order(&self, order_id: &str) -> anyhow::Result<Vec<WorkOrder>> {
        Ok(self.store.work_orders_for_order(order_id)?)
    }

    pub fn get_work_order(&self, number: &str) -> anyhow::Result<WorkOrder> {
        Ok(self.store.get_work_order(number)?)
    }

    /// Moves a work order to its next production stage.
    pub fn advance_work_order(&self, number: &str) -> anyhow::Result<WorkOrder> {
        let result = self
            .store
            .work_orders
            .transaction(|work_orders| {
                let mut work_order: WorkOrder = tx_get(work_orders, number)?
                    .ok_or_else(|| not_found("work order", number))
                    .or_abort()?;
                work_order.advance().or_abort()?;
                tx_put(work_orders, number, &work_order)?;
                Ok(work_order)
            })
            .map_err(unwrap_tx_error);
        let work_order = rejected("advance work order", number, result)?;
        tracing::info!(number, stage = ?work_order.stage, "work order advanced");

        Ok(work_order)
    }

    /// True when the embedded snapshot still hashes to its recorded digest and the
    /// content-addressed copy matches it byte for byte.
    pub fn verify_snapshot(&self, number: &str) -> anyhow::Result<bool> {
        let work_order = self.store.get_work_order(number)?;
        let (hash, cbor) = work_order.snapshot.build()?;
        let stored = self.store.snapshot_bytes(&work_order.snapshot_hash)?;

        Ok(hash == work_order.snapshot_hash && stored.as_deref() == Some(cbor.as_slice()))
    }

    /// Drafts an invoice for part or all of an approved order's open quantity.
    pub fn create_invoice(
        &self,
        order_id: &str,
        requests: &[InvoiceLineRequest],
    ) -> anyhow::Result<Invoice> {
        let at = self.now();
        let s = &self.store;
        let result = (
            &s.orders,
            &s.invoiced_quantities,
            &s.invoices,
            &s.invoice_index,
            &s.sequences,
        )
            .transaction(|(orders, invoiced, invoices, index, sequences)| {
                let order = tx_load_order(orders, order_id)?;
                let consumed: Vec<u64> = tx_get(invoiced, order_id)?.unwrap_or_default();
                let number = allocate_in(sequences, DocumentKind::Invoice, at.year())?;
                let invoice = Invoice::draft(number, &order, requests, &consumed, at).or_abort()?;

                let mut numbers: Vec<String> = tx_get(index, order_id)?.unwrap_or_default();
                numbers.push(invoice.number.clone());
                tx_put(invoices, &invoice.number, &invoice)?;
                tx_put(index, order_id, &numbers)?;
                Ok(invoice)
            })
            .map_err(unwrap_tx_error);
        let invoice = rejected("create invoice", order_id, result)?;

        tracing::info!(
            order_id,
            number = %invoice.number,
            total = %invoice.totals.total,
            "invoice drafted"
        );
        Ok(invoice)
    }

    /// draft → issued. Consumes the invoiced quantity and fixes the due date.
    pub fn issue_invoice(&self, number: &str) -> anyhow::Result<Invoice> {
        let at = self.now();
        let s = &self.store;
        let result = (&s.orders, &s.invoiced_quantities, &s.invoices)
            .transaction(|(orders, invoiced, invoices)| {
                let mut invoice = tx_load_invoice(invoices, number)?;
                let order = tx_load_order(orders, &invoice.order_id)?;
                let consumed: Vec<u64> = tx_get(invoiced, &invoice.order_id)?.unwrap_or_default();
                let updated = invoice.issue(&order, &consumed, at).or_abort()?;

                tx_put(invoiced, &invoice.order_id, &updated)?;
                tx_put(invoices, number, &invoice)?;
                Ok(invoice)
            })
            .map_err(unwrap_tx_error);
        let invoice = rejected("issue invoice", number, result)?;

        tracing::info!(
            number,
            order_id = %invoice.order_id,
            due_date = ?invoice.due_date().map(|d| d.date()),
            "invoice issued"
        );
        Ok(invoice)
    }

    pub fn get_invoice(&self, number: &str) -> anyhow::Result<Invoice> {
        Ok(self.store.get_invoice(number)?)
    }

    pub fn invoices_for_order(&self, order_id: &str) -> anyhow::Result<Vec<Invoice>> {
        Ok(self.store.invoices_for_order(order_id)?)
    }

    /// Appends a payment if it fits within the outstanding balance.
    pub fn record_payment(
        &self,
        number: &str,
        amount: Money,
        method: PaymentMethod,
        reference: &str,
    ) -> anyhow::Result<Payment> {
        let payment_id = utils::new_uuid_to_bech32(PAYMENT_HRP)?;
        let result = self.store.create_payment(
            payment_id,
            number,
            amount,
            method,
            reference,
            self.now(),
        );
        let payment = rejected("record payment", number, result)?;

        tracing::info!(
            number,
            payment_id = %payment.payment_id,
            amount = %payment.amount,
            method = ?payment.method,
            "payment recorded"
        );
        Ok(payment)
    }

    pub fn payments_for_invoice(&self, number: &str) -> anyhow::Result<Vec<Payment>> {
        Ok(self.store.payments_for_invoice(number)?)
    }

    /// Totals, balance and status as of the service clock's current time.
    pub fn invoice_statement(&self, number: &str) -> anyhow::Result<InvoiceStatement> {
        let invoice = self.store.get_invoice(number)?;
        let payments = self.store.payments_for_invoice(number)?;
        Ok(InvoiceStatement::build(&invoice, payments, self.now()))
    }

    pub fn order_billing_summary(&self, order_id: &str) -> anyhow::Result<Vec<LineBilling>> {
        let order = self.store.get_order(order_id)?;
        let invoiced = self.store.invoiced_quantities(order_id)?;
        let remaining = remaining_quantities(&order, &invoiced);

        Ok(order
            .lines()
            .iter()
            .enumerate()
            .map(|(i, line)| LineBilling {
                line_index: i,
                item_code: line.item_code.clone(),
                ordered: line.quantity,
                invoiced: invoiced.get(i).copied().unwrap_or(0),
                remaining: remaining[i],
            })
            .collect())
    }

    pub fn order_view(&self, order_id: &str, role: Role) -> anyhow::Result<OrderView> {
        let order = self.store.get_order(order_id)?;
        let totals = order.totals()?;
        Ok(OrderView::for_role(&order, totals, role))
    }

    pub fn work_order_views(&self, order_id: &str, role: Role) -> anyhow::Result<Vec<WorkOrderView>> {
        Ok(self
            .store
            .work_orders_for_order(order_id)?
            .iter()
            .map(|w| WorkOrderView::for_role(w, role))
            .collect())
    }

    pub fn invoice_view(&self, number: &str, role: Role) -> anyhow::Result<InvoiceView> {
        let invoice = self.store.get_invoice(number)?;
        let payments = self.store.payments_for_invoice(number)?;
        Ok(InvoiceView::for_role(&invoice, &payments, self.now(), role))
    }
}
