//! sled-backed record storage
//!
//! Every entity is CBOR-encoded under a string key in its own tree. Helpers
//! come in two flavours: plain tree access for reads, and `tx_*` variants that
//! run inside a multi-tree transaction so several writes commit as one unit.
use super::error::WorkflowError;
use super::invoice::{Invoice, remaining_quantities};
use super::numbering::{DocumentKind, Numbering, unwrap_tx_error};
use super::order::SalesOrder;
use super::payment::{LedgerState, Payment, PaymentMethod};
use super::types::{Money, TimeStamp};
use super::utils::ordinal_key;
use super::work_order::WorkOrder;
use chrono::Utc;
use sled::Transactional;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
};
use sled::{Db, Tree};
use std::sync::Arc;

/// Back-reference from an order line to the work order raised for it.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct WorkOrderRef {
    #[n(0)]
    pub line_index: u32,
    #[n(1)]
    pub number: String,
}

pub(crate) trait AbortExt<T> {
    fn or_abort(self) -> ConflictableTransactionResult<T, WorkflowError>;
}

impl<T> AbortExt<T> for Result<T, WorkflowError> {
    fn or_abort(self) -> ConflictableTransactionResult<T, WorkflowError> {
        self.map_err(ConflictableTransactionError::Abort)
    }
}

pub(crate) fn not_found(entity: &'static str, id: &str) -> WorkflowError {
    WorkflowError::NotFound {
        entity,
        id: id.to_string(),
    }
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, WorkflowError> {
    Ok(minicbor::to_vec(value)?)
}

fn decode<T: for<'b> minicbor::Decode<'b, ()>>(bytes: &[u8]) -> Result<T, WorkflowError> {
    Ok(minicbor::decode(bytes)?)
}

pub(crate) fn get_record<T: for<'b> minicbor::Decode<'b, ()>>(
    tree: &Tree,
    key: &str,
) -> Result<Option<T>, WorkflowError> {
    tree.get(key.as_bytes())?
        .map(|bytes| decode(&bytes))
        .transpose()
}

pub(crate) fn tx_get<T: for<'b> minicbor::Decode<'b, ()>>(
    tree: &TransactionalTree,
    key: &str,
) -> ConflictableTransactionResult<Option<T>, WorkflowError> {
    tree.get(key.as_bytes())?
        .map(|bytes| decode(&bytes))
        .transpose()
        .or_abort()
}

pub(crate) fn tx_put<T: minicbor::Encode<()>>(
    tree: &TransactionalTree,
    key: &str,
    value: &T,
) -> ConflictableTransactionResult<(), WorkflowError> {
    let bytes = encode(value).or_abort()?;
    tree.insert(key.as_bytes(), bytes)?;
    Ok(())
}

/// Writes a work order, its line back-reference and its snapshot. Refuses a second
/// work order for the same order line or a reused number.
pub(crate) fn tx_insert_work_order(
    work_orders: &TransactionalTree,
    index: &TransactionalTree,
    snapshots: &TransactionalTree,
    work_order: &WorkOrder,
) -> ConflictableTransactionResult<(), WorkflowError> {
    if work_orders.get(work_order.number.as_bytes())?.is_some() {
        return Err(WorkflowError::invalid(format!(
            "work order {} already exists",
            work_order.number
        )))
        .or_abort();
    }
    let mut refs: Vec<WorkOrderRef> = tx_get(index, &work_order.order_id)?.unwrap_or_default();
    if refs.iter().any(|r| r.line_index == work_order.line_index) {
        return Err(WorkflowError::InvalidTransition {
            entity: "order line",
            state: format!("already producing under line {}", work_order.line_index),
            action: "derive a second work order",
        })
        .or_abort();
    }
    refs.push(WorkOrderRef {
        line_index: work_order.line_index,
        number: work_order.number.clone(),
    });

    let (hash, snapshot_cbor) = work_order.snapshot.build().or_abort()?;
    snapshots.insert(hash.as_bytes(), snapshot_cbor)?;
    tx_put(work_orders, &work_order.number, work_order)?;
    tx_put(index, &work_order.order_id, &refs)?;
    Ok(())
}

pub(crate) fn tx_load_payments(
    payments: &TransactionalTree,
    invoice: &Invoice,
) -> ConflictableTransactionResult<Vec<Payment>, WorkflowError> {
    let mut ledger = Vec::new();
    for ordinal in 0..invoice.ledger_len {
        let key = ordinal_key(&invoice.number, ordinal);
        let payment: Payment = tx_get(payments, &key)?
            .ok_or_else(|| WorkflowError::Codec(format!("ledger entry {key} is missing")))
            .or_abort()?;
        ledger.push(payment);
    }
    Ok(ledger)
}

#[derive(Clone)]
pub struct SledStore {
    pub(crate) orders: Tree,
    pub(crate) work_orders: Tree,
    pub(crate) work_order_index: Tree,
    pub(crate) invoices: Tree,
    pub(crate) invoice_index: Tree,
    pub(crate) invoiced_quantities: Tree,
    pub(crate) payments: Tree,
    pub(crate) sequences: Tree,
    pub(crate) snapshots: Tree,
    numbering: Numbering,
}

impl SledStore {
    pub fn new(instance: Arc<Db>) -> Result<Self, WorkflowError> {
        let sequences = instance.open_tree("sequences")?;
        Ok(Self {
            orders: instance.open_tree("orders")?,
            work_orders: instance.open_tree("work_orders")?,
            work_order_index: instance.open_tree("work_order_index")?,
            invoices: instance.open_tree("invoices")?,
            invoice_index: instance.open_tree("invoice_index")?,
            invoiced_quantities: instance.open_tree("invoiced_quantities")?,
            payments: instance.open_tree("payments")?,
            snapshots: instance.open_tree("snapshots")?,
            numbering: Numbering::new(sequences.clone()),
            sequences,
        })
    }

    pub fn get_order(&self, order_id: &str) -> Result<SalesOrder, WorkflowError> {
        get_record(&self.orders, order_id)?.ok_or_else(|| not_found("sales order", order_id))
    }

    /// Stores a new order. Create-only: once stored, an order changes only through
    /// the service's transactional transitions, so a stale copy can never be written back.
    pub fn save_order(&self, order: &SalesOrder) -> Result<(), WorkflowError> {
        self.orders
            .compare_and_swap(
                order.order_id.as_bytes(),
                None as Option<&[u8]>,
                Some(encode(order)?),
            )?
            .map_err(|_| WorkflowError::InvalidTransition {
                entity: "sales order",
                state: "already stored".into(),
                action: "overwrite",
            })
    }

    /// Per-line quantity consumed by issued invoices; zeros when nothing is issued yet.
    pub fn invoiced_quantities(&self, order_id: &str) -> Result<Vec<u64>, WorkflowError> {
        Ok(get_record(&self.invoiced_quantities, order_id)?.unwrap_or_default())
    }

    pub fn line_remaining_qty(
        &self,
        order_id: &str,
        line_index: usize,
    ) -> Result<u64, WorkflowError> {
        let order = self.get_order(order_id)?;
        order.line(line_index)?;
        let invoiced = self.invoiced_quantities(order_id)?;
        Ok(remaining_quantities(&order, &invoiced)[line_index])
    }

    pub fn create_work_order(&self, work_order: &WorkOrder) -> Result<(), WorkflowError> {
        (&self.work_orders, &self.work_order_index, &self.snapshots)
            .transaction(|(work_orders, index, snapshots)| {
                tx_insert_work_order(work_orders, index, snapshots, work_order)
            })
            .map_err(unwrap_tx_error)
    }

    pub fn get_work_order(&self, number: &str) -> Result<WorkOrder, WorkflowError> {
        get_record(&self.work_orders, number)?.ok_or_else(|| not_found("work order", number))
    }

    pub fn work_order_refs(&self, order_id: &str) -> Result<Vec<WorkOrderRef>, WorkflowError> {
        Ok(get_record(&self.work_order_index, order_id)?.unwrap_or_default())
    }

    /// Work orders of an order in line order.
    pub fn work_orders_for_order(&self, order_id: &str) -> Result<Vec<WorkOrder>, WorkflowError> {
        let mut refs = self.work_order_refs(order_id)?;
        refs.sort_by_key(|r| r.line_index);
        refs.iter()
            .map(|r| self.get_work_order(&r.number))
            .collect()
    }

    /// Stored snapshot body for a content hash.
    pub fn snapshot_bytes(&self, hash: &str) -> Result<Option<Vec<u8>>, WorkflowError> {
        Ok(self.snapshots.get(hash.as_bytes())?.map(|v| v.to_vec()))
    }

    pub fn create_invoice(&self, invoice: &Invoice) -> Result<(), WorkflowError> {
        (&self.invoices, &self.invoice_index)
            .transaction(|(invoices, index)| {
                if invoices.get(invoice.number.as_bytes())?.is_some() {
                    return Err(WorkflowError::invalid(format!(
                        "invoice {} already exists",
                        invoice.number
                    )))
                    .or_abort();
                }
                let mut numbers: Vec<String> =
                    tx_get(index, &invoice.order_id)?.unwrap_or_default();
                numbers.push(invoice.number.clone());
                tx_put(invoices, &invoice.number, invoice)?;
                tx_put(index, &invoice.order_id, &numbers)?;
                Ok(())
            })
            .map_err(unwrap_tx_error)
    }

    pub fn get_invoice(&self, number: &str) -> Result<Invoice, WorkflowError> {
        get_record(&self.invoices, number)?.ok_or_else(|| not_found("invoice", number))
    }

    pub fn invoices_for_order(&self, order_id: &str) -> Result<Vec<Invoice>, WorkflowError> {
        let numbers: Vec<String> = get_record(&self.invoice_index, order_id)?.unwrap_or_default();
        numbers.iter().map(|n| self.get_invoice(n)).collect()
    }

    /// Payments in (recorded_at, ordinal) order.
    pub fn payments_for_invoice(&self, number: &str) -> Result<Vec<Payment>, WorkflowError> {
        let prefix = format!("{number}/");
        let mut payments = self
            .payments
            .scan_prefix(prefix.as_bytes())
            .map(|entry| -> Result<Payment, WorkflowError> {
                let (_, bytes) = entry?;
                decode::<Payment>(&bytes)
            })
            .collect::<Result<Vec<_>, _>>()?;
        payments.sort_by_key(|p| (p.recorded_at, p.ordinal));
        Ok(payments)
    }

    /// Appends a payment after replaying the invoice's ledger; the balance check and
    /// the append commit together.
    pub fn create_payment(
        &self,
        payment_id: String,
        invoice_number: &str,
        amount: Money,
        method: PaymentMethod,
        reference: &str,
        recorded_at: TimeStamp<Utc>,
    ) -> Result<Payment, WorkflowError> {
        (&self.invoices, &self.payments)
            .transaction(|(invoices, payments)| {
                let mut invoice: Invoice = tx_get(invoices, invoice_number)?
                    .ok_or_else(|| not_found("invoice", invoice_number))
                    .or_abort()?;
                if invoice.issuance.is_none() {
                    return Err(WorkflowError::InvalidTransition {
                        entity: "invoice",
                        state: "draft".into(),
                        action: "record a payment",
                    })
                    .or_abort();
                }
                let ledger = tx_load_payments(payments, &invoice)?;
                LedgerState::replay(invoice.totals.total, &ledger)
                    .validate_payment(amount)
                    .or_abort()?;

                let payment = Payment {
                    payment_id: payment_id.clone(),
                    invoice_number: invoice.number.clone(),
                    amount,
                    method,
                    reference: reference.to_string(),
                    recorded_at,
                    ordinal: invoice.ledger_len,
                };
                tx_put(
                    payments,
                    &ordinal_key(&invoice.number, payment.ordinal),
                    &payment,
                )?;
                invoice.ledger_len += 1;
                tx_put(invoices, &invoice.number, &invoice)?;
                Ok(payment)
            })
            .map_err(unwrap_tx_error)
    }

    pub fn allocate_number(&self, kind: DocumentKind, year: i32) -> Result<String, WorkflowError> {
        self.numbering.next_number(kind, year)
    }

    pub fn numbering(&self) -> &Numbering {
        &self.numbering
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::InvoiceLineRequest;
    use crate::order::{LineItem, SalesOrderDraft, TaxType};
    use crate::types::TaxRate;
    use crate::work_order::derive_work_orders;
    use rust_decimal::Decimal;

    fn temp_store() -> (tempfile::TempDir, SledStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path().join("store.db")).unwrap());
        (dir, SledStore::new(db).unwrap())
    }

    fn approved_order() -> SalesOrder {
        let mut order = SalesOrderDraft::new()
            .set_customer("cust_1")
            .set_po_number("PO-1")
            .set_currency("INR")
            .set_tax(TaxType::Domestic, TaxRate::new(Decimal::from(18)).unwrap())
            .set_payment_terms(30)
            .add_line(LineItem::new("A", 1_000, Money::from(100)).unwrap())
            .validate_and_finalise("u", TimeStamp::new())
            .unwrap();
        order.approve("m", TimeStamp::new()).unwrap();
        order
    }

    #[test]
    fn order_round_trips_through_tree() {
        let (_dir, store) = temp_store();
        let order = approved_order();
        store.save_order(&order).unwrap();
        assert_eq!(store.get_order(&order.order_id).unwrap(), order);
        assert_eq!(store.line_remaining_qty(&order.order_id, 0).unwrap(), 1_000);
    }

    #[test]
    fn stored_order_cannot_be_overwritten() {
        let (_dir, store) = temp_store();
        let order = SalesOrderDraft::new()
            .set_customer("cust_1")
            .set_po_number("PO-1")
            .set_currency("INR")
            .set_tax(TaxType::Domestic, TaxRate::zero())
            .set_payment_terms(30)
            .add_line(LineItem::new("A", 10, Money::from(5)).unwrap())
            .validate_and_finalise("u", TimeStamp::new())
            .unwrap();
        store.save_order(&order).unwrap();

        let mut approved = order.clone();
        approved.approve("m", TimeStamp::new()).unwrap();
        let err = store.save_order(&approved).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
        assert_eq!(store.get_order(&order.order_id).unwrap(), order);
    }

    #[test]
    fn missing_records_are_not_found() {
        let (_dir, store) = temp_store();
        let err = store.get_invoice("INV-2026-00009").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn second_work_order_for_a_line_is_refused() {
        let (_dir, store) = temp_store();
        let order = approved_order();
        let first = derive_work_orders(&order, vec!["WO-2026-00001".into()], TimeStamp::new())
            .unwrap()
            .remove(0);
        store.create_work_order(&first).unwrap();

        let mut dup = first.clone();
        dup.number = "WO-2026-00002".into();
        assert!(matches!(
            store.create_work_order(&dup),
            Err(WorkflowError::InvalidTransition { .. })
        ));
        assert_eq!(store.work_orders_for_order(&order.order_id).unwrap().len(), 1);
        assert!(
            store
                .snapshot_bytes(&first.snapshot_hash)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn payments_on_draft_invoice_are_refused() {
        let (_dir, store) = temp_store();
        let order = approved_order();
        let invoice = Invoice::draft(
            "INV-2026-00001".into(),
            &order,
            &[InvoiceLineRequest::new(0, 10)],
            &[],
            TimeStamp::new(),
        )
        .unwrap();
        store.create_invoice(&invoice).unwrap();

        let err = store
            .create_payment(
                "pay_x".into(),
                &invoice.number,
                Money::from(1),
                PaymentMethod::Cash,
                "",
                TimeStamp::new(),
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
        assert!(store.payments_for_invoice(&invoice.number).unwrap().is_empty());
    }
}
