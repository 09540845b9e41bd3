//! Concurrent access to numbering and approval
//!
//! sled retries conflicting transactions, so allocations racing on the same
//! counter must still come out unique and gap-free.

use rust_decimal::Decimal;
use sales_workflow::{
    WorkflowService,
    clock::FixedClock,
    numbering::DocumentKind,
    order::{LineItem, SalesOrderDraft, TaxType},
    types::{Money, TaxRate, TimeStamp},
};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

/// Threads allocating from one counter never see the same number twice
#[test]
fn concurrent_allocation_is_unique() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(sled::open(temp_dir.path().join("numbers.db"))?);
    let service = Arc::new(WorkflowService::new(db)?);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                (0..250)
                    .map(|_| service.store().allocate_number(DocumentKind::Invoice, 2026))
                    .collect::<Result<Vec<_>, _>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        let numbers = handle.join().expect("allocator thread panicked")?;
        for number in numbers {
            assert!(seen.insert(number.clone()), "duplicate {number}");
        }
    }
    assert_eq!(seen.len(), 2_000);
    assert!(seen.contains("INV-2026-00001"));
    assert!(seen.contains("INV-2026-02000"));
    assert_eq!(
        service.store().numbering().current(DocumentKind::Invoice, 2026)?,
        Some(2_000)
    );

    Ok(())
}

/// Orders approved in parallel get disjoint work order numbers
#[test]
fn concurrent_approvals_number_uniquely() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(sled::open(temp_dir.path().join("approvals.db"))?);
    let clock = Arc::new(FixedClock::new(TimeStamp::new_with(2026, 8, 3, 8, 0, 0)?));
    let service = Arc::new(WorkflowService::new(db)?.with_clock(clock));

    let mut order_ids = Vec::new();
    for i in 0..12 {
        let draft = SalesOrderDraft::new()
            .set_customer(format!("cust_{i}"))
            .set_po_number(format!("PO-{i}"))
            .set_tax(TaxType::Domestic, TaxRate::new(Decimal::from(18))?)
            .add_line(LineItem::new("BOLT-M8", 10, Money::from(3))?)
            .add_line(LineItem::new("NUT-M8", 10, Money::from(1))?);
        order_ids.push(service.create_order(draft, "rep")?.order_id);
    }

    let handles: Vec<_> = order_ids
        .into_iter()
        .map(|order_id| {
            let service = Arc::clone(&service);
            thread::spawn(move || service.approve_order(&order_id, "mgr"))
        })
        .collect();

    let mut numbers = HashSet::new();
    for handle in handles {
        let (_, work_orders) = handle.join().expect("approval thread panicked")?;
        assert_eq!(work_orders.len(), 2);
        for wo in work_orders {
            assert!(numbers.insert(wo.number));
        }
    }
    assert_eq!(numbers.len(), 24);
    assert!(numbers.contains("WO-2026-00024"));

    Ok(())
}
