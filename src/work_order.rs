//! Work orders derived from approved sales order lines
use super::error::WorkflowError;
use super::order::{OrderStatus, SalesOrder};
use super::types::{Money, TaxRate, TimeStamp};
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProductionStage {
    #[n(0)]
    Planned,
    #[n(1)]
    MaterialIssued,
    #[n(2)]
    InProduction,
    #[n(3)]
    QualityCheck,
    #[n(4)]
    Dispatched,
    #[n(5)]
    Completed,
}

impl ProductionStage {
    pub const INITIAL: ProductionStage = ProductionStage::Planned;

    pub fn next(&self) -> Option<ProductionStage> {
        match self {
            ProductionStage::Planned => Some(ProductionStage::MaterialIssued),
            ProductionStage::MaterialIssued => Some(ProductionStage::InProduction),
            ProductionStage::InProduction => Some(ProductionStage::QualityCheck),
            ProductionStage::QualityCheck => Some(ProductionStage::Dispatched),
            ProductionStage::Dispatched => Some(ProductionStage::Completed),
            ProductionStage::Completed => None,
        }
    }
}

/// Pricing and weight of the source line as it stood when the work order was raised.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct FinancialSnapshot {
    #[n(0)]
    pub currency: String,
    #[n(1)]
    pub price_per_unit: Money,
    #[n(2)]
    pub line_amount: Money,
    #[n(3)]
    pub tax_rate: TaxRate,
    #[n(4)]
    pub weight_per_piece_grams: u64,
    #[n(5)]
    pub total_weight_grams: u64,
    #[n(6)]
    pub captured_at: TimeStamp<Utc>,
}

impl FinancialSnapshot {
    /// Content hash and CBOR body; the hash is the snapshot's storage key.
    pub fn build(&self) -> Result<(String, Vec<u8>), WorkflowError> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct WorkOrder {
    #[n(0)]
    pub number: String, // WO-YYYY-NNNNN
    #[n(1)]
    pub order_id: String,
    #[n(2)]
    pub line_index: u32,
    #[n(3)]
    pub item_code: String,
    #[n(4)]
    pub quantity: u64,
    #[n(5)]
    pub stage: ProductionStage,
    #[n(6)]
    pub snapshot_hash: String,
    #[n(7)]
    pub snapshot: FinancialSnapshot,
    #[n(8)]
    pub created_at: TimeStamp<Utc>,
}

impl WorkOrder {
    /// Moves one stage forward; stages never go back.
    pub fn advance(&mut self) -> Result<ProductionStage, WorkflowError> {
        let next = self
            .stage
            .next()
            .ok_or_else(|| WorkflowError::InvalidTransition {
                entity: "work order",
                state: format!("{:?}", self.stage),
                action: "advance",
            })?;
        self.stage = next;
        Ok(next)
    }

    pub fn snapshot_is_intact(&self) -> Result<bool, WorkflowError> {
        let (hash, _) = self.snapshot.build()?;
        Ok(hash == self.snapshot_hash)
    }
}

/// One work order per line of an approved order, numbered in line order from `numbers`.
pub fn derive_work_orders(
    order: &SalesOrder,
    numbers: Vec<String>,
    at: TimeStamp<Utc>,
) -> Result<Vec<WorkOrder>, WorkflowError> {
    if order.current_state() != OrderStatus::Approved {
        return Err(WorkflowError::InvalidTransition {
            entity: "sales order",
            state: order.current_state().to_string(),
            action: "derive work orders",
        });
    }
    if numbers.len() != order.lines().len() {
        return Err(WorkflowError::invalid(format!(
            "{} numbers supplied for {} lines",
            numbers.len(),
            order.lines().len()
        )));
    }

    order
        .lines()
        .iter()
        .zip(numbers)
        .enumerate()
        .map(|(index, (line, number))| -> Result<WorkOrder, WorkflowError> {
            let snapshot = FinancialSnapshot {
                currency: order.currency().to_string(),
                price_per_unit: line.price_per_unit,
                line_amount: line.line_amount()?,
                tax_rate: order.tax_rate(),
                weight_per_piece_grams: line.weight_per_piece_grams,
                total_weight_grams: line
                    .weight_per_piece_grams
                    .checked_mul(line.quantity)
                    .ok_or_else(|| WorkflowError::invalid("line weight overflows"))?,
                captured_at: at,
            };
            let (snapshot_hash, _) = snapshot.build()?;
            let line_index = u32::try_from(index)
                .map_err(|_| WorkflowError::invalid("too many lines on one order"))?;

            Ok(WorkOrder {
                number,
                order_id: order.order_id.clone(),
                line_index,
                item_code: line.item_code.clone(),
                quantity: line.quantity,
                stage: ProductionStage::INITIAL,
                snapshot_hash,
                snapshot,
                created_at: at,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{LineItem, SalesOrderDraft, TaxType};
    use rust_decimal::Decimal;

    fn at() -> TimeStamp<Utc> {
        TimeStamp::new_with(2026, 5, 4, 12, 0, 0).unwrap()
    }

    fn approved_order() -> SalesOrder {
        let mut order = SalesOrderDraft::new()
            .set_customer("cust_1")
            .set_po_number("PO-1")
            .set_currency("INR")
            .set_tax(TaxType::Domestic, TaxRate::new(Decimal::from(18)).unwrap())
            .set_payment_terms(30)
            .add_line(
                LineItem::new("GEAR-A", 100, Money::from(50))
                    .unwrap()
                    .with_weight_grams(250),
            )
            .add_line(LineItem::new("GEAR-B", 200, Money::from(75)).unwrap())
            .validate_and_finalise("u", at())
            .unwrap();
        order.approve("m", at()).unwrap();
        order
    }

    #[test]
    fn one_work_order_per_line() {
        let order = approved_order();
        let wos = derive_work_orders(
            &order,
            vec!["WO-2026-00001".into(), "WO-2026-00002".into()],
            at(),
        )
        .unwrap();

        assert_eq!(wos.len(), 2);
        assert_eq!(wos[0].line_index, 0);
        assert_eq!(wos[1].line_index, 1);
        assert_eq!(wos[0].item_code, "GEAR-A");
        assert_eq!(wos[0].snapshot.total_weight_grams, 25_000);
        assert_eq!(wos[1].snapshot.line_amount, Money::from(15_000));
        assert!(wos.iter().all(|w| w.stage == ProductionStage::Planned));
        assert!(wos.iter().all(|w| w.snapshot_is_intact().unwrap()));
    }

    #[test]
    fn draft_orders_do_not_derive() {
        let order = SalesOrderDraft::new()
            .set_customer("c")
            .set_po_number("p")
            .set_currency("INR")
            .set_tax(TaxType::Domestic, TaxRate::zero())
            .set_payment_terms(0)
            .add_line(LineItem::new("A", 1, Money::from(1)).unwrap())
            .validate_and_finalise("u", at())
            .unwrap();
        assert!(matches!(
            derive_work_orders(&order, vec!["WO-2026-00001".into()], at()),
            Err(WorkflowError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn stages_only_advance() {
        let order = approved_order();
        let mut wo = derive_work_orders(
            &order,
            vec!["WO-2026-00001".into(), "WO-2026-00002".into()],
            at(),
        )
        .unwrap()
        .remove(0);

        let mut seen = vec![wo.stage];
        while let Ok(stage) = wo.advance() {
            seen.push(stage);
        }
        assert_eq!(seen.len(), 6);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(wo.stage, ProductionStage::Completed);
    }

    #[test]
    fn tampered_snapshot_is_detected() {
        let order = approved_order();
        let mut wo = derive_work_orders(
            &order,
            vec!["WO-2026-00001".into(), "WO-2026-00002".into()],
            at(),
        )
        .unwrap()
        .remove(0);
        wo.snapshot.price_per_unit = Money::from(1);
        assert!(!wo.snapshot_is_intact().unwrap());
    }
}
