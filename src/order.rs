//! Sales orders, their lines, and the order lifecycle
use super::error::WorkflowError;
use super::pricing::{self, PricedLine, Totals};
use super::types::{Money, TaxRate, TimeStamp};
use super::utils::{self, ORDER_HRP};
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum TaxType {
    #[n(0)]
    Domestic,
    #[n(1)]
    Export,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Draft,
    Approved,
    Cancelled,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Approved => "approved",
            OrderStatus::Cancelled => "cancelled",
        })
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    #[n(0)]
    pub item_code: String,
    #[n(1)]
    pub quantity: u64,
    #[n(2)]
    pub price_per_unit: Money,
    #[n(3)]
    pub weight_per_piece_grams: u64, // zero when the item is not weighed
}

impl LineItem {
    pub fn new(
        item_code: impl Into<String>,
        quantity: u64,
        price_per_unit: Money,
    ) -> Result<Self, WorkflowError> {
        let line = Self {
            item_code: item_code.into(),
            quantity,
            price_per_unit,
            weight_per_piece_grams: 0,
        };
        line.validate()?;
        Ok(line)
    }
    pub fn with_weight_grams(mut self, grams: u64) -> Self {
        self.weight_per_piece_grams = grams;
        self
    }
    pub fn priced(&self) -> PricedLine {
        PricedLine::new(self.quantity, self.price_per_unit)
    }
    pub fn line_amount(&self) -> Result<Money, WorkflowError> {
        pricing::line_amount(&self.priced())
    }
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.item_code.trim().is_empty() {
            return Err(WorkflowError::invalid("item code must not be empty"));
        }
        pricing::validate_line(&self.priced())
    }
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct OrderWitness {
    #[n(0)]
    pub actor: String,
    #[n(1)]
    pub timestamp: TimeStamp<Utc>,
    #[n(2)]
    pub witness_type: OrderWitnessType,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone, Copy)]
pub enum OrderWitnessType {
    #[n(0)]
    Create,
    #[n(1)]
    Revise,
    #[n(2)]
    Approve,
    #[n(3)]
    Cancel,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct SalesOrder {
    #[n(0)]
    pub order_id: String, // bech32 `so_` id
    #[n(1)]
    customer_id: String,
    #[n(2)]
    po_number: String, // customer supplied, not unique
    #[n(3)]
    currency: String,
    #[n(4)]
    tax_type: TaxType,
    #[n(5)]
    tax_rate: TaxRate,
    #[n(6)]
    payment_terms_days: u32,
    #[n(7)]
    lines: Vec<LineItem>,
    #[n(8)]
    witness_set: Vec<OrderWitness>,
}

/// Boundary form of an order; every field is checked by [`SalesOrderDraft::validate_and_finalise`].
#[derive(Debug, Default, Clone)]
pub struct SalesOrderDraft {
    customer_id: Option<String>,
    po_number: Option<String>,
    currency: Option<String>,
    tax_type: Option<TaxType>,
    tax_rate: Option<TaxRate>,
    payment_terms_days: Option<u32>,
    lines: Vec<LineItem>,
}

impl SalesOrderDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }
    pub fn set_po_number(mut self, po_number: impl Into<String>) -> Self {
        self.po_number = Some(po_number.into());
        self
    }
    pub fn set_currency(mut self, code: impl Into<String>) -> Self {
        self.currency = Some(code.into());
        self
    }
    pub fn set_tax(mut self, tax_type: TaxType, rate: TaxRate) -> Self {
        self.tax_type = Some(tax_type);
        self.tax_rate = Some(rate);
        self
    }
    pub fn set_payment_terms(mut self, days: u32) -> Self {
        self.payment_terms_days = Some(days);
        self
    }
    pub fn add_line(mut self, line: LineItem) -> Self {
        self.lines.push(line);
        self
    }
    pub fn currency(&self) -> Option<&str> {
        self.currency.as_deref()
    }
    pub fn payment_terms_days(&self) -> Option<u32> {
        self.payment_terms_days
    }

    // Checks fields and turns the draft into a persisted-shape order owned by `actor`.
    pub fn validate_and_finalise(
        self,
        actor: &str,
        at: TimeStamp<Utc>,
    ) -> Result<SalesOrder, WorkflowError> {
        let customer_id = self
            .customer_id
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| WorkflowError::invalid("customer is not set"))?;
        let po_number = self
            .po_number
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| WorkflowError::invalid("purchase order number is not set"))?;
        let currency = self
            .currency
            .ok_or_else(|| WorkflowError::invalid("currency is not set"))?;
        validate_currency(&currency)?;
        let tax_type = self
            .tax_type
            .ok_or_else(|| WorkflowError::invalid("tax type is not set"))?;
        let tax_rate = self.tax_rate.unwrap_or_else(TaxRate::zero);
        let payment_terms_days = self
            .payment_terms_days
            .ok_or_else(|| WorkflowError::invalid("payment terms are not set"))?;
        for line in &self.lines {
            line.validate()?;
        }

        let order_id = utils::new_uuid_to_bech32(ORDER_HRP)
            .map_err(|e| WorkflowError::Codec(e.to_string()))?;

        Ok(SalesOrder {
            order_id,
            customer_id,
            po_number,
            currency,
            tax_type,
            tax_rate,
            payment_terms_days,
            lines: self.lines,
            witness_set: vec![OrderWitness {
                actor: actor.to_string(),
                timestamp: at,
                witness_type: OrderWitnessType::Create,
            }],
        })
    }
}

fn validate_currency(code: &str) -> Result<(), WorkflowError> {
    if code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(WorkflowError::invalid(format!(
            "currency must be a three letter ISO code, got '{code}'"
        )))
    }
}

impl SalesOrder {
    pub fn customer_id(&self) -> &str {
        &self.customer_id
    }
    pub fn po_number(&self) -> &str {
        &self.po_number
    }
    pub fn currency(&self) -> &str {
        &self.currency
    }
    pub fn tax_type(&self) -> TaxType {
        self.tax_type
    }
    pub fn tax_rate(&self) -> TaxRate {
        self.tax_rate
    }
    pub fn payment_terms_days(&self) -> u32 {
        self.payment_terms_days
    }
    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }
    pub fn line(&self, index: usize) -> Result<&LineItem, WorkflowError> {
        self.lines.get(index).ok_or_else(|| {
            WorkflowError::invalid(format!(
                "order {} has no line {index}",
                self.order_id
            ))
        })
    }
    pub fn witness_set(&self) -> &[OrderWitness] {
        &self.witness_set
    }

    /// Status follows the latest approve or cancel witness; an order without one is a draft.
    pub fn current_state(&self) -> OrderStatus {
        self.witness_set
            .iter()
            .rev()
            .find_map(|w| match w.witness_type {
                OrderWitnessType::Approve => Some(OrderStatus::Approved),
                OrderWitnessType::Cancel => Some(OrderStatus::Cancelled),
                _ => None,
            })
            .unwrap_or(OrderStatus::Draft)
    }

    pub fn approved_at(&self) -> Option<TimeStamp<Utc>> {
        self.witness_set
            .iter()
            .find(|w| w.witness_type == OrderWitnessType::Approve)
            .map(|w| w.timestamp)
    }

    pub fn totals(&self) -> Result<Totals, WorkflowError> {
        let priced: Vec<PricedLine> = self.lines.iter().map(LineItem::priced).collect();
        pricing::compute_totals(&priced, self.tax_rate)
    }

    fn require_draft(&self, action: &'static str) -> Result<(), WorkflowError> {
        let state = self.current_state();
        if state != OrderStatus::Draft {
            return Err(WorkflowError::InvalidTransition {
                entity: "sales order",
                state: state.to_string(),
                action,
            });
        }
        Ok(())
    }

    fn witness(&mut self, actor: &str, at: TimeStamp<Utc>, witness_type: OrderWitnessType) {
        self.witness_set.push(OrderWitness {
            actor: actor.to_string(),
            timestamp: at,
            witness_type,
        });
    }

    pub fn add_line(
        &mut self,
        line: LineItem,
        actor: &str,
        at: TimeStamp<Utc>,
    ) -> Result<usize, WorkflowError> {
        self.require_draft("edit lines")?;
        line.validate()?;
        self.lines.push(line);
        self.witness(actor, at, OrderWitnessType::Revise);
        Ok(self.lines.len() - 1)
    }

    pub fn update_line(
        &mut self,
        index: usize,
        quantity: u64,
        price_per_unit: Money,
        actor: &str,
        at: TimeStamp<Utc>,
    ) -> Result<(), WorkflowError> {
        self.require_draft("edit lines")?;
        let mut updated = self.line(index)?.clone();
        updated.quantity = quantity;
        updated.price_per_unit = price_per_unit;
        updated.validate()?;
        self.lines[index] = updated;
        self.witness(actor, at, OrderWitnessType::Revise);
        Ok(())
    }

    pub fn remove_line(
        &mut self,
        index: usize,
        actor: &str,
        at: TimeStamp<Utc>,
    ) -> Result<LineItem, WorkflowError> {
        self.require_draft("edit lines")?;
        self.line(index)?;
        let removed = self.lines.remove(index);
        self.witness(actor, at, OrderWitnessType::Revise);
        Ok(removed)
    }

    pub fn set_tax(
        &mut self,
        tax_type: TaxType,
        rate: TaxRate,
        actor: &str,
        at: TimeStamp<Utc>,
    ) -> Result<(), WorkflowError> {
        self.require_draft("change tax")?;
        self.tax_type = tax_type;
        self.tax_rate = rate;
        self.witness(actor, at, OrderWitnessType::Revise);
        Ok(())
    }

    pub fn set_payment_terms(
        &mut self,
        days: u32,
        actor: &str,
        at: TimeStamp<Utc>,
    ) -> Result<(), WorkflowError> {
        self.require_draft("change payment terms")?;
        self.payment_terms_days = days;
        self.witness(actor, at, OrderWitnessType::Revise);
        Ok(())
    }

    /// draft → approved. Lines are frozen from here on.
    pub fn approve(&mut self, actor: &str, at: TimeStamp<Utc>) -> Result<(), WorkflowError> {
        self.require_draft("approve")?;
        if self.lines.is_empty() {
            return Err(WorkflowError::invalid(
                "an order needs at least one line to be approved",
            ));
        }
        // surfaces any invalid quantity or price before the state changes
        self.totals()?;
        for line in &self.lines {
            line.validate()?;
        }
        self.witness(actor, at, OrderWitnessType::Approve);
        Ok(())
    }

    /// draft → cancelled. Terminal.
    pub fn cancel(&mut self, actor: &str, at: TimeStamp<Utc>) -> Result<(), WorkflowError> {
        self.require_draft("cancel")?;
        self.witness(actor, at, OrderWitnessType::Cancel);
        Ok(())
    }
}
