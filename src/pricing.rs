//! Line and document totals
//!
//! Totals are a pure function of the priced lines and the tax rate: the
//! subtotal is summed exactly and rounded once, tax is taken on the rounded
//! subtotal and rounded half-up, and the total is their exact sum.
use super::error::WorkflowError;
use super::types::{Money, TaxRate};

/// The pricing-relevant part of an order or invoice line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricedLine {
    pub quantity: u64,
    pub price_per_unit: Money,
}

impl PricedLine {
    pub fn new(quantity: u64, price_per_unit: Money) -> Self {
        Self {
            quantity,
            price_per_unit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, minicbor::Encode, minicbor::Decode)]
pub struct Totals {
    #[n(0)]
    pub subtotal: Money,
    #[n(1)]
    pub tax_amount: Money,
    #[n(2)]
    pub total: Money,
}

pub fn validate_line(line: &PricedLine) -> Result<(), WorkflowError> {
    if line.quantity == 0 {
        return Err(WorkflowError::invalid("quantity must be greater than zero"));
    }
    if line.price_per_unit.is_negative() {
        return Err(WorkflowError::invalid(format!(
            "price per unit must be non-negative, got {}",
            line.price_per_unit
        )));
    }
    Ok(())
}

/// Exact, unrounded `quantity × price`.
pub fn line_amount(line: &PricedLine) -> Result<Money, WorkflowError> {
    validate_line(line)?;
    line.price_per_unit
        .times(line.quantity)
        .ok_or_else(|| WorkflowError::invalid("line amount overflows"))
}

pub fn compute_totals(lines: &[PricedLine], tax: TaxRate) -> Result<Totals, WorkflowError> {
    let mut sum = Money::ZERO;
    for line in lines {
        sum = sum
            .checked_add(line_amount(line)?)
            .ok_or_else(|| WorkflowError::invalid("subtotal overflows"))?;
    }

    let subtotal = sum.round();
    let tax_amount = subtotal
        .percent(tax.percent())
        .ok_or_else(|| WorkflowError::invalid("tax amount overflows"))?
        .round();

    Ok(Totals {
        subtotal,
        tax_amount,
        total: subtotal + tax_amount,
    })
}
