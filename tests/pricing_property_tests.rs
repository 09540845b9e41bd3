//! Property-based tests for the pricing engine
//!
//! Totals must be a pure function of the lines and the rate: independent of
//! line order, internally consistent, and stable across repeated calls.

use proptest::prelude::*;
use rust_decimal::Decimal;
use sales_workflow::pricing::{PricedLine, compute_totals};
use sales_workflow::types::{Money, TaxRate};

// PROPERTY TEST STRATEGIES

/// Strategy for a priced line with up to 1,000,000.00 per unit
fn line_strategy() -> impl Strategy<Value = PricedLine> {
    (1u64..=10_000, 0i64..=100_000_000)
        .prop_map(|(quantity, minor)| PricedLine::new(quantity, Money::from_minor(minor)))
}

/// Strategy for a tax rate with two decimal places between 0 and 100 percent
fn tax_strategy() -> impl Strategy<Value = TaxRate> {
    (0i64..=10_000).prop_map(|basis| TaxRate::new(Decimal::new(basis, 2)).unwrap())
}

proptest! {
    /// Reordering the lines never changes any total
    #[test]
    fn totals_ignore_line_order(
        (lines, shuffled) in prop::collection::vec(line_strategy(), 1..20)
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle())),
        tax in tax_strategy(),
    ) {
        prop_assert_eq!(
            compute_totals(&lines, tax).unwrap(),
            compute_totals(&shuffled, tax).unwrap()
        );
    }

    /// total = subtotal + tax, all at two decimal places and never negative
    #[test]
    fn total_is_subtotal_plus_tax(
        lines in prop::collection::vec(line_strategy(), 1..20),
        tax in tax_strategy(),
    ) {
        let totals = compute_totals(&lines, tax).unwrap();
        prop_assert_eq!(totals.total, totals.subtotal + totals.tax_amount);
        prop_assert!(!totals.tax_amount.is_negative());
        prop_assert!(totals.tax_amount <= totals.subtotal);
        for m in [totals.subtotal, totals.tax_amount, totals.total] {
            prop_assert_eq!(m, m.round());
        }
    }

    /// Repeated computation yields identical results
    #[test]
    fn totals_are_deterministic(
        lines in prop::collection::vec(line_strategy(), 1..20),
        tax in tax_strategy(),
    ) {
        prop_assert_eq!(compute_totals(&lines, tax).unwrap(), compute_totals(&lines, tax).unwrap());
    }

    /// A zero rate leaves the total equal to the subtotal
    #[test]
    fn zero_rate_adds_no_tax(lines in prop::collection::vec(line_strategy(), 1..20)) {
        let totals = compute_totals(&lines, TaxRate::zero()).unwrap();
        prop_assert_eq!(totals.tax_amount, Money::ZERO);
        prop_assert_eq!(totals.total, totals.subtotal);
    }
}
