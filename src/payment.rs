//! Append-only payment records and ledger replay
//!
//! Balance and settlement status are never stored. They are recomputed from
//! the full payment history on every read and before every write, so a ledger
//! replayed in any insertion order yields the same result.
use super::error::WorkflowError;
use super::types::{Money, TimeStamp};
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentMethod {
    #[n(0)]
    Cash,
    #[n(1)]
    BankTransfer,
    #[n(2)]
    Cheque,
    #[n(3)]
    Upi,
    #[n(4)]
    Card,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    #[n(0)]
    pub payment_id: String, // bech32 `pay_` id
    #[n(1)]
    pub invoice_number: String,
    #[n(2)]
    pub amount: Money,
    #[n(3)]
    pub method: PaymentMethod,
    #[n(4)]
    pub reference: String,
    #[n(5)]
    pub recorded_at: TimeStamp<Utc>,
    #[n(6)]
    pub ordinal: u64, // insertion position, breaks recorded_at ties
}

/// Settlement of an issued invoice as implied by its payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Unpaid,
    PartPaid,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerState {
    pub total: Money,
    pub paid: Money,
    pub balance: Money,
}

impl LedgerState {
    /// Folds payments in (recorded_at, ordinal) order over `total`.
    pub fn replay(total: Money, payments: &[Payment]) -> Self {
        let mut ordered: Vec<&Payment> = payments.iter().collect();
        ordered.sort_by_key(|p| (p.recorded_at, p.ordinal));
        let paid: Money = ordered.iter().map(|p| p.amount).sum();

        Self {
            total,
            paid,
            balance: total - paid,
        }
    }

    pub fn settlement(&self) -> Settlement {
        if self.balance <= Money::ZERO {
            Settlement::Paid
        } else if self.balance < self.total {
            Settlement::PartPaid
        } else {
            Settlement::Unpaid
        }
    }

    /// Rejects non-positive amounts, sub-minor-unit amounts and anything above the
    /// outstanding balance.
    pub fn validate_payment(&self, amount: Money) -> Result<(), WorkflowError> {
        if amount <= Money::ZERO {
            return Err(WorkflowError::invalid(format!(
                "payment amount must be positive, got {amount}"
            )));
        }
        if amount != amount.round() {
            return Err(WorkflowError::invalid(format!(
                "payment amount {} has more than two decimal places",
                amount.amount()
            )));
        }
        if amount > self.balance {
            return Err(WorkflowError::ExceedsBalance {
                attempted: amount,
                balance: self.balance,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(amount: u64, ordinal: u64, day: u32) -> Payment {
        Payment {
            payment_id: format!("pay_{ordinal}"),
            invoice_number: "INV-2026-00001".into(),
            amount: Money::from(amount),
            method: PaymentMethod::BankTransfer,
            reference: format!("UTR{ordinal}"),
            recorded_at: TimeStamp::new_with(2026, 6, day, 10, 0, 0).unwrap(),
            ordinal,
        }
    }

    #[test]
    fn partial_then_full_settlement() {
        let total = Money::from(59_000);
        let first = [payment(30_000, 0, 1)];
        let state = LedgerState::replay(total, &first);
        assert_eq!(state.balance, Money::from(29_000));
        assert_eq!(state.settlement(), Settlement::PartPaid);

        let both = [payment(30_000, 0, 1), payment(29_000, 1, 2)];
        let state = LedgerState::replay(total, &both);
        assert_eq!(state.balance, Money::ZERO);
        assert_eq!(state.settlement(), Settlement::Paid);
    }

    #[test]
    fn replay_ignores_storage_order() {
        let total = Money::from(1_000);
        let a = [payment(100, 0, 1), payment(200, 1, 2), payment(300, 2, 3)];
        let b = [payment(300, 2, 3), payment(100, 0, 1), payment(200, 1, 2)];
        assert_eq!(
            LedgerState::replay(total, &a),
            LedgerState::replay(total, &b)
        );
    }

    #[test]
    fn no_payments_is_unpaid() {
        let state = LedgerState::replay(Money::from(10), &[]);
        assert_eq!(state.settlement(), Settlement::Unpaid);
        assert_eq!(state.balance, Money::from(10));
    }

    #[test]
    fn payment_above_balance_is_rejected() {
        let state = LedgerState::replay(Money::from(59_000), &[payment(30_000, 0, 1)]);
        let err = state.validate_payment(Money::from(29_001)).unwrap_err();
        assert!(matches!(err, WorkflowError::ExceedsBalance { .. }));
        assert!(err.to_string().starts_with("Payment cannot exceed balance"));
        assert!(state.validate_payment(Money::from(29_000)).is_ok());
    }

    #[test]
    fn fractional_minor_units_are_invalid_input() {
        let state = LedgerState::replay(Money::from(118), &[]);
        let err = state
            .validate_payment("117.999".parse().unwrap())
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidInput(_)));
        assert!(state.validate_payment("117.99".parse().unwrap()).is_ok());
        // trailing zeros beyond two places are still a whole minor unit
        assert!(state.validate_payment("117.990".parse().unwrap()).is_ok());
    }

    #[test]
    fn non_positive_payment_is_invalid_input() {
        let state = LedgerState::replay(Money::from(10), &[]);
        assert!(matches!(
            state.validate_payment(Money::ZERO),
            Err(WorkflowError::InvalidInput(_))
        ));
        assert!(matches!(
            state.validate_payment(Money::from_minor(-100)),
            Err(WorkflowError::InvalidInput(_))
        ));
    }
}
