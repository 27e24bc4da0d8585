//! Fee policy
//!
//! `send` pays `amount * percentage + fixed`, rounded to the currency scale;
//! every other type is free. The fee is retained by the ledger.

use crate::{config::FeeConfig, types::TransactionType, Error, Result};
use rust_decimal::{Decimal, RoundingStrategy};

/// Fee and net amount for a gross amount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    /// Fee retained
    pub fee: Decimal,
    /// `amount - fee`
    pub net_amount: Decimal,
}

/// Fee policy
#[derive(Debug, Clone)]
pub struct FeePolicy {
    config: FeeConfig,
}

impl FeePolicy {
    /// Create new policy
    pub fn new(config: FeeConfig) -> Self {
        Self { config }
    }

    /// Validate a gross amount: positive, at most `scale` decimal places,
    /// no larger than `max_amount`
    pub fn validate_amount(&self, amount: Decimal) -> Result<Decimal> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(format!("amount must be positive, got {}", amount)));
        }
        if amount > self.config.max_amount {
            return Err(Error::InvalidAmount(format!(
                "amount {} exceeds maximum {}",
                amount, self.config.max_amount
            )));
        }
        let amount = amount.normalize();
        if amount.scale() > self.config.scale {
            return Err(Error::InvalidAmount(format!(
                "amount {} has more than {} decimal places",
                amount, self.config.scale
            )));
        }
        Ok(amount)
    }

    /// Fee for a transaction type
    pub fn fee_for(&self, transaction_type: TransactionType, amount: Decimal) -> Result<Decimal> {
        match transaction_type {
            TransactionType::Send => amount
                .checked_mul(self.config.percentage)
                .and_then(|fee| fee.checked_add(self.config.fixed))
                .map(|fee| {
                    fee.round_dp_with_strategy(
                        self.config.scale,
                        RoundingStrategy::MidpointAwayFromZero,
                    )
                })
                .ok_or_else(|| {
                    Error::InvalidAmount(format!("fee for amount {} overflows", amount))
                }),
            _ => Ok(Decimal::ZERO),
        }
    }

    /// Validate the amount and split it into fee and net
    ///
    /// A send too small to cover its own fee is rejected as `InvalidAmount`.
    pub fn split(&self, transaction_type: TransactionType, amount: Decimal) -> Result<FeeSplit> {
        let amount = self.validate_amount(amount)?;
        let fee = self.fee_for(transaction_type, amount)?;
        let net_amount = amount.checked_sub(fee).ok_or_else(|| {
            Error::InvalidAmount(format!("amount {} minus fee {} overflows", amount, fee))
        })?;

        if net_amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(format!(
                "amount {} does not cover fee {}",
                amount, fee
            )));
        }

        Ok(FeeSplit { fee, net_amount })
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self::new(FeeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_fee() {
        let policy = FeePolicy::default();
        let split = policy.split(TransactionType::Send, Decimal::from(100)).unwrap();
        assert_eq!(split.fee, Decimal::new(320, 2));
        assert_eq!(split.net_amount, Decimal::new(9680, 2));
    }

    #[test]
    fn test_fee_rounds_to_cents() {
        let policy = FeePolicy::default();
        // 33.33 * 0.029 + 0.30 = 1.26657
        let split = policy.split(TransactionType::Send, Decimal::new(3333, 2)).unwrap();
        assert_eq!(split.fee, Decimal::new(127, 2));
        assert_eq!(split.net_amount, Decimal::new(3206, 2));
    }

    #[test]
    fn test_other_types_are_free() {
        let policy = FeePolicy::default();
        for ty in [
            TransactionType::Deposit,
            TransactionType::Withdrawal,
            TransactionType::Receive,
            TransactionType::Refund,
        ] {
            let split = policy.split(ty, Decimal::from(100)).unwrap();
            assert_eq!(split.fee, Decimal::ZERO);
            assert_eq!(split.net_amount, Decimal::from(100));
        }
    }

    #[test]
    fn test_invalid_amounts() {
        let policy = FeePolicy::default();
        assert!(matches!(
            policy.split(TransactionType::Deposit, Decimal::ZERO),
            Err(Error::InvalidAmount(_))
        ));
        assert!(matches!(
            policy.split(TransactionType::Deposit, Decimal::from(-5)),
            Err(Error::InvalidAmount(_))
        ));
        assert!(matches!(
            policy.split(TransactionType::Deposit, Decimal::new(1001, 3)),
            Err(Error::InvalidAmount(_))
        ));
        // 0.30 send cannot cover the 0.31 fee
        assert!(matches!(
            policy.split(TransactionType::Send, Decimal::new(30, 2)),
            Err(Error::InvalidAmount(_))
        ));
        // trailing zeros are not extra precision
        assert!(policy.split(TransactionType::Deposit, Decimal::new(10_000, 3)).is_ok());
    }

    #[test]
    fn test_amount_cap() {
        let policy = FeePolicy::default();
        assert!(policy.split(TransactionType::Send, Decimal::from(1_000_000_000u64)).is_ok());
        assert!(matches!(
            policy.split(TransactionType::Deposit, Decimal::from(1_000_000_001u64)),
            Err(Error::InvalidAmount(_))
        ));
        assert!(matches!(
            policy.split(TransactionType::Send, Decimal::MAX),
            Err(Error::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_fee_overflow_is_an_error() {
        let policy = FeePolicy::new(FeeConfig {
            percentage: Decimal::from(10),
            max_amount: Decimal::MAX,
            ..FeeConfig::default()
        });
        assert!(matches!(
            policy.fee_for(TransactionType::Send, Decimal::MAX),
            Err(Error::InvalidAmount(_))
        ));
        assert!(matches!(
            policy.split(TransactionType::Send, Decimal::MAX),
            Err(Error::InvalidAmount(_))
        ));
    }
}
