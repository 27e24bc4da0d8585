//! Wallet Store
//!
//! Reads go straight to storage (wallet lists through the cache); every
//! balance change goes through the writer actor, which is the only place
//! [`Wallet::apply`] runs against persisted wallets.

use crate::{
    actor::LedgerHandle,
    cache::WalletCache,
    storage::Storage,
    types::{BalanceSummary, Currency, Direction, Posting, UserId, Wallet},
    Error, Result,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

impl Wallet {
    /// Empty wallet
    pub fn open(user_id: UserId, currency: Currency, is_primary: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id,
            currency,
            balance: Decimal::ZERO,
            available_balance: Decimal::ZERO,
            pending_balance: Decimal::ZERO,
            is_primary,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply one posting; all-or-nothing
    pub fn apply(&mut self, posting: &Posting) -> Result<()> {
        if posting.wallet_id != self.id {
            return Err(Error::InvalidRequest(format!(
                "posting for wallet {} applied to wallet {}",
                posting.wallet_id, self.id
            )));
        }
        if posting.amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(format!(
                "posting amount must be positive, got {}",
                posting.amount
            )));
        }

        let (balance, available_balance) = match posting.direction {
            Direction::Credit => (
                self.balance.checked_add(posting.amount),
                self.available_balance.checked_add(posting.amount),
            ),
            Direction::Debit => {
                if self.available_balance < posting.amount {
                    return Err(Error::InsufficientFunds {
                        wallet_id: self.id,
                        requested: posting.amount,
                        available: self.available_balance,
                    });
                }
                (
                    self.balance.checked_sub(posting.amount),
                    self.available_balance.checked_sub(posting.amount),
                )
            }
        };
        let (Some(balance), Some(available_balance)) = (balance, available_balance) else {
            return Err(Error::InvalidAmount(format!(
                "posting of {} overflows wallet {} balance",
                posting.amount, self.id
            )));
        };

        self.balance = balance;
        self.available_balance = available_balance;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `0 <= available_balance <= balance`
    pub fn is_consistent(&self) -> bool {
        self.available_balance >= Decimal::ZERO && self.available_balance <= self.balance
    }
}

/// Wallet Store
#[derive(Debug, Clone)]
pub struct WalletStore {
    storage: Arc<Storage>,
    cache: Arc<WalletCache>,
    writer: LedgerHandle,
}

impl WalletStore {
    /// Create new store
    pub fn new(storage: Arc<Storage>, cache: Arc<WalletCache>, writer: LedgerHandle) -> Self {
        Self {
            storage,
            cache,
            writer,
        }
    }

    /// Available balance of a wallet
    pub fn get_balance(&self, wallet_id: Uuid) -> Result<Decimal> {
        Ok(self.storage.get_wallet(wallet_id)?.available_balance)
    }

    /// Full wallet record
    pub fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet> {
        self.storage.get_wallet(wallet_id)
    }

    /// Atomically credit or debit a wallet
    ///
    /// Serialized with every other balance change, so of two debits that
    /// each need the whole available balance exactly one succeeds.
    pub async fn mutate_balance(
        &self,
        wallet_id: Uuid,
        amount: Decimal,
        direction: Direction,
    ) -> Result<Wallet> {
        self.writer
            .mutate_balance(Posting {
                wallet_id,
                amount,
                direction,
            })
            .await
    }

    /// Create a wallet; the user's first wallet in a currency is primary
    pub async fn create_wallet(&self, user_id: UserId, currency: Currency) -> Result<Wallet> {
        self.writer.create_wallet(user_id, currency).await
    }

    /// Make a wallet its owner's primary wallet for its currency
    pub async fn set_primary(&self, wallet_id: Uuid) -> Result<Wallet> {
        self.writer.set_primary(wallet_id).await
    }

    /// The user's wallets, primary wallets first
    pub fn get_user_wallets(&self, user_id: &UserId) -> Result<Vec<Wallet>> {
        if let Some(wallets) = self.cache.get(user_id) {
            return Ok(wallets);
        }

        let generation = self.cache.generation(user_id);
        let mut wallets = self.storage.user_wallets(user_id)?;
        wallets.sort_by(|a, b| {
            b.is_primary
                .cmp(&a.is_primary)
                .then(a.created_at.cmp(&b.created_at))
        });

        self.cache.put_if_current(user_id.clone(), wallets.clone(), generation);
        Ok(wallets)
    }

    /// The user's primary wallet in a currency
    pub fn primary_wallet(&self, user_id: &UserId, currency: Currency) -> Result<Wallet> {
        self.storage
            .user_wallets(user_id)?
            .into_iter()
            .find(|w| w.is_primary && w.currency == currency)
            .ok_or_else(|| {
                Error::WalletNotFound(format!("no primary {} wallet for user {}", currency, user_id))
            })
    }

    /// Per-currency balance totals
    pub fn balance_summary(&self, user_id: &UserId) -> Result<BTreeMap<Currency, BalanceSummary>> {
        let mut summary: BTreeMap<Currency, BalanceSummary> = BTreeMap::new();
        for wallet in self.get_user_wallets(user_id)? {
            let entry = summary.entry(wallet.currency).or_default();
            let overflow = || {
                Error::InvalidAmount(format!(
                    "{} balance total overflows for user {}",
                    wallet.currency, user_id
                ))
            };
            entry.total_balance = entry
                .total_balance
                .checked_add(wallet.balance)
                .ok_or_else(overflow)?;
            entry.available_balance = entry
                .available_balance
                .checked_add(wallet.available_balance)
                .ok_or_else(overflow)?;
            entry.pending_balance = entry
                .pending_balance
                .checked_add(wallet.pending_balance)
                .ok_or_else(overflow)?;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_then_debit() {
        let mut wallet = Wallet::open(UserId::new("alice"), Currency::USD, true);
        wallet.apply(&Posting::credit(wallet.id, Decimal::from(500))).unwrap();
        wallet.apply(&Posting::debit(wallet.id, Decimal::from(100))).unwrap();

        assert_eq!(wallet.balance, Decimal::from(400));
        assert_eq!(wallet.available_balance, Decimal::from(400));
        assert!(wallet.is_consistent());
    }

    #[test]
    fn test_overdraft_leaves_wallet_untouched() {
        let mut wallet = Wallet::open(UserId::new("alice"), Currency::USD, true);
        wallet.apply(&Posting::credit(wallet.id, Decimal::from(50))).unwrap();
        let before = wallet.clone();

        let err = wallet
            .apply(&Posting::debit(wallet.id, Decimal::from(51)))
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { .. }));
        assert_eq!(wallet, before);
    }

    #[test]
    fn test_credit_overflow_leaves_wallet_untouched() {
        let mut wallet = Wallet::open(UserId::new("alice"), Currency::USD, true);
        wallet.apply(&Posting::credit(wallet.id, Decimal::MAX)).unwrap();
        let before = wallet.clone();

        let err = wallet.apply(&Posting::credit(wallet.id, Decimal::ONE)).unwrap_err();
        assert!(matches!(err, Error::InvalidAmount(_)));
        assert_eq!(wallet, before);
    }

    #[test]
    fn test_debit_respects_reserved_funds() {
        let mut wallet = Wallet::open(UserId::new("alice"), Currency::USD, true);
        wallet.balance = Decimal::from(100);
        wallet.available_balance = Decimal::from(60);
        wallet.pending_balance = Decimal::from(40);

        assert!(wallet.apply(&Posting::debit(wallet.id, Decimal::from(80))).is_err());
        wallet.apply(&Posting::debit(wallet.id, Decimal::from(60))).unwrap();
        assert_eq!(wallet.balance, Decimal::from(40));
        assert!(wallet.is_consistent());
    }

    #[test]
    fn test_rejects_foreign_or_zero_posting() {
        let mut wallet = Wallet::open(UserId::new("alice"), Currency::USD, true);
        assert!(matches!(
            wallet.apply(&Posting::credit(Uuid::now_v7(), Decimal::ONE)),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            wallet.apply(&Posting::credit(wallet.id, Decimal::ZERO)),
            Err(Error::InvalidAmount(_))
        ));
    }
}
