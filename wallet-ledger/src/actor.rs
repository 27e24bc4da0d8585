//! Single-writer actor for the ledger
//!
//! Every write to wallets and transactions goes through one task:
//! - Balance checks and commits never interleave, so conflicting debits
//!   have at most one winner
//! - A settlement validates all of its postings in memory, then commits
//!   wallets and the new transaction status in one `WriteBatch`
//! - The bounded mailbox gives callers backpressure
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │        Ledger / WalletStore (many request tasks)      │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │ deadline -> apply postings in memory -> deadline      │
//! │                       │                               │
//! │                       ▼                               │
//! │               Storage::commit()                       │
//! │          (atomic write to RocksDB)                    │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::{
    cache::WalletCache,
    metrics::Metrics,
    reference::ReferenceId,
    storage::Storage,
    types::{Currency, Posting, Transaction, TransactionKind, TransactionStatus, UserId, Wallet},
    Error, Result,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Create a wallet
    CreateWallet {
        user_id: UserId,
        currency: Currency,
        response: oneshot::Sender<Result<Wallet>>,
    },

    /// Move the primary flag within a user's currency group
    SetPrimary {
        wallet_id: Uuid,
        response: oneshot::Sender<Result<Wallet>>,
    },

    /// Apply a single posting
    MutateBalance {
        posting: Posting,
        response: oneshot::Sender<Result<Wallet>>,
    },

    /// Persist a new pending transaction
    InsertTransaction {
        transaction: Transaction,
        response: oneshot::Sender<Result<Transaction>>,
    },

    /// Apply a pending transaction's postings and complete it
    Settle {
        transaction_id: Uuid,
        deadline: Option<Instant>,
        response: oneshot::Sender<Result<Transaction>>,
    },

    /// Cancel a pending transaction
    Cancel {
        transaction_id: Uuid,
        response: oneshot::Sender<Result<Transaction>>,
    },

    /// Settle a compensating refund and mark the original refunded
    Refund {
        original_id: Uuid,
        refund: Transaction,
        response: oneshot::Sender<Result<RefundOutcome>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Result of a successful refund
#[derive(Debug, Clone)]
pub struct RefundOutcome {
    /// Completed refund transaction
    pub refund: Transaction,
    /// Original send, now `refunded`
    pub original: Transaction,
}

/// Actor that owns every ledger write
pub struct LedgerActor {
    storage: Arc<Storage>,
    cache: Arc<WalletCache>,
    metrics: Arc<Metrics>,
    mailbox: mpsc::Receiver<LedgerMessage>,
}

impl std::fmt::Debug for LedgerActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerActor").field("storage", &self.storage).finish()
    }
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        storage: Arc<Storage>,
        cache: Arc<WalletCache>,
        metrics: Arc<Metrics>,
        mailbox: mpsc::Receiver<LedgerMessage>,
    ) -> Self {
        Self {
            storage,
            cache,
            metrics,
            mailbox,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Shutdown => break,
                msg => self.handle_message(msg),
            }
        }
        tracing::info!("Ledger writer stopped");
    }

    fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::CreateWallet {
                user_id,
                currency,
                response,
            } => {
                let _ = response.send(self.create_wallet(user_id, currency));
            }

            LedgerMessage::SetPrimary { wallet_id, response } => {
                let _ = response.send(self.set_primary(wallet_id));
            }

            LedgerMessage::MutateBalance { posting, response } => {
                let _ = response.send(self.mutate_balance(posting));
            }

            LedgerMessage::InsertTransaction {
                transaction,
                response,
            } => {
                let _ = response.send(self.insert_transaction(transaction));
            }

            LedgerMessage::Settle {
                transaction_id,
                deadline,
                response,
            } => {
                let _ = response.send(self.settle(transaction_id, deadline));
            }

            LedgerMessage::Cancel {
                transaction_id,
                response,
            } => {
                let _ = response.send(self.cancel(transaction_id));
            }

            LedgerMessage::Refund {
                original_id,
                refund,
                response,
            } => {
                let _ = response.send(self.refund(original_id, refund));
            }

            LedgerMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }

    fn create_wallet(&self, user_id: UserId, currency: Currency) -> Result<Wallet> {
        let has_primary = self
            .storage
            .user_wallets(&user_id)?
            .iter()
            .any(|w| w.currency == currency && w.is_primary);

        let wallet = Wallet::open(user_id, currency, !has_primary);
        self.storage.commit(std::slice::from_ref(&wallet), &[])?;
        self.cache.invalidate(&wallet.user_id);

        tracing::info!(
            wallet_id = %wallet.id,
            user_id = %wallet.user_id,
            currency = %currency,
            is_primary = wallet.is_primary,
            "Wallet created"
        );

        Ok(wallet)
    }

    fn set_primary(&self, wallet_id: Uuid) -> Result<Wallet> {
        let target = self.storage.get_wallet(wallet_id)?;

        let mut changed = Vec::new();
        for mut wallet in self.storage.user_wallets(&target.user_id)? {
            if wallet.currency != target.currency {
                continue;
            }
            let primary = wallet.id == wallet_id;
            if wallet.is_primary != primary {
                wallet.is_primary = primary;
                wallet.updated_at = chrono::Utc::now();
                changed.push(wallet);
            }
        }

        self.storage.commit(&changed, &[])?;
        self.cache.invalidate(&target.user_id);

        tracing::info!(wallet_id = %wallet_id, user_id = %target.user_id, "Primary wallet set");

        self.storage.get_wallet(wallet_id)
    }

    fn mutate_balance(&self, posting: Posting) -> Result<Wallet> {
        let mut wallet = self.storage.get_wallet(posting.wallet_id)?;
        wallet.apply(&posting)?;

        self.storage.commit(std::slice::from_ref(&wallet), &[])?;
        self.cache.invalidate(&wallet.user_id);
        self.metrics.record_balance_mutations(1);

        tracing::debug!(
            wallet_id = %wallet.id,
            direction = ?posting.direction,
            amount = %posting.amount,
            "Balance mutated"
        );

        Ok(wallet)
    }

    fn insert_transaction(&self, mut transaction: Transaction) -> Result<Transaction> {
        while self.storage.reference_exists(&transaction.reference_id)? {
            tracing::warn!(reference_id = %transaction.reference_id, "Reference collision, regenerating");
            transaction.reference_id = ReferenceId::generate();
        }

        self.storage.commit(&[], std::slice::from_ref(&transaction))?;
        self.metrics.record_transaction(transaction.status.as_str());

        tracing::info!(
            transaction_id = %transaction.id,
            reference_id = %transaction.reference_id,
            transaction_type = %transaction.transaction_type(),
            amount = %transaction.amount,
            "Transaction created"
        );

        Ok(transaction)
    }

    fn settle(&self, transaction_id: Uuid, deadline: Option<Instant>) -> Result<Transaction> {
        let mut tx = self.storage.get_transaction(transaction_id)?;
        if tx.status != TransactionStatus::Pending {
            return Err(Error::InvalidState {
                transaction_id,
                status: tx.status,
            });
        }

        let expired = || deadline.map_or(false, |d| Instant::now() >= d);
        if expired() {
            let err = Error::DeadlineExceeded(format!("transaction {} expired in queue", transaction_id));
            return Err(self.fail(tx, err));
        }

        let postings = tx.postings();
        let wallets = match self.stage(&postings) {
            Ok(wallets) => wallets,
            Err(err) => return Err(self.fail(tx, err)),
        };

        if expired() {
            let err = Error::DeadlineExceeded(format!("transaction {} expired before commit", transaction_id));
            return Err(self.fail(tx, err));
        }

        let pending = tx.clone();
        tx.transition(TransactionStatus::Completed)?;
        if let Err(err) = self.commit_postings(&wallets, std::slice::from_ref(&tx), postings.len()) {
            return Err(self.fail(pending, err));
        }

        self.metrics.record_transaction(tx.status.as_str());
        tracing::info!(
            transaction_id = %tx.id,
            transaction_type = %tx.transaction_type(),
            amount = %tx.amount,
            net_amount = %tx.net_amount,
            "Transaction completed"
        );

        Ok(tx)
    }

    fn cancel(&self, transaction_id: Uuid) -> Result<Transaction> {
        let mut tx = self.storage.get_transaction(transaction_id)?;
        tx.transition(TransactionStatus::Cancelled)?;

        self.storage.commit(&[], std::slice::from_ref(&tx))?;
        self.metrics.record_transaction(tx.status.as_str());

        tracing::info!(transaction_id = %tx.id, "Transaction cancelled");
        Ok(tx)
    }

    fn refund(&self, original_id: Uuid, mut refund: Transaction) -> Result<RefundOutcome> {
        if refund.status != TransactionStatus::Pending {
            return Err(Error::InvalidState {
                transaction_id: refund.id,
                status: refund.status,
            });
        }
        let mut original = self.storage.get_transaction(original_id)?;
        if original.transaction_type() != crate::types::TransactionType::Send {
            return Err(Error::InvalidRequest(format!(
                "transaction {} is a {}, only sends can be refunded",
                original_id,
                original.transaction_type()
            )));
        }
        if original.status != TransactionStatus::Completed {
            return Err(Error::InvalidState {
                transaction_id: original_id,
                status: original.status,
            });
        }

        let postings = match &refund.kind {
            TransactionKind::Refund {
                sender: Some(sender),
                receiver,
                ..
            } => vec![
                Posting::debit(sender.wallet_id, refund.amount),
                Posting::credit(receiver.wallet_id, refund.amount),
            ],
            _ => {
                return Err(Error::InvalidRequest(format!(
                    "transaction {} is not a refund with both parties",
                    refund.id
                )))
            }
        };

        let wallets = match self.stage(&postings) {
            Ok(wallets) => wallets,
            Err(err) => {
                // The refund attempt stays on record; the original is untouched
                refund.transition(TransactionStatus::Failed)?;
                refund
                    .metadata
                    .insert("failure_reason".to_string(), err.to_string());
                if let Err(store_err) = self.storage.commit(&[], std::slice::from_ref(&refund)) {
                    tracing::error!(transaction_id = %refund.id, error = %store_err, "Failed to record failed refund");
                }
                self.metrics.record_transaction(TransactionStatus::Failed.as_str());
                return Err(err);
            }
        };

        refund.transition(TransactionStatus::Completed)?;
        original.transition(TransactionStatus::Refunded)?;
        self.commit_postings(&wallets, &[refund.clone(), original.clone()], postings.len())?;

        self.metrics.record_transaction(refund.status.as_str());
        self.metrics.record_transaction(original.status.as_str());
        tracing::info!(
            transaction_id = %refund.id,
            original_transaction_id = %original.id,
            amount = %refund.amount,
            "Refund completed"
        );

        Ok(RefundOutcome { refund, original })
    }

    /// Load the touched wallets and apply postings in order, in memory only
    fn stage(&self, postings: &[Posting]) -> Result<Vec<Wallet>> {
        let mut staged: HashMap<Uuid, Wallet> = HashMap::new();
        let mut order = Vec::new();

        for posting in postings {
            if !staged.contains_key(&posting.wallet_id) {
                let wallet = self.storage.get_wallet(posting.wallet_id)?;
                staged.insert(wallet.id, wallet);
                order.push(posting.wallet_id);
            }
            if let Some(wallet) = staged.get_mut(&posting.wallet_id) {
                wallet.apply(posting)?;
            }
        }

        Ok(order.into_iter().filter_map(|id| staged.remove(&id)).collect())
    }

    fn commit_postings(&self, wallets: &[Wallet], transactions: &[Transaction], postings: usize) -> Result<()> {
        let started = std::time::Instant::now();
        self.storage.commit(wallets, transactions)?;
        self.metrics.record_commit_duration(started.elapsed().as_secs_f64());
        self.metrics.record_balance_mutations(postings);

        for wallet in wallets {
            self.cache.invalidate(&wallet.user_id);
        }
        Ok(())
    }

    /// Mark a pending transaction failed and hand back the cause
    fn fail(&self, mut tx: Transaction, cause: Error) -> Error {
        if tx.transition(TransactionStatus::Failed).is_err() {
            return cause;
        }
        tx.metadata.insert("failure_reason".to_string(), cause.to_string());

        match self.storage.commit(&[], std::slice::from_ref(&tx)) {
            Ok(()) => {
                self.metrics.record_transaction(tx.status.as_str());
                tracing::warn!(transaction_id = %tx.id, error = %cause, "Transaction failed");
            }
            Err(store_err) => {
                tracing::error!(
                    transaction_id = %tx.id,
                    error = %cause,
                    store_error = %store_err,
                    "Transaction failed and could not be marked failed"
                );
            }
        }

        cause
    }
}

/// Handle for sending messages to the actor
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerMessage) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .await
            .map_err(|_| Error::StoreUnavailable("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::StoreUnavailable("Response channel closed".to_string()))?
    }

    /// Create a wallet
    pub async fn create_wallet(&self, user_id: UserId, currency: Currency) -> Result<Wallet> {
        self.call(|response| LedgerMessage::CreateWallet {
            user_id,
            currency,
            response,
        })
        .await
    }

    /// Make a wallet primary for its currency
    pub async fn set_primary(&self, wallet_id: Uuid) -> Result<Wallet> {
        self.call(|response| LedgerMessage::SetPrimary { wallet_id, response })
            .await
    }

    /// Apply a single posting
    pub async fn mutate_balance(&self, posting: Posting) -> Result<Wallet> {
        self.call(|response| LedgerMessage::MutateBalance { posting, response })
            .await
    }

    /// Persist a pending transaction
    pub async fn insert_transaction(&self, transaction: Transaction) -> Result<Transaction> {
        self.call(|response| LedgerMessage::InsertTransaction {
            transaction,
            response,
        })
        .await
    }

    /// Settle a pending transaction
    pub async fn settle(&self, transaction_id: Uuid, deadline: Option<Instant>) -> Result<Transaction> {
        self.call(|response| LedgerMessage::Settle {
            transaction_id,
            deadline,
            response,
        })
        .await
    }

    /// Cancel a pending transaction
    pub async fn cancel(&self, transaction_id: Uuid) -> Result<Transaction> {
        self.call(|response| LedgerMessage::Cancel {
            transaction_id,
            response,
        })
        .await
    }

    /// Settle a refund against a completed send
    pub async fn refund(&self, original_id: Uuid, refund: Transaction) -> Result<RefundOutcome> {
        self.call(|response| LedgerMessage::Refund {
            original_id,
            refund,
            response,
        })
        .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::StoreUnavailable("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(
    storage: Arc<Storage>,
    cache: Arc<WalletCache>,
    metrics: Arc<Metrics>,
    mailbox_capacity: usize,
) -> LedgerHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity);
    let actor = LedgerActor::new(storage, cache, metrics, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx)
}
