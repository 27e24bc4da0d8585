//! Main ledger orchestration layer
//!
//! Ties storage, the writer actor, the fee policy, risk screening and the
//! audit/notification collaborators into the transfer-intake, balance-query
//! and risk-query APIs.
//!
//! # Example
//!
//! ```no_run
//! use rust_decimal::Decimal;
//! use wallet_ledger::{Config, Currency, Ledger, NewTransaction, UserId};
//!
//! #[tokio::main]
//! async fn main() -> wallet_ledger::Result<()> {
//!     let config = Config {
//!         webhook_secret: "whsec_example".to_string(),
//!         ..Config::default()
//!     };
//!     let ledger = Ledger::open(config).await?;
//!
//!     ledger.create_wallet(UserId::new("alice"), Currency::USD).await?;
//!     ledger.create_wallet(UserId::new("bob"), Currency::USD).await?;
//!
//!     let deposit = ledger
//!         .create_transaction(NewTransaction::deposit("alice", Decimal::from(500)))
//!         .await?;
//!     ledger.process_transaction(deposit.id).await?;
//!
//!     let send = ledger
//!         .create_transaction(NewTransaction::send("alice", "bob", Decimal::from(100)))
//!         .await?;
//!     ledger.process_transaction(send.id).await?;
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    cache::WalletCache,
    config::RiskFailurePolicy,
    events::{AuditRecord, AuditSink, LedgerEvent, Notifier, NoopNotifier, TracingAuditSink, WebhookSigner},
    fees::FeePolicy,
    metrics::Metrics,
    reference::ReferenceId,
    types::{
        BalanceSummary, Currency, Direction, NewTransaction, Party, Transaction, TransactionKind,
        TransactionQuery, TransactionStatus, TransactionType, TransferReceipt, TransferRequest,
        TransferRisk, UserId, Wallet,
    },
    storage::StorageStats,
    wallet::WalletStore,
    Config, Error, Result, Storage,
};
use chrono::Utc;
use risk_engine::{
    AlertStatus, AlertStore, AlertType, LoginAttempt, LoginLog, LoginMonitor, SecurityAlert,
    TransactionHistory, TransferScorer, TransferScreening,
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Builder for [`Ledger`] with custom collaborators
pub struct LedgerBuilder {
    config: Config,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
    alerts: Option<Arc<dyn AlertStore>>,
    history: Option<Arc<dyn TransactionHistory>>,
}

impl std::fmt::Debug for LedgerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerBuilder").field("config", &self.config).finish_non_exhaustive()
    }
}

impl LedgerBuilder {
    /// Audit sink (default: [`TracingAuditSink`])
    pub fn audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Notification dispatcher (default: [`NoopNotifier`])
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Security alert store (default: the ledger's RocksDB storage)
    pub fn alert_store(mut self, alerts: Arc<dyn AlertStore>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// History the risk engine reads (default: the ledger's RocksDB storage)
    pub fn transaction_history(mut self, history: Arc<dyn TransactionHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Open storage and start the writer
    pub async fn open(self) -> Result<Ledger> {
        let config = self.config;
        config.validate()?;

        let storage = Arc::new(Storage::open(&config)?);
        let cache = Arc::new(WalletCache::new(Duration::from_secs(config.cache.wallet_ttl_secs)));
        let metrics = Arc::new(
            Metrics::new().map_err(|e| Error::Config(format!("metrics registry: {}", e)))?,
        );

        let handle = spawn_ledger_actor(
            storage.clone(),
            cache.clone(),
            metrics.clone(),
            config.mailbox_capacity,
        );

        let alerts = self
            .alerts
            .unwrap_or_else(|| storage.clone() as Arc<dyn AlertStore>);
        let history = self
            .history
            .unwrap_or_else(|| storage.clone() as Arc<dyn TransactionHistory>);
        let scorer = TransferScorer::new(config.risk.scoring.clone(), history, alerts.clone())?;

        let login_log = Arc::new(LoginLog::new(config.risk.login.clone()));
        let login_monitor = LoginMonitor::new(config.risk.login.clone(), login_log.clone(), alerts.clone());

        let signer = WebhookSigner::new(config.webhook_secret.as_bytes())?;
        let wallets = WalletStore::new(storage.clone(), cache.clone(), handle.clone());

        tracing::info!(
            data_dir = ?config.data_dir,
            failure_policy = ?config.risk.failure_policy,
            "Ledger opened"
        );

        Ok(Ledger {
            handle,
            storage,
            wallets,
            cache,
            fees: FeePolicy::new(config.fees.clone()),
            scorer,
            alerts,
            login_log,
            login_monitor,
            audit: self.audit,
            notifier: self.notifier,
            signer,
            metrics,
            config,
        })
    }
}

/// Main ledger interface
pub struct Ledger {
    /// Writer actor handle
    handle: LedgerHandle,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    wallets: WalletStore,
    cache: Arc<WalletCache>,
    fees: FeePolicy,
    scorer: TransferScorer,
    alerts: Arc<dyn AlertStore>,
    login_log: Arc<LoginLog>,
    login_monitor: LoginMonitor,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
    signer: WebhookSigner,
    metrics: Arc<Metrics>,

    /// Configuration
    config: Config,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("storage", &self.storage)
            .field("scorer", &self.scorer)
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Open ledger with configuration and default collaborators
    pub async fn open(config: Config) -> Result<Self> {
        Self::builder(config).open().await
    }

    /// Builder for custom collaborators
    pub fn builder(config: Config) -> LedgerBuilder {
        LedgerBuilder {
            config,
            audit: Arc::new(TracingAuditSink),
            notifier: Arc::new(NoopNotifier),
            alerts: None,
            history: None,
        }
    }

    // Wallets

    /// Create a wallet; the user's first wallet in a currency is primary
    pub async fn create_wallet(&self, user_id: UserId, currency: Currency) -> Result<Wallet> {
        let actor = user_id.clone();
        match self.wallets.create_wallet(user_id, currency).await {
            Ok(wallet) => {
                self.audit(
                    AuditRecord::new("wallet.created", Some(actor), format!("wallet:{}", wallet.id))
                        .with_values(None, to_json(&wallet)),
                )
                .await;
                Ok(wallet)
            }
            Err(err) => Err(self
                .audit_failure("wallet.create_failed", Some(actor), "wallet".to_string(), err)
                .await),
        }
    }

    /// Make a wallet its owner's primary wallet for its currency
    pub async fn set_primary_wallet(&self, wallet_id: Uuid) -> Result<Wallet> {
        let resource = format!("wallet:{}", wallet_id);
        match self.wallets.set_primary(wallet_id).await {
            Ok(wallet) => {
                self.audit(AuditRecord::new(
                    "wallet.primary_set",
                    Some(wallet.user_id.clone()),
                    resource,
                ))
                .await;
                Ok(wallet)
            }
            Err(err) => Err(self.audit_failure("wallet.primary_set_failed", None, resource, err).await),
        }
    }

    /// The user's wallets, primary wallets first
    pub fn get_user_wallets(&self, user_id: &UserId) -> Result<Vec<Wallet>> {
        self.wallets.get_user_wallets(user_id)
    }

    /// Available balance of a wallet
    pub fn get_balance(&self, wallet_id: Uuid) -> Result<Decimal> {
        self.wallets.get_balance(wallet_id)
    }

    /// Per-currency totals for a user
    pub fn get_balance_summary(&self, user_id: &UserId) -> Result<BTreeMap<Currency, BalanceSummary>> {
        self.wallets.balance_summary(user_id)
    }

    /// Wallet Store, for direct balance mutation
    pub fn wallet_store(&self) -> &WalletStore {
        &self.wallets
    }

    /// Atomically credit or debit a wallet outside any transaction
    pub async fn mutate_balance(&self, wallet_id: Uuid, amount: Decimal, direction: Direction) -> Result<Wallet> {
        let resource = format!("wallet:{}", wallet_id);
        let before = self.storage.get_wallet(wallet_id).ok();

        match self.wallets.mutate_balance(wallet_id, amount, direction).await {
            Ok(wallet) => {
                self.audit(
                    AuditRecord::new("wallet.balance_mutated", Some(wallet.user_id.clone()), resource)
                        .with_values(before.as_ref().and_then(to_json), to_json(&wallet)),
                )
                .await;
                Ok(wallet)
            }
            Err(err) => Err(self.audit_failure("wallet.mutate_failed", None, resource, err).await),
        }
    }

    // Risk

    /// Score a transfer, applying the configured history-failure policy
    pub async fn score_transfer(&self, screening: &TransferScreening) -> Result<TransferRisk> {
        match self.scorer.score_transfer(screening).await {
            Ok(risk) => {
                self.metrics.record_risk_score(risk.risk_score.points());
                self.audit_transfer_alert(screening, &risk).await;
                Ok(risk)
            }
            Err(err) => {
                let resource = format!("user:{}", screening.user_id);
                match self.config.risk.failure_policy {
                    RiskFailurePolicy::Degrade => {
                        tracing::warn!(
                            user_id = %screening.user_id,
                            error = %err,
                            "Risk history unavailable, proceeding unscored"
                        );
                        self.audit(
                            AuditRecord::new("risk.unscored", Some(screening.user_id.clone()), resource)
                                .with_error(&err),
                        )
                        .await;
                        Ok(TransferRisk::unscored())
                    }
                    RiskFailurePolicy::Abort => Err(self
                        .audit_failure(
                            "risk.score_failed",
                            Some(screening.user_id.clone()),
                            resource,
                            err.into(),
                        )
                        .await),
                }
            }
        }
    }

    async fn audit_transfer_alert(&self, screening: &TransferScreening, risk: &TransferRisk) {
        let actor = Some(screening.user_id.clone());
        if let Some(alert_id) = risk.alert_id {
            self.audit(
                AuditRecord::new("security_alert.created", actor, format!("alert:{}", alert_id))
                    .with_values(
                        None,
                        Some(serde_json::json!({
                            "alert_type": AlertType::UnusualTransaction.as_str(),
                            "risk_score": risk.risk_score.points(),
                            "reasons": risk.reasons,
                        })),
                    ),
            )
            .await;
        } else if let Some(error) = &risk.alert_error {
            self.audit(
                AuditRecord::new(
                    "security_alert.create_failed",
                    actor,
                    format!("user:{}", screening.user_id),
                )
                .with_error(error),
            )
            .await;
        }
    }

    /// Record a login attempt for the login-risk checks
    pub fn record_login_attempt(&self, attempt: LoginAttempt) {
        self.login_log.record(attempt);
    }

    /// Login-risk screen; `true` means the login must be blocked
    pub async fn check_suspicious_activity(
        &self,
        user_id: &UserId,
        ip_address: &str,
        user_agent: &str,
    ) -> Result<bool> {
        let verdict = match self.login_monitor.assess(user_id, ip_address, user_agent).await {
            Ok(verdict) => verdict,
            Err(err) => {
                return Err(self
                    .audit_failure(
                        "login.screen_failed",
                        Some(user_id.clone()),
                        format!("user:{}", user_id),
                        err.into(),
                    )
                    .await);
            }
        };

        if let Some(alert_id) = verdict.alert_id {
            let resource = format!("alert:{}", alert_id);
            self.audit(
                AuditRecord::new("security_alert.created", Some(user_id.clone()), resource)
                    .with_values(
                        None,
                        Some(serde_json::json!({
                            "ip_address": ip_address,
                            "blocked": verdict.blocked,
                        })),
                    ),
            )
            .await;
        }
        Ok(verdict.blocked)
    }

    /// Security alert store shared with the reviewer workflow
    pub fn alert_store(&self) -> &Arc<dyn AlertStore> {
        &self.alerts
    }

    /// Reviewer status change on a security alert, audited
    pub async fn update_alert_status(
        &self,
        alert_id: Uuid,
        status: AlertStatus,
        reviewer: &str,
    ) -> Result<SecurityAlert> {
        let resource = format!("alert:{}", alert_id);
        let before = match self.alerts.get_alert(alert_id).await {
            Ok(alert) => alert,
            Err(err) => {
                return Err(self
                    .audit_failure("security_alert.update_failed", None, resource, err.into())
                    .await);
            }
        };

        match self.alerts.update_alert_status(alert_id, status, reviewer).await {
            Ok(after) => {
                self.audit(
                    AuditRecord::new("security_alert.updated", before.user_id.clone(), resource)
                        .with_values(
                            Some(serde_json::json!({ "status": before.status })),
                            Some(serde_json::json!({ "status": after.status, "reviewer": reviewer })),
                        ),
                )
                .await;
                Ok(after)
            }
            Err(err) => Err(self
                .audit_failure("security_alert.update_failed", before.user_id, resource, err.into())
                .await),
        }
    }

    // Transactions

    /// Validate, screen and persist a pending transaction
    ///
    /// No balance changes. Validation errors and risk refusals leave no record.
    pub async fn create_transaction(&self, request: NewTransaction) -> Result<Transaction> {
        let (tx, _) = self.create_screened(request).await?;
        Ok(tx)
    }

    async fn create_screened(&self, request: NewTransaction) -> Result<(Transaction, TransferRisk)> {
        let actor = request.sender_id.clone().or_else(|| request.receiver_id.clone());
        match self.build_transaction(request).await {
            Ok((tx, risk)) => {
                let tx = match self.handle.insert_transaction(tx).await {
                    Ok(tx) => tx,
                    Err(err) => {
                        return Err(self
                            .audit_failure("transaction.create_failed", actor, "transaction".to_string(), err)
                            .await)
                    }
                };
                self.audit(
                    AuditRecord::new("transaction.created", actor, format!("transaction:{}", tx.id))
                        .with_values(None, to_json(&tx)),
                )
                .await;
                self.publish(&tx).await;
                Ok((tx, risk))
            }
            Err(err) => Err(self
                .audit_failure("transaction.create_failed", actor, "transaction".to_string(), err)
                .await),
        }
    }

    async fn build_transaction(&self, request: NewTransaction) -> Result<(Transaction, TransferRisk)> {
        let transaction_type = request.transaction_type;
        let split = self.fees.split(transaction_type, request.amount)?;
        let amount = split.fee + split.net_amount;
        let currency = request.currency;

        let kind = match transaction_type {
            TransactionType::Send => TransactionKind::Send {
                sender: self.resolve(request.sender_id.as_ref(), "sender", currency)?,
                receiver: self.resolve(request.receiver_id.as_ref(), "receiver", currency)?,
            },
            TransactionType::Deposit => TransactionKind::Deposit {
                receiver: self.resolve(request.receiver_id.as_ref(), "receiver", currency)?,
            },
            TransactionType::Withdrawal => TransactionKind::Withdrawal {
                sender: self.resolve(request.sender_id.as_ref(), "sender", currency)?,
            },
            TransactionType::Receive => TransactionKind::Receive {
                sender: self.resolve_optional(request.sender_id.as_ref(), currency)?,
                receiver: self.resolve(request.receiver_id.as_ref(), "receiver", currency)?,
            },
            TransactionType::Refund => TransactionKind::Refund {
                original_transaction_id: None,
                sender: self.resolve_optional(request.sender_id.as_ref(), currency)?,
                receiver: self.resolve(request.receiver_id.as_ref(), "receiver", currency)?,
            },
        };

        let mut metadata = request.metadata;
        let risk = match (transaction_type, kind.sender()) {
            (TransactionType::Send | TransactionType::Withdrawal, Some(sender)) => {
                let screening = TransferScreening {
                    user_id: sender.user_id.clone(),
                    amount,
                    receiver_id: kind.receiver().map(|p| p.user_id.clone()),
                    ip_address: request.ip_address.clone(),
                };
                let risk = self.score_transfer(&screening).await?;

                if let Some(block) = self.config.risk.block_score {
                    if risk.risk_score.points() >= block {
                        return Err(Error::RiskRejected {
                            score: risk.risk_score.points(),
                            reasons: risk.reasons.join("; "),
                        });
                    }
                }

                metadata.insert("risk_score".to_string(), risk.risk_score.to_string());
                metadata.insert("risk_reasons".to_string(), risk.reasons.join("; "));
                metadata.insert("risk_scored".to_string(), risk.scored.to_string());
                if let Some(alert_id) = risk.alert_id {
                    metadata.insert("risk_alert_id".to_string(), alert_id.to_string());
                }
                risk
            }
            _ => TransferRisk::unscored(),
        };

        if let Some(ip) = request.ip_address {
            metadata.insert("ip_address".to_string(), ip);
        }

        let now = Utc::now();
        let tx = Transaction {
            id: Uuid::now_v7(),
            reference_id: ReferenceId::generate(),
            kind,
            amount,
            currency,
            fee: split.fee,
            net_amount: split.net_amount,
            status: TransactionStatus::Pending,
            description: request.description,
            metadata,
            created_at: now,
            updated_at: now,
        };

        Ok((tx, risk))
    }

    fn resolve(&self, user: Option<&UserId>, role: &str, currency: Currency) -> Result<Party> {
        let user = user.ok_or_else(|| Error::InvalidRequest(format!("{} is required", role)))?;
        let wallet = self.wallets.primary_wallet(user, currency)?;
        Ok(Party {
            user_id: user.clone(),
            wallet_id: wallet.id,
        })
    }

    fn resolve_optional(&self, user: Option<&UserId>, currency: Currency) -> Result<Option<Party>> {
        user.map(|u| self.resolve(Some(u), "party", currency)).transpose()
    }

    /// Apply a pending transaction's balance effects
    ///
    /// Fails with `InvalidState` unless the transaction is `pending`. Any
    /// other failure leaves it `failed` with no balance change.
    pub async fn process_transaction(&self, transaction_id: Uuid) -> Result<Transaction> {
        self.settle(transaction_id, None).await
    }

    /// [`Ledger::process_transaction`] that gives up before commit once `deadline` passes
    pub async fn process_transaction_with_deadline(
        &self,
        transaction_id: Uuid,
        deadline: Instant,
    ) -> Result<Transaction> {
        self.settle(transaction_id, Some(deadline)).await
    }

    async fn settle(&self, transaction_id: Uuid, deadline: Option<Instant>) -> Result<Transaction> {
        let resource = format!("transaction:{}", transaction_id);

        match self.handle.settle(transaction_id, deadline).await {
            Ok(tx) => {
                self.audit(
                    AuditRecord::new("transaction.completed", tx.sender_id().cloned(), resource)
                        .with_values(
                            Some(serde_json::json!({ "status": TransactionStatus::Pending })),
                            to_json(&tx),
                        ),
                )
                .await;
                self.publish(&tx).await;
                Ok(tx)
            }
            Err(err) => {
                let err = self.audit_failure("transaction.process_failed", None, resource, err).await;
                if let Ok(tx) = self.storage.get_transaction(transaction_id) {
                    if tx.status == TransactionStatus::Failed && !matches!(err, Error::InvalidState { .. }) {
                        self.publish(&tx).await;
                    }
                }
                Err(err)
            }
        }
    }

    /// Create, screen and process a user-to-user transfer
    pub async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt> {
        let (tx, risk) = self.create_screened(request.into()).await?;
        let tx = self.process_transaction(tx.id).await?;

        Ok(TransferReceipt {
            transaction_id: tx.id,
            reference_id: tx.reference_id,
            amount: tx.amount,
            fee: tx.fee,
            net_amount: tx.net_amount,
            status: tx.status,
            risk,
        })
    }

    /// Cancel a pending transaction
    pub async fn cancel_transaction(&self, transaction_id: Uuid) -> Result<Transaction> {
        let resource = format!("transaction:{}", transaction_id);
        match self.handle.cancel(transaction_id).await {
            Ok(tx) => {
                self.audit(
                    AuditRecord::new("transaction.cancelled", tx.sender_id().cloned(), resource)
                        .with_values(None, to_json(&tx)),
                )
                .await;
                self.publish(&tx).await;
                Ok(tx)
            }
            Err(err) => Err(self.audit_failure("transaction.cancel_failed", None, resource, err).await),
        }
    }

    /// Refund a completed send
    ///
    /// Moves `amount` (default and maximum: the original net amount) from the
    /// original receiver back to the original sender through a new `refund`
    /// transaction; the original becomes `refunded`.
    pub async fn refund_transaction(
        &self,
        original_id: Uuid,
        amount: Option<Decimal>,
        reason: Option<String>,
    ) -> Result<Transaction> {
        let resource = format!("transaction:{}", original_id);
        match self.refund_inner(original_id, amount, reason).await {
            Ok((refund, original)) => {
                self.audit(
                    AuditRecord::new("transaction.refunded", original.sender_id().cloned(), resource)
                        .with_values(
                            Some(serde_json::json!({ "status": TransactionStatus::Completed })),
                            to_json(&original),
                        ),
                )
                .await;
                self.publish(&original).await;
                self.publish(&refund).await;
                Ok(refund)
            }
            Err(err) => Err(self.audit_failure("transaction.refund_failed", None, resource, err).await),
        }
    }

    async fn refund_inner(
        &self,
        original_id: Uuid,
        amount: Option<Decimal>,
        reason: Option<String>,
    ) -> Result<(Transaction, Transaction)> {
        let original = self.storage.get_transaction(original_id)?;

        let (sender, receiver) = match &original.kind {
            TransactionKind::Send { sender, receiver } => (sender.clone(), receiver.clone()),
            _ => {
                return Err(Error::InvalidRequest(format!(
                    "transaction {} is a {}, only sends can be refunded",
                    original_id,
                    original.transaction_type()
                )))
            }
        };
        if original.status != TransactionStatus::Completed {
            return Err(Error::InvalidState {
                transaction_id: original_id,
                status: original.status,
            });
        }

        let amount = self.fees.validate_amount(amount.unwrap_or(original.net_amount))?;
        if amount > original.net_amount {
            return Err(Error::InvalidAmount(format!(
                "refund {} exceeds refundable {}",
                amount, original.net_amount
            )));
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("original_reference_id".to_string(), original.reference_id.to_string());

        let now = Utc::now();
        let refund = Transaction {
            id: Uuid::now_v7(),
            reference_id: ReferenceId::generate(),
            kind: TransactionKind::Refund {
                original_transaction_id: Some(original_id),
                sender: Some(receiver),
                receiver: sender,
            },
            amount,
            currency: original.currency,
            fee: Decimal::ZERO,
            net_amount: amount,
            status: TransactionStatus::Pending,
            description: reason.or_else(|| Some(format!("Refund of {}", original.reference_id))),
            metadata,
            created_at: now,
            updated_at: now,
        };

        let outcome = self.handle.refund(original_id, refund).await?;
        Ok((outcome.refund, outcome.original))
    }

    // Queries

    /// Get transaction by ID
    pub fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction> {
        self.storage.get_transaction(transaction_id)
    }

    /// Get transaction by external reference
    pub fn get_transaction_by_reference(&self, reference_id: &str) -> Result<Transaction> {
        self.storage
            .get_transaction_by_reference(&ReferenceId::parse(reference_id)?)
    }

    /// The user's transactions as sender or receiver, newest first
    pub fn get_user_transactions(&self, user_id: &UserId, query: &TransactionQuery) -> Result<Vec<Transaction>> {
        self.storage.user_transactions(user_id, query)
    }

    /// Approximate record counts
    pub fn storage_stats(&self) -> Result<StorageStats> {
        self.storage.get_stats()
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Drop expired wallet cache entries
    pub fn purge_cache(&self) {
        self.cache.cleanup();
    }

    /// Stop the writer; later writes fail with `StoreUnavailable`
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down ledger");
        self.handle.shutdown().await
    }

    // Collaborators

    async fn audit(&self, record: AuditRecord) {
        let action = record.action.clone();
        if let Err(e) = self.audit.record(record).await {
            tracing::warn!(action = %action, error = %e, "Audit sink rejected record");
        }
    }

    /// Record a failure with the audit sink and hand the error back
    async fn audit_failure(
        &self,
        action: &str,
        actor: Option<UserId>,
        resource: String,
        err: Error,
    ) -> Error {
        tracing::debug!(action, resource = %resource, error = %err, kind = ?err.kind(), "Operation failed");
        self.audit(AuditRecord::new(action, actor, resource).with_error(&err))
            .await;
        err
    }

    /// Signed, best-effort notification to both parties
    async fn publish(&self, tx: &Transaction) {
        let event = LedgerEvent::from_transaction(tx);
        let notification = match self.signer.sign_event(&event) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(transaction_id = %tx.id, error = %e, "Failed to encode notification");
                return;
            }
        };

        for recipient in event.recipients() {
            if let Err(e) = self.notifier.notify(recipient, notification.clone()).await {
                tracing::warn!(
                    transaction_id = %tx.id,
                    recipient = %recipient,
                    error = %e,
                    "Notification dispatch failed"
                );
                self.audit(
                    AuditRecord::new("notification.failed", Some(recipient.clone()), format!("transaction:{}", tx.id))
                        .with_error(&e),
                )
                .await;
            }
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Option<serde_json::Value> {
    serde_json::to_value(value).ok()
}
