//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `wallets` - Wallet balance records (key: wallet_id)
//! - `transactions` - Transaction records (key: transaction_id)
//! - `alerts` - Security alerts (key: alert_id)
//! - `indices` - Secondary indices for fast lookups
//!
//! # Index keys
//!
//! User ids are length-prefixed so one user's prefix never matches another's.
//! Timestamps are big-endian nanoseconds so byte order is creation order.
//!
//! - `ref` || reference_id -> transaction_id
//! - `usr` || user || nanos || transaction_id (both parties)
//! - `snd` || user || nanos || transaction_id (sender only)
//! - `pair` || sender || receiver || transaction_id
//! - `wal` || user || wallet_id
//! - `alr` || nanos || alert_id

use crate::{
    error::{Error, Result},
    reference::ReferenceId,
    types::{Transaction, TransactionQuery, TransactionStatus, UserId, Wallet},
    Config,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use risk_engine::{
    AlertFilter, AlertStatus, AlertStore, NewAlert, SecurityAlert, TransactionHistory,
};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_WALLETS: &str = "wallets";
const CF_TRANSACTIONS: &str = "transactions";
const CF_ALERTS: &str = "alerts";
const CF_INDICES: &str = "indices";

const IDX_REFERENCE: &[u8] = b"ref:";
const IDX_USER_TX: &[u8] = b"usr:";
const IDX_SENDER_TX: &[u8] = b"snd:";
const IDX_PAIR: &[u8] = b"pair:";
const IDX_USER_WALLET: &[u8] = b"wal:";
const IDX_ALERT: &[u8] = b"alr:";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
    // Serializes alert read-modify-write; balances go through the writer actor
    alert_lock: Mutex<()>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").field("path", &self.db.path()).finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_WALLETS, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_ALERTS, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB");

        Ok(Self {
            db: Arc::new(db),
            alert_lock: Mutex::new(()),
        })
    }

    // Column family options

    fn cf_options_records() -> Options {
        let mut opts = Options::default();
        // Records are read on every request, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::StoreUnavailable(format!("Column family {} not found", name)))
    }

    // Wallet operations

    /// Get wallet by ID
    pub fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet> {
        let cf = self.cf_handle(CF_WALLETS)?;
        let value = self
            .db
            .get_cf(cf, wallet_id.as_bytes())?
            .ok_or_else(|| Error::WalletNotFound(wallet_id.to_string()))?;

        Ok(bincode::deserialize(&value)?)
    }

    /// All wallets owned by a user, in wallet id order
    pub fn user_wallets(&self, user: &UserId) -> Result<Vec<Wallet>> {
        let prefix = Self::user_prefix(IDX_USER_WALLET, user);
        self.scan_ids(&prefix, Direction::Forward)?
            .map(|id| id.and_then(|id| self.get_wallet(id)))
            .collect()
    }

    // Transaction operations

    /// Get transaction by ID
    pub fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let value = self
            .db
            .get_cf(cf, transaction_id.as_bytes())?
            .ok_or_else(|| Error::TransactionNotFound(transaction_id.to_string()))?;

        Ok(bincode::deserialize(&value)?)
    }

    /// Get transaction by external reference
    pub fn get_transaction_by_reference(&self, reference: &ReferenceId) -> Result<Transaction> {
        let cf = self.cf_handle(CF_INDICES)?;
        let value = self
            .db
            .get_cf(cf, Self::reference_key(reference))?
            .ok_or_else(|| Error::TransactionNotFound(reference.to_string()))?;

        self.get_transaction(Self::uuid_from(&value)?)
    }

    /// Whether a reference is already taken
    pub fn reference_exists(&self, reference: &ReferenceId) -> Result<bool> {
        let cf = self.cf_handle(CF_INDICES)?;
        Ok(self.db.get_pinned_cf(cf, Self::reference_key(reference))?.is_some())
    }

    /// Transactions where the user is sender or receiver, newest first
    pub fn user_transactions(&self, user: &UserId, query: &TransactionQuery) -> Result<Vec<Transaction>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }

        let prefix = Self::user_prefix(IDX_USER_TX, user);
        let mut out = Vec::new();
        let mut skipped = 0;

        for id in self.scan_ids(&prefix, Direction::Reverse)? {
            let tx = self.get_transaction(id?)?;
            if !query.matches(&tx) {
                continue;
            }
            if skipped < query.offset {
                skipped += 1;
                continue;
            }
            out.push(tx);
            if out.len() >= query.limit {
                break;
            }
        }

        Ok(out)
    }

    // Batch operations (atomic)

    /// Write wallets and transactions, with their indices, in one batch
    pub fn commit(&self, wallets: &[Wallet], transactions: &[Transaction]) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_wallets = self.cf_handle(CF_WALLETS)?;
        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        for wallet in wallets {
            batch.put_cf(cf_wallets, wallet.id.as_bytes(), bincode::serialize(wallet)?);

            let mut idx = Self::user_prefix(IDX_USER_WALLET, &wallet.user_id);
            idx.extend_from_slice(wallet.id.as_bytes());
            batch.put_cf(cf_indices, &idx, b"");
        }

        for tx in transactions {
            batch.put_cf(cf_transactions, tx.id.as_bytes(), bincode::serialize(tx)?);

            batch.put_cf(cf_indices, Self::reference_key(&tx.reference_id), tx.id.as_bytes());

            let nanos = Self::nanos(tx.created_at);
            for user in [tx.sender_id(), tx.receiver_id()].into_iter().flatten() {
                batch.put_cf(cf_indices, Self::timed_key(IDX_USER_TX, user, nanos, tx.id), b"");
            }

            if let Some(sender) = tx.sender_id() {
                batch.put_cf(cf_indices, Self::timed_key(IDX_SENDER_TX, sender, nanos, tx.id), b"");

                if let Some(receiver) = tx.receiver_id() {
                    let mut idx = Self::pair_prefix(sender, receiver);
                    idx.extend_from_slice(tx.id.as_bytes());
                    batch.put_cf(cf_indices, &idx, b"");
                }
            }
        }

        self.db.write(batch)?;

        tracing::debug!(
            wallets = wallets.len(),
            transactions = transactions.len(),
            "Batch committed"
        );

        Ok(())
    }

    // Alert operations

    fn put_alert(&self, alert: &SecurityAlert, index: bool) -> Result<()> {
        let mut batch = WriteBatch::default();
        let cf_alerts = self.cf_handle(CF_ALERTS)?;
        batch.put_cf(cf_alerts, alert.id.as_bytes(), bincode::serialize(alert)?);

        if index {
            let cf_indices = self.cf_handle(CF_INDICES)?;
            let mut idx = IDX_ALERT.to_vec();
            idx.extend_from_slice(&Self::nanos(alert.created_at).to_be_bytes());
            idx.extend_from_slice(alert.id.as_bytes());
            batch.put_cf(cf_indices, &idx, b"");
        }

        self.db.write(batch)?;
        Ok(())
    }

    fn load_alert(&self, alert_id: Uuid) -> Result<Option<SecurityAlert>> {
        let cf = self.cf_handle(CF_ALERTS)?;
        match self.db.get_cf(cf, alert_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    // History queries

    /// Amounts of the sender's latest completed transactions, newest first
    pub fn recent_completed_amounts(&self, sender: &UserId, limit: usize) -> Result<Vec<Decimal>> {
        let prefix = Self::user_prefix(IDX_SENDER_TX, sender);
        let mut amounts = Vec::with_capacity(limit);
        if limit == 0 {
            return Ok(amounts);
        }

        for id in self.scan_ids(&prefix, Direction::Reverse)? {
            let tx = self.get_transaction(id?)?;
            if tx.status == TransactionStatus::Completed {
                amounts.push(tx.amount);
                if amounts.len() >= limit {
                    break;
                }
            }
        }

        Ok(amounts)
    }

    /// Transactions (any status) the sender created since `since`
    pub fn count_sent_since(&self, sender: &UserId, since: DateTime<Utc>) -> Result<usize> {
        let prefix = Self::user_prefix(IDX_SENDER_TX, sender);
        let since = Self::nanos(since);
        let cf = self.cf_handle(CF_INDICES)?;

        let upper = Self::upper_bound(&prefix);

        let mut count = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::From(&upper, Direction::Reverse)) {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let nanos = key
                .get(prefix.len()..prefix.len() + 8)
                .and_then(|b| <[u8; 8]>::try_from(b).ok())
                .map(u64::from_be_bytes)
                .ok_or_else(|| Error::StoreUnavailable("corrupt sender index key".to_string()))?;
            if nanos < since {
                break;
            }
            count += 1;
        }

        Ok(count)
    }

    /// Whether the sender has a completed transaction to the receiver
    pub fn has_completed_transfer_to(&self, sender: &UserId, receiver: &UserId) -> Result<bool> {
        let prefix = Self::pair_prefix(sender, receiver);
        for id in self.scan_ids(&prefix, Direction::Forward)? {
            if self.get_transaction(id?)?.status == TransactionStatus::Completed {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // Index helpers

    /// Ids stored as the trailing 16 bytes of every key under `prefix`
    ///
    /// Lazy: keys are read only as far as the caller iterates.
    fn scan_ids(
        &self,
        prefix: &[u8],
        direction: Direction,
    ) -> Result<impl Iterator<Item = Result<Uuid>> + '_> {
        let cf = self.cf_handle(CF_INDICES)?;
        let upper = Self::upper_bound(prefix);
        let mode = match direction {
            Direction::Forward => IteratorMode::From(prefix, Direction::Forward),
            Direction::Reverse => IteratorMode::From(&upper, Direction::Reverse),
        };

        let prefix = prefix.to_vec();
        Ok(self.db.iterator_cf(cf, mode).map_while(move |item| match item {
            Ok((key, _)) if key.starts_with(&prefix) => {
                let tail = key.len().checked_sub(16).map(|start| &key[start..]).unwrap_or_default();
                Some(Self::uuid_from(tail))
            }
            Ok(_) => None,
            Err(e) => Some(Err(e.into())),
        }))
    }

    fn uuid_from(bytes: &[u8]) -> Result<Uuid> {
        Uuid::from_slice(bytes).map_err(|e| Error::StoreUnavailable(format!("corrupt index entry: {}", e)))
    }

    fn upper_bound(prefix: &[u8]) -> Vec<u8> {
        // Longer than any suffix written under a prefix
        let mut key = prefix.to_vec();
        key.extend_from_slice(&[0xFF; 48]);
        key
    }

    fn user_prefix(tag: &[u8], user: &UserId) -> Vec<u8> {
        let mut key = tag.to_vec();
        Self::push_user(&mut key, user);
        key
    }

    fn pair_prefix(sender: &UserId, receiver: &UserId) -> Vec<u8> {
        let mut key = IDX_PAIR.to_vec();
        Self::push_user(&mut key, sender);
        Self::push_user(&mut key, receiver);
        key
    }

    fn timed_key(tag: &[u8], user: &UserId, nanos: u64, id: Uuid) -> Vec<u8> {
        let mut key = Self::user_prefix(tag, user);
        key.extend_from_slice(&nanos.to_be_bytes());
        key.extend_from_slice(id.as_bytes());
        key
    }

    fn push_user(key: &mut Vec<u8>, user: &UserId) {
        let bytes = user.as_str().as_bytes();
        key.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        key.extend_from_slice(bytes);
    }

    fn reference_key(reference: &ReferenceId) -> Vec<u8> {
        let mut key = IDX_REFERENCE.to_vec();
        key.extend_from_slice(reference.as_str().as_bytes());
        key
    }

    fn nanos(at: DateTime<Utc>) -> u64 {
        at.timestamp_nanos_opt().unwrap_or(0).max(0) as u64
    }

    /// Approximate record counts
    pub fn get_stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            total_wallets: self.approximate_count(self.cf_handle(CF_WALLETS)?)?,
            total_transactions: self.approximate_count(self.cf_handle(CF_TRANSACTIONS)?)?,
            total_alerts: self.approximate_count(self.cf_handle(CF_ALERTS)?)?,
        })
    }

    fn approximate_count(&self, cf: &ColumnFamily) -> Result<u64> {
        Ok(self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0))
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Wallet records
    pub total_wallets: u64,
    /// Transaction records
    pub total_transactions: u64,
    /// Security alerts
    pub total_alerts: u64,
}

#[async_trait]
impl TransactionHistory for Storage {
    async fn recent_completed_amounts(
        &self,
        sender: &UserId,
        limit: usize,
    ) -> risk_engine::Result<Vec<Decimal>> {
        Ok(Storage::recent_completed_amounts(self, sender, limit)?)
    }

    async fn count_sent_since(&self, sender: &UserId, since: DateTime<Utc>) -> risk_engine::Result<usize> {
        Ok(Storage::count_sent_since(self, sender, since)?)
    }

    async fn has_completed_transfer_to(
        &self,
        sender: &UserId,
        receiver: &UserId,
    ) -> risk_engine::Result<bool> {
        Ok(Storage::has_completed_transfer_to(self, sender, receiver)?)
    }
}

#[async_trait]
impl AlertStore for Storage {
    async fn create_alert(&self, alert: NewAlert) -> risk_engine::Result<SecurityAlert> {
        let alert = SecurityAlert::open(alert);
        self.put_alert(&alert, true)
            .map_err(|e| risk_engine::Error::AlertStore(e.to_string()))?;

        tracing::info!(
            alert_id = %alert.id,
            alert_type = %alert.alert_type,
            severity = ?alert.severity,
            "Security alert created"
        );

        Ok(alert)
    }

    async fn get_alert(&self, alert_id: Uuid) -> risk_engine::Result<SecurityAlert> {
        self.load_alert(alert_id)
            .map_err(|e| risk_engine::Error::AlertStore(e.to_string()))?
            .ok_or_else(|| risk_engine::Error::AlertNotFound(alert_id.to_string()))
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> risk_engine::Result<Vec<SecurityAlert>> {
        let limit = filter.limit();
        let to_store_err = |e: Error| risk_engine::Error::AlertStore(e.to_string());

        let mut alerts = Vec::new();
        if limit == 0 {
            return Ok(alerts);
        }

        for id in self.scan_ids(IDX_ALERT, Direction::Reverse).map_err(to_store_err)? {
            let id = id.map_err(to_store_err)?;
            if let Some(alert) = self.load_alert(id).map_err(to_store_err)? {
                if filter.matches(&alert) {
                    alerts.push(alert);
                    if alerts.len() >= limit {
                        break;
                    }
                }
            }
        }

        Ok(alerts)
    }

    async fn update_alert_status(
        &self,
        alert_id: Uuid,
        status: AlertStatus,
        reviewer: &str,
    ) -> risk_engine::Result<SecurityAlert> {
        let _guard = self.alert_lock.lock();

        let mut alert = self
            .load_alert(alert_id)
            .map_err(|e| risk_engine::Error::AlertStore(e.to_string()))?
            .ok_or_else(|| risk_engine::Error::AlertNotFound(alert_id.to_string()))?;

        alert.transition(status, reviewer)?;
        self.put_alert(&alert, false)
            .map_err(|e| risk_engine::Error::AlertStore(e.to_string()))?;

        tracing::info!(alert_id = %alert_id, status = ?status, reviewer, "Alert status updated");

        Ok(alert)
    }
}
