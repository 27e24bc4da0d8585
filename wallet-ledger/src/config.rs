//! Configuration for the ledger

use risk_engine::{LoginConfig, ScoringConfig};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Fee policy
    pub fees: FeeConfig,

    /// Risk screening
    pub risk: RiskConfig,

    /// Wallet list cache
    pub cache: CacheConfig,

    /// Shared secret for notification signatures
    pub webhook_secret: String,

    /// Bounded writer mailbox size
    pub mailbox_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/wallet-ledger"),
            service_name: "wallet-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            fees: FeeConfig::default(),
            risk: RiskConfig::default(),
            cache: CacheConfig::default(),
            webhook_secret: String::new(),
            mailbox_capacity: 1000,
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Fee policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Proportional part of the `send` fee
    pub percentage: Decimal,

    /// Fixed part of the `send` fee
    pub fixed: Decimal,

    /// Decimal places amounts and fees carry
    pub scale: u32,

    /// Largest gross amount a single transaction may carry
    pub max_amount: Decimal,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            percentage: Decimal::new(29, 3), // 2.9%
            fixed: Decimal::new(30, 2),      // 0.30
            scale: 2,
            max_amount: Decimal::from(1_000_000_000u64),
        }
    }
}

/// What to do when transfer history cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskFailurePolicy {
    /// Proceed unscored (score 0) with a logged warning
    Degrade,
    /// Refuse the transfer with `StoreUnavailable`
    Abort,
}

impl FromStr for RiskFailurePolicy {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "degrade" => Ok(RiskFailurePolicy::Degrade),
            "abort" => Ok(RiskFailurePolicy::Abort),
            other => Err(crate::Error::Config(format!(
                "unknown risk failure policy {}",
                other
            ))),
        }
    }
}

/// Risk screening configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// History failure handling
    pub failure_policy: RiskFailurePolicy,

    /// Score at or above which a transfer is refused before creation
    pub block_score: Option<u32>,

    /// Transfer heuristics
    pub scoring: ScoringConfig,

    /// Login heuristics
    pub login: LoginConfig,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            failure_policy: RiskFailurePolicy::Abort,
            block_score: Some(85),
            scoring: ScoringConfig::default(),
            login: LoginConfig::default(),
        }
    }
}

/// Wallet list cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry lifetime (seconds)
    pub wallet_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { wallet_ttl_secs: 300 }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("WALLET_LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(secret) = std::env::var("WALLET_LEDGER_WEBHOOK_SECRET") {
            config.webhook_secret = secret;
        }

        if let Ok(policy) = std::env::var("WALLET_LEDGER_RISK_FAILURE_POLICY") {
            config.risk.failure_policy = policy.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the ledger cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.mailbox_capacity == 0 {
            return Err(crate::Error::Config("mailbox_capacity must be at least 1".to_string()));
        }
        if self.fees.percentage < Decimal::ZERO || self.fees.fixed < Decimal::ZERO {
            return Err(crate::Error::Config("fees must not be negative".to_string()));
        }
        if self.fees.max_amount <= Decimal::ZERO {
            return Err(crate::Error::Config("fees.max_amount must be positive".to_string()));
        }
        if self.webhook_secret.trim().is_empty() {
            return Err(crate::Error::Config(
                "webhook_secret must be set (WALLET_LEDGER_WEBHOOK_SECRET)".to_string(),
            ));
        }
        self.risk.scoring.validate()?;
        Ok(())
    }
}
