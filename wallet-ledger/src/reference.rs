//! Externally visible transaction references
//!
//! Format: `TXN_<13-digit unix millis>_<24 hex chars>`. The millisecond
//! prefix keeps references sortable by creation time; the 96 random bits
//! make collisions negligible.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

const PREFIX: &str = "TXN_";

/// Transaction reference ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReferenceId(String);

impl ReferenceId {
    /// Generate a fresh reference
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis().max(0);
        let mut random = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut random);
        Self(format!("{}{:013}_{}", PREFIX, millis, hex::encode(random)))
    }

    /// Parse a reference received from a caller
    pub fn parse(s: &str) -> crate::Result<Self> {
        let invalid = || crate::Error::InvalidRequest(format!("malformed reference id {}", s));

        let rest = s.strip_prefix(PREFIX).ok_or_else(invalid)?;
        let (millis, random) = rest.split_once('_').ok_or_else(invalid)?;
        if millis.len() != 13 || !millis.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if random.len() != 24 || !random.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        Ok(Self(s.to_string()))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_reference_parses() {
        let reference = ReferenceId::generate();
        assert!(reference.as_str().starts_with("TXN_"));
        assert_eq!(reference.as_str().len(), 4 + 13 + 1 + 24);
        assert_eq!(ReferenceId::parse(reference.as_str()).unwrap(), reference);
    }

    #[test]
    fn test_malformed_references_rejected() {
        assert!(ReferenceId::parse("TXN_123_abc").is_err());
        assert!(ReferenceId::parse("REF_1700000000000_0123456789abcdef01234567").is_err());
        assert!(ReferenceId::parse("TXN_1700000000000_0123456789abcdef0123456z").is_err());
    }

    #[test]
    fn test_references_unique() {
        let refs: HashSet<ReferenceId> = (0..10_000).map(|_| ReferenceId::generate()).collect();
        assert_eq!(refs.len(), 10_000);
    }
}
