//! Per-user wallet list cache
//!
//! Owned by the [`crate::Ledger`] that created it; the writer invalidates a
//! user's entry on every mutation of that user's wallets.
//!
//! Each invalidation bumps the user's generation. A reader captures the
//! generation before reading storage and only caches its result if no
//! invalidation happened in between, so a slow read cannot reinstate a list
//! the writer has already superseded.

use crate::types::{UserId, Wallet};
use dashmap::DashMap;
use std::time::{Duration, Instant};

struct CachedWallets {
    wallets: Vec<Wallet>,
    loaded_at: Instant,
}

/// Wallet list cache with a fixed TTL
pub struct WalletCache {
    ttl: Duration,
    entries: DashMap<UserId, CachedWallets>,
    // Never removed; a reset counter could let a stale read match again
    generations: DashMap<UserId, u64>,
}

impl WalletCache {
    /// Create new cache
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
            generations: DashMap::new(),
        }
    }

    /// Cached wallets, if present and fresh
    pub fn get(&self, user: &UserId) -> Option<Vec<Wallet>> {
        let entry = self.entries.get(user)?;
        if entry.loaded_at.elapsed() < self.ttl {
            return Some(entry.wallets.clone());
        }
        drop(entry);
        self.entries.remove(user);
        None
    }

    /// Store a freshly loaded list
    pub fn put(&self, user: UserId, wallets: Vec<Wallet>) {
        self.entries.insert(
            user,
            CachedWallets {
                wallets,
                loaded_at: Instant::now(),
            },
        );
    }

    /// Current invalidation generation for a user
    pub fn generation(&self, user: &UserId) -> u64 {
        self.generations.get(user).map(|g| *g).unwrap_or(0)
    }

    /// Store a list read at `generation`; skipped if the user was invalidated since
    ///
    /// Returns whether the list was cached.
    pub fn put_if_current(&self, user: UserId, wallets: Vec<Wallet>, generation: u64) -> bool {
        // The read guard holds off a concurrent bump until the insert is done
        let current = self.generations.get(&user);
        if current.as_deref().copied().unwrap_or(0) != generation {
            return false;
        }
        self.put(user, wallets);
        drop(current);
        true
    }

    /// Drop a user's entry
    pub fn invalidate(&self, user: &UserId) {
        *self.generations.entry(user.clone()).or_insert(0) += 1;
        self.entries.remove(user);
    }

    /// Drop expired entries
    pub fn cleanup(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.loaded_at.elapsed() < ttl);
    }

    /// Number of cached users
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for WalletCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Currency;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn wallet(user: &str) -> Wallet {
        Wallet {
            id: Uuid::now_v7(),
            user_id: UserId::new(user),
            currency: Currency::USD,
            balance: Decimal::ZERO,
            available_balance: Decimal::ZERO,
            pending_balance: Decimal::ZERO,
            is_primary: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_put_get_invalidate() {
        let cache = WalletCache::new(Duration::from_secs(60));
        let alice = UserId::new("alice");

        assert!(cache.get(&alice).is_none());
        cache.put(alice.clone(), vec![wallet("alice")]);
        assert_eq!(cache.get(&alice).unwrap().len(), 1);

        cache.invalidate(&alice);
        assert!(cache.get(&alice).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_read_overtaken_by_invalidation_is_not_cached() {
        let cache = WalletCache::new(Duration::from_secs(60));
        let alice = UserId::new("alice");

        // reader captures the generation, then the writer commits and invalidates
        let generation = cache.generation(&alice);
        let stale = vec![wallet("alice")];
        cache.invalidate(&alice);

        assert!(!cache.put_if_current(alice.clone(), stale, generation));
        assert!(cache.get(&alice).is_none());

        let fresh = cache.generation(&alice);
        assert!(cache.put_if_current(alice.clone(), vec![wallet("alice"); 2], fresh));
        assert_eq!(cache.get(&alice).unwrap().len(), 2);
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache = WalletCache::new(Duration::ZERO);
        let alice = UserId::new("alice");

        cache.put(alice.clone(), vec![wallet("alice")]);
        cache.put(UserId::new("bob"), vec![wallet("bob")]);
        assert!(cache.get(&alice).is_none());

        cache.cleanup();
        assert_eq!(cache.len(), 0);
    }
}
