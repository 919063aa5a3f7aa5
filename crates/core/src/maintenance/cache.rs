//! Settlement result caching using Moka.
//!
//! Entries are keyed by `(license_id, ledger_version)`. Every mutation bumps
//! the version, so a stale entry is never hit; it just ages out.

use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;

use timebank_shared::types::LicenseId;

use super::ledger::LicenseLedger;
use super::settlement::{Settlement, SettlementCalculator};

/// Default cache capacity (number of entries).
const DEFAULT_CACHE_CAPACITY: u64 = 1000;

/// Default time-to-live for cache entries (5 minutes).
const DEFAULT_TTL_SECS: u64 = 300;

/// Cache for computed settlements. Cheap to clone and thread-safe.
#[derive(Clone)]
pub struct SettlementCache {
    cache: Cache<(LicenseId, i64), Arc<Vec<Settlement>>>,
}

impl SettlementCache {
    /// Creates a cache with default settings (1000 entries, 5 minute TTL).
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_CACHE_CAPACITY, DEFAULT_TTL_SECS)
    }

    /// Creates a cache with custom capacity and time-to-live.
    #[must_use]
    pub fn with_config(max_capacity: u64, ttl_secs: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self { cache }
    }

    /// Returns the settlements of the ledger, computing them on a miss.
    #[must_use]
    pub fn settlements(&self, ledger: &LicenseLedger) -> Arc<Vec<Settlement>> {
        let key = (ledger.license_id(), ledger.version());

        if let Some(cached) = self.cache.get(&key) {
            return cached;
        }

        let settlements = Arc::new(SettlementCalculator::calculate_interim_settlements(ledger));
        self.cache.insert(key, Arc::clone(&settlements));
        settlements
    }

    /// Looks up settlements without computing them.
    #[must_use]
    pub fn get(&self, license_id: LicenseId, version: i64) -> Option<Arc<Vec<Settlement>>> {
        self.cache.get(&(license_id, version))
    }
}

impl Default for SettlementCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maintenance::allocation::AllocationEngine;
    use crate::maintenance::types::CreateTimeCreditInput;
    use chrono::NaiveDate;
    use timebank_shared::types::Hours;

    fn ledger_with_credit() -> LicenseLedger {
        let mut ledger = LicenseLedger::new(LicenseId::new());
        add_credit(&mut ledger);
        ledger
    }

    fn add_credit(ledger: &mut LicenseLedger) {
        let input = CreateTimeCreditInput {
            license_id: ledger.license_id(),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            credit_hours: Hours::from_whole(10),
        };
        AllocationEngine::record_credit(ledger, input).unwrap();
    }

    #[test]
    fn test_cache_miss_then_hit() {
        let cache = SettlementCache::new();
        let ledger = ledger_with_credit();

        assert!(cache.get(ledger.license_id(), ledger.version()).is_none());
        let first = cache.settlements(&ledger);
        let second = cache.settlements(&ledger);

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_mutation_changes_key() {
        let cache = SettlementCache::new();
        let mut ledger = ledger_with_credit();
        let before = cache.settlements(&ledger);

        add_credit(&mut ledger);
        let after = cache.settlements(&ledger);

        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 2);
    }

    #[test]
    fn test_versions_are_cached_independently() {
        let cache = SettlementCache::with_config(10, 60);
        let mut ledger = ledger_with_credit();
        let license_id = ledger.license_id();
        let old_version = ledger.version();
        let _ = cache.settlements(&ledger);

        add_credit(&mut ledger);

        assert!(cache.get(license_id, old_version).is_some());
        assert!(cache.get(license_id, ledger.version()).is_none());
        let _ = cache.settlements(&ledger);
        assert_eq!(cache.get(license_id, ledger.version()).unwrap().len(), 2);
    }
}
