//! Read-through branch cache

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use tracing::debug;

use crate::error::{CatalogError, Result};

use super::{BranchKey, SchemaBranch};

/// Loads a branch from storage; `Ok(None)` when it does not exist
pub type BranchFetcher = Arc<dyn Fn(&BranchKey) -> Result<Option<SchemaBranch>> + Send + Sync>;

/// Size and time bounded cache of branches keyed by name and by id.
///
/// A resolved branch is cached under both of its keys. Misses are never
/// cached.
pub struct SchemaBranchCache {
    cache: Cache<BranchKey, SchemaBranch>,
    fetcher: BranchFetcher,
}

impl SchemaBranchCache {
    /// `max_size` counts branches, not keys
    pub fn new(max_size: u64, expiry: Duration, fetcher: BranchFetcher) -> Self {
        let cache = Cache::builder()
            // one entry under the name and one under the id
            .max_capacity(max_size.saturating_mul(2))
            .time_to_live(expiry)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { cache, fetcher }
    }

    /// Cached branch for `key`, fetching on a miss
    pub fn get(&self, key: &BranchKey) -> Result<SchemaBranch> {
        if let Some(branch) = self.cache.get(key) {
            debug!(%key, "branch cache hit");
            return Ok(branch);
        }
        debug!(%key, "branch cache miss");
        let branch = (self.fetcher)(key)?
            .ok_or_else(|| CatalogError::SchemaBranchNotFound(key.to_string()))?;
        self.cache.insert(BranchKey::Name(branch.name.clone()), branch.clone());
        self.cache.insert(BranchKey::Id(branch.id), branch.clone());
        Ok(branch)
    }

    /// Drop `key` and, if it was cached, the sibling key of the same branch
    pub fn invalidate(&self, key: &BranchKey) {
        if let Some(branch) = self.cache.get(key) {
            self.cache.invalidate(&BranchKey::Name(branch.name));
            self.cache.invalidate(&BranchKey::Id(branch.id));
        }
        self.cache.invalidate(key);
    }
}

impl fmt::Debug for SchemaBranchCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaBranchCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn counting_fetcher(calls: Arc<AtomicUsize>) -> BranchFetcher {
        Arc::new(move |key: &BranchKey| -> Result<Option<SchemaBranch>> {
            calls.fetch_add(1, Ordering::SeqCst);
            let mut branch = SchemaBranch::new("feature");
            branch.id = 3;
            Ok(match key {
                BranchKey::Name(name) if name == "feature" => Some(branch),
                BranchKey::Id(3) => Some(branch),
                _ => None,
            })
        })
    }

    #[test]
    fn test_hit_after_first_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = SchemaBranchCache::new(100, Duration::from_secs(60), counting_fetcher(calls.clone()));

        assert_eq!(cache.get(&BranchKey::name("feature")).unwrap().id, 3);
        assert_eq!(cache.get(&BranchKey::name("feature")).unwrap().id, 3);
        // the id key was populated by the name lookup
        assert_eq!(cache.get(&BranchKey::Id(3)).unwrap().name, "feature");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalidate_refetches_both_keys() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = SchemaBranchCache::new(100, Duration::from_secs(60), counting_fetcher(calls.clone()));

        cache.get(&BranchKey::Id(3)).unwrap();
        cache.invalidate(&BranchKey::Id(3));
        cache.invalidate(&BranchKey::Id(3));
        cache.get(&BranchKey::name("feature")).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_capacity_holds_both_keys_of_each_branch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let fetcher: BranchFetcher = Arc::new(move |key: &BranchKey| -> Result<Option<SchemaBranch>> {
            counter.fetch_add(1, Ordering::SeqCst);
            let (id, name) = match key {
                BranchKey::Id(1) => (1, "a"),
                BranchKey::Id(2) => (2, "b"),
                BranchKey::Name(name) if name == "a" => (1, "a"),
                BranchKey::Name(name) if name == "b" => (2, "b"),
                _ => return Ok(None),
            };
            let mut branch = SchemaBranch::new(name);
            branch.id = id;
            Ok(Some(branch))
        });
        let cache = SchemaBranchCache::new(2, Duration::from_secs(60), fetcher);

        cache.get(&BranchKey::name("a")).unwrap();
        cache.get(&BranchKey::name("b")).unwrap();
        cache.cache.run_pending_tasks();
        assert_eq!(cache.cache.entry_count(), 4);

        for key in [BranchKey::name("a"), BranchKey::name("b"), BranchKey::Id(1), BranchKey::Id(2)] {
            cache.get(&key).unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_miss_is_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = SchemaBranchCache::new(100, Duration::from_secs(60), counting_fetcher(calls.clone()));

        for _ in 0..2 {
            let err = cache.get(&BranchKey::name("ghost")).unwrap_err();
            assert!(matches!(err, CatalogError::SchemaBranchNotFound(_)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_entries_expire() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = SchemaBranchCache::new(100, Duration::from_millis(50), counting_fetcher(calls.clone()));

        cache.get(&BranchKey::Id(3)).unwrap();
        thread::sleep(Duration::from_millis(150));
        cache.get(&BranchKey::Id(3)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fetcher_error_propagates() {
        let cache = SchemaBranchCache::new(
            10,
            Duration::from_secs(60),
            Arc::new(|_: &BranchKey| -> Result<Option<SchemaBranch>> {
                Err(CatalogError::InvalidArgument("storage offline".into()))
            }),
        );
        assert!(matches!(
            cache.get(&BranchKey::Id(1)),
            Err(CatalogError::InvalidArgument(_))
        ));
    }
}
