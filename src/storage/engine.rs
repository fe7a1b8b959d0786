//! Tiered Link Engine
//!
//! Wires one [`ExpiryPool`] and one [`EvictionScheduler`] per configured
//! key length and routes calls to them.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       LinkEngine                         │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐        │
//! │  │ len 1 pool │   │ len 2 pool │   │ len 3 pool │  ...   │
//! │  │  RwLock    │   │  RwLock    │   │  RwLock    │        │
//! │  └─────▲──────┘   └─────▲──────┘   └─────▲──────┘        │
//! │        │                │                │               │
//! │  ┌─────┴──────┐   ┌─────┴──────┐   ┌─────┴──────┐        │
//! │  │ scheduler  │   │ scheduler  │   │ scheduler  │        │
//! │  └────────────┘   └────────────┘   └────────────┘        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Tiers share nothing. A key's length identifies its tier, so lookups
//! never touch more than one lock.

use crate::config::EngineConfig;
use crate::error::{ConfigError, InternalError, PoolError};
use crate::storage::entry::{Entry, LinkRequest, NewEntry};
use crate::storage::expiry::{EvictionScheduler, SchedulerConfig};
use crate::storage::pool::{ExpiryPool, PoolStats};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// The key allocation engine for every configured key length.
///
/// # Example
///
/// ```
/// use shortpool::config::EngineConfig;
/// use shortpool::storage::{LinkEngine, LinkKind, LinkRequest};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let engine = LinkEngine::start(EngineConfig::default()).unwrap();
///
/// let (key, _expires_at) = engine
///     .allocate_shortest(LinkRequest::new(LinkKind::Url, "https://example.com"))
///     .unwrap();
/// assert_eq!(key.len(), 1);
///
/// let entry = engine.resolve(&key).unwrap();
/// assert_eq!(entry.data().as_ref(), b"https://example.com");
///
/// engine.shutdown();
/// # }
/// ```
#[derive(Debug)]
pub struct LinkEngine {
    /// One pool per tier, sorted by key length, shortest first.
    tiers: Vec<Arc<ExpiryPool>>,
    schedulers: Mutex<Vec<EvictionScheduler>>,
    default_max_accesses: u32,
}

impl LinkEngine {
    /// Builds every tier without starting any background task.
    pub fn new(config: &EngineConfig) -> Result<Self, ConfigError> {
        let alphabet = config.validate()?;

        let tiers = config
            .sorted_tiers()
            .into_iter()
            .map(|tier| ExpiryPool::new(&alphabet, tier.key_len, tier.ttl).map(Arc::new))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        info!(
            tiers = tiers.len(),
            alphabet_len = alphabet.len(),
            "Link engine initialized"
        );

        Ok(Self {
            tiers,
            schedulers: Mutex::new(Vec::new()),
            default_max_accesses: config.default_max_accesses,
        })
    }

    /// Builds every tier and starts one eviction scheduler per tier.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: EngineConfig) -> Result<Self, ConfigError> {
        let engine = Self::new(&config)?;
        engine.start_schedulers(SchedulerConfig {
            safety_interval: config.safety_interval,
        });
        Ok(engine)
    }

    /// Starts the eviction schedulers. Does nothing if they are running.
    pub fn start_schedulers(&self, config: SchedulerConfig) {
        let mut schedulers = self.schedulers.lock().unwrap_or_else(PoisonError::into_inner);
        if !schedulers.is_empty() {
            warn!("Eviction schedulers already running");
            return;
        }
        for pool in &self.tiers {
            schedulers.push(EvictionScheduler::start(Arc::clone(pool), config.clone()));
        }
    }

    /// Stops every eviction scheduler.
    pub fn shutdown(&self) {
        let stopped: Vec<EvictionScheduler> = self
            .schedulers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        info!(schedulers = stopped.len(), "Link engine shutting down");
        // Dropping the handles stops the tasks.
    }

    /// Key lengths served, shortest first.
    pub fn key_lengths(&self) -> Vec<usize> {
        self.tiers.iter().map(|pool| pool.key_len()).collect()
    }

    pub fn default_max_accesses(&self) -> u32 {
        self.default_max_accesses
    }

    /// The pool for one key length.
    pub fn pool(&self, key_len: usize) -> Option<&Arc<ExpiryPool>> {
        self.tiers.iter().find(|pool| pool.key_len() == key_len)
    }

    fn pool_or_err(&self, key_len: usize) -> Result<&Arc<ExpiryPool>, PoolError> {
        self.pool(key_len).ok_or_else(|| {
            warn!(key_len, "Allocation requested for unknown tier");
            PoolError::Internal(InternalError::UnknownTier(key_len))
        })
    }

    /// Allocates a key of length `key_len` with a caller-computed expiry.
    pub fn allocate(&self, key_len: usize, new: NewEntry) -> Result<String, PoolError> {
        self.pool_or_err(key_len)?.allocate(new)
    }

    /// Allocates a key of length `key_len`, expiring after that tier's TTL.
    ///
    /// Returns the key and its expiry.
    pub fn allocate_with_ttl(
        &self,
        key_len: usize,
        request: LinkRequest,
    ) -> Result<(String, Instant), PoolError> {
        self.pool_or_err(key_len)?.allocate_with_ttl(request)
    }

    /// Tries every tier, shortest first, each with its own TTL.
    ///
    /// Exhausted tiers are skipped. An internal error stops the search.
    pub fn allocate_shortest(&self, request: LinkRequest) -> Result<(String, Instant), PoolError> {
        let mut last_err = None;

        for pool in &self.tiers {
            let key_len = pool.key_len();
            match self.allocate_with_ttl(key_len, request.clone()) {
                Ok(allocated) => return Ok(allocated),
                Err(err @ PoolError::Exhausted { .. }) => {
                    debug!(key_len, "Tier exhausted, trying next");
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err.unwrap_or(PoolError::Internal(InternalError::UnknownTier(0))))
    }

    /// Returns the live entry for `key` without consuming an access.
    pub fn get(&self, key: &str) -> Option<Arc<Entry>> {
        self.pool(key.chars().count())?.get(key)
    }

    /// Returns the live entry for `key` and consumes one access.
    ///
    /// `None` if the key is unknown, expired, or out of accesses. An
    /// exhausted entry keeps its key until it expires.
    pub fn resolve(&self, key: &str) -> Option<Arc<Entry>> {
        let entry = self.get(key)?;
        if entry.try_access() {
            Some(entry)
        } else {
            debug!(key, "Entry has no accesses left");
            None
        }
    }

    /// Statistics for every tier, shortest first.
    pub fn stats(&self) -> Vec<PoolStats> {
        self.tiers.iter().map(|pool| pool.stats()).collect()
    }
}

impl Drop for LinkEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierConfig;
    use crate::storage::entry::LinkKind;
    use std::time::Duration;
    use tokio::time::sleep;
    use tokio_test::{assert_err, assert_ok};

    fn config() -> EngineConfig {
        EngineConfig::default()
            .with_alphabet("ab")
            .with_tiers(vec![
                TierConfig::new(2, Duration::from_secs(60)),
                TierConfig::new(1, Duration::from_secs(5)),
            ])
    }

    fn request() -> LinkRequest {
        LinkRequest::new(LinkKind::Url, "https://example.com")
    }

    #[test]
    fn test_tiers_sorted_shortest_first() {
        let engine = LinkEngine::new(&config()).unwrap();
        assert_eq!(engine.key_lengths(), vec![1, 2]);
        assert_eq!(engine.pool(2).unwrap().capacity(), 4);
        assert!(engine.pool(3).is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = LinkEngine::new(&config().with_alphabet("aa")).unwrap_err();
        assert_eq!(err, ConfigError::DuplicateSymbol('a'));
    }

    #[test]
    fn test_allocate_shortest_falls_through() {
        let engine = LinkEngine::new(&config()).unwrap();

        let mut lengths = Vec::new();
        for _ in 0..6 {
            let (key, _) = engine.allocate_shortest(request()).unwrap();
            lengths.push(key.len());
        }
        assert_eq!(lengths, vec![1, 1, 2, 2, 2, 2]);

        let err = engine.allocate_shortest(request()).unwrap_err();
        assert_eq!(err, PoolError::Exhausted { key_len: 2 });
    }

    #[test]
    fn test_allocate_with_ttl_uses_tier_ttl() {
        let engine = LinkEngine::new(&config()).unwrap();
        let before = Instant::now();
        let (key, expires_at) = assert_ok!(engine.allocate_with_ttl(2, request()));

        assert_eq!(key.len(), 2);
        assert!(expires_at >= before + Duration::from_secs(60));
        assert_eq!(engine.get(&key).unwrap().expires_at(), expires_at);
    }

    #[test]
    fn test_unknown_tier() {
        let engine = LinkEngine::new(&config()).unwrap();
        let at = Instant::now() + Duration::from_secs(1);

        let err = assert_err!(engine.allocate(3, request().expires_at(at)));
        assert_eq!(err.internal_reason(), Some(&InternalError::UnknownTier(3)));
        assert!(engine.get("abc").is_none());
    }

    #[test]
    fn test_internal_error_stops_fallthrough() {
        let engine = LinkEngine::new(&config()).unwrap();
        let far = Instant::now() + Duration::from_secs(3600);
        engine.allocate(1, request().expires_at(far)).unwrap();

        // Tier 1's TTL now lands before its tail.
        let err = engine.allocate_shortest(request()).unwrap_err();
        assert_eq!(err.internal_reason(), Some(&InternalError::OutOfOrderExpiry));
        assert_eq!(engine.pool(2).unwrap().stats().active, 0);
    }

    #[test]
    fn test_resolve_consumes_accesses() {
        let engine = LinkEngine::new(&config()).unwrap();
        let (key, _) = engine
            .allocate_with_ttl(1, request().max_accesses(2))
            .unwrap();

        assert!(engine.resolve(&key).is_some());
        assert_eq!(engine.get(&key).unwrap().remaining_accesses(), Some(1));
        assert!(engine.resolve(&key).is_some());
        assert!(engine.resolve(&key).is_none());

        // Still holds its key until expiry.
        assert!(engine.get(&key).is_some());
        assert!(!engine.pool(1).unwrap().is_free(&key));
    }

    #[test]
    fn test_concurrent_ttl_allocation_never_fails_internally() {
        use std::sync::Barrier;
        use std::thread;

        const N: usize = 64;
        let config = EngineConfig::default()
            .with_alphabet("abcdefgh")
            .with_tiers(vec![TierConfig::new(2, Duration::from_secs(60))]);

        for _ in 0..20 {
            let engine = Arc::new(LinkEngine::new(&config).unwrap());
            let barrier = Arc::new(Barrier::new(N));
            let handles: Vec<_> = (0..N)
                .map(|_| {
                    let engine = Arc::clone(&engine);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        engine.allocate_with_ttl(2, request())
                    })
                })
                .collect();

            let mut keys = std::collections::HashSet::new();
            for handle in handles {
                let (key, _) = handle.join().unwrap().unwrap();
                keys.insert(key);
            }
            assert_eq!(keys.len(), N);

            let pool = engine.pool(2).unwrap();
            assert_eq!(pool.stats().free, 0);
            pool.check_invariants().unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedulers_reclaim_every_tier() {
        let engine = LinkEngine::start(config()).unwrap();

        let (short, _) = engine.allocate_with_ttl(1, request()).unwrap();
        let (long, _) = engine.allocate_with_ttl(2, request()).unwrap();

        sleep(Duration::from_secs(6)).await;
        assert!(engine.get(&short).is_none());
        assert!(engine.pool(1).unwrap().is_free(&short));
        assert!(!engine.pool(2).unwrap().is_free(&long));

        sleep(Duration::from_secs(60)).await;
        assert!(engine.pool(2).unwrap().is_free(&long));

        let stats = engine.stats();
        assert_eq!(stats.iter().map(|s| s.evicted).sum::<u64>(), 2);
        assert!(stats.iter().all(|s| s.free == s.capacity));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_reclaiming() {
        let engine = LinkEngine::start(config()).unwrap();
        engine.start_schedulers(SchedulerConfig::default());
        engine.shutdown();
        sleep(Duration::from_millis(1)).await;

        let (key, _) = engine.allocate_with_ttl(1, request()).unwrap();
        sleep(Duration::from_secs(30)).await;

        assert!(engine.get(&key).is_none());
        assert!(!engine.pool(1).unwrap().is_free(&key));
    }
}
