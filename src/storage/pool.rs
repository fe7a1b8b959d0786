//! Expiry Pool
//!
//! One pool owns the whole key space of one tier (all keys of a fixed
//! length). Every key is at any moment either *active* (assigned to a live
//! entry) or *free*, never both.
//!
//! ## Expiry chain
//!
//! Each tier uses a single TTL and callers insert in time order, so expiry
//! order equals insertion order. The pool therefore keeps live keys in a
//! plain FIFO queue instead of a priority structure:
//!
//! ```text
//!   head (soonest)                                tail (latest)
//!   ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//!   │ "b" @ t1 │ → │ "a" @ t2 │ → │ "d" @ t2 │ → │ "c" @ t5 │
//!   └──────────┘   └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! `allocate` rejects anything that would expire before the tail, which is
//! what lets eviction always pop from the head in O(1).
//!
//! ## Locking
//!
//! All state sits behind one `RwLock`. Mutation takes the write lock for the
//! whole critical section; diagnostics and lookups take the read lock.
//! Whenever the head of the chain changes, the new head expiry is published
//! on a `watch` channel so the eviction scheduler can re-arm its deadline.

use crate::error::{ConfigError, InternalError, InvariantError, PoolError};
use crate::storage::entry::{Entry, LinkRequest, NewEntry};
use crate::storage::keyspace::Alphabet;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info_span, trace, Span};

/// Position in the expiry chain. Kept apart from the entry itself so the
/// payload never carries pool-internal links.
#[derive(Debug, Clone)]
struct ChainLink {
    key: String,
    expires_at: Instant,
}

#[derive(Debug)]
struct PoolState {
    active: HashMap<String, Arc<Entry>>,
    free: HashSet<String>,
    chain: VecDeque<ChainLink>,
}

impl PoolState {
    fn head_expiry(&self) -> Option<Instant> {
        self.chain.front().map(|link| link.expires_at)
    }

    fn tail_expiry(&self) -> Option<Instant> {
        self.chain.back().map(|link| link.expires_at)
    }
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub key_len: usize,
    /// Size of the full key space (`A^n`).
    pub capacity: usize,
    pub active: usize,
    pub free: usize,
    pub ttl: Duration,
    /// Total successful allocations.
    pub allocated: u64,
    /// Total keys reclaimed by eviction.
    pub evicted: u64,
    /// Inconsistencies detected (and tolerated) during eviction.
    pub invariant_violations: u64,
}

/// Key pool and expiry chain for one key length.
///
/// # Example
///
/// ```
/// use shortpool::storage::{Alphabet, ExpiryPool, LinkKind, LinkRequest};
/// use std::time::Duration;
/// use tokio::time::Instant;
///
/// let alphabet = Alphabet::new("ab").unwrap();
/// let pool = ExpiryPool::new(&alphabet, 1, Duration::from_secs(5)).unwrap();
///
/// let link = LinkRequest::new(LinkKind::Url, "https://example.com")
///     .expires_at(Instant::now() + Duration::from_secs(5));
/// let key = pool.allocate(link).unwrap();
///
/// assert!(key == "a" || key == "b");
/// assert_eq!(pool.stats().free, 1);
/// ```
pub struct ExpiryPool {
    key_len: usize,
    capacity: usize,
    ttl: Duration,
    state: RwLock<PoolState>,
    deadline_tx: watch::Sender<Option<Instant>>,
    span: Span,
    allocated: AtomicU64,
    evicted: AtomicU64,
    invariant_violations: AtomicU64,
}

impl std::fmt::Debug for ExpiryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiryPool")
            .field("key_len", &self.key_len)
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .field("allocated", &self.allocated.load(Ordering::Relaxed))
            .field("evicted", &self.evicted.load(Ordering::Relaxed))
            .finish()
    }
}

impl ExpiryPool {
    /// Creates a pool with every key of length `key_len` free.
    pub fn new(alphabet: &Alphabet, key_len: usize, ttl: Duration) -> Result<Self, ConfigError> {
        let span = info_span!("pool", key_len);
        Self::with_span(alphabet, key_len, ttl, span)
    }

    /// Like [`new`](Self::new), logging under the supplied span.
    pub fn with_span(
        alphabet: &Alphabet,
        key_len: usize,
        ttl: Duration,
        span: Span,
    ) -> Result<Self, ConfigError> {
        let capacity = alphabet.key_space_size(key_len)?;
        if ttl.is_zero() {
            return Err(ConfigError::ZeroTtl(key_len));
        }

        let free: HashSet<String> = alphabet.keys(key_len).collect();
        let (deadline_tx, _) = watch::channel(None);

        span.in_scope(|| debug!(capacity, ttl_secs = ttl.as_secs(), "Key pool initialized"));

        Ok(Self {
            key_len,
            capacity,
            ttl,
            state: RwLock::new(PoolState {
                active: HashMap::with_capacity(capacity.min(4096)),
                free,
                chain: VecDeque::new(),
            }),
            deadline_tx,
            span,
            allocated: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            invariant_violations: AtomicU64::new(0),
        })
    }

    pub fn key_len(&self) -> usize {
        self.key_len
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The configured TTL for this tier. Used by callers to compute expiries;
    /// the pool itself only enforces ordering.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    fn read(&self) -> RwLockReadGuard<'_, PoolState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PoolState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Watches the expiry instant of the chain head (`None` when empty).
    pub fn subscribe_deadline(&self) -> watch::Receiver<Option<Instant>> {
        self.deadline_tx.subscribe()
    }

    /// Assigns a free key to `new` and appends it to the expiry chain.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Exhausted`] when no key of this length is free.
    /// - [`PoolError::Internal`] when `expires_at` is not in the future, is
    ///   earlier than the latest queued expiry, or the chain is corrupt.
    ///
    /// On error nothing is changed.
    pub fn allocate(&self, new: NewEntry) -> Result<String, PoolError> {
        let _enter = self.span.enter();
        let mut state = self.write();
        let now = Instant::now();
        self.insert(&mut state, new, now, true)
    }

    /// Allocates a key expiring one tier TTL from now.
    ///
    /// The expiry is taken after the lock is acquired, so concurrent callers
    /// always append in expiry order. Returns the key and its expiry.
    pub fn allocate_with_ttl(&self, request: LinkRequest) -> Result<(String, Instant), PoolError> {
        let _enter = self.span.enter();
        let mut state = self.write();
        let now = Instant::now();
        let expires_at = now + self.ttl;
        let key = self.insert(&mut state, request.expires_at(expires_at), now, true)?;
        Ok((key, expires_at))
    }

    /// Inserts without publishing a new head deadline, leaving only the
    /// safety tick to notice the entry.
    #[cfg(test)]
    pub(crate) fn allocate_unannounced(&self, new: NewEntry) -> Result<String, PoolError> {
        let mut state = self.write();
        let now = Instant::now();
        self.insert(&mut state, new, now, false)
    }

    /// Validates and inserts under an already held write lock.
    fn insert(
        &self,
        state: &mut PoolState,
        new: NewEntry,
        now: Instant,
        announce: bool,
    ) -> Result<String, PoolError> {
        trace!(
            kind = %new.kind,
            data_len = new.data.len(),
            max_accesses = new.max_accesses,
            expires_in_ms = new.expires_at.saturating_duration_since(now).as_millis() as u64,
            free = state.free.len(),
            "Starting allocation"
        );

        if new.expires_at <= now {
            error!(
                kind = %new.kind,
                late_by_ms = now.duration_since(new.expires_at).as_millis() as u64,
                "Rejected allocation: expiry is not in the future"
            );
            return Err(InternalError::ExpiryNotInFuture.into());
        }

        if state.free.is_empty() {
            debug!(active = state.active.len(), "No keys left");
            return Err(PoolError::Exhausted {
                key_len: self.key_len,
            });
        }

        if let Some(tail) = state.tail_expiry() {
            if new.expires_at < tail {
                error!(
                    kind = %new.kind,
                    earlier_by_ms = tail.duration_since(new.expires_at).as_millis() as u64,
                    "Rejected allocation: expiry is before the tail of the expiry chain"
                );
                return Err(InternalError::OutOfOrderExpiry.into());
            }
        } else if !state.active.is_empty() {
            let detail = format!(
                "expiry chain is empty but {} keys are active",
                state.active.len()
            );
            error!(%detail, "Rejected allocation: pool state is inconsistent");
            return Err(InternalError::ChainInconsistent(detail).into());
        }

        let key = match state.free.iter().next() {
            Some(key) => key.clone(),
            None => {
                return Err(PoolError::Exhausted {
                    key_len: self.key_len,
                })
            }
        };
        state.free.remove(&key);

        let expires_at = new.expires_at;
        let was_empty = state.chain.is_empty();
        state.chain.push_back(ChainLink {
            key: key.clone(),
            expires_at,
        });
        state
            .active
            .insert(key.clone(), Arc::new(Entry::from_new(key.clone(), new, now)));

        if was_empty && announce {
            self.deadline_tx.send_replace(Some(expires_at));
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);

        debug!(
            key = %key,
            active = state.active.len(),
            free = state.free.len(),
            "Allocated key"
        );

        Ok(key)
    }

    /// Returns the live entry for `key`.
    ///
    /// Entries past their expiry are hidden even if eviction hasn't
    /// reclaimed them yet.
    pub fn get(&self, key: &str) -> Option<Arc<Entry>> {
        let state = self.read();
        state
            .active
            .get(key)
            .filter(|entry| !entry.is_expired())
            .cloned()
    }

    /// Expiry instant of the head of the chain.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.read().head_expiry()
    }

    /// Reclaims the head of the chain if it has expired by `now`.
    ///
    /// Returns the freed key, or `None` if nothing was due. Each call handles
    /// at most one entry and holds the write lock only for that entry.
    pub fn evict_next(&self, now: Instant) -> Option<String> {
        {
            let state = self.read();
            match state.head_expiry() {
                Some(at) if now >= at => {}
                _ => return None,
            }
        }

        let _enter = self.span.enter();
        let mut state = self.write();

        // The lock was released in between; the head may have moved.
        let due = matches!(state.head_expiry(), Some(at) if now >= at);
        if !due {
            return None;
        }
        let link = state.chain.pop_front()?;

        let new_head = state.head_expiry();
        self.deadline_tx.send_replace(new_head);

        match state.active.remove(&link.key) {
            Some(entry) if entry.expires_at() == link.expires_at => {}
            Some(_) => {
                self.invariant_violations.fetch_add(1, Ordering::Relaxed);
                error!(key = %link.key, "Invalid state: chain expiry differs from entry expiry");
            }
            None => {
                self.invariant_violations.fetch_add(1, Ordering::Relaxed);
                error!(key = %link.key, "Invalid state: chained key missing from active set");
            }
        }

        if new_head.is_none() && !state.active.is_empty() {
            self.invariant_violations.fetch_add(1, Ordering::Relaxed);
            error!(
                key = %link.key,
                active = state.active.len(),
                free = state.free.len(),
                "Invalid state: expiry chain drained while keys are still active"
            );
        }
        state.free.insert(link.key.clone());
        self.evicted.fetch_add(1, Ordering::Relaxed);

        let total = state.active.len() + state.free.len();
        if total != self.capacity {
            self.invariant_violations.fetch_add(1, Ordering::Relaxed);
            error!(
                total,
                capacity = self.capacity,
                "Unexpected total number of keys"
            );
        }

        debug!(
            key = %link.key,
            active = state.active.len(),
            free = state.free.len(),
            "Reclaimed expired key"
        );

        Some(link.key)
    }

    /// Reclaims every entry expired by `now`, one lock cycle per entry.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let mut evicted = 0;
        while self.evict_next(now).is_some() {
            evicted += 1;
        }
        evicted
    }

    /// Returns true if `key` is currently free.
    pub fn is_free(&self, key: &str) -> bool {
        self.read().free.contains(key)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.read();
        PoolStats {
            key_len: self.key_len,
            capacity: self.capacity,
            active: state.active.len(),
            free: state.free.len(),
            ttl: self.ttl,
            allocated: self.allocated.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            invariant_violations: self.invariant_violations.load(Ordering::Relaxed),
        }
    }

    /// Verifies the partition and chain invariants under the read lock.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        let state = self.read();

        if state.active.len() + state.free.len() != self.capacity {
            return Err(InvariantError::new(format!(
                "active ({}) + free ({}) != key space ({})",
                state.active.len(),
                state.free.len(),
                self.capacity
            )));
        }
        if let Some(key) = state.active.keys().find(|k| state.free.contains(*k)) {
            return Err(InvariantError::new(format!("key {key:?} is both active and free")));
        }
        if let Some(key) = state
            .active
            .keys()
            .chain(state.free.iter())
            .find(|k| k.chars().count() != self.key_len)
        {
            return Err(InvariantError::new(format!(
                "key {key:?} does not have length {}",
                self.key_len
            )));
        }
        if state.chain.len() != state.active.len() {
            return Err(InvariantError::new(format!(
                "chain length {} != active count {}",
                state.chain.len(),
                state.active.len()
            )));
        }

        let mut prev: Option<Instant> = None;
        for link in &state.chain {
            match state.active.get(&link.key) {
                Some(entry) if entry.expires_at() == link.expires_at => {}
                Some(_) => {
                    return Err(InvariantError::new(format!(
                        "chain expiry for {:?} differs from entry",
                        link.key
                    )))
                }
                None => {
                    return Err(InvariantError::new(format!(
                        "chained key {:?} is not active",
                        link.key
                    )))
                }
            }
            if prev.is_some_and(|p| link.expires_at < p) {
                return Err(InvariantError::new(format!(
                    "chain is not ascending at {:?}",
                    link.key
                )));
            }
            prev = Some(link.expires_at);
        }

        // Chain length equals active count and every link is active, so a
        // duplicate in the chain would leave some active key unchained.
        let chained: HashSet<&str> = state.chain.iter().map(|l| l.key.as_str()).collect();
        if chained.len() != state.chain.len() {
            return Err(InvariantError::new("key appears twice in the expiry chain"));
        }

        Ok(())
    }
}
