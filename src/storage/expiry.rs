//! Background Eviction Scheduler
//!
//! Every [`ExpiryPool`] gets exactly one scheduler task. The task reclaims
//! expired entries from the head of the pool's expiry chain and returns
//! their keys to the free set, so expired links are cleaned up without
//! waiting for a new request.
//!
//! ## Wake sources
//!
//! The task sleeps until the first of:
//!
//! 1. **Deadline timer**: armed at the expiry of the current chain head.
//!    The pool publishes every head change on a `watch` channel and the
//!    timer is re-armed from it.
//! 2. **Safety tick**: a fixed interval (default 10s). Bounds staleness if
//!    a deadline is ever missed or mis-armed.
//! 3. **Shutdown**: the handle was stopped or dropped.
//!
//! A wake never implies something is due. The pool re-checks the head under
//! its lock before evicting, and no lock is held while the task sleeps.

use crate::storage::ExpiryPool;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, Instrument};

/// Default interval for the safety tick.
pub const DEFAULT_SAFETY_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for an eviction scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on the delay between a missed deadline and the next check.
    pub safety_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            safety_interval: DEFAULT_SAFETY_INTERVAL,
        }
    }
}

/// A handle to a running eviction scheduler.
///
/// When this handle is dropped, the scheduler task will be stopped.
#[derive(Debug)]
pub struct EvictionScheduler {
    key_len: usize,
    shutdown_tx: watch::Sender<bool>,
}

impl EvictionScheduler {
    /// Starts the scheduler for `pool` as a background task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use shortpool::storage::{Alphabet, EvictionScheduler, ExpiryPool, SchedulerConfig};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let alphabet = Alphabet::default();
    /// let pool = Arc::new(ExpiryPool::new(&alphabet, 2, Duration::from_secs(3600))?);
    /// let scheduler = EvictionScheduler::start(Arc::clone(&pool), SchedulerConfig::default());
    ///
    /// // Expired keys are reclaimed in the background...
    ///
    /// drop(scheduler);
    /// ```
    pub fn start(pool: Arc<ExpiryPool>, config: SchedulerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let key_len = pool.key_len();
        let span = pool.span().clone();

        tokio::spawn(eviction_loop(pool, config, shutdown_rx).instrument(span));

        info!(key_len, "Eviction scheduler started");

        Self {
            key_len,
            shutdown_tx,
        }
    }

    pub fn key_len(&self) -> usize {
        self.key_len
    }

    /// Stops the scheduler.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        info!(key_len = self.key_len, "Eviction scheduler stopped");
    }
}

impl Drop for EvictionScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main scheduler loop.
async fn eviction_loop(
    pool: Arc<ExpiryPool>,
    config: SchedulerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut deadline_rx = pool.subscribe_deadline();
    let mut ticker = interval_at(
        Instant::now() + config.safety_interval,
        config.safety_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Anything already queued before the task started.
    evict_due(&pool);

    loop {
        let deadline = *deadline_rx.borrow_and_update();
        let timer = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            _ = timer => {
                trace!("Deadline timer fired");
            }
            _ = ticker.tick() => {
                trace!("Safety tick fired");
            }
            result = deadline_rx.changed() => {
                if result.is_err() {
                    debug!("Pool dropped, eviction scheduler exiting");
                    return;
                }
                // Head moved; re-arm the timer.
                continue;
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Eviction scheduler received shutdown signal");
                    return;
                }
            }
        }

        evict_due(&pool);
    }
}

/// Drains every entry that is due now.
fn evict_due(pool: &ExpiryPool) -> usize {
    let evicted = pool.evict_expired(Instant::now());
    if evicted > 0 {
        let stats = pool.stats();
        debug!(
            evicted,
            active = stats.active,
            free = stats.free,
            "Expired keys reclaimed"
        );
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Alphabet, LinkKind, LinkRequest, NewEntry};
    use tokio::time::sleep;

    fn pool(symbols: &str, key_len: usize) -> Arc<ExpiryPool> {
        let alphabet = Alphabet::new(symbols).unwrap();
        Arc::new(ExpiryPool::new(&alphabet, key_len, Duration::from_secs(5)).unwrap())
    }

    fn link(expires_at: Instant) -> NewEntry {
        LinkRequest::new(LinkKind::Url, "https://example.com").expires_at(expires_at)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_eviction_by_deadline() {
        let pool = pool("abcd", 1);
        let now = Instant::now();

        let k1 = pool.allocate(link(now + Duration::from_secs(1))).unwrap();
        let k2 = pool.allocate(link(now + Duration::from_secs(2))).unwrap();
        let k3 = pool.allocate(link(now + Duration::from_secs(3))).unwrap();

        let _scheduler = EvictionScheduler::start(Arc::clone(&pool), SchedulerConfig::default());

        sleep(Duration::from_millis(2500)).await;

        assert!(pool.is_free(&k1));
        assert!(pool.is_free(&k2));
        assert!(!pool.is_free(&k3));
        assert!(pool.get(&k3).is_some());
        pool.check_invariants().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_key_scenario_reclaimed() {
        let pool = pool("ab", 1);
        let _scheduler = EvictionScheduler::start(Arc::clone(&pool), SchedulerConfig::default());

        let at = Instant::now() + Duration::from_secs(5);
        pool.allocate(link(at)).unwrap();
        pool.allocate(link(at)).unwrap();
        assert!(pool.allocate(link(at)).unwrap_err().is_exhausted());

        sleep(Duration::from_millis(5100)).await;

        let stats = pool.stats();
        assert_eq!(stats.free, 2);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.evicted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearms_after_pool_becomes_non_empty() {
        let pool = pool("abc", 1);
        let _scheduler = EvictionScheduler::start(Arc::clone(&pool), SchedulerConfig::default());

        // Let the scheduler park on an empty pool first.
        sleep(Duration::from_millis(100)).await;

        let key = pool
            .allocate(link(Instant::now() + Duration::from_millis(300)))
            .unwrap();

        // Well inside the safety interval, so only the deadline can explain it.
        sleep(Duration::from_millis(400)).await;
        assert!(pool.is_free(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_safety_tick_reclaims_without_deadline() {
        let pool = pool("abc", 1);
        let safety_interval = Duration::from_secs(10);
        let start = Instant::now();
        let _scheduler = EvictionScheduler::start(
            Arc::clone(&pool),
            SchedulerConfig { safety_interval },
        );
        sleep(Duration::from_millis(1)).await;

        // No deadline is published for this entry.
        let ttl = Duration::from_secs(2);
        let key = pool.allocate_unannounced(link(Instant::now() + ttl)).unwrap();
        assert_eq!(*pool.subscribe_deadline().borrow(), None);

        // Expired, but the scheduler has had no reason to wake.
        sleep(Duration::from_secs(5)).await;
        assert!(pool.get(&key).is_none());
        assert!(!pool.is_free(&key));

        // The first safety tick lands at start + safety_interval.
        sleep_until(start + safety_interval + Duration::from_millis(1)).await;
        assert!(pool.is_free(&key));
        assert!(Instant::now() <= start + ttl + safety_interval + Duration::from_millis(2));
        assert_eq!(pool.stats().invariant_violations, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_expired_entries_drained_on_start() {
        let pool = pool("abc", 1);
        let now = Instant::now();
        pool.allocate(link(now + Duration::from_millis(10))).unwrap();
        pool.allocate(link(now + Duration::from_millis(20))).unwrap();

        sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.stats().active, 2);

        let _scheduler = EvictionScheduler::start(Arc::clone(&pool), SchedulerConfig::default());
        sleep(Duration::from_millis(1)).await;

        assert_eq!(pool.stats().active, 0);
        assert_eq!(pool.stats().free, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_stops_on_drop() {
        let pool = pool("ab", 1);

        {
            let _scheduler =
                EvictionScheduler::start(Arc::clone(&pool), SchedulerConfig::default());
            sleep(Duration::from_millis(50)).await;
            // Scheduler is dropped here
        }

        let key = pool
            .allocate(link(Instant::now() + Duration::from_millis(10)))
            .unwrap();

        sleep(Duration::from_secs(30)).await;

        // Nothing reclaims the key, but it no longer resolves.
        assert!(!pool.is_free(&key));
        assert!(pool.get(&key).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let pool = pool("ab", 1);
        let scheduler = EvictionScheduler::start(Arc::clone(&pool), SchedulerConfig::default());
        assert_eq!(scheduler.key_len(), 1);
        scheduler.stop();
        scheduler.stop();
    }
}
