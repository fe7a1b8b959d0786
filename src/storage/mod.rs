//! Storage Module
//!
//! This module provides the key allocation and expiry engine for shortpool.
//! Each key length is a separate tier with its own pool, lock and
//! background eviction scheduler.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       LinkEngine                            │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────┐            │
//! │  │ ExpiryPool  │ │ ExpiryPool  │ │ ExpiryPool  │            │
//! │  │  key len 1  │ │  key len 2  │ │  key len 3  │            │
//! │  │  RwLock     │ │  RwLock     │ │  RwLock     │            │
//! │  └──────▲──────┘ └──────▲──────┘ └──────▲──────┘            │
//! └─────────┼───────────────┼───────────────┼───────────────────┘
//!           │               │               │
//!    ┌──────┴──────┐ ┌──────┴──────┐ ┌──────┴──────┐
//!    │  Scheduler  │ │  Scheduler  │ │  Scheduler  │
//!    │ (Tokio task)│ │ (Tokio task)│ │ (Tokio task)│
//!    └─────────────┘ └─────────────┘ └─────────────┘
//! ```
//!
//! ## Features
//!
//! - **Partitioned key space**: every key is either active or free, never both
//! - **FIFO expiry chain**: eviction pops the head in O(1)
//! - **Deadline + safety tick**: expired keys are reclaimed promptly, and
//!   never later than one safety interval after a missed deadline
//! - **Lazy hiding**: expired entries stop resolving even before reclaim
//!
//! ## Example
//!
//! ```
//! use shortpool::storage::{Alphabet, ExpiryPool, LinkKind, LinkRequest};
//! use std::time::Duration;
//! use tokio::time::Instant;
//!
//! let alphabet = Alphabet::new("abc").unwrap();
//! let pool = ExpiryPool::new(&alphabet, 2, Duration::from_secs(60)).unwrap();
//!
//! let expires_at = Instant::now() + pool.ttl();
//! let key = pool
//!     .allocate(LinkRequest::new(LinkKind::Url, "https://example.com").expires_at(expires_at))
//!     .unwrap();
//!
//! assert_eq!(key.len(), 2);
//! assert!(pool.get(&key).is_some());
//! ```

pub mod engine;
pub mod entry;
pub mod expiry;
pub mod keyspace;
pub mod pool;

// Re-export commonly used types
pub use engine::LinkEngine;
pub use entry::{Entry, LinkKind, LinkRequest, NewEntry};
pub use expiry::{EvictionScheduler, SchedulerConfig, DEFAULT_SAFETY_INTERVAL};
pub use keyspace::{Alphabet, DEFAULT_ALPHABET};
pub use pool::{ExpiryPool, PoolStats};
