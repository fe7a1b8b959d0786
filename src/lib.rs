//! # shortpool - Key Allocation and Expiry for Short Links
//!
//! shortpool is the engine behind a short-link service. For every key
//! length it owns the complete set of possible keys, hands an unused one to
//! each new link, and takes it back automatically once the link expires.
//!
//! HTTP routing, uploads, TLS and configuration files live outside this
//! crate. Callers pass in an already-validated payload and expiry and get
//! back a key or an error.
//!
//! ## Guarantees
//!
//! - No two live entries in a tier share a key.
//! - A key is never handed out while still live.
//! - Expired entries are reclaimed in the background, within one safety
//!   interval at worst, without needing a request to trigger it.
//! - All of the above holds under concurrent callers.
//!
//! ## Quick Start
//!
//! ```ignore
//! use shortpool::config::EngineConfig;
//! use shortpool::storage::{LinkEngine, LinkKind, LinkRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // One pool and one eviction scheduler per tier
//!     let engine = LinkEngine::start(EngineConfig::default())?;
//!
//!     // Shortest tier with a free key wins
//!     let (key, expires_at) =
//!         engine.allocate_shortest(LinkRequest::new(LinkKind::Url, "https://example.com"))?;
//!
//!     if let Some(entry) = engine.resolve(&key) {
//!         println!("{key} -> {:?}", entry.data());
//!     }
//!
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: pools, eviction schedulers and the tiered engine
//! - [`config`]: engine configuration and duration parsing
//! - [`error`]: error types
//!
//! ## Error Handling
//!
//! Allocation fails in one of two ways. [`PoolError::Exhausted`] means the
//! tier is full and is safe to show to users. [`PoolError::Internal`] means a
//! caller bug or corrupted state; the reason is logged and kept on the
//! error, but its `Display` is always a generic message.

pub mod config;
pub mod error;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::{EngineConfig, TierConfig};
pub use error::{ConfigError, InternalError, InvariantError, PoolError};
pub use storage::{
    Entry, EvictionScheduler, ExpiryPool, LinkEngine, LinkKind, LinkRequest, NewEntry,
    PoolStats, SchedulerConfig,
};

/// Version of shortpool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
