//! Engine Configuration
//!
//! Everything the engine consumes from the (external) configuration loader:
//! the key alphabet, one TTL per tier, the default access limit and the
//! safety interval for eviction.
//!
//! ```rust
//! use shortpool::config::{EngineConfig, TierConfig};
//! use std::time::Duration;
//!
//! let config = EngineConfig::default()
//!     .with_alphabet("abcdef")
//!     .with_tiers(vec![
//!         TierConfig::new(1, Duration::from_secs(60)),
//!         TierConfig::new(2, Duration::from_secs(3600)),
//!     ]);
//! assert!(config.validate().is_ok());
//! ```

use crate::error::ConfigError;
use crate::storage::expiry::DEFAULT_SAFETY_INTERVAL;
use crate::storage::keyspace::{Alphabet, DEFAULT_ALPHABET};
use std::collections::HashSet;
use std::time::Duration;

/// Default number of resolutions for a limited-access link.
pub const DEFAULT_MAX_ACCESSES: u32 = 10;

/// Key length and TTL of one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierConfig {
    pub key_len: usize,
    pub ttl: Duration,
}

impl TierConfig {
    pub fn new(key_len: usize, ttl: Duration) -> Self {
        Self { key_len, ttl }
    }
}

/// Configuration for a [`LinkEngine`](crate::storage::LinkEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Symbols keys are built from.
    pub alphabet: String,
    pub tiers: Vec<TierConfig>,
    /// Access limit applied when a caller asks for a limited link without a count.
    pub default_max_accesses: u32,
    /// Safety tick of each eviction scheduler.
    pub safety_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            alphabet: DEFAULT_ALPHABET.to_string(),
            tiers: vec![
                TierConfig::new(1, Duration::from_secs(10 * 60)),
                TierConfig::new(2, Duration::from_secs(24 * 60 * 60)),
                TierConfig::new(3, Duration::from_secs(7 * 24 * 60 * 60)),
            ],
            default_max_accesses: DEFAULT_MAX_ACCESSES,
            safety_interval: DEFAULT_SAFETY_INTERVAL,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alphabet(mut self, alphabet: impl Into<String>) -> Self {
        self.alphabet = alphabet.into();
        self
    }

    pub fn with_tiers(mut self, tiers: Vec<TierConfig>) -> Self {
        self.tiers = tiers;
        self
    }

    /// Adds a tier, replacing any existing tier of the same length.
    pub fn with_tier(mut self, key_len: usize, ttl: Duration) -> Self {
        self.tiers.retain(|t| t.key_len != key_len);
        self.tiers.push(TierConfig::new(key_len, ttl));
        self
    }

    pub fn with_default_max_accesses(mut self, max_accesses: u32) -> Self {
        self.default_max_accesses = max_accesses;
        self
    }

    pub fn with_safety_interval(mut self, interval: Duration) -> Self {
        self.safety_interval = interval;
        self
    }

    /// Tiers sorted by key length, shortest first.
    pub fn sorted_tiers(&self) -> Vec<TierConfig> {
        let mut tiers = self.tiers.clone();
        tiers.sort_by_key(|t| t.key_len);
        tiers
    }

    /// Checks the configuration and returns the parsed alphabet.
    pub fn validate(&self) -> Result<Alphabet, ConfigError> {
        let alphabet = Alphabet::new(&self.alphabet)?;

        if self.tiers.is_empty() {
            return Err(ConfigError::NoTiers);
        }
        if self.safety_interval.is_zero() {
            return Err(ConfigError::ZeroSafetyInterval(self.safety_interval));
        }

        let mut seen = HashSet::new();
        for tier in &self.tiers {
            if !seen.insert(tier.key_len) {
                return Err(ConfigError::DuplicateTier(tier.key_len));
            }
            alphabet.key_space_size(tier.key_len)?;
            if tier.ttl.is_zero() {
                return Err(ConfigError::ZeroTtl(tier.key_len));
            }
        }

        Ok(alphabet)
    }
}

/// Parses durations like `90s`, `10m`, `1h20m30s` or `250ms`.
///
/// A bare number is taken as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(input.to_string());
    let s = input.trim();
    if s.is_empty() {
        return Err(invalid());
    }

    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let value: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "h" => value.checked_mul(3600).map(Duration::from_secs),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "s" => Some(Duration::from_secs(value)),
            "ms" => Some(Duration::from_millis(value)),
            _ => None,
        }
        .ok_or_else(invalid)?;

        total = total.checked_add(part).ok_or_else(invalid)?;
        rest = &rest[unit_len..];
    }

    Ok(total)
}
