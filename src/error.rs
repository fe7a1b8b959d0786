//! Error Types
//!
//! The engine surfaces exactly two kinds of failure to its callers:
//!
//! - [`PoolError::Exhausted`]: the tier has no free keys. Expected and
//!   user-facing ("no keys left for key length N").
//! - [`PoolError::Internal`]: a precondition or invariant was violated.
//!   The reason is kept in [`InternalError`] for operators and tests, but the
//!   `Display` output of the outer error is always the generic
//!   "internal server error", so nothing internal leaks to an end client.
//!
//! Configuration problems are reported separately as [`ConfigError`] and
//! structural self-checks as [`InvariantError`].

use std::time::Duration;
use thiserror::Error;

/// Errors returned by key allocation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Every key of this length is currently in use.
    #[error("no keys left for key length {key_len}")]
    Exhausted { key_len: usize },

    /// Something the caller can't fix. Details are logged, never displayed.
    #[error("internal server error")]
    Internal(#[source] InternalError),
}

impl PoolError {
    /// Returns true for the expected, non-fatal "out of keys" condition.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, PoolError::Exhausted { .. })
    }

    /// Returns the operator-facing reason for an internal failure.
    pub fn internal_reason(&self) -> Option<&InternalError> {
        match self {
            PoolError::Internal(reason) => Some(reason),
            PoolError::Exhausted { .. } => None,
        }
    }
}

impl From<InternalError> for PoolError {
    fn from(reason: InternalError) -> Self {
        PoolError::Internal(reason)
    }
}

/// Operator-facing reasons behind [`PoolError::Internal`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InternalError {
    /// The caller computed an expiry that is not strictly in the future.
    #[error("expiry must be in the future")]
    ExpiryNotInFuture,

    /// The new expiry is earlier than the latest expiry already queued.
    #[error("expiry is earlier than the tail of the expiry chain")]
    OutOfOrderExpiry,

    /// The expiry chain and the active map disagree.
    #[error("expiry chain is inconsistent with the active set: {0}")]
    ChainInconsistent(String),

    /// No tier is configured for the requested key length.
    #[error("no tier configured for key length {0}")]
    UnknownTier(usize),
}

/// Errors raised while validating an engine configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("alphabet must contain at least one symbol")]
    EmptyAlphabet,

    #[error("alphabet contains duplicate symbol {0:?}")]
    DuplicateSymbol(char),

    #[error("key length must be at least 1")]
    ZeroKeyLength,

    #[error("tier with key length {0} is configured more than once")]
    DuplicateTier(usize),

    #[error("tier with key length {0} has a zero TTL")]
    ZeroTtl(usize),

    #[error("key space for length {key_len} exceeds {max} keys")]
    KeySpaceTooLarge { key_len: usize, max: usize },

    #[error("invalid duration {0:?}")]
    InvalidDuration(String),

    #[error("at least one tier must be configured")]
    NoTiers,

    #[error("safety interval must be non-zero, got {0:?}")]
    ZeroSafetyInterval(Duration),
}

/// Returned by [`ExpiryPool::check_invariants`](crate::storage::ExpiryPool::check_invariants)
/// with a description of the first violated invariant.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("pool invariant violated: {0}")]
pub struct InvariantError(pub String);

impl InvariantError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
