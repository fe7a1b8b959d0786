//! Short Link Entries
//!
//! [`NewEntry`] is what a caller hands to `allocate`; [`Entry`] is what the
//! pool stores once a key has been assigned. Entries are shared as
//! `Arc<Entry>` and never modified after insertion, except for the access
//! counter, which belongs to whoever resolves the link.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// What the payload of a link represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    /// A URL to redirect to.
    Url,
    /// A reference to an uploaded file.
    File,
    /// An inline text blob.
    Text,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Url => "url",
            LinkKind::File => "file",
            LinkKind::Text => "text",
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload descriptor without an expiry, used when the tier TTL decides it.
#[derive(Debug, Clone)]
pub struct LinkRequest {
    pub kind: LinkKind,
    pub data: Bytes,
    pub is_compressed: bool,
    /// Maximum number of resolutions, 0 for unlimited.
    pub max_accesses: u32,
}

impl LinkRequest {
    pub fn new(kind: LinkKind, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            data: data.into(),
            is_compressed: false,
            max_accesses: 0,
        }
    }

    pub fn compressed(mut self, is_compressed: bool) -> Self {
        self.is_compressed = is_compressed;
        self
    }

    pub fn max_accesses(mut self, max_accesses: u32) -> Self {
        self.max_accesses = max_accesses;
        self
    }

    /// Attaches an absolute expiry.
    pub fn expires_at(self, expires_at: Instant) -> NewEntry {
        NewEntry {
            kind: self.kind,
            data: self.data,
            is_compressed: self.is_compressed,
            max_accesses: self.max_accesses,
            expires_at,
        }
    }
}

/// Everything `allocate` needs to create an entry.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub kind: LinkKind,
    pub data: Bytes,
    pub is_compressed: bool,
    pub max_accesses: u32,
    pub expires_at: Instant,
}

/// A live short link.
#[derive(Debug)]
pub struct Entry {
    key: String,
    kind: LinkKind,
    data: Bytes,
    is_compressed: bool,
    max_accesses: u32,
    remaining: AtomicU32,
    created_at: Instant,
    expires_at: Instant,
}

impl Entry {
    pub(crate) fn from_new(key: String, new: NewEntry, created_at: Instant) -> Self {
        Self {
            key,
            kind: new.kind,
            data: new.data,
            is_compressed: new.is_compressed,
            max_accesses: new.max_accesses,
            remaining: AtomicU32::new(new.max_accesses),
            created_at,
            expires_at: new.expires_at,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    /// The raw payload. Decompress first if [`is_compressed`](Self::is_compressed).
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn is_compressed(&self) -> bool {
        self.is_compressed
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Time left before expiry, zero once expired.
    pub fn ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Remaining resolutions, or `None` when unlimited.
    pub fn remaining_accesses(&self) -> Option<u32> {
        if self.max_accesses == 0 {
            None
        } else {
            Some(self.remaining.load(Ordering::Acquire))
        }
    }

    /// Consumes one access.
    ///
    /// Returns `false` once a limited entry has been used up. Unlimited
    /// entries always return `true`.
    pub fn try_access(&self) -> bool {
        if self.max_accesses == 0 {
            return true;
        }
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}
