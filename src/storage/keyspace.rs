//! Key Space Enumeration
//!
//! A tier of length `n` over an alphabet of `A` symbols owns exactly `A^n`
//! keys. Every one of them starts out free, so the pool needs the full list
//! at construction time.
//!
//! Keys are produced in odometer order (the last position spins fastest):
//!
//! ```text
//! alphabet = "ab", len = 2   →   aa, ab, ba, bb
//! ```

use crate::error::ConfigError;
use std::collections::HashSet;

/// Default alphabet: lower case, upper case, then digits.
pub const DEFAULT_ALPHABET: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Largest key space a single tier may hold.
pub const MAX_KEY_SPACE: usize = 1 << 24;

/// The ordered set of symbols keys are built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    symbols: Vec<char>,
}

impl Alphabet {
    /// Builds an alphabet, rejecting empty input and repeated symbols.
    pub fn new(symbols: &str) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut chars = Vec::with_capacity(symbols.len());

        for c in symbols.chars() {
            if !seen.insert(c) {
                return Err(ConfigError::DuplicateSymbol(c));
            }
            chars.push(c);
        }

        if chars.is_empty() {
            return Err(ConfigError::EmptyAlphabet);
        }

        Ok(Self { symbols: chars })
    }

    /// Number of distinct symbols.
    #[inline]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Always false; construction rejects empty alphabets.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn contains(&self, c: char) -> bool {
        self.symbols.contains(&c)
    }

    /// Returns `A^key_len`, or an error if that is zero-length or too large.
    pub fn key_space_size(&self, key_len: usize) -> Result<usize, ConfigError> {
        if key_len == 0 {
            return Err(ConfigError::ZeroKeyLength);
        }

        let too_large = ConfigError::KeySpaceTooLarge {
            key_len,
            max: MAX_KEY_SPACE,
        };

        let exp = u32::try_from(key_len).map_err(|_| too_large.clone())?;
        match self.symbols.len().checked_pow(exp) {
            Some(size) if size <= MAX_KEY_SPACE => Ok(size),
            _ => Err(too_large),
        }
    }

    /// Enumerates every key of the given length.
    pub fn keys(&self, key_len: usize) -> KeyIter<'_> {
        KeyIter {
            symbols: &self.symbols,
            digits: vec![0; key_len],
            done: key_len == 0,
        }
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        Self {
            symbols: DEFAULT_ALPHABET.chars().collect(),
        }
    }
}

/// Odometer over all keys of one length.
#[derive(Debug)]
pub struct KeyIter<'a> {
    symbols: &'a [char],
    digits: Vec<usize>,
    done: bool,
}

impl Iterator for KeyIter<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.done {
            return None;
        }

        let key: String = self.digits.iter().map(|&d| self.symbols[d]).collect();

        // Advance from the rightmost position, carrying left.
        let mut pos = self.digits.len();
        loop {
            if pos == 0 {
                self.done = true;
                break;
            }
            pos -= 1;
            self.digits[pos] += 1;
            if self.digits[pos] < self.symbols.len() {
                break;
            }
            self.digits[pos] = 0;
        }

        Some(key)
    }
}
