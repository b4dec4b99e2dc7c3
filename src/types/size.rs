//! Human-readable byte sizes ("4096", "64K", "1M", "2G")

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// A byte count parsed from a size string with an optional binary suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ByteSize(pub u64);

/// Parse a size string: decimal digits with an optional K, M or G suffix
/// (case-insensitive, powers of 1024)
pub fn parse_size(input: &str) -> Result<u64, Error> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_size(input, "size can not be empty"));
    }

    let (digits, multiplier) = match trimmed.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&trimmed[..trimmed.len() - 1], KIB),
        Some('M') => (&trimmed[..trimmed.len() - 1], MIB),
        Some('G') => (&trimmed[..trimmed.len() - 1], GIB),
        _ => (trimmed, 1),
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| Error::invalid_size(input, "expected a whole number with optional K/M/G suffix"))?;

    value
        .checked_mul(multiplier)
        .ok_or_else(|| Error::invalid_size(input, "size overflows 64 bits"))
}

impl FromStr for ByteSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_size(s).map(ByteSize)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        if b >= GIB && b % GIB == 0 {
            write!(f, "{}G", b / GIB)
        } else if b >= MIB && b % MIB == 0 {
            write!(f, "{}M", b / MIB)
        } else if b >= KIB && b % KIB == 0 {
            write!(f, "{}K", b / KIB)
        } else {
            write!(f, "{}", b)
        }
    }
}

/// Geometric sweep of sizes from `min` to `max` inclusive
#[derive(Debug, Clone)]
pub struct SizeSweep {
    next: Option<u64>,
    max: u64,
    factor: u64,
}

impl SizeSweep {
    /// A factor below 2 yields only `min`
    pub fn new(min: u64, max: u64, factor: u64) -> Self {
        Self {
            next: Some(min),
            max: max.max(min),
            factor,
        }
    }
}

impl Iterator for SizeSweep {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let current = self.next?;
        self.next = if self.factor < 2 {
            None
        } else {
            current
                .checked_mul(self.factor)
                .filter(|n| *n <= self.max)
        };
        Some(current)
    }
}
