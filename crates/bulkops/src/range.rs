//! Inclusive ranges of resource IDs.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Identifier of a guest (VMID/CTID).
pub type Id = u32;

/// Largest span accepted when no other limit is configured.
pub const DEFAULT_MAX_SPAN: u64 = 1000;

/// A contiguous, inclusive span of resource IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdRange {
    /// First ID (inclusive)
    pub start: Id,
    /// Last ID (inclusive)
    pub end: Id,
}

impl IdRange {
    /// Create a range without validating it.
    pub fn new(start: Id, end: Id) -> Self {
        Self { start, end }
    }

    /// A range holding exactly one ID.
    pub fn single(id: Id) -> Self {
        Self { start: id, end: id }
    }

    /// Number of IDs covered, zero when the range is inverted.
    pub fn span(&self) -> u64 {
        if self.end < self.start {
            0
        } else {
            u64::from(self.end - self.start) + 1
        }
    }

    /// Reject inverted ranges and ranges wider than `max_span`.
    ///
    /// A span exactly equal to `max_span` is accepted.
    pub fn validate(&self, max_span: u64) -> Result<()> {
        if self.end < self.start {
            return Err(Error::InvertedRange {
                start: self.start,
                end: self.end,
            });
        }

        let span = self.span();
        if span > max_span {
            return Err(Error::SpanTooLarge {
                start: self.start,
                end: self.end,
                span,
                max_span,
            });
        }

        Ok(())
    }

    /// Iterate the IDs in ascending order.
    pub fn ids(&self) -> RangeInclusive<Id> {
        self.start..=self.end
    }

    /// Whether `id` falls inside the range.
    pub fn contains(&self, id: Id) -> bool {
        self.start <= id && id <= self.end
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Parses `"100-200"` or a single `"100"`.
impl FromStr for IdRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let input = s.trim();
        let syntax = |reason: &str| Error::RangeSyntax {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        if input.is_empty() {
            return Err(syntax("empty range"));
        }

        let parse_id = |part: &str| {
            part.trim()
                .parse::<Id>()
                .map_err(|_| syntax(&format!("'{}' is not a valid ID", part.trim())))
        };

        match input.split_once('-') {
            Some((start, end)) => Ok(Self::new(parse_id(start)?, parse_id(end)?)),
            None => Ok(Self::single(parse_id(input)?)),
        }
    }
}
