//! Identifier allocation for compound-file property and object ids.
//!
//! [`IdentifierManager`] hands out ids from a bounded, inclusive range `[lower, upper]`. Free ids
//! are tracked as a set of segments keyed by their first id. Segments are always disjoint and
//! maximally coalesced: two segments never touch, so every gap between them is at least one
//! reserved id.
//!
//! ```
//! use docseal_ids::IdentifierManager;
//!
//! let mut ids = IdentifierManager::new(0, 9).unwrap();
//! assert_eq!(ids.reserve_new().unwrap(), 0);
//! assert_eq!(ids.reserve(5).unwrap(), 5);
//! assert_eq!(ids.remaining(), 8);
//! assert!(ids.release(5).unwrap());
//! assert!(!ids.release(5).unwrap());
//! ```

use std::collections::BTreeMap;

use thiserror::Error;

/// Largest id a manager may hand out.
///
/// One below `u64::MAX` so that `id + 1` never overflows while coalescing.
pub const MAX_ID: u64 = u64::MAX - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("invalid identifier range [{lower}, {upper}]")]
    InvalidRange { lower: u64, upper: u64 },
    #[error("identifier {id} is outside [{lower}, {upper}]")]
    OutOfBounds { id: u64, lower: u64, upper: u64 },
    #[error("no identifiers left in [{lower}, {upper}]")]
    Exhausted { lower: u64, upper: u64 },
}

/// Allocator of unique ids within `[lower, upper]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierManager {
    lower: u64,
    upper: u64,
    /// Free segments: first id -> last id (inclusive).
    free: BTreeMap<u64, u64>,
}

impl IdentifierManager {
    /// Create a manager where every id in `[lower, upper]` is free.
    pub fn new(lower: u64, upper: u64) -> Result<Self, IdError> {
        if lower > upper || upper > MAX_ID {
            return Err(IdError::InvalidRange { lower, upper });
        }
        let mut free = BTreeMap::new();
        free.insert(lower, upper);
        Ok(Self { lower, upper, free })
    }

    pub fn lower_bound(&self) -> u64 {
        self.lower
    }

    pub fn upper_bound(&self) -> u64 {
        self.upper
    }

    /// Reserve the smallest free id.
    pub fn reserve_new(&mut self) -> Result<u64, IdError> {
        let Some((&start, &end)) = self.free.iter().next() else {
            return Err(self.exhausted());
        };
        self.free.remove(&start);
        if start < end {
            self.free.insert(start + 1, end);
        }
        Ok(start)
    }

    /// Reserve `id` if it is free.
    ///
    /// When `id` is already reserved this does not fail: it reserves and returns the smallest
    /// free id instead, exactly as [`reserve_new`](Self::reserve_new) would. Callers that need
    /// `id` itself must compare the returned value.
    pub fn reserve(&mut self, id: u64) -> Result<u64, IdError> {
        self.check_bounds(id)?;

        let Some((start, end)) = self.free_segment_containing(id) else {
            log::debug!("identifier {id} already reserved; allocating the next free identifier");
            return self.reserve_new();
        };

        self.free.remove(&start);
        if start < id {
            self.free.insert(start, id - 1);
        }
        if id < end {
            self.free.insert(id + 1, end);
        }
        Ok(id)
    }

    /// Return `id` to the free pool.
    ///
    /// Returns `false` (and changes nothing) when `id` was not reserved.
    pub fn release(&mut self, id: u64) -> Result<bool, IdError> {
        self.check_bounds(id)?;

        if self.free_segment_containing(id).is_some() {
            return Ok(false);
        }

        // A free segment ending right before `id` absorbs it.
        let prev_start = id.checked_sub(1).and_then(|before| {
            self.free
                .range(..id)
                .next_back()
                .filter(|&(_, &end)| end == before)
                .map(|(&start, _)| start)
        });
        // `id <= MAX_ID`, so `id + 1` cannot overflow.
        let next_end = self.free.remove(&(id + 1));

        let start = prev_start.unwrap_or(id);
        let end = next_end.unwrap_or(id);
        self.free.insert(start, end);
        Ok(true)
    }

    /// Number of ids that are still free.
    pub fn remaining(&self) -> u64 {
        self.free.iter().map(|(&start, &end)| end - start + 1).sum()
    }

    pub fn is_reserved(&self, id: u64) -> bool {
        (self.lower..=self.upper).contains(&id) && self.free_segment_containing(id).is_none()
    }

    /// Free segments in ascending order as inclusive `(first, last)` pairs.
    pub fn segments(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.free.iter().map(|(&start, &end)| (start, end))
    }

    fn free_segment_containing(&self, id: u64) -> Option<(u64, u64)> {
        self.free
            .range(..=id)
            .next_back()
            .filter(|&(_, &end)| end >= id)
            .map(|(&start, &end)| (start, end))
    }

    fn check_bounds(&self, id: u64) -> Result<(), IdError> {
        if id < self.lower || id > self.upper {
            return Err(IdError::OutOfBounds {
                id,
                lower: self.lower,
                upper: self.upper,
            });
        }
        Ok(())
    }

    fn exhausted(&self) -> IdError {
        IdError::Exhausted {
            lower: self.lower,
            upper: self.upper,
        }
    }
}
