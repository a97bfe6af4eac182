//! Replay statistics.

use std::fmt;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Counters accumulated while replaying commit-log segments.
///
/// Addition is commutative, so per-shard totals fold in any order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayStats {
    pub applied: u64,
    pub skipped: u64,
    pub invalid: u64,
    pub corrupt_bytes: u64,
}

impl AddAssign for ReplayStats {
    fn add_assign(&mut self, rhs: Self) {
        self.applied += rhs.applied;
        self.skipped += rhs.skipped;
        self.invalid += rhs.invalid;
        self.corrupt_bytes += rhs.corrupt_bytes;
    }
}

impl Add for ReplayStats {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl fmt::Display for ReplayStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} applied ({} invalid, {} skipped, {} corrupt bytes)",
            self.applied, self.invalid, self.skipped, self.corrupt_bytes
        )
    }
}
