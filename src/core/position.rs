//! Replay positions and commit-log segment names.
//!
//! A replay position is `(shard, segment id, offset)`. Positions are only
//! ordered within a shard: segment ids grow monotonically per shard, and
//! comparing positions that originate on different shards has no meaning, so
//! `PartialOrd` yields `None` for them.

use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shard identifier, as recorded in segment names and durable metadata.
///
/// Identifies the shard that *wrote* a position. After a re-shard this may
/// exceed the current shard count.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ShardId(u32);

impl ShardId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShardId({})", self.0)
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Commit-log segment identifier, monotonically increasing per shard.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SegmentId(u64);

impl SegmentId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SegmentId({})", self.0)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of one entry in a shard's commit log.
///
/// `zero` is the least position of a shard and stands for "nothing ever
/// flushed". Ordering is lexicographic on `(id, pos)` and is defined only
/// between positions of the same shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayPosition {
    shard: ShardId,
    id: SegmentId,
    pos: u64,
}

impl ReplayPosition {
    pub fn new(shard: ShardId, id: SegmentId, pos: u64) -> Self {
        Self { shard, id, pos }
    }

    pub fn zero(shard: ShardId) -> Self {
        Self {
            shard,
            id: SegmentId::new(0),
            pos: 0,
        }
    }

    pub fn shard(self) -> ShardId {
        self.shard
    }

    pub fn id(self) -> SegmentId {
        self.id
    }

    pub fn pos(self) -> u64 {
        self.pos
    }
}

impl PartialOrd for ReplayPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        (self.shard == other.shard).then(|| (self.id, self.pos).cmp(&(other.id, other.pos)))
    }
}

impl fmt::Display for ReplayPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.shard, self.id, self.pos)
    }
}

const SEGMENT_PREFIX: &str = "commitlog-";
const SEGMENT_SUFFIX: &str = ".log";

/// Parsed commit-log segment file name: `commitlog-<shard>-<id>.log`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentName {
    shard: ShardId,
    id: SegmentId,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SegmentNameError {
    #[error("not a commit-log segment name: {name:?}")]
    Unrecognized { name: String },
    #[error("invalid {field} in segment name {name:?}")]
    InvalidField { name: String, field: &'static str },
}

impl SegmentName {
    pub fn new(shard: ShardId, id: SegmentId) -> Self {
        Self { shard, id }
    }

    pub fn parse(path: &Path) -> Result<Self, SegmentNameError> {
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| SegmentNameError::Unrecognized {
                name: path.display().to_string(),
            })?;
        let stem = name
            .strip_prefix(SEGMENT_PREFIX)
            .and_then(|s| s.strip_suffix(SEGMENT_SUFFIX))
            .ok_or_else(|| SegmentNameError::Unrecognized {
                name: name.to_string(),
            })?;
        let Some((shard_raw, id_raw)) = stem.split_once('-') else {
            return Err(SegmentNameError::Unrecognized {
                name: name.to_string(),
            });
        };
        let shard = shard_raw
            .parse::<u32>()
            .map_err(|_| SegmentNameError::InvalidField {
                name: name.to_string(),
                field: "shard",
            })?;
        let id = id_raw
            .parse::<u64>()
            .map_err(|_| SegmentNameError::InvalidField {
                name: name.to_string(),
                field: "segment id",
            })?;
        Ok(Self {
            shard: ShardId::new(shard),
            id: SegmentId::new(id),
        })
    }

    pub fn file_name(&self) -> String {
        format!(
            "{SEGMENT_PREFIX}{}-{}{SEGMENT_SUFFIX}",
            self.shard.get(),
            self.id.get()
        )
    }

    pub fn shard(&self) -> ShardId {
        self.shard
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Replay position of the segment's first byte.
    pub fn position(&self) -> ReplayPosition {
        ReplayPosition::new(self.shard, self.id, 0)
    }
}

impl fmt::Display for SegmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}
