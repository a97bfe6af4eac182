#![forbid(unsafe_code)]

pub mod commitlog;
pub mod core;
pub mod db;
pub mod error;
pub mod replay;
pub mod test_harness;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience
pub use crate::core::{
    Cell, ColumnMapping, DecoratedKey, FrozenMutation, Limits, PartitionUpdate, ReplayPosition,
    ReplayStats, Schema, SchemaVersion, SegmentId, SegmentName, ShardId, TableId, Token,
};
pub use crate::db::{ShardedStore, TableRegistry};
pub use crate::replay::Replayer;
