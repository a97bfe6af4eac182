//! Core value types: positions, identities, mutations, limits, statistics.

pub mod limits;
pub mod mutation;
pub mod position;
pub mod stats;
pub mod table;

pub use limits::Limits;
pub use mutation::{
    ApplyError, Cell, DecoratedKey, FrozenMutation, PartitionUpdate, Token, project_partition,
};
pub use position::{ReplayPosition, SegmentId, SegmentName, SegmentNameError, ShardId};
pub use stats::ReplayStats;
pub use table::{ColumnMapping, Schema, SchemaVersion, TableId};
