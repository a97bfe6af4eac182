//! Live-database surface the replayer drives.
//!
//! The storage engine proper is out of scope; what lives here is the seam the
//! replayer needs: the current table registry, read-only access to durable
//! state (sstable positions, truncation records), and a sharded store whose
//! workers own the in-memory tables mutations are applied to.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::core::{ApplyError, DecoratedKey, ReplayPosition, Schema, ShardId, TableId};

pub mod shard;
pub mod store;

pub use shard::FlushPointMap;
pub use store::ShardedStore;

/// Current table set and schema per table.
///
/// Treated as an immutable snapshot for the duration of a replay; a dropped
/// table is simply absent.
#[derive(Clone, Debug, Default)]
pub struct TableRegistry {
    shard_count: u32,
    schemas: BTreeMap<TableId, Arc<Schema>>,
}

impl TableRegistry {
    pub fn new(shard_count: u32) -> Self {
        Self {
            shard_count,
            schemas: BTreeMap::new(),
        }
    }

    pub fn from_schemas(shard_count: u32, schemas: &[Schema]) -> Self {
        let mut registry = Self::new(shard_count);
        for schema in schemas {
            registry.define(schema.clone());
        }
        registry
    }

    pub fn define(&mut self, schema: Schema) {
        self.schemas.insert(schema.table(), Arc::new(schema));
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn tables(&self) -> impl Iterator<Item = TableId> + '_ {
        self.schemas.keys().copied()
    }

    pub fn schema(&self, table: TableId) -> Option<&Arc<Schema>> {
        self.schemas.get(&table)
    }
}

/// One on-disk sorted-table file's recorded replay position.
///
/// Metadata that cannot be read is an `Err` carried to the scan, which logs
/// and skips it rather than failing init.
#[derive(Clone, Debug)]
pub struct SstableMeta {
    pub name: String,
    pub position: Result<ReplayPosition, MetadataError>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unreadable sstable metadata: {reason}")]
pub struct MetadataError {
    pub reason: String,
}

/// One shard's flushed on-disk tables, consumed once at replay init.
pub trait FlushedState: Send {
    /// Recorded replay positions of this shard's sstables for `table`.
    fn sstable_positions(&self, table: TableId) -> Vec<SstableMeta>;
}

/// Cluster-wide truncation records, read-only.
pub trait TruncationLog: Send + Sync {
    /// All truncation markers recorded for `table`.
    fn truncated_positions(&self, table: TableId) -> Result<Vec<ReplayPosition>, StoreError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store requires at least one shard")]
    NoShards,
    #[error("{got} flushed-state sources for {expected} shards")]
    ShardSourcesMismatch { expected: u32, got: usize },
    #[error("could not spawn worker for shard {shard}: {source}")]
    ShardSpawn {
        shard: ShardId,
        #[source]
        source: std::io::Error,
    },
    #[error("shard {shard} unavailable")]
    ShardUnavailable { shard: ShardId },
    #[error("truncation records unavailable for table {table}: {reason}")]
    TruncationRead { table: TableId, reason: String },
    #[error("replay mapping cache not active on shard {shard}")]
    ReplayNotActive { shard: ShardId },
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

/// What happened to a mutation handed to its owning shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The target table no longer exists; the mutation was dropped.
    DroppedTable,
}

/// Introspection view of one stored partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowView {
    pub key: DecoratedKey,
    pub cells: Vec<CellView>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellView {
    pub column: String,
    pub timestamp: u64,
    pub value: Bytes,
}
