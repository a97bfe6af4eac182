//! Fixture builders shared by unit and integration tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use crate::commitlog::{CommitlogEntry, SegmentWriter};
use crate::core::{
    Cell, ColumnMapping, DecoratedKey, FrozenMutation, PartitionUpdate, ReplayPosition, Schema,
    SchemaVersion, SegmentId, SegmentName, ShardId, TableId,
};
use crate::db::{
    FlushedState, MetadataError, ShardedStore, SstableMeta, StoreError, TableRegistry,
    TruncationLog,
};

pub fn table_id(n: u8) -> TableId {
    TableId::new(Uuid::from_bytes([n; 16]))
}

pub fn schema_version(n: u8) -> SchemaVersion {
    SchemaVersion::new(Uuid::from_bytes([n; 16]))
}

pub fn position(shard: u32, id: u64, pos: u64) -> ReplayPosition {
    ReplayPosition::new(ShardId::new(shard), SegmentId::new(id), pos)
}

pub fn test_schema(table: TableId, version: u8, columns: &[&str]) -> Schema {
    Schema::new(
        table,
        schema_version(version),
        columns.iter().map(|c| c.to_string()).collect(),
    )
}

pub fn mutation(
    table: TableId,
    version: SchemaVersion,
    key: &[u8],
    cells: &[(u16, u64, &[u8])],
) -> FrozenMutation {
    FrozenMutation {
        table,
        schema_version: version,
        key: DecoratedKey::new(Bytes::copy_from_slice(key)),
        partition: PartitionUpdate::new(
            cells
                .iter()
                .map(|(column, timestamp, value)| Cell {
                    column: *column,
                    timestamp: *timestamp,
                    value: Bytes::copy_from_slice(value),
                })
                .collect(),
        ),
    }
}

pub fn entry(mutation: FrozenMutation, mapping: Option<ColumnMapping>) -> CommitlogEntry {
    CommitlogEntry::new(mutation, mapping)
}

pub fn entry_bytes(mutation: &FrozenMutation, mapping: Option<&ColumnMapping>) -> Vec<u8> {
    CommitlogEntry::new(mutation.clone(), mapping.cloned())
        .encode()
        .expect("encode entry")
}

/// In-memory stand-in for one shard's flushed sstables.
#[derive(Default)]
pub struct MemFlushed {
    by_table: BTreeMap<TableId, Vec<SstableMeta>>,
    next: u32,
}

impl MemFlushed {
    pub fn with_position(mut self, table: TableId, position: ReplayPosition) -> Self {
        let name = format!("sst-{}", self.next);
        self.next += 1;
        self.by_table.entry(table).or_default().push(SstableMeta {
            name,
            position: Ok(position),
        });
        self
    }

    pub fn with_unreadable(mut self, table: TableId, name: &str) -> Self {
        self.by_table.entry(table).or_default().push(SstableMeta {
            name: name.to_string(),
            position: Err(MetadataError {
                reason: "stats metadata block unreadable".to_string(),
            }),
        });
        self
    }
}

impl FlushedState for MemFlushed {
    fn sstable_positions(&self, table: TableId) -> Vec<SstableMeta> {
        self.by_table.get(&table).cloned().unwrap_or_default()
    }
}

/// In-memory stand-in for the cluster truncation records.
#[derive(Default)]
pub struct MemTruncations {
    by_table: BTreeMap<TableId, Vec<ReplayPosition>>,
    fail: bool,
}

impl MemTruncations {
    pub fn with(mut self, table: TableId, position: ReplayPosition) -> Self {
        self.by_table.entry(table).or_default().push(position);
        self
    }

    pub fn failing() -> Self {
        Self {
            by_table: BTreeMap::new(),
            fail: true,
        }
    }
}

impl TruncationLog for MemTruncations {
    fn truncated_positions(&self, table: TableId) -> Result<Vec<ReplayPosition>, StoreError> {
        if self.fail {
            return Err(StoreError::TruncationRead {
                table,
                reason: "record store offline".to_string(),
            });
        }
        Ok(self.by_table.get(&table).cloned().unwrap_or_default())
    }
}

/// Store with explicit per-shard flushed state and truncation records.
pub fn store_with_sources(
    registry: TableRegistry,
    flushed: Vec<MemFlushed>,
    truncations: MemTruncations,
) -> ShardedStore {
    let sources = flushed
        .into_iter()
        .map(|f| Box::new(f) as Box<dyn FlushedState>)
        .collect();
    ShardedStore::open(registry, sources, Arc::new(truncations)).expect("open store")
}

/// Store with empty durable state; tables given as
/// `(id, schema version byte, columns)`.
pub fn test_store(shard_count: u32, tables: &[(TableId, u8, &[&str])]) -> ShardedStore {
    let schemas: Vec<Schema> = tables
        .iter()
        .map(|(table, version, columns)| test_schema(*table, *version, columns))
        .collect();
    let flushed = (0..shard_count).map(|_| MemFlushed::default()).collect();
    store_with_sources(
        TableRegistry::from_schemas(shard_count, &schemas),
        flushed,
        MemTruncations::default(),
    )
}

/// Write a segment file and return its path plus each entry's position.
pub fn write_segment(
    dir: &Path,
    shard: u32,
    id: u64,
    entries: &[CommitlogEntry],
) -> (PathBuf, Vec<ReplayPosition>) {
    let name = SegmentName::new(ShardId::new(shard), SegmentId::new(id));
    let mut writer = SegmentWriter::create(dir, name).expect("create segment");
    let positions = entries
        .iter()
        .map(|e| writer.append(e).expect("append entry"))
        .collect();
    writer.sync().expect("sync segment");
    (writer.into_path(), positions)
}
