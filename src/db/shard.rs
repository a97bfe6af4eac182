//! Shard worker: owns the shard's tables and processes requests serially.
//!
//! Each shard is a dedicated thread owning state nothing else touches.
//! Requests arrive over a channel and carry their own reply channel; the
//! worker never blocks on another shard, which keeps cross-shard dispatch
//! deadlock-free.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};
use tracing::{debug, trace, warn};

use crate::core::{
    ApplyError, ColumnMapping, DecoratedKey, FrozenMutation, PartitionUpdate, ReplayPosition,
    Schema, SchemaVersion, ShardId, TableId, project_partition,
};

use super::{
    ApplyOutcome, CellView, FlushedState, RowView, StoreError, TableRegistry, TruncationLog,
};

/// Durable replay positions keyed by originating shard, then table.
///
/// Keys are the shard recorded *in* the metadata, which after a re-shard can
/// differ from the shard that scanned it.
pub type FlushPointMap = BTreeMap<ShardId, BTreeMap<TableId, ReplayPosition>>;

/// Fold `position` into `map` by element-wise max.
pub(crate) fn observe_flush_point(map: &mut FlushPointMap, table: TableId, position: ReplayPosition) {
    let slot = map
        .entry(position.shard())
        .or_default()
        .entry(table)
        .or_insert_with(|| ReplayPosition::zero(position.shard()));
    if *slot < position {
        *slot = position;
    }
}

pub(crate) enum ShardRequest {
    /// Derive this shard's durable flush points from its sstable metadata and
    /// the cluster truncation records.
    ScanDurable {
        respond: Sender<Result<FlushPointMap, StoreError>>,
    },
    /// Install a fresh schema-version mapping cache for a replay.
    BeginReplay,
    /// Apply a replayed mutation this shard owns.
    Apply {
        mutation: FrozenMutation,
        source_mapping: ColumnMapping,
        respond: Sender<Result<ApplyOutcome, StoreError>>,
    },
    /// Drop the replay mapping cache.
    EndReplay { respond: Sender<()> },
    /// Dump a table's partitions (introspection and tests).
    Rows {
        table: TableId,
        respond: Sender<Option<Vec<RowView>>>,
    },
    Shutdown,
}

/// In-memory partition store for one table on one shard.
///
/// Cells merge last-write-wins on `(timestamp, value)` per column, so apply
/// order never changes the outcome.
pub(crate) struct TableShard {
    schema: Arc<Schema>,
    partitions: BTreeMap<DecoratedKey, Row>,
}

#[derive(Default)]
struct Row {
    cells: BTreeMap<String, CellValue>,
}

struct CellValue {
    timestamp: u64,
    value: bytes::Bytes,
}

impl TableShard {
    fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            partitions: BTreeMap::new(),
        }
    }

    pub(crate) fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Apply a partition update expressed in this table's live schema.
    pub(crate) fn apply(
        &mut self,
        key: &DecoratedKey,
        update: &PartitionUpdate,
    ) -> Result<(), ApplyError> {
        // Resolve all columns before touching the row: a half-applied
        // partition update must not be observable.
        let mut resolved = Vec::with_capacity(update.len());
        for cell in update.cells() {
            let name =
                self.schema
                    .column_name(cell.column)
                    .ok_or(ApplyError::ColumnOutOfRange {
                        column: cell.column,
                        version: self.schema.version(),
                        columns: self.schema.columns().len(),
                    })?;
            resolved.push((name.to_string(), cell));
        }

        let row = self.partitions.entry(key.clone()).or_default();
        for (name, cell) in resolved {
            match row.cells.get_mut(&name) {
                Some(existing)
                    if (existing.timestamp, &existing.value) >= (cell.timestamp, &cell.value) => {}
                Some(existing) => {
                    existing.timestamp = cell.timestamp;
                    existing.value = cell.value.clone();
                }
                None => {
                    row.cells.insert(
                        name,
                        CellValue {
                            timestamp: cell.timestamp,
                            value: cell.value.clone(),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    fn rows(&self) -> Vec<RowView> {
        self.partitions
            .iter()
            .map(|(key, row)| RowView {
                key: key.clone(),
                cells: row
                    .cells
                    .iter()
                    .map(|(column, cell)| CellView {
                        column: column.clone(),
                        timestamp: cell.timestamp,
                        value: cell.value.clone(),
                    })
                    .collect(),
            })
            .collect()
    }
}

/// One shard's worker state.
pub(crate) struct ShardWorker {
    shard: ShardId,
    registry: Arc<TableRegistry>,
    tables: HashMap<TableId, TableShard>,
    flushed: Box<dyn FlushedState>,
    truncations: Arc<dyn TruncationLog>,
    replay_mappings: Option<HashMap<SchemaVersion, ColumnMapping>>,
}

impl ShardWorker {
    pub(crate) fn new(
        shard: ShardId,
        registry: Arc<TableRegistry>,
        flushed: Box<dyn FlushedState>,
        truncations: Arc<dyn TruncationLog>,
    ) -> Self {
        let tables = registry
            .tables()
            .filter_map(|table| {
                registry
                    .schema(table)
                    .map(|schema| (table, TableShard::new(Arc::clone(schema))))
            })
            .collect();
        Self {
            shard,
            registry,
            tables,
            flushed,
            truncations,
            replay_mappings: None,
        }
    }

    /// Handle one request. Returns false when the worker should exit.
    fn handle(&mut self, request: ShardRequest) -> bool {
        match request {
            ShardRequest::ScanDurable { respond } => {
                let _ = respond.send(self.scan_durable());
            }
            ShardRequest::BeginReplay => {
                self.replay_mappings = Some(HashMap::new());
            }
            ShardRequest::Apply {
                mutation,
                source_mapping,
                respond,
            } => {
                let _ = respond.send(self.apply(mutation, source_mapping));
            }
            ShardRequest::EndReplay { respond } => {
                self.replay_mappings = None;
                let _ = respond.send(());
            }
            ShardRequest::Rows { table, respond } => {
                let rows = self.tables.get(&table).map(TableShard::rows);
                let _ = respond.send(rows);
            }
            ShardRequest::Shutdown => return false,
        }
        true
    }

    /// Fold every sstable position and truncation record this shard can see
    /// into a flush-point map. Unreadable per-file metadata is logged and
    /// skipped; a truncation read failure aborts the scan.
    fn scan_durable(&self) -> Result<FlushPointMap, StoreError> {
        let mut map = FlushPointMap::new();
        for table in self.registry.tables() {
            for sst in self.flushed.sstable_positions(table) {
                match sst.position {
                    Ok(position) => {
                        trace!(shard = %self.shard, %table, sstable = %sst.name, %position,
                            "sstable flush point");
                        observe_flush_point(&mut map, table, position);
                    }
                    Err(err) => {
                        warn!(shard = %self.shard, %table, sstable = %sst.name,
                            "could not read sstable metadata: {err}");
                    }
                }
            }
            // Truncations cannot be fetched on demand: a truncated table may
            // have no sstables left to mark it as present.
            for position in self.truncations.truncated_positions(table)? {
                trace!(shard = %self.shard, %table, %position, "truncated at");
                observe_flush_point(&mut map, table, position);
            }
        }
        Ok(map)
    }

    fn apply(
        &mut self,
        mutation: FrozenMutation,
        source_mapping: ColumnMapping,
    ) -> Result<ApplyOutcome, StoreError> {
        let Some(table) = self.tables.get_mut(&mutation.table) else {
            debug!(shard = %self.shard, table = %mutation.table,
                "table no longer exists, dropping replayed mutation");
            return Ok(ApplyOutcome::DroppedTable);
        };

        let live = Arc::clone(table.schema());
        debug!(shard = %self.shard, table = %mutation.table,
            version = %mutation.schema_version, "replaying mutation");

        if live.version() == mutation.schema_version {
            table.apply(&mutation.key, &mutation.partition)?;
        } else {
            let mappings = self
                .replay_mappings
                .as_mut()
                .ok_or(StoreError::ReplayNotActive { shard: self.shard })?;
            let source = mappings
                .entry(mutation.schema_version)
                .or_insert(source_mapping);
            let projected = project_partition(source, &live, &mutation.partition)?;
            table.apply(&mutation.key, &projected)?;
        }
        Ok(ApplyOutcome::Applied)
    }
}

/// Run the shard thread loop; processes requests until Shutdown.
pub(crate) fn run_shard_loop(mut worker: ShardWorker, rx: Receiver<ShardRequest>) {
    for request in rx {
        if !worker.handle(request) {
            break;
        }
    }
}
