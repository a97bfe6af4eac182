//! Sharded store handle: one worker thread per shard, message-passing only.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{Sender, bounded, unbounded};

use crate::core::{ColumnMapping, DecoratedKey, FrozenMutation, ShardId, TableId};

use super::shard::{FlushPointMap, ShardRequest, ShardWorker, run_shard_loop};
use super::{ApplyOutcome, FlushedState, RowView, StoreError, TableRegistry, TruncationLog};

/// Handle to the live sharded database.
///
/// Table data lives inside the shard workers; everything here routes
/// requests. The registry is an immutable snapshot shared with every worker.
pub struct ShardedStore {
    registry: Arc<TableRegistry>,
    shards: Vec<ShardHandle>,
}

struct ShardHandle {
    tx: Sender<ShardRequest>,
    join: Option<JoinHandle<()>>,
}

impl ShardedStore {
    /// Spawn one worker per shard. `flushed` supplies each shard's durable
    /// on-disk state, in shard order.
    pub fn open(
        registry: TableRegistry,
        flushed: Vec<Box<dyn FlushedState>>,
        truncations: Arc<dyn TruncationLog>,
    ) -> Result<Self, StoreError> {
        if registry.shard_count() == 0 {
            return Err(StoreError::NoShards);
        }
        if flushed.len() != registry.shard_count() as usize {
            return Err(StoreError::ShardSourcesMismatch {
                expected: registry.shard_count(),
                got: flushed.len(),
            });
        }

        let registry = Arc::new(registry);
        let mut shards = Vec::with_capacity(flushed.len());
        for (index, source) in flushed.into_iter().enumerate() {
            let shard = ShardId::new(index as u32);
            let (tx, rx) = unbounded();
            let worker = ShardWorker::new(
                shard,
                Arc::clone(&registry),
                source,
                Arc::clone(&truncations),
            );
            let join = std::thread::Builder::new()
                .name(format!("basalt-shard-{index}"))
                .spawn(move || run_shard_loop(worker, rx))
                .map_err(|source| StoreError::ShardSpawn { shard, source })?;
            shards.push(ShardHandle {
                tx,
                join: Some(join),
            });
        }

        Ok(Self { registry, shards })
    }

    pub fn shard_count(&self) -> u32 {
        self.registry.shard_count()
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    pub fn tables(&self) -> Vec<TableId> {
        self.registry.tables().collect()
    }

    /// The shard owning a partition key under the current topology.
    pub fn shard_of(&self, key: &DecoratedKey) -> ShardId {
        ShardId::new((key.token().get() % u64::from(self.shard_count())) as u32)
    }

    /// Scan every shard's durable state concurrently and return the per-shard
    /// flush-point maps.
    pub(crate) fn scan_durable_all(&self) -> Result<Vec<FlushPointMap>, StoreError> {
        let mut pending = Vec::with_capacity(self.shards.len());
        for (index, handle) in self.shards.iter().enumerate() {
            let shard = ShardId::new(index as u32);
            let (respond, rx) = bounded(1);
            handle
                .tx
                .send(ShardRequest::ScanDurable { respond })
                .map_err(|_| StoreError::ShardUnavailable { shard })?;
            pending.push((shard, rx));
        }

        let mut maps = Vec::with_capacity(pending.len());
        for (shard, rx) in pending {
            let map = rx
                .recv()
                .map_err(|_| StoreError::ShardUnavailable { shard })??;
            maps.push(map);
        }
        Ok(maps)
    }

    /// Install a fresh replay mapping cache on every shard.
    pub(crate) fn begin_replay(&self) -> Result<(), StoreError> {
        for (index, handle) in self.shards.iter().enumerate() {
            handle
                .tx
                .send(ShardRequest::BeginReplay)
                .map_err(|_| StoreError::ShardUnavailable {
                    shard: ShardId::new(index as u32),
                })?;
        }
        Ok(())
    }

    /// Drop the replay mapping cache on every shard, waiting for each to
    /// acknowledge so queued applies have drained.
    pub(crate) fn end_replay(&self) -> Result<(), StoreError> {
        for (index, handle) in self.shards.iter().enumerate() {
            let shard = ShardId::new(index as u32);
            let (respond, rx) = bounded(1);
            handle
                .tx
                .send(ShardRequest::EndReplay { respond })
                .map_err(|_| StoreError::ShardUnavailable { shard })?;
            rx.recv()
                .map_err(|_| StoreError::ShardUnavailable { shard })?;
        }
        Ok(())
    }

    /// Apply a mutation on its owning shard, waiting for the outcome.
    ///
    /// `source_mapping` seeds the owner's mapping cache when it has not seen
    /// the mutation's schema version yet.
    pub(crate) fn apply_on(
        &self,
        shard: ShardId,
        mutation: FrozenMutation,
        source_mapping: ColumnMapping,
    ) -> Result<ApplyOutcome, StoreError> {
        let handle = self.handle(shard)?;
        let (respond, rx) = bounded(1);
        handle
            .tx
            .send(ShardRequest::Apply {
                mutation,
                source_mapping,
                respond,
            })
            .map_err(|_| StoreError::ShardUnavailable { shard })?;
        rx.recv()
            .map_err(|_| StoreError::ShardUnavailable { shard })?
    }

    /// Dump a table's partitions on one shard; `None` if the table does not
    /// exist.
    pub fn rows(&self, shard: ShardId, table: TableId) -> Result<Option<Vec<RowView>>, StoreError> {
        let handle = self.handle(shard)?;
        let (respond, rx) = bounded(1);
        handle
            .tx
            .send(ShardRequest::Rows { table, respond })
            .map_err(|_| StoreError::ShardUnavailable { shard })?;
        rx.recv()
            .map_err(|_| StoreError::ShardUnavailable { shard })
    }

    fn handle(&self, shard: ShardId) -> Result<&ShardHandle, StoreError> {
        self.shards
            .get(shard.get() as usize)
            .ok_or(StoreError::ShardUnavailable { shard })
    }
}

impl Drop for ShardedStore {
    fn drop(&mut self) {
        for handle in &self.shards {
            let _ = handle.tx.send(ShardRequest::Shutdown);
        }
        for handle in &mut self.shards {
            if let Some(join) = handle.join.take() {
                let _ = join.join();
            }
        }
    }
}
