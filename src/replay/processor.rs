//! Per-entry processing: decode, schema-version resolution, high-water
//! filtering, cross-shard dispatch.
//!
//! Nothing here fails a segment scan: every per-entry failure is absorbed
//! into the statistics and logged.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use crate::commitlog::CommitlogEntry;
use crate::core::{ColumnMapping, Limits, ReplayPosition, ReplayStats, SchemaVersion};
use crate::db::{ApplyOutcome, ShardedStore};

use super::marks::HighWaterMarks;

/// Drives entries of one shard's segment files, serially.
///
/// The mapping cache is the scanning side's view of schema versions seen so
/// far; it lives for the whole replay of the shard's files. The owning
/// shard keeps its own cache, seeded through the apply request.
pub(crate) struct EntryProcessor<'a> {
    store: &'a ShardedStore,
    marks: &'a HighWaterMarks,
    limits: &'a Limits,
    mappings: HashMap<SchemaVersion, ColumnMapping>,
    stats: ReplayStats,
}

impl<'a> EntryProcessor<'a> {
    pub(crate) fn new(
        store: &'a ShardedStore,
        marks: &'a HighWaterMarks,
        limits: &'a Limits,
    ) -> Self {
        Self {
            store,
            marks,
            limits,
            mappings: HashMap::new(),
            stats: ReplayStats::default(),
        }
    }

    pub(crate) fn process(&mut self, buf: &[u8], position: ReplayPosition) {
        let entry = match CommitlogEntry::decode(buf, self.limits) {
            Ok(entry) => entry,
            Err(err) => {
                self.stats.invalid += 1;
                warn!(%position, "could not decode commit-log entry: {err}");
                return;
            }
        };
        let CommitlogEntry { mutation, mapping } = entry;

        let version = mutation.schema_version;
        let source_mapping = match self.mappings.get(&version) {
            Some(known) => known.clone(),
            None => match mapping {
                Some(embedded) => {
                    debug!(%version, %position, "new schema version in entry");
                    self.mappings.insert(version, embedded.clone());
                    embedded
                }
                None => {
                    self.stats.invalid += 1;
                    warn!(%version, %position,
                        "unknown schema version with no embedded column mapping");
                    return;
                }
            },
        };

        if position < self.marks.min_position(position.shard()) {
            trace!(%position, "below the shard minimum flush point, skipping");
            self.stats.skipped += 1;
            return;
        }
        if let Some(mark) = self.marks.table_mark(position.shard(), mutation.table)
            && position <= mark
        {
            trace!(%position, %mark, table = %mutation.table,
                "at or below the recorded flush point, skipping");
            self.stats.skipped += 1;
            return;
        }

        let owner = self.store.shard_of(&mutation.key);
        match self.store.apply_on(owner, mutation, source_mapping) {
            Ok(ApplyOutcome::Applied) => self.stats.applied += 1,
            Ok(ApplyOutcome::DroppedTable) => {}
            Err(err) => {
                self.stats.invalid += 1;
                warn!(%position, "error replaying entry: {err}");
            }
        }
    }

    /// Return the counters accumulated since the last call and reset them.
    pub(crate) fn take_stats(&mut self) -> ReplayStats {
        std::mem::take(&mut self.stats)
    }
}
