//! High-water marks: what is already durable and need not be replayed.

use std::collections::BTreeMap;

use tracing::debug;

use crate::core::{ReplayPosition, ShardId, TableId};
use crate::db::shard::observe_flush_point;
use crate::db::{FlushPointMap, ShardedStore, StoreError};

/// Per-shard/per-table greatest durable replay positions (`rpm`) and the
/// per-shard greatest lower bound over all tables (`min_pos`).
///
/// Built once at replay init, then read-only. Absent entries in either map
/// read as the zero position.
#[derive(Clone, Debug, Default)]
pub struct HighWaterMarks {
    rpm: FlushPointMap,
    min_pos: BTreeMap<ShardId, ReplayPosition>,
}

impl HighWaterMarks {
    /// Scan every shard's durable state and fold the results.
    pub fn build(store: &ShardedStore) -> Result<Self, StoreError> {
        let mut rpm = FlushPointMap::new();
        for map in store.scan_durable_all()? {
            for tables in map.into_values() {
                for (table, position) in tables {
                    observe_flush_point(&mut rpm, table, position);
                }
            }
        }

        let mut min_pos: BTreeMap<ShardId, ReplayPosition> = BTreeMap::new();
        for (shard, tables) in &rpm {
            for position in tables.values() {
                min_pos
                    .entry(*shard)
                    .and_modify(|min| {
                        if *position < *min {
                            *min = *position;
                        }
                    })
                    .or_insert(*position);
            }
        }

        // The scan only sees shards that still have durable data, and shard
        // counts change between runs. A table with no sstables on some
        // observed shard contributes an implicit zero to that shard's
        // minimum, which the narrow fold above cannot see.
        for table in store.tables() {
            for (shard, tables) in &rpm {
                if !tables.contains_key(&table) {
                    min_pos.insert(*shard, ReplayPosition::zero(*shard));
                }
            }
        }

        for (shard, position) in &min_pos {
            debug!(%shard, %position, "minimum flush point");
        }
        for (shard, tables) in &rpm {
            for (table, position) in tables {
                debug!(%shard, %table, %position, "table flush point");
            }
        }

        Ok(Self { rpm, min_pos })
    }

    /// Greatest durable position for a table on a shard, if any data of the
    /// table was ever flushed there.
    pub fn table_mark(&self, shard: ShardId, table: TableId) -> Option<ReplayPosition> {
        self.rpm.get(&shard).and_then(|tables| tables.get(&table)).copied()
    }

    /// Greatest lower bound over the shard's table marks; zero when the shard
    /// has no durable data at all.
    pub fn min_position(&self, shard: ShardId) -> ReplayPosition {
        self.min_pos
            .get(&shard)
            .copied()
            .unwrap_or_else(|| ReplayPosition::zero(shard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TableRegistry;
    use crate::test_harness::{
        MemFlushed, MemTruncations, position, store_with_sources, table_id, test_schema,
    };

    #[test]
    fn empty_durable_state_yields_zero_marks() {
        let table = table_id(1);
        let store = store_with_sources(
            TableRegistry::from_schemas(2, &[test_schema(table, 1, &["pk"])]),
            vec![MemFlushed::default(), MemFlushed::default()],
            MemTruncations::default(),
        );
        let marks = HighWaterMarks::build(&store).unwrap();

        for shard in [ShardId::new(0), ShardId::new(1)] {
            assert_eq!(marks.min_position(shard), ReplayPosition::zero(shard));
            assert_eq!(marks.table_mark(shard, table), None);
        }
    }

    #[test]
    fn sstable_and_truncation_positions_merge_by_max() {
        let table = table_id(1);
        let shard = ShardId::new(0);
        let flushed = MemFlushed::default()
            .with_position(table, position(0, 5, 100))
            .with_position(table, position(0, 7, 40));
        let truncations = MemTruncations::default().with(table, position(0, 7, 900));

        let store = store_with_sources(
            TableRegistry::from_schemas(1, &[test_schema(table, 1, &["pk"])]),
            vec![flushed],
            truncations,
        );
        let marks = HighWaterMarks::build(&store).unwrap();

        assert_eq!(marks.table_mark(shard, table), Some(position(0, 7, 900)));
        assert_eq!(marks.min_position(shard), position(0, 7, 900));
    }

    #[test]
    fn unreadable_sstable_metadata_is_skipped() {
        let table = table_id(1);
        let flushed = MemFlushed::default()
            .with_position(table, position(0, 3, 10))
            .with_unreadable(table, "sst-bad");

        let store = store_with_sources(
            TableRegistry::from_schemas(1, &[test_schema(table, 1, &["pk"])]),
            vec![flushed],
            MemTruncations::default(),
        );
        let marks = HighWaterMarks::build(&store).unwrap();
        assert_eq!(
            marks.table_mark(ShardId::new(0), table),
            Some(position(0, 3, 10))
        );
    }

    #[test]
    fn truncation_read_failure_is_fatal() {
        let table = table_id(1);
        let store = store_with_sources(
            TableRegistry::from_schemas(1, &[test_schema(table, 1, &["pk"])]),
            vec![MemFlushed::default()],
            MemTruncations::failing(),
        );
        let err = HighWaterMarks::build(&store).unwrap_err();
        assert!(matches!(err, StoreError::TruncationRead { .. }));
    }

    #[test]
    fn missing_table_forces_shard_minimum_to_zero() {
        let with_data = table_id(1);
        let without_data = table_id(2);
        let shard = ShardId::new(0);
        let flushed = MemFlushed::default().with_position(with_data, position(0, 9, 50));

        let store = store_with_sources(
            TableRegistry::from_schemas(
                1,
                &[
                    test_schema(with_data, 1, &["pk"]),
                    test_schema(without_data, 1, &["pk"]),
                ],
            ),
            vec![flushed],
            MemTruncations::default(),
        );
        let marks = HighWaterMarks::build(&store).unwrap();

        // Narrow minimum alone would be (0, 9, 50); the table with no
        // durable data pulls it back to zero.
        assert_eq!(marks.table_mark(shard, with_data), Some(position(0, 9, 50)));
        assert_eq!(marks.min_position(shard), ReplayPosition::zero(shard));
    }

    #[test]
    fn marks_grow_monotonically_with_more_sstables() {
        let table = table_id(1);
        let shard = ShardId::new(0);
        let registry = || TableRegistry::from_schemas(1, &[test_schema(table, 1, &["pk"])]);

        let first = HighWaterMarks::build(&store_with_sources(
            registry(),
            vec![MemFlushed::default().with_position(table, position(0, 4, 10))],
            MemTruncations::default(),
        ))
        .unwrap();
        let second = HighWaterMarks::build(&store_with_sources(
            registry(),
            vec![
                MemFlushed::default()
                    .with_position(table, position(0, 4, 10))
                    .with_position(table, position(0, 6, 0)),
            ],
            MemTruncations::default(),
        ))
        .unwrap();

        let first_mark = first.table_mark(shard, table).unwrap();
        let second_mark = second.table_mark(shard, table).unwrap();
        assert!(second_mark >= first_mark);
        assert_eq!(second_mark, position(0, 6, 0));
    }
}
