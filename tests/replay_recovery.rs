//! End-to-end commit-log replay scenarios.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tempfile::TempDir;

use basalt::core::{ColumnMapping, ReplayStats, ShardId};
use basalt::db::{RowView, ShardedStore, TableRegistry};
use basalt::replay::Replayer;
use basalt::test_harness::{
    MemFlushed, MemTruncations, entry, mutation, position, schema_version, store_with_sources,
    table_id, test_schema, test_store, write_segment,
};

const COLUMNS: [&str; 2] = ["pk", "value"];

fn v1_mapping() -> ColumnMapping {
    ColumnMapping::new(vec!["pk".into(), "value".into()])
}

fn all_rows(store: &ShardedStore, table: basalt::core::TableId) -> Vec<(ShardId, Vec<RowView>)> {
    (0..store.shard_count())
        .map(|s| {
            let shard = ShardId::new(s);
            (shard, store.rows(shard, table).unwrap().unwrap_or_default())
        })
        .collect()
}

#[test]
fn empty_durable_state_replays_everything() {
    let temp = TempDir::new().unwrap();
    let table = table_id(1);
    let store = Arc::new(test_store(1, &[(table, 1, &COLUMNS)]));

    let entries: Vec<_> = (0..3)
        .map(|i| {
            entry(
                mutation(
                    table,
                    schema_version(1),
                    format!("key-{i}").as_bytes(),
                    &[(1, 10 + i, b"v")],
                ),
                Some(v1_mapping()),
            )
        })
        .collect();
    let (path, _) = write_segment(temp.path(), 0, 10, &entries);

    let replayer = Replayer::create(Arc::clone(&store)).unwrap();
    let stats = replayer.recover_one(&path).unwrap();

    assert_eq!(
        stats,
        ReplayStats {
            applied: 3,
            ..ReplayStats::default()
        }
    );
    let total_rows: usize = all_rows(&store, table).iter().map(|(_, r)| r.len()).sum();
    assert_eq!(total_rows, 3);
}

#[test]
fn fully_flushed_segment_is_skipped_without_reading_it() {
    let table = table_id(1);
    let store = Arc::new(store_with_sources(
        TableRegistry::from_schemas(1, &[test_schema(table, 1, &COLUMNS)]),
        vec![MemFlushed::default().with_position(table, position(0, 20, 500))],
        MemTruncations::default(),
    ));

    // The file does not even exist: the segment id pre-filter must skip it
    // before any I/O happens.
    let replayer = Replayer::create(Arc::clone(&store)).unwrap();
    let stats = replayer
        .recover_one(&PathBuf::from("commitlog-0-15.log"))
        .unwrap();

    assert_eq!(stats, ReplayStats::default());
}

#[test]
fn partially_flushed_segment_resumes_at_the_recorded_offset() {
    let temp = TempDir::new().unwrap();
    let table = table_id(1);

    let entries: Vec<_> = (0..4)
        .map(|i| {
            entry(
                mutation(
                    table,
                    schema_version(1),
                    format!("key-{i}").as_bytes(),
                    &[(1, 10 + i, b"v")],
                ),
                Some(v1_mapping()),
            )
        })
        .collect();
    let (path, positions) = write_segment(temp.path(), 0, 20, &entries);

    // Entry 1's own position is the recorded flush point: the reader starts
    // there, re-reads exactly that entry (skipped by the strict filter) and
    // applies the two after it. Entry 0 is never even decoded.
    let store = Arc::new(store_with_sources(
        TableRegistry::from_schemas(1, &[test_schema(table, 1, &COLUMNS)]),
        vec![MemFlushed::default().with_position(table, positions[1])],
        MemTruncations::default(),
    ));
    let replayer = Replayer::create(Arc::clone(&store)).unwrap();
    let stats = replayer.recover_one(&path).unwrap();

    assert_eq!(stats.applied, 2);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.invalid, 0);

    let keys: Vec<String> = all_rows(&store, table)
        .into_iter()
        .flat_map(|(_, rows)| rows)
        .map(|row| String::from_utf8(row.key.key().to_vec()).unwrap())
        .collect();
    assert!(!keys.contains(&"key-0".to_string()));
    assert!(!keys.contains(&"key-1".to_string()));
    assert!(keys.contains(&"key-2".to_string()));
    assert!(keys.contains(&"key-3".to_string()));
}

#[test]
fn unknown_schema_version_spoils_only_that_entry() {
    let temp = TempDir::new().unwrap();
    let table = table_id(1);
    let store = Arc::new(test_store(1, &[(table, 1, &COLUMNS)]));

    let entries = vec![
        // Version nobody knows, and no embedded mapping.
        entry(
            mutation(table, schema_version(9), b"orphan", &[(1, 5, b"x")]),
            None,
        ),
        entry(
            mutation(table, schema_version(1), b"fine", &[(1, 6, b"y")]),
            Some(v1_mapping()),
        ),
    ];
    let (path, _) = write_segment(temp.path(), 0, 3, &entries);

    let replayer = Replayer::create(Arc::clone(&store)).unwrap();
    let stats = replayer.recover_one(&path).unwrap();

    assert_eq!(stats.invalid, 1);
    assert_eq!(stats.applied, 1);
}

#[test]
fn historical_shards_remap_onto_the_current_topology() {
    let temp = TempDir::new().unwrap();
    let table = table_id(1);
    // Two shards now; the log was written by three.
    let store = Arc::new(test_store(2, &[(table, 1, &COLUMNS)]));

    let mut files = Vec::new();
    for (shard, id, key) in [(0u32, 1u64, "a"), (1, 2, "b"), (2, 3, "c")] {
        let entries = vec![entry(
            mutation(table, schema_version(1), key.as_bytes(), &[(1, 7, b"v")]),
            Some(v1_mapping()),
        )];
        let (path, _) = write_segment(temp.path(), shard, id, &entries);
        files.push(path);
    }

    let replayer = Replayer::create(Arc::clone(&store)).unwrap();
    let stats = replayer.recover(&files).unwrap();

    assert_eq!(stats.applied, 3);
    assert_eq!(stats.skipped + stats.invalid + stats.corrupt_bytes, 0);
    let total_rows: usize = all_rows(&store, table).iter().map(|(_, r)| r.len()).sum();
    assert_eq!(total_rows, 3);
}

#[test]
fn dropped_table_entries_vanish_silently() {
    let temp = TempDir::new().unwrap();
    let live = table_id(1);
    let dropped = table_id(9);
    let store = Arc::new(test_store(1, &[(live, 1, &COLUMNS)]));

    let entries = vec![
        entry(
            mutation(dropped, schema_version(3), b"gone", &[(0, 1, b"x")]),
            Some(v1_mapping()),
        ),
        entry(
            mutation(live, schema_version(1), b"here", &[(1, 2, b"y")]),
            Some(v1_mapping()),
        ),
    ];
    let (path, _) = write_segment(temp.path(), 0, 1, &entries);

    let replayer = Replayer::create(Arc::clone(&store)).unwrap();
    let stats = replayer.recover_one(&path).unwrap();

    // The dropped table's entry touches no counter at all.
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.invalid, 0);
}

#[test]
fn replaying_twice_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let table = table_id(1);
    let store = Arc::new(test_store(2, &[(table, 1, &COLUMNS)]));

    let entries: Vec<_> = (0..5)
        .map(|i| {
            entry(
                mutation(
                    table,
                    schema_version(1),
                    format!("key-{i}").as_bytes(),
                    &[(1, 100 + i, b"payload")],
                ),
                Some(v1_mapping()),
            )
        })
        .collect();
    let (path, _) = write_segment(temp.path(), 0, 8, &entries);

    let replayer = Replayer::create(Arc::clone(&store)).unwrap();
    let first = replayer.recover_one(&path).unwrap();
    let after_first = all_rows(&store, table);

    let second = replayer.recover_one(&path).unwrap();
    let after_second = all_rows(&store, table);

    assert_eq!(first, second);
    assert_eq!(after_first, after_second);
}

#[test]
fn corruption_in_one_entry_spares_the_rest_of_the_segment() {
    let temp = TempDir::new().unwrap();
    let table = table_id(1);
    let store = Arc::new(test_store(1, &[(table, 1, &COLUMNS)]));

    let entries: Vec<_> = (0..3)
        .map(|i| {
            entry(
                mutation(
                    table,
                    schema_version(1),
                    format!("key-{i}").as_bytes(),
                    &[(1, 10 + i, b"v")],
                ),
                Some(v1_mapping()),
            )
        })
        .collect();
    let (path, positions) = write_segment(temp.path(), 0, 4, &entries);

    // Flip one byte inside the middle entry's body.
    let mut raw = fs::read(&path).unwrap();
    let victim = positions[1].pos() as usize + 12;
    raw[victim] ^= 0xFF;
    fs::write(&path, &raw).unwrap();

    let replayer = Replayer::create(Arc::clone(&store)).unwrap();
    let stats = replayer.recover_one(&path).unwrap();

    assert_eq!(stats.applied, 2);
    assert_eq!(stats.corrupt_bytes, positions[2].pos() - positions[1].pos());
    let keys: Vec<Vec<u8>> = all_rows(&store, table)
        .into_iter()
        .flat_map(|(_, rows)| rows)
        .map(|row| row.key.key().to_vec())
        .collect();
    assert!(keys.contains(&b"key-2".to_vec()));
}

#[test]
fn applied_mutations_land_on_their_owning_shard() {
    let temp = TempDir::new().unwrap();
    let table = table_id(1);
    let store = Arc::new(test_store(4, &[(table, 1, &COLUMNS)]));

    let muts: Vec<_> = (0..8)
        .map(|i| {
            mutation(
                table,
                schema_version(1),
                format!("key-{i}").as_bytes(),
                &[(1, 50 + i, b"v")],
            )
        })
        .collect();
    let entries: Vec<_> = muts
        .iter()
        .map(|m| entry(m.clone(), Some(v1_mapping())))
        .collect();
    let (path, _) = write_segment(temp.path(), 0, 2, &entries);

    let replayer = Replayer::create(Arc::clone(&store)).unwrap();
    let stats = replayer.recover_one(&path).unwrap();
    assert_eq!(stats.applied, 8);

    for m in &muts {
        let owner = store.shard_of(&m.key);
        for (shard, rows) in all_rows(&store, table) {
            let here = rows.iter().any(|row| row.key == m.key);
            assert_eq!(here, shard == owner, "key must live exactly on its owner");
        }
    }
}

#[test]
fn entries_written_under_an_old_schema_are_converted() {
    let temp = TempDir::new().unwrap();
    let table = table_id(1);
    // Live schema is v2: columns reordered and "tags" dropped.
    let store = Arc::new(store_with_sources(
        TableRegistry::from_schemas(1, &[test_schema(table, 2, &["value", "pk"])]),
        vec![MemFlushed::default()],
        MemTruncations::default(),
    ));

    let old_mapping = ColumnMapping::new(vec!["pk".into(), "value".into(), "tags".into()]);
    let entries = vec![entry(
        mutation(
            table,
            schema_version(1),
            b"k",
            &[(1, 10, b"kept"), (2, 11, b"discarded")],
        ),
        Some(old_mapping),
    )];
    let (path, _) = write_segment(temp.path(), 0, 1, &entries);

    let replayer = Replayer::create(Arc::clone(&store)).unwrap();
    let stats = replayer.recover_one(&path).unwrap();
    assert_eq!(stats.applied, 1);

    let rows = store.rows(ShardId::new(0), table).unwrap().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].cells.len(), 1);
    assert_eq!(rows[0].cells[0].column, "value");
    assert_eq!(rows[0].cells[0].value, Bytes::from_static(b"kept"));
}

#[test]
fn table_without_durable_data_still_replays_after_others_flushed() {
    let temp = TempDir::new().unwrap();
    let flushed_table = table_id(1);
    let fresh_table = table_id(2);

    // One table flushed far ahead; the other has no sstables anywhere, which
    // forces the shard minimum back to zero so its old entries still replay.
    let store = Arc::new(store_with_sources(
        TableRegistry::from_schemas(
            1,
            &[
                test_schema(flushed_table, 1, &COLUMNS),
                test_schema(fresh_table, 1, &COLUMNS),
            ],
        ),
        vec![MemFlushed::default().with_position(flushed_table, position(0, 50, 0))],
        MemTruncations::default(),
    ));

    let entries = vec![entry(
        mutation(fresh_table, schema_version(1), b"early", &[(1, 1, b"v")]),
        Some(v1_mapping()),
    )];
    let (path, _) = write_segment(temp.path(), 0, 2, &entries);

    let replayer = Replayer::create(Arc::clone(&store)).unwrap();
    let stats = replayer.recover_one(&path).unwrap();

    assert_eq!(stats.applied, 1);
    let rows = store.rows(ShardId::new(0), fresh_table).unwrap().unwrap();
    assert_eq!(rows.len(), 1);
}

#[test]
fn well_framed_entries_are_conserved_across_the_counters() {
    let temp = TempDir::new().unwrap();
    let table = table_id(1);

    let entries: Vec<_> = (0..6)
        .map(|i| {
            let version = if i % 3 == 2 { 9 } else { 1 };
            let mapping = (version == 1).then(v1_mapping);
            entry(
                mutation(
                    table,
                    schema_version(version),
                    format!("key-{i}").as_bytes(),
                    &[(1, i, b"v")],
                ),
                mapping,
            )
        })
        .collect();
    let (path, positions) = write_segment(temp.path(), 0, 30, &entries);

    let store = Arc::new(store_with_sources(
        TableRegistry::from_schemas(1, &[test_schema(table, 1, &COLUMNS)]),
        vec![MemFlushed::default().with_position(table, positions[1])],
        MemTruncations::default(),
    ));
    let replayer = Replayer::create(Arc::clone(&store)).unwrap();
    let stats = replayer.recover_one(&path).unwrap();

    // No dropped tables in this workload, so every well-framed entry the
    // reader saw is accounted for exactly once.
    let seen = (positions.len() - 1) as u64;
    assert_eq!(stats.applied + stats.skipped + stats.invalid, seen);
    assert_eq!(stats.corrupt_bytes, 0);
}
