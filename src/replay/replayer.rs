//! Replay orchestration: bucket segment files by shard, drive each bucket
//! serially on its own thread, fold the statistics.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::commitlog::{SegmentError, read_segment};
use crate::core::{Limits, ReplayStats, SegmentName, ShardId};
use crate::db::ShardedStore;

use super::ReplayError;
use super::marks::HighWaterMarks;
use super::processor::EntryProcessor;

/// Replays acknowledged-but-unflushed commit-log entries into the live
/// tables at start-up.
///
/// Construction computes the high-water marks (what is already durable);
/// `recover` then applies exactly the entries strictly above them.
pub struct Replayer {
    store: Arc<ShardedStore>,
    marks: HighWaterMarks,
    limits: Limits,
}

impl Replayer {
    /// Build the high-water marks from the store's durable state and return
    /// a ready replayer.
    pub fn create(store: Arc<ShardedStore>) -> Result<Self, ReplayError> {
        Self::create_with_limits(store, Limits::default())
    }

    pub fn create_with_limits(
        store: Arc<ShardedStore>,
        limits: Limits,
    ) -> Result<Self, ReplayError> {
        let marks = HighWaterMarks::build(&store)?;
        Ok(Self {
            store,
            marks,
            limits,
        })
    }

    pub fn marks(&self) -> &HighWaterMarks {
        &self.marks
    }

    /// Replay a set of segment files.
    ///
    /// Files are bucketed by originating shard (mod the current shard count,
    /// which remaps historical shards after a re-shard) and each bucket is
    /// processed serially to limit apply congestion; buckets run
    /// concurrently. Per-entry errors and segment corruption are absorbed
    /// into the returned statistics; segment-name parse failures,
    /// non-corruption I/O errors and teardown failures are fatal.
    pub fn recover(&self, files: &[PathBuf]) -> Result<ReplayStats, ReplayError> {
        info!(
            "replaying {}",
            files
                .iter()
                .map(|f| f.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut buckets: BTreeMap<ShardId, Vec<(SegmentName, PathBuf)>> = BTreeMap::new();
        for file in files {
            let name = SegmentName::parse(file).map_err(|source| ReplayError::SegmentName {
                path: file.clone(),
                source,
            })?;
            buckets
                .entry(bucket_for(name, self.store.shard_count()))
                .or_default()
                .push((name, file.clone()));
        }

        self.store.begin_replay()?;
        let results: Vec<Result<ReplayStats, ReplayError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = buckets
                .into_values()
                .map(|bucket| scope.spawn(move || self.recover_bucket(bucket)))
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });
        let teardown = self.store.end_replay();

        let mut total = ReplayStats::default();
        let mut failure = None;
        for result in results {
            match result {
                Ok(stats) => total += stats,
                Err(err) => failure = failure.or(Some(err)),
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }
        teardown?;

        info!("log replay complete, {total}");
        Ok(total)
    }

    /// Replay a single segment file.
    pub fn recover_one(&self, file: &Path) -> Result<ReplayStats, ReplayError> {
        self.recover(&[file.to_path_buf()])
    }

    /// Replay one bucket's files serially, in no particular inter-file
    /// order.
    fn recover_bucket(
        &self,
        files: Vec<(SegmentName, PathBuf)>,
    ) -> Result<ReplayStats, ReplayError> {
        let mut processor = EntryProcessor::new(self.store.as_ref(), &self.marks, &self.limits);
        let mut total = ReplayStats::default();

        for (name, path) in files {
            let min = self.marks.min_position(name.shard());
            if name.id() < min.id() {
                debug!(file = %path.display(), "skipping replay of fully flushed segment");
                continue;
            }
            let start = if name.id() == min.id() { min.pos() } else { 0 };

            debug!(file = %path.display(), start, "replaying segment");
            let outcome = read_segment(&path, start, &self.limits, |buf, position| {
                processor.process(&buf, position);
                Ok(())
            });
            let mut stats = processor.take_stats();
            match outcome {
                Ok(()) => {}
                Err(SegmentError::DataCorruption { bytes, .. }) => {
                    warn!(file = %path.display(), bytes, "corrupted segment file, bytes skipped");
                    stats.corrupt_bytes += bytes;
                }
                Err(err) => return Err(err.into()),
            }
            debug!(file = %path.display(), "segment replay complete, {stats}");
            total += stats;
        }
        Ok(total)
    }
}

/// The shard a segment file's replay work runs on. Historical shards are
/// remapped round-robin onto the current shard set.
fn bucket_for(name: SegmentName, shard_count: u32) -> ShardId {
    ShardId::new(name.shard().get() % shard_count)
}
