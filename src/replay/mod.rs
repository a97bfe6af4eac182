//! Commit-log replay: high-water marks, entry processing, orchestration.

use std::path::PathBuf;

use thiserror::Error;

use crate::commitlog::SegmentError;
use crate::core::SegmentNameError;
use crate::db::StoreError;

pub mod marks;
pub mod processor;
pub mod replayer;

pub use marks::HighWaterMarks;
pub use replayer::Replayer;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Segment(#[from] SegmentError),
    #[error("unrecognized segment file name {path:?}: {source}")]
    SegmentName {
        path: PathBuf,
        #[source]
        source: SegmentNameError,
    },
}
