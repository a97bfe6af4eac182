//! Commit-log segment format: header, entry codec, reader, writer.

use std::path::PathBuf;

use thiserror::Error;

pub mod entry;
pub mod reader;
mod segment;
pub mod writer;

pub use entry::{CommitlogEntry, EntryDecodeError, EntryEncodeError};
pub use reader::read_segment;
pub use writer::SegmentWriter;

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid segment header at {path:?}: {reason}")]
    Header { path: PathBuf, reason: String },
    #[error("{bytes} corrupt bytes in segment {path:?}")]
    DataCorruption { path: PathBuf, bytes: u64 },
    #[error("entry encode failed: {0}")]
    Entry(#[from] EntryEncodeError),
}

impl SegmentError {
    /// Byte count carried by a data-corruption error.
    pub fn corrupt_bytes(&self) -> Option<u64> {
        match self {
            SegmentError::DataCorruption { bytes, .. } => Some(*bytes),
            _ => None,
        }
    }
}
