//! Segment writer: header then framed entries.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crc32c::crc32c;

use crate::core::{ReplayPosition, SegmentName};

use super::SegmentError;
use super::entry::CommitlogEntry;
use super::segment::{ENTRY_MAGIC, FRAME_HEADER_LEN, SegmentHeader};

/// Appends framed entries to a fresh segment file.
#[derive(Debug)]
pub struct SegmentWriter {
    file: File,
    path: PathBuf,
    name: SegmentName,
    offset: u64,
}

impl SegmentWriter {
    /// Create `commitlog-<shard>-<id>.log` in `dir` and write its header.
    pub fn create(dir: &Path, name: SegmentName) -> Result<Self, SegmentError> {
        let path = dir.join(name.file_name());
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| SegmentError::Io { path, source }
        };

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(io_err(&path))?;
        let header = SegmentHeader::new(name).encode();
        file.write_all(&header).map_err(io_err(&path))?;

        Ok(Self {
            offset: header.len() as u64,
            file,
            path,
            name,
        })
    }

    /// Append one entry, returning its replay position.
    pub fn append(&mut self, entry: &CommitlogEntry) -> Result<ReplayPosition, SegmentError> {
        let body = entry.encode()?;
        let length = u32::try_from(body.len()).map_err(|_| {
            SegmentError::Entry(super::entry::EntryEncodeError::EntryTooLarge { got: body.len() })
        })?;
        let crc = crc32c(&body);

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
        frame.extend_from_slice(&ENTRY_MAGIC.to_le_bytes());
        frame.extend_from_slice(&length.to_le_bytes());
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&body);

        self.file.write_all(&frame).map_err(|source| SegmentError::Io {
            path: self.path.clone(),
            source,
        })?;

        let position = ReplayPosition::new(self.name.shard(), self.name.id(), self.offset);
        self.offset += frame.len() as u64;
        Ok(position)
    }

    pub fn sync(&mut self) -> Result<(), SegmentError> {
        self.file.sync_all().map_err(|source| SegmentError::Io {
            path: self.path.clone(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}
