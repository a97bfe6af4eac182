//! Streaming segment reader.
//!
//! Frames are `magic + length + crc32c` followed by the entry body. A body
//! checksum failure condemns just that frame and the scan continues at the
//! next one; broken framing (bad magic, bad length, truncated tail) condemns
//! the rest of the file. Condemned bytes are reported through
//! `SegmentError::DataCorruption` once the scan is finished.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Bytes;
use crc32c::crc32c;
use tracing::trace;

use crate::core::{Limits, ReplayPosition, SegmentName};

use super::SegmentError;
use super::segment::{ENTRY_MAGIC, FRAME_HEADER_LEN, SEGMENT_HEADER_LEN, SegmentHeader};

/// Stream framed entries from `path` in file order, starting at
/// `start_offset`, invoking `on_entry(body, position)` once per entry.
pub fn read_segment<F>(
    path: &Path,
    start_offset: u64,
    limits: &Limits,
    mut on_entry: F,
) -> Result<(), SegmentError>
where
    F: FnMut(Bytes, ReplayPosition) -> Result<(), SegmentError>,
{
    let io_err = |source| SegmentError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = OpenOptions::new().read(true).open(path).map_err(io_err)?;
    let file_len = file.metadata().map_err(io_err)?.len();

    let mut header_bytes = [0u8; SEGMENT_HEADER_LEN];
    file.read_exact(&mut header_bytes).map_err(io_err)?;
    let header = SegmentHeader::decode(&header_bytes).map_err(|reason| SegmentError::Header {
        path: path.to_path_buf(),
        reason,
    })?;
    if let Ok(name) = SegmentName::parse(path)
        && name != header.name()
    {
        return Err(SegmentError::Header {
            path: path.to_path_buf(),
            reason: format!("header identifies {}, file name says {}", header.name(), name),
        });
    }

    let mut offset = start_offset.max(SEGMENT_HEADER_LEN as u64);
    file.seek(SeekFrom::Start(offset)).map_err(io_err)?;

    let mut corrupt_bytes = 0u64;
    while offset < file_len {
        let remaining = file_len - offset;
        if remaining < FRAME_HEADER_LEN as u64 {
            corrupt_bytes += remaining;
            break;
        }

        let mut frame_header = [0u8; FRAME_HEADER_LEN];
        file.read_exact(&mut frame_header).map_err(io_err)?;
        let magic = u32::from_le_bytes([
            frame_header[0],
            frame_header[1],
            frame_header[2],
            frame_header[3],
        ]);
        let length = u32::from_le_bytes([
            frame_header[4],
            frame_header[5],
            frame_header[6],
            frame_header[7],
        ]);
        let expected_crc = u32::from_le_bytes([
            frame_header[8],
            frame_header[9],
            frame_header[10],
            frame_header[11],
        ]);

        // Framing we cannot trust condemns everything after it.
        if magic != ENTRY_MAGIC || length == 0 || length as usize > limits.max_entry_bytes {
            corrupt_bytes += remaining;
            break;
        }
        let frame_len = FRAME_HEADER_LEN as u64 + length as u64;
        if frame_len > remaining {
            corrupt_bytes += remaining;
            break;
        }

        let mut body = vec![0u8; length as usize];
        file.read_exact(&mut body).map_err(io_err)?;

        let actual_crc = crc32c(&body);
        if actual_crc != expected_crc {
            trace!(
                file = %path.display(),
                offset,
                "entry checksum mismatch, condemning {frame_len} bytes"
            );
            corrupt_bytes += frame_len;
            offset += frame_len;
            continue;
        }

        on_entry(
            Bytes::from(body),
            ReplayPosition::new(header.shard, header.id, offset),
        )?;
        offset += frame_len;
    }

    if corrupt_bytes > 0 {
        return Err(SegmentError::DataCorruption {
            path: path.to_path_buf(),
            bytes: corrupt_bytes,
        });
    }
    Ok(())
}
