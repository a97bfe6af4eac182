//! Commit-log entry encoding/decoding.
//!
//! An entry is a frozen mutation plus, when the writer cannot assume the
//! reader knows the schema version, an embedded column mapping. Layout is
//! little-endian with a leading version word and a flags word; unknown flag
//! bits are rejected.

use bytes::Bytes;
use thiserror::Error;
use uuid::Uuid;

use crate::core::{
    Cell, ColumnMapping, DecoratedKey, FrozenMutation, Limits, PartitionUpdate, SchemaVersion,
    TableId,
};

const ENTRY_VERSION: u16 = 1;

const FLAG_HAS_MAPPING: u16 = 1 << 0;

/// A decoded commit-log entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitlogEntry {
    pub mutation: FrozenMutation,
    pub mapping: Option<ColumnMapping>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EntryEncodeError {
    #[error("encoded entry exceeds u32 length ({got} bytes)")]
    EntryTooLarge { got: usize },
    #[error("partition key exceeds u16 length ({got} bytes)")]
    KeyTooLarge { got: usize },
    #[error("cell value exceeds u32 length ({got} bytes)")]
    ValueTooLarge { got: usize },
    #[error("too many cells for one entry ({got})")]
    TooManyCells { got: usize },
    #[error("too many mapping columns ({got})")]
    TooManyColumns { got: usize },
    #[error("mapping column name exceeds u16 length ({got} bytes)")]
    ColumnNameTooLarge { got: usize },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EntryDecodeError {
    #[error("unsupported entry version {got}")]
    UnsupportedVersion { got: u16 },
    #[error("unknown entry flags bits {bits:#x}")]
    UnknownFlags { bits: u16 },
    #[error("entry truncated reading {what}")]
    Truncated { what: &'static str },
    #[error("partition key empty")]
    EmptyKey,
    #[error("partition key of {got} bytes exceeds limit {max}")]
    KeyTooLarge { got: usize, max: usize },
    #[error("{got} cells exceed limit {max}")]
    TooManyCells { got: usize, max: usize },
    #[error("{got} mapping columns exceed limit {max}")]
    TooManyColumns { got: usize, max: usize },
    #[error("mapping column name is not utf-8")]
    ColumnNameNotUtf8,
    #[error("{extra} trailing bytes after entry")]
    TrailingBytes { extra: usize },
}

impl CommitlogEntry {
    pub fn new(mutation: FrozenMutation, mapping: Option<ColumnMapping>) -> Self {
        Self { mutation, mapping }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EntryEncodeError> {
        let m = &self.mutation;
        let key = m.key.key();
        let key_len =
            u16::try_from(key.len()).map_err(|_| EntryEncodeError::KeyTooLarge { got: key.len() })?;
        let cell_count = u32::try_from(m.partition.len())
            .map_err(|_| EntryEncodeError::TooManyCells {
                got: m.partition.len(),
            })?;

        let mut flags = 0u16;
        if self.mapping.is_some() {
            flags |= FLAG_HAS_MAPPING;
        }

        let mut buf = Vec::with_capacity(64 + key.len());
        buf.extend_from_slice(&ENTRY_VERSION.to_le_bytes());
        buf.extend_from_slice(&flags.to_le_bytes());
        buf.extend_from_slice(m.table.as_uuid().as_bytes());
        buf.extend_from_slice(m.schema_version.as_uuid().as_bytes());
        buf.extend_from_slice(&key_len.to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&cell_count.to_le_bytes());
        for cell in m.partition.cells() {
            let value_len = u32::try_from(cell.value.len()).map_err(|_| {
                EntryEncodeError::ValueTooLarge {
                    got: cell.value.len(),
                }
            })?;
            buf.extend_from_slice(&cell.column.to_le_bytes());
            buf.extend_from_slice(&cell.timestamp.to_le_bytes());
            buf.extend_from_slice(&value_len.to_le_bytes());
            buf.extend_from_slice(&cell.value);
        }

        if let Some(mapping) = &self.mapping {
            let count = u16::try_from(mapping.len())
                .map_err(|_| EntryEncodeError::TooManyColumns { got: mapping.len() })?;
            buf.extend_from_slice(&count.to_le_bytes());
            for name in mapping.columns() {
                let name_len = u16::try_from(name.len()).map_err(|_| {
                    EntryEncodeError::ColumnNameTooLarge { got: name.len() }
                })?;
                buf.extend_from_slice(&name_len.to_le_bytes());
                buf.extend_from_slice(name.as_bytes());
            }
        }

        Ok(buf)
    }

    pub fn decode(buf: &[u8], limits: &Limits) -> Result<Self, EntryDecodeError> {
        let mut off = 0usize;

        let version = read_u16(buf, &mut off, "entry version")?;
        if version != ENTRY_VERSION {
            return Err(EntryDecodeError::UnsupportedVersion { got: version });
        }
        let flags = read_u16(buf, &mut off, "entry flags")?;
        if flags & !FLAG_HAS_MAPPING != 0 {
            return Err(EntryDecodeError::UnknownFlags { bits: flags });
        }

        let table = TableId::new(read_uuid(buf, &mut off, "table id")?);
        let schema_version = SchemaVersion::new(read_uuid(buf, &mut off, "schema version")?);

        let key_len = read_u16(buf, &mut off, "key length")? as usize;
        if key_len == 0 {
            return Err(EntryDecodeError::EmptyKey);
        }
        if key_len > limits.max_key_bytes {
            return Err(EntryDecodeError::KeyTooLarge {
                got: key_len,
                max: limits.max_key_bytes,
            });
        }
        let key = take(buf, &mut off, key_len, "partition key")?;

        let cell_count = read_u32(buf, &mut off, "cell count")? as usize;
        if cell_count > limits.max_cells_per_entry {
            return Err(EntryDecodeError::TooManyCells {
                got: cell_count,
                max: limits.max_cells_per_entry,
            });
        }
        let mut cells = Vec::with_capacity(cell_count);
        for _ in 0..cell_count {
            let column = read_u16(buf, &mut off, "cell column")?;
            let timestamp = read_u64(buf, &mut off, "cell timestamp")?;
            let value_len = read_u32(buf, &mut off, "cell value length")? as usize;
            let value = take(buf, &mut off, value_len, "cell value")?;
            cells.push(Cell {
                column,
                timestamp,
                value: Bytes::copy_from_slice(value),
            });
        }

        let mapping = if flags & FLAG_HAS_MAPPING != 0 {
            let count = read_u16(buf, &mut off, "mapping column count")? as usize;
            if count > limits.max_mapping_columns {
                return Err(EntryDecodeError::TooManyColumns {
                    got: count,
                    max: limits.max_mapping_columns,
                });
            }
            let mut columns = Vec::with_capacity(count);
            for _ in 0..count {
                let name_len = read_u16(buf, &mut off, "mapping column name length")? as usize;
                let raw = take(buf, &mut off, name_len, "mapping column name")?;
                let name = std::str::from_utf8(raw)
                    .map_err(|_| EntryDecodeError::ColumnNameNotUtf8)?;
                columns.push(name.to_string());
            }
            Some(ColumnMapping::new(columns))
        } else {
            None
        };

        if off != buf.len() {
            return Err(EntryDecodeError::TrailingBytes {
                extra: buf.len() - off,
            });
        }

        Ok(Self {
            mutation: FrozenMutation {
                table,
                schema_version,
                key: DecoratedKey::new(Bytes::copy_from_slice(key)),
                partition: PartitionUpdate::new(cells),
            },
            mapping,
        })
    }
}

fn take<'a>(
    buf: &'a [u8],
    off: &mut usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], EntryDecodeError> {
    let end = off
        .checked_add(len)
        .filter(|end| *end <= buf.len())
        .ok_or(EntryDecodeError::Truncated { what })?;
    let slice = &buf[*off..end];
    *off = end;
    Ok(slice)
}

fn read_u16(buf: &[u8], off: &mut usize, what: &'static str) -> Result<u16, EntryDecodeError> {
    let raw = take(buf, off, 2, what)?;
    Ok(u16::from_le_bytes([raw[0], raw[1]]))
}

fn read_u32(buf: &[u8], off: &mut usize, what: &'static str) -> Result<u32, EntryDecodeError> {
    let raw = take(buf, off, 4, what)?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn read_u64(buf: &[u8], off: &mut usize, what: &'static str) -> Result<u64, EntryDecodeError> {
    let raw = take(buf, off, 8, what)?;
    Ok(u64::from_le_bytes([
        raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
    ]))
}

fn read_uuid(buf: &[u8], off: &mut usize, what: &'static str) -> Result<Uuid, EntryDecodeError> {
    let raw = take(buf, off, 16, what)?;
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(raw);
    Ok(Uuid::from_bytes(bytes))
}
