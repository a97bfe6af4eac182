//! Frozen mutations and cross-version partition projection.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::table::{ColumnMapping, Schema, SchemaVersion, TableId};

/// Partition routing token, derived from the partition key bytes.
///
/// The token alone decides the owning shard; it is recomputed on decode, not
/// carried on the wire.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Token(u64);

impl Token {
    pub fn of(key: &[u8]) -> Self {
        let digest = Sha256::digest(key);
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        Self(u64::from_le_bytes(word))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Partition key together with its routing token.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DecoratedKey {
    token: Token,
    key: Bytes,
}

impl DecoratedKey {
    pub fn new(key: Bytes) -> Self {
        let token = Token::of(&key);
        Self { token, key }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }
}

impl fmt::Debug for DecoratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DecoratedKey({}, {:?})", self.token, self.key)
    }
}

/// One column write within a partition update.
///
/// `column` is a position in the column mapping of the schema version the
/// mutation was serialized under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cell {
    pub column: u16,
    pub timestamp: u64,
    pub value: Bytes,
}

/// The body of a mutation: a flat list of cell writes for one partition.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartitionUpdate {
    cells: Vec<Cell>,
}

impl PartitionUpdate {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// A serialized, schema-stamped write for one partition of one table.
/// Immutable once decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrozenMutation {
    pub table: TableId,
    pub schema_version: SchemaVersion,
    pub key: DecoratedKey,
    pub partition: PartitionUpdate,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("cell column {column} outside column mapping of {columns} columns")]
    MappingOutOfRange { column: u16, columns: usize },
    #[error("cell column {column} outside schema {version} with {columns} columns")]
    ColumnOutOfRange {
        column: u16,
        version: SchemaVersion,
        columns: usize,
    },
}

/// Project a partition written under `source` into the shape of `live`.
///
/// Cell positions are rebound by column name. Cells naming a column the live
/// schema no longer has are dropped; cells outside the source mapping are an
/// error (the mutation and its mapping disagree).
pub fn project_partition(
    source: &ColumnMapping,
    live: &Schema,
    partition: &PartitionUpdate,
) -> Result<PartitionUpdate, ApplyError> {
    let mut cells = Vec::with_capacity(partition.len());
    for cell in partition.cells() {
        let name = source
            .name_of(cell.column)
            .ok_or(ApplyError::MappingOutOfRange {
                column: cell.column,
                columns: source.len(),
            })?;
        if let Some(column) = live.column_index(name) {
            cells.push(Cell {
                column,
                timestamp: cell.timestamp,
                value: cell.value.clone(),
            });
        }
    }
    Ok(PartitionUpdate::new(cells))
}
