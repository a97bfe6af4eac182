//! Table identity and schema values.
//!
//! TableId: column-family identifier, stable across restarts
//! SchemaVersion: opaque version stamp; versions are equal or unrelated
//! ColumnMapping: ordered column names of one schema version
//! Schema: the current shape of a table

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Column-family (table) identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(Uuid);

impl TableId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableId({})", self.0)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque schema version stamp.
///
/// Two versions are either equal or unrelated; no ordering exists, so this
/// type is hash-keyed only.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaVersion(Uuid);

impl SchemaVersion {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchemaVersion({})", self.0)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered column names of one schema version.
///
/// Commit-log cells reference columns by position, so a mapping is what lets
/// a mutation written under one version be rebound to another: position in
/// the source mapping gives the column name, the name gives the position in
/// the target schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    columns: Vec<String>,
}

impl ColumnMapping {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn name_of(&self, column: u16) -> Option<&str> {
        self.columns.get(column as usize).map(String::as_str)
    }

    pub fn position_of(&self, name: &str) -> Option<u16> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| i as u16)
    }
}

/// Current shape of a live table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    table: TableId,
    version: SchemaVersion,
    columns: Vec<String>,
}

impl Schema {
    pub fn new(table: TableId, version: SchemaVersion, columns: Vec<String>) -> Self {
        Self {
            table,
            version,
            columns,
        }
    }

    pub fn table(&self) -> TableId {
        self.table
    }

    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_name(&self, column: u16) -> Option<&str> {
        self.columns.get(column as usize).map(String::as_str)
    }

    pub fn column_index(&self, name: &str) -> Option<u16> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| i as u16)
    }

    /// The schema's own column mapping, as embedded in commit-log entries.
    pub fn mapping(&self) -> ColumnMapping {
        ColumnMapping::new(self.columns.clone())
    }
}
