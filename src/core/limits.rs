//! Decode and framing guard rails.

use serde::{Deserialize, Serialize};

const DEFAULT_MAX_ENTRY_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_MAX_CELLS_PER_ENTRY: usize = 64 * 1024;
const DEFAULT_MAX_KEY_BYTES: usize = 64 * 1024;
const DEFAULT_MAX_MAPPING_COLUMNS: usize = 4 * 1024;

/// Upper bounds enforced while decoding commit-log data.
///
/// Values are explicit about their units to avoid confusion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_entry_bytes: usize,
    pub max_cells_per_entry: usize,
    pub max_key_bytes: usize,
    pub max_mapping_columns: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            max_cells_per_entry: DEFAULT_MAX_CELLS_PER_ENTRY,
            max_key_bytes: DEFAULT_MAX_KEY_BYTES,
            max_mapping_columns: DEFAULT_MAX_MAPPING_COLUMNS,
        }
    }
}
