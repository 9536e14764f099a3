//! Filtered row-set results

use serde::{Deserialize, Serialize};

/// A projected column of a filtered fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub label: String,
    pub key: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// Rows matching a filtered fetch, deterministically ordered by the index
/// column. Values are typed per the column's semantic type where possible
/// and fall back to their raw text form otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilteredData {
    #[serde(rename = "numRows")]
    pub num_rows: i64,
    pub columns: Vec<Column>,
    pub values: Vec<Vec<serde_json::Value>>,
}

impl FilteredData {
    /// Empty result with the total row count preserved; the shape returned
    /// by an inverted fetch with no predicates.
    pub fn empty(num_rows: i64) -> Self {
        FilteredData {
            num_rows,
            columns: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Position of a column by key.
    pub fn column_index(&self, key: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.key == key)
    }
}
