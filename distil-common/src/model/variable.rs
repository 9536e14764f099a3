//! Dataset and variable catalogue records

use serde::{Deserialize, Serialize};

use super::types;

/// Role marker distinguishing user data columns from generated metadata
/// columns and the reserved index column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableRole {
    /// A user-visible data column.
    Data,
    /// A generated cluster/feature column; never a valid target.
    Metadata,
    /// The reserved row-identity column, unique integer per row.
    Index,
}

/// A single column of a dataset as recorded in the metadata catalogue.
///
/// `ty` is the current semantic type; `original_type` the type inferred at
/// ingest time. The two differ once the user reassigns a type, and the
/// preprocessing pipeline reconciles the runtime's view from that delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub key: String,
    #[serde(rename = "label")]
    pub display_label: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(rename = "originalType")]
    pub original_type: String,
    /// Ranked importance in [0,1].
    pub importance: f64,
    pub role: VariableRole,
}

impl Variable {
    pub fn is_index(&self) -> bool {
        self.role == VariableRole::Index || self.key == types::ROW_INDEX_KEY
    }

    /// Whether this is a generated cluster/feature companion column.
    pub fn is_generated(&self) -> bool {
        self.role == VariableRole::Metadata
    }
}

/// Origin of a dataset in the catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetSource {
    Seed,
    Contrib,
    Augmented,
}

/// A dataset as recorded in the metadata catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    /// Backing table name; see [`types::normalize_storage_name`].
    #[serde(rename = "storageName")]
    pub storage_name: String,
    pub folder: String,
    pub source: DatasetSource,
    #[serde(rename = "numRows")]
    pub num_rows: i64,
    #[serde(rename = "numBytes")]
    pub num_bytes: i64,
    /// Catalogue insertion order; used as the canonical column order.
    pub variables: Vec<Variable>,
    /// Which backing produced this record (primary catalogue, staging
    /// folder, ...). Every gateway must tag it.
    pub provenance: String,
}

impl Dataset {
    pub fn variable(&self, key: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.key == key)
    }
}
