//! Staging-folder catalogue backing
//!
//! Scans an on-disk staging folder for datasets awaiting ingest. Each
//! subfolder holding `tables/learningData.csv` is surfaced as a dataset;
//! variables are synthesised from the CSV header with text types, so these
//! datasets are browsable but not yet searchable.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use distil_common::model::types::{normalize_storage_name, ROW_INDEX_KEY, INTEGER_TYPE, TEXT_TYPE};
use distil_common::model::variable::{Dataset, DatasetSource, Variable, VariableRole};
use distil_common::{Error, Result};

use crate::storage::MetadataStorage;

const PROVENANCE: &str = "staging";
const TABLE_FILE: &str = "tables/learningData.csv";

/// Metadata gateway over an on-disk staging folder.
pub struct FileMetadataStorage {
    root: PathBuf,
}

impl FileMetadataStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileMetadataStorage { root: root.into() }
    }

    fn dataset_path(&self, dataset_id: &str) -> PathBuf {
        self.root.join(dataset_id).join(TABLE_FILE)
    }

    fn load_dataset(&self, folder: &Path) -> Result<Dataset> {
        let id = folder
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let table = folder.join(TABLE_FILE);
        let variables = read_header_variables(&table)?;
        let num_bytes = std::fs::metadata(&table).map(|m| m.len() as i64).unwrap_or(0);

        Ok(Dataset {
            storage_name: normalize_storage_name(&id),
            folder: folder.display().to_string(),
            source: DatasetSource::Augmented,
            num_rows: 0,
            num_bytes,
            variables,
            provenance: PROVENANCE.to_string(),
            id,
        })
    }

    fn scan(&self) -> Result<Vec<Dataset>> {
        let mut datasets = Vec::new();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return Ok(datasets),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() && path.join(TABLE_FILE).exists() {
                datasets.push(self.load_dataset(&path)?);
            }
        }
        datasets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(datasets)
    }
}

fn read_header_variables(table: &Path) -> Result<Vec<Variable>> {
    let mut reader = csv::Reader::from_path(table)
        .map_err(|e| Error::Storage(format!("unable to open {table:?}: {e}")))?;
    let headers = reader
        .headers()
        .map_err(|e| Error::Storage(format!("unable to read header of {table:?}: {e}")))?;

    Ok(headers
        .iter()
        .map(|name| {
            let is_index = name == ROW_INDEX_KEY;
            Variable {
                key: name.to_string(),
                display_label: name.to_string(),
                ty: if is_index { INTEGER_TYPE } else { TEXT_TYPE }.to_string(),
                original_type: if is_index { INTEGER_TYPE } else { TEXT_TYPE }.to_string(),
                importance: 0.0,
                role: if is_index {
                    VariableRole::Index
                } else {
                    VariableRole::Data
                },
            }
        })
        .collect())
}

#[async_trait]
impl MetadataStorage for FileMetadataStorage {
    async fn fetch_dataset(&self, dataset_id: &str) -> Result<Dataset> {
        let path = self.root.join(dataset_id);
        if !self.dataset_path(dataset_id).exists() {
            return Err(Error::NoData(format!(
                "dataset `{dataset_id}` not found in staging folder"
            )));
        }
        self.load_dataset(&path)
    }

    async fn fetch_datasets(&self) -> Result<Vec<Dataset>> {
        self.scan()
    }

    async fn search_datasets(&self, terms: &str) -> Result<Vec<Dataset>> {
        let needle = terms.to_lowercase();
        Ok(self
            .scan()?
            .into_iter()
            .filter(|d| d.id.to_lowercase().contains(&needle))
            .collect())
    }

    async fn fetch_variables(
        &self,
        dataset_id: &str,
        include_index: bool,
        _include_meta: bool,
    ) -> Result<Vec<Variable>> {
        let dataset = self.fetch_dataset(dataset_id).await?;
        Ok(dataset
            .variables
            .into_iter()
            .filter(|v| include_index || v.role != VariableRole::Index)
            .collect())
    }

    async fn fetch_variable(&self, dataset_id: &str, key: &str) -> Result<Variable> {
        self.fetch_variables(dataset_id, true, true)
            .await?
            .into_iter()
            .find(|v| v.key == key)
            .ok_or_else(|| {
                Error::NoData(format!("variable `{key}` not found in `{dataset_id}`"))
            })
    }

    async fn set_data_type(&self, dataset_id: &str, key: &str, _ty: &str) -> Result<()> {
        Err(Error::InvalidRequest(format!(
            "staging dataset `{dataset_id}` must be ingested before retyping `{key}`"
        )))
    }

    fn provenance(&self) -> &str {
        PROVENANCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage_dataset(root: &Path, id: &str, header: &str) {
        let tables = root.join(id).join("tables");
        std::fs::create_dir_all(&tables).unwrap();
        std::fs::write(tables.join("learningData.csv"), format!("{header}\n")).unwrap();
    }

    #[tokio::test]
    async fn scans_staged_datasets_with_provenance() {
        let dir = tempfile::tempdir().unwrap();
        stage_dataset(dir.path(), "parcels", "row_index,address,price");
        stage_dataset(dir.path(), "weather", "row_index,station,temp");

        let storage = FileMetadataStorage::new(dir.path());
        let datasets = storage.fetch_datasets().await.unwrap();
        assert_eq!(datasets.len(), 2);
        assert_eq!(datasets[0].id, "parcels");
        assert_eq!(datasets[0].provenance, "staging");
        assert_eq!(datasets[0].variables.len(), 3);
        assert_eq!(datasets[0].variables[0].role, VariableRole::Index);
    }

    #[tokio::test]
    async fn search_filters_by_id() {
        let dir = tempfile::tempdir().unwrap();
        stage_dataset(dir.path(), "parcels", "row_index,price");
        let storage = FileMetadataStorage::new(dir.path());
        assert_eq!(storage.search_datasets("parc").await.unwrap().len(), 1);
        assert!(storage.search_datasets("nope").await.unwrap().is_empty());
    }
}
