//! Train/test artefact persistence
//!
//! Writes the filtered row set as two CSV artefacts under the request's
//! scratch partition using a fixed 0.9 split ratio. Rows arrive ordered by
//! the index column, so the split is deterministic.

use std::path::{Path, PathBuf};

use distil_common::model::FilteredData;
use distil_common::{Error, Result};

/// Fraction of rows written to the train split.
const TRAIN_TEST_SPLIT_THRESHOLD: f64 = 0.9;

/// Absolute `file://` URIs of the persisted train and test splits.
pub struct SplitUris {
    pub train: String,
    pub test: String,
}

/// Writes `<scratch>/<request_id>/{train,test}/dataset_{TRAIN,TEST}/tables/
/// learningData.csv` and returns their URIs. Scratch partitions are per
/// request, so concurrent requests never collide.
pub fn persist_train_test(
    scratch: &Path,
    request_id: &str,
    data: &FilteredData,
) -> Result<SplitUris> {
    let base = scratch.join(request_id);
    let train_path = base
        .join("train")
        .join("dataset_TRAIN")
        .join("tables")
        .join("learningData.csv");
    let test_path = base
        .join("test")
        .join("dataset_TEST")
        .join("tables")
        .join("learningData.csv");

    let split_at = (data.values.len() as f64 * TRAIN_TEST_SPLIT_THRESHOLD).ceil() as usize;
    write_csv(&train_path, data, 0, split_at)?;
    write_csv(&test_path, data, split_at, data.values.len())?;

    Ok(SplitUris {
        train: file_uri(&train_path)?,
        test: file_uri(&test_path)?,
    })
}

fn write_csv(path: &PathBuf, data: &FilteredData, from: usize, to: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| Error::Storage(format!("unable to create split file {path:?}: {e}")))?;

    let header: Vec<&str> = data.columns.iter().map(|c| c.key.as_str()).collect();
    writer
        .write_record(&header)
        .map_err(|e| Error::Storage(format!("unable to write split header: {e}")))?;

    for row in &data.values[from..to] {
        let record: Vec<String> = row.iter().map(render_cell).collect();
        writer
            .write_record(&record)
            .map_err(|e| Error::Storage(format!("unable to write split row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| Error::Storage(format!("unable to flush split file: {e}")))?;
    Ok(())
}

fn render_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn file_uri(path: &Path) -> Result<String> {
    let absolute = std::fs::canonicalize(path)?;
    Ok(format!("file://{}", absolute.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use distil_common::model::Column;
    use distil_common::model::types::{CATEGORICAL_TYPE, INTEGER_TYPE, ROW_INDEX_KEY};

    fn sample_data(rows: usize) -> FilteredData {
        FilteredData {
            num_rows: rows as i64,
            columns: vec![
                Column {
                    label: "species".into(),
                    key: "species".into(),
                    ty: CATEGORICAL_TYPE.into(),
                },
                Column {
                    label: ROW_INDEX_KEY.into(),
                    key: ROW_INDEX_KEY.into(),
                    ty: INTEGER_TYPE.into(),
                },
            ],
            values: (0..rows)
                .map(|i| vec![serde_json::json!("setosa"), serde_json::json!(i)])
                .collect(),
        }
    }

    #[test]
    fn splits_rows_at_fixed_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let uris = persist_train_test(dir.path(), "req-1", &sample_data(10)).unwrap();

        let train = std::fs::read_to_string(uris.train.trim_start_matches("file://")).unwrap();
        let test = std::fs::read_to_string(uris.test.trim_start_matches("file://")).unwrap();
        // header + 9 train rows, header + 1 test row
        assert_eq!(train.lines().count(), 10);
        assert_eq!(test.lines().count(), 2);
        assert!(train.starts_with("species,row_index"));
    }

    #[test]
    fn scratch_partitions_are_per_request(){
        let dir = tempfile::tempdir().unwrap();
        let a = persist_train_test(dir.path(), "req-a", &sample_data(4)).unwrap();
        let b = persist_train_test(dir.path(), "req-b", &sample_data(4)).unwrap();
        assert_ne!(a.train, b.train);
        assert!(a.train.contains("req-a"));
        assert!(b.train.contains("req-b"));
    }

    #[test]
    fn uris_are_absolute_file_uris() {
        let dir = tempfile::tempdir().unwrap();
        let uris = persist_train_test(dir.path(), "req-1", &sample_data(2)).unwrap();
        assert!(uris.train.starts_with("file:///"));
        assert!(uris.train.ends_with("train/dataset_TRAIN/tables/learningData.csv"));
        assert!(uris.test.ends_with("test/dataset_TEST/tables/learningData.csv"));
    }
}
