//! Produced prediction file parsing
//!
//! A produced file is RFC 4180 CSV with the header `index,<target>`. The
//! index may arrive as a float and is rounded to an integer; cell values
//! are kept verbatim (they may encode nested arrays, parsed lazily via
//! [`complex::parse_complex_value`]).

pub mod complex;

pub use complex::{parse_complex_value, ComplexValue};

use std::fs::File;
use std::path::Path;

use tracing::warn;

use distil_common::{Error, Result};

/// One parsed prediction row.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub row_index: i64,
    /// Raw cell text, preserved verbatim for lazy downstream parsing.
    pub value: String,
}

/// A fully parsed produced file.
#[derive(Debug, Clone)]
pub struct ResultFile {
    /// Target name from the header row.
    pub target_name: String,
    pub rows: Vec<ResultRow>,
}

/// Streaming reader over a produced file: rows accumulate into an internal
/// batch that the caller drains at its chosen size, with a final flush for
/// the remainder.
pub struct ResultReader<R: std::io::Read> {
    reader: csv::Reader<R>,
    target_name: String,
    batch: Vec<ResultRow>,
}

impl ResultReader<File> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::Storage(format!("unable to open result file {path:?}: {e}")))?;
        Self::from_reader(file)
    }
}

impl<R: std::io::Read> ResultReader<R> {
    pub fn from_reader(raw: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::Fields)
            .from_reader(raw);

        let headers = reader
            .headers()
            .map_err(|e| Error::Storage(format!("unable to read result header: {e}")))?
            .clone();
        if headers.len() < 2 {
            return Err(Error::Storage(format!(
                "result header has {} columns, expected 2",
                headers.len()
            )));
        }
        if headers.len() > 2 {
            warn!(
                columns = headers.len(),
                "result contains more than 2 columns, extras will be ignored"
            );
        }
        let target_name = headers.get(1).unwrap_or_default().to_string();

        Ok(ResultReader {
            reader,
            target_name,
            batch: Vec::new(),
        })
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    /// Reads up to `batch_size` further rows into the batch and returns it
    /// when full; returns the remainder once the file is exhausted, then
    /// `None`.
    pub fn next_batch(&mut self, batch_size: usize) -> Result<Option<Vec<ResultRow>>> {
        let mut record = csv::StringRecord::new();
        loop {
            let more = self
                .reader
                .read_record(&mut record)
                .map_err(|e| Error::Storage(format!("error parsing result file: {e}")))?;
            if !more {
                return if self.batch.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(std::mem::take(&mut self.batch)))
                };
            }
            if record.is_empty() {
                continue;
            }
            let raw_index = record.get(0).unwrap_or_default();
            let row_index = parse_row_index(raw_index)?;
            let value = record.get(1).unwrap_or_default().to_string();
            self.batch.push(ResultRow { row_index, value });
            if self.batch.len() >= batch_size {
                return Ok(Some(std::mem::take(&mut self.batch)));
            }
        }
    }
}

/// Some runtimes emit the integer index as a float; tolerate and round.
fn parse_row_index(raw: &str) -> Result<i64> {
    if let Ok(v) = raw.parse::<i64>() {
        return Ok(v);
    }
    raw.parse::<f64>()
        .map(|v| v.round() as i64)
        .map_err(|e| Error::Storage(format!("failed to parse result index `{raw}`: {e}")))
}

/// Parses a complete produced file into memory.
pub fn parse_result_file(path: &Path) -> Result<ResultFile> {
    let mut reader = ResultReader::open(path)?;
    let target_name = reader.target_name().to_string();
    let mut rows = Vec::new();
    while let Some(batch) = reader.next_batch(1024)? {
        rows.extend(batch);
    }
    Ok(ResultFile { target_name, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_simple_result() {
        let file = write_temp("index,species\n0,setosa\n1,virginica\n");
        let parsed = parse_result_file(file.path()).unwrap();
        assert_eq!(parsed.target_name, "species");
        assert_eq!(
            parsed.rows,
            vec![
                ResultRow { row_index: 0, value: "setosa".into() },
                ResultRow { row_index: 1, value: "virginica".into() },
            ]
        );
    }

    #[test]
    fn float_indices_round_to_integers() {
        let file = write_temp("index,price\n41.0,10.5\n42.0,11.5\n");
        let parsed = parse_result_file(file.path()).unwrap();
        assert_eq!(parsed.rows[0].row_index, 41);
        assert_eq!(parsed.rows[1].row_index, 42);
    }

    #[test]
    fn nested_array_cell_is_kept_verbatim() {
        let file = write_temp("index,species\n42,\"[[0.1,0.9],[0.2,0.8]]\"\n");
        let parsed = parse_result_file(file.path()).unwrap();
        assert_eq!(parsed.rows[0].row_index, 42);
        assert_eq!(parsed.rows[0].value, "[[0.1,0.9],[0.2,0.8]]");

        // lazy parse yields the 2x2 structure
        let complex = parse_complex_value(&parsed.rows[0].value).unwrap();
        match complex {
            ComplexValue::Array(rows) => {
                assert_eq!(rows.len(), 2);
            }
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn crlf_terminated_rows_parse() {
        let file = write_temp("index,species\r\n0,setosa\r\n");
        let parsed = parse_result_file(file.path()).unwrap();
        assert_eq!(parsed.rows.len(), 1);
    }

    #[test]
    fn batches_drain_with_final_flush() {
        let file = write_temp("index,t\n0,a\n1,b\n2,c\n3,d\n4,e\n");
        let mut reader = ResultReader::open(file.path()).unwrap();
        let first = reader.next_batch(2).unwrap().unwrap();
        assert_eq!(first.len(), 2);
        let second = reader.next_batch(2).unwrap().unwrap();
        assert_eq!(second.len(), 2);
        let flush = reader.next_batch(2).unwrap().unwrap();
        assert_eq!(flush.len(), 1);
        assert!(reader.next_batch(2).unwrap().is_none());
    }

    #[test]
    fn single_column_file_is_rejected() {
        let file = write_temp("index\n0\n");
        assert!(ResultReader::open(file.path()).is_err());
    }
}
