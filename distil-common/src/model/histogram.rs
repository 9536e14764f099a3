//! Histogram results for variable and result summaries

use serde::{Deserialize, Serialize};

use crate::model::extrema::Extrema;

/// Category of a correct prediction in a correctness histogram.
pub const CORRECT_CATEGORY: &str = "correct";
/// Category of an incorrect prediction in a correctness histogram.
pub const INCORRECT_CATEGORY: &str = "incorrect";

/// A single histogram bucket. For numeric histograms the key is the lower
/// bucket edge rendered as a number; for terms histograms it is the term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub key: String,
    pub count: i64,
}

/// Summary histogram of a single variable, result column or residual.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Histogram {
    pub label: String,
    pub key: String,
    /// `numerical` or `categorical`; drives client rendering.
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(rename = "varType")]
    pub var_type: String,
    pub dataset: String,
    pub buckets: Vec<Bucket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extrema: Option<Extrema>,
    #[serde(rename = "numRows")]
    pub num_rows: i64,
}

impl Histogram {
    /// Empty histogram with the empty-extrema marker, returned when an
    /// extrema query found no data.
    pub fn empty(label: &str, key: &str, ty: &str, var_type: &str, dataset: &str) -> Self {
        Histogram {
            label: label.to_string(),
            key: key.to_string(),
            ty: ty.to_string(),
            var_type: var_type.to_string(),
            dataset: dataset.to_string(),
            buckets: Vec::new(),
            extrema: None,
            num_rows: 0,
        }
    }
}
