//! Typed filter model
//!
//! The wire envelope carries filters as a tagged union; they are decoded
//! once at the HTTP/ws boundary into this enum and never re-inspected as
//! strings downstream. Filters compose conjunctively; include and exclude
//! on the same key combine as include ∩ ¬exclude.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::types::ROW_INDEX_KEY;
use crate::model::variable::Variable;

/// Default row cap applied when a request does not provide one.
pub const DEFAULT_FILTER_SIZE: i64 = 100;

const PREDICTED_SUFFIX: &str = ":predicted";
const ERROR_SUFFIX: &str = ":error";
const CORRECTNESS_SUFFIX: &str = ":correctness";
const TARGET_SUFFIX: &str = ":target";

/// Whether a filter admits or rejects matching rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Include,
    Exclude,
}

/// A single filter clause from the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Filter {
    Categorical {
        key: String,
        mode: FilterMode,
        categories: Vec<String>,
    },
    Numerical {
        key: String,
        mode: FilterMode,
        min: f64,
        max: f64,
    },
    Bivariate {
        key: String,
        mode: FilterMode,
        #[serde(rename = "minX")]
        min_x: f64,
        #[serde(rename = "maxX")]
        max_x: f64,
        #[serde(rename = "minY")]
        min_y: f64,
        #[serde(rename = "maxY")]
        max_y: f64,
    },
    Row {
        mode: FilterMode,
        indices: Vec<i64>,
    },
    Feature {
        key: String,
        mode: FilterMode,
        categories: Vec<String>,
    },
    Text {
        key: String,
        mode: FilterMode,
        categories: Vec<String>,
    },
}

impl Filter {
    pub fn mode(&self) -> FilterMode {
        match self {
            Filter::Categorical { mode, .. }
            | Filter::Numerical { mode, .. }
            | Filter::Bivariate { mode, .. }
            | Filter::Row { mode, .. }
            | Filter::Feature { mode, .. }
            | Filter::Text { mode, .. } => *mode,
        }
    }

    /// Key the filter applies to; row filters target the reserved index
    /// column.
    pub fn key(&self) -> &str {
        match self {
            Filter::Categorical { key, .. }
            | Filter::Numerical { key, .. }
            | Filter::Bivariate { key, .. }
            | Filter::Feature { key, .. }
            | Filter::Text { key, .. } => key,
            Filter::Row { .. } => ROW_INDEX_KEY,
        }
    }
}

/// Filter parameters for a fetch: projected variables, row cap, clauses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
}

impl FilterParams {
    pub fn new(size: i64) -> Self {
        FilterParams {
            size,
            variables: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// Validates every filter against the dataset's variables. Result-column
    /// keys (predicted/error/correctness) are synthesised downstream and are
    /// exempt from the lookup.
    pub fn validate(&self, variables: &[Variable]) -> Result<()> {
        for filter in &self.filters {
            let key = filter.key();
            if is_result_key(key) {
                continue;
            }
            if let Filter::Bivariate { key, .. } = filter {
                if key.split(':').count() > 2 {
                    return Err(Error::InvalidFilter(format!(
                        "bivariate key `{key}` has more than two components"
                    )));
                }
                // composite keys are validated component-wise
                if key.contains(':') {
                    for part in key.split(':') {
                        if !variables.iter().any(|v| v.key == part) {
                            return Err(Error::InvalidFilter(format!(
                                "unknown variable `{part}` referenced by bivariate filter"
                            )));
                        }
                    }
                    continue;
                }
            }
            if key != ROW_INDEX_KEY && !variables.iter().any(|v| v.key == key) {
                return Err(Error::InvalidFilter(format!(
                    "unknown variable `{key}` referenced by filter"
                )));
            }
        }
        Ok(())
    }
}

/// A single highlighted (key, value) pair. Converted to a virtual include
/// filter for summary queries; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighlightRoot {
    pub key: String,
    pub value: serde_json::Value,
}

impl HighlightRoot {
    /// Builds the virtual include filter for this highlight. Numeric values
    /// become a degenerate range, anything else a single-category filter.
    pub fn to_filter(&self) -> Filter {
        match &self.value {
            serde_json::Value::Number(n) => {
                let v = n.as_f64().unwrap_or(0.0);
                Filter::Numerical {
                    key: self.key.clone(),
                    mode: FilterMode::Include,
                    min: v,
                    max: v,
                }
            }
            other => Filter::Categorical {
                key: self.key.clone(),
                mode: FilterMode::Include,
                categories: vec![match other {
                    serde_json::Value::String(s) => s.clone(),
                    v => v.to_string(),
                }],
            },
        }
    }
}

/// Filters regrouped for result queries: generic clauses apply to the data
/// side of the join, the rest to the synthesised result columns.
#[derive(Debug, Default)]
pub struct SplitFilters {
    pub generic: Vec<Filter>,
    pub predicted: Option<Filter>,
    pub residual: Option<Filter>,
    pub correctness: Option<Filter>,
}

/// Synthesised column name carrying a solution's prediction for `target`.
pub fn predicted_key(target: &str, solution_id: &str) -> String {
    format!("{target}{PREDICTED_SUFFIX}:{solution_id}")
}

/// Synthesised column name carrying a solution's residual for `target`.
pub fn error_key(target: &str, solution_id: &str) -> String {
    format!("{target}{ERROR_SUFFIX}:{solution_id}")
}

/// Virtual truth column name for joined result projections.
pub fn target_key(target: &str) -> String {
    format!("{target}{TARGET_SUFFIX}")
}

pub fn is_predicted_key(key: &str) -> bool {
    key.contains(PREDICTED_SUFFIX)
}

pub fn is_error_key(key: &str) -> bool {
    key.contains(ERROR_SUFFIX)
}

pub fn is_correctness_key(key: &str) -> bool {
    key.contains(CORRECTNESS_SUFFIX)
}

pub fn is_result_key(key: &str) -> bool {
    is_predicted_key(key) || is_error_key(key) || is_correctness_key(key)
}

/// Strips the result suffix (and any trailing solution id) from a
/// synthesised key, returning the base target name.
pub fn strip_key_suffix(key: &str) -> &str {
    for suffix in [PREDICTED_SUFFIX, ERROR_SUFFIX, CORRECTNESS_SUFFIX, TARGET_SUFFIX] {
        if let Some(pos) = key.find(suffix) {
            return &key[..pos];
        }
    }
    key
}

/// Separates filters targeting synthesised result columns from generic data
/// filters. At most one predicted, one residual and one correctness filter
/// may be present; more is a contract violation.
pub fn split_result_filters(filters: &[Filter]) -> Result<SplitFilters> {
    let mut split = SplitFilters::default();
    for filter in filters {
        let key = filter.key();
        if is_predicted_key(key) {
            if split.predicted.replace(filter.clone()).is_some() {
                return Err(Error::InvalidFilter(
                    "more than one predicted filter supplied".into(),
                ));
            }
        } else if is_correctness_key(key) {
            if split.correctness.replace(filter.clone()).is_some() {
                return Err(Error::InvalidFilter(
                    "more than one correctness filter supplied".into(),
                ));
            }
        } else if is_error_key(key) {
            match filter {
                Filter::Numerical { .. } => {
                    if split.residual.replace(filter.clone()).is_some() {
                        return Err(Error::InvalidFilter(
                            "more than one residual filter supplied".into(),
                        ));
                    }
                }
                Filter::Categorical { .. } => {
                    if split.correctness.replace(filter.clone()).is_some() {
                        return Err(Error::InvalidFilter(
                            "more than one correctness filter supplied".into(),
                        ));
                    }
                }
                _ => {
                    return Err(Error::InvalidFilter(format!(
                        "unsupported filter shape for result key `{key}`"
                    )))
                }
            }
        } else {
            split.generic.push(filter.clone());
        }
    }
    Ok(split)
}

/// Produces the projection list for a fetch: the selected variables expanded
/// with any generated companion columns, with the reserved index column
/// appended when absent.
pub fn to_column_selection(selected: &[String], variables: &[Variable]) -> Vec<String> {
    use crate::model::types::{
        has_cluster_var, has_feature_var, CLUSTER_VAR_PREFIX, FEATURE_VAR_PREFIX,
    };

    let mut columns = Vec::new();
    for key in selected {
        let Some(variable) = variables.iter().find(|v| &v.key == key) else {
            continue;
        };
        columns.push(variable.key.clone());
        if has_feature_var(&variable.ty) {
            let feature_key = format!("{FEATURE_VAR_PREFIX}{key}");
            if variables.iter().any(|v| v.key == feature_key) {
                columns.push(feature_key);
            }
        }
        if has_cluster_var(&variable.ty) {
            let cluster_key = format!("{CLUSTER_VAR_PREFIX}{key}");
            if variables.iter().any(|v| v.key == cluster_key) {
                columns.push(cluster_key);
            }
        }
    }
    if !columns.iter().any(|c| c == ROW_INDEX_KEY) {
        columns.push(ROW_INDEX_KEY.to_string());
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types;
    use crate::model::variable::VariableRole;

    fn var(key: &str, ty: &str) -> Variable {
        Variable {
            key: key.to_string(),
            display_label: key.to_string(),
            ty: ty.to_string(),
            original_type: ty.to_string(),
            importance: 0.0,
            role: VariableRole::Data,
        }
    }

    #[test]
    fn decodes_tagged_union() {
        let raw = r#"{"type":"numerical","key":"price","mode":"include","min":1.0,"max":9.5}"#;
        let filter: Filter = serde_json::from_str(raw).unwrap();
        assert_eq!(
            filter,
            Filter::Numerical {
                key: "price".into(),
                mode: FilterMode::Include,
                min: 1.0,
                max: 9.5,
            }
        );
    }

    #[test]
    fn split_pulls_result_filters_out() {
        let filters = vec![
            Filter::Categorical {
                key: "region".into(),
                mode: FilterMode::Include,
                categories: vec!["N".into()],
            },
            Filter::Numerical {
                key: error_key("price", "sol-1"),
                mode: FilterMode::Include,
                min: -5.0,
                max: 5.0,
            },
            Filter::Categorical {
                key: predicted_key("price", "sol-1"),
                mode: FilterMode::Include,
                categories: vec!["10".into()],
            },
        ];
        let split = split_result_filters(&filters).unwrap();
        assert_eq!(split.generic.len(), 1);
        assert!(split.predicted.is_some());
        assert!(split.residual.is_some());
        assert!(split.correctness.is_none());
    }

    #[test]
    fn duplicate_residual_filter_is_rejected() {
        let residual = Filter::Numerical {
            key: error_key("price", "sol-1"),
            mode: FilterMode::Include,
            min: -1.0,
            max: 1.0,
        };
        let err = split_result_filters(&[residual.clone(), residual]).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(_)));
    }

    #[test]
    fn categorical_error_filter_is_correctness() {
        let filters = vec![Filter::Categorical {
            key: error_key("species", "sol-2"),
            mode: FilterMode::Include,
            categories: vec!["correct".into()],
        }];
        let split = split_result_filters(&filters).unwrap();
        assert!(split.correctness.is_some());
        assert!(split.residual.is_none());
    }

    #[test]
    fn selection_appends_index_column() {
        let vars = vec![
            var("sepal_length", types::FLOAT_TYPE),
            var("species", types::CATEGORICAL_TYPE),
            var(types::ROW_INDEX_KEY, types::INTEGER_TYPE),
        ];
        let selection = to_column_selection(
            &["sepal_length".to_string(), "species".to_string()],
            &vars,
        );
        assert_eq!(selection, vec!["sepal_length", "species", types::ROW_INDEX_KEY]);
    }

    #[test]
    fn unknown_filter_key_fails_validation() {
        let vars = vec![var("a", types::FLOAT_TYPE)];
        let params = FilterParams {
            size: 10,
            variables: vec!["a".into()],
            filters: vec![Filter::Numerical {
                key: "missing".into(),
                mode: FilterMode::Include,
                min: 0.0,
                max: 1.0,
            }],
        };
        assert!(matches!(
            params.validate(&vars),
            Err(Error::InvalidFilter(_))
        ));
    }

    #[test]
    fn strip_suffix_recovers_target() {
        assert_eq!(strip_key_suffix(&predicted_key("price", "s1")), "price");
        assert_eq!(strip_key_suffix(&error_key("price", "s1")), "price");
        assert_eq!(strip_key_suffix("price"), "price");
    }
}
